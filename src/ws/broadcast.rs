use axum::extract::ws::Message;

use crate::registry::{ConnectionRegistry, Session};
use crate::ws::protocol::ServerEnvelope;
use crate::ws::ConnectionSender;

/// Serialize an envelope once and send it to every registered session.
pub fn broadcast_to_all(registry: &ConnectionRegistry, envelope: &ServerEnvelope) {
    let text = match serde_json::to_string(envelope) {
        Ok(text) => text,
        Err(_) => return,
    };

    for session in registry.all_sessions() {
        let _ = session.sender.send(Message::Text(text.clone().into()));
    }
}

/// Send an envelope to a single session.
pub fn send_to_session(session: &Session, envelope: &ServerEnvelope) {
    send_to_sender(&session.sender, envelope);
}

/// Send an envelope through a raw connection sender. Used for replies to
/// connections that have not authenticated yet.
pub fn send_to_sender(tx: &ConnectionSender, envelope: &ServerEnvelope) {
    if let Ok(text) = serde_json::to_string(envelope) {
        let _ = tx.send(Message::Text(text.into()));
    }
}
