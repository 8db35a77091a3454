use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use crate::chat::{messages, presence};
use crate::registry::Session;
use crate::state::AppState;
use crate::ws::protocol;

/// Run the actor-per-connection pattern for a WebSocket.
///
/// Splits the WebSocket into reader and writer halves:
/// - Writer task: owns the sink, forwards frames from an mpsc channel
/// - Reader loop: processes incoming frames, dispatches to the router
///
/// The mpsc channel allows any part of the system to send frames to this
/// client by cloning the sender. The connection starts unauthenticated; the
/// first `login` envelope binds a Session, and from then on the registry
/// holds the sender under that session's id.
pub async fn run_connection(socket: WebSocket, state: AppState) {
    let (ws_sender, mut ws_receiver) = socket.split();
    let (tx, rx) = mpsc::unbounded_channel::<Message>();

    let writer_handle = tokio::spawn(writer_task(ws_sender, rx));

    // Session bound to this connection; None until a login succeeds.
    let mut bound: Option<Session> = None;

    loop {
        match ws_receiver.next().await {
            Some(Ok(msg)) => match msg {
                Message::Text(text) => {
                    protocol::handle_text_frame(text.as_str(), &tx, &state, &mut bound);
                }
                Message::Binary(_) => {
                    // The protocol is JSON over text frames only.
                    protocol::send_error(&tx, "malformed envelope");
                }
                Message::Ping(data) => {
                    let _ = tx.send(Message::Pong(data));
                }
                Message::Pong(_) => {
                    // Peer answered a liveness probe from the heartbeat sweep.
                    if let Some(session) = &bound {
                        session.mark_alive();
                    }
                }
                Message::Close(frame) => {
                    tracing::debug!(reason = ?frame, "client initiated close");
                    break;
                }
            },
            Some(Err(e)) => {
                tracing::debug!(error = %e, "websocket receive error");
                break;
            }
            None => break,
        }
    }

    writer_handle.abort();

    if let Some(session) = bound {
        cleanup_session(&state, &session);
    }
}

/// Tear down a session: unregister it, announce the departure on the public
/// channel, push a fresh roster to everyone left.
///
/// Explicit close and heartbeat timeout both land here and may race; the
/// registry removes the session exactly once, and only that caller emits the
/// notifications.
pub fn cleanup_session(state: &AppState, session: &Session) {
    if let Some(removed) = state.registry.unregister(session.user_id) {
        tracing::info!(
            user_id = removed.user_id,
            username = %removed.display_name,
            "session closed"
        );
        messages::announce_leave(&state.registry, &removed.display_name);
        presence::push_to_all(&state.registry);
    }
}

/// Writer task: receives frames from the mpsc channel and forwards them to
/// the WebSocket sink.
async fn writer_task(
    mut ws_sender: futures_util::stream::SplitSink<WebSocket, Message>,
    mut rx: mpsc::UnboundedReceiver<Message>,
) {
    while let Some(msg) = rx.recv().await {
        if ws_sender.send(msg).await.is_err() {
            // WebSocket send failed, connection is broken
            break;
        }
    }
}
