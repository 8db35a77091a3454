//! Chat message payloads and delivery.
//!
//! Messages are immutable once dispatched and never persisted; the relay
//! only moves them between live connections. Timestamps are assigned here,
//! at dispatch time, never by the client.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::registry::{ConnectionRegistry, Session, PUBLIC_CHANNEL_ID};
use crate::ws::broadcast::{broadcast_to_all, send_to_session};
use crate::ws::protocol::ServerEnvelope;

/// Label synthetic join/leave notices are attributed to.
pub const SYSTEM_LABEL: &str = "System";

/// The `data` payload of a delivered `message` envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub text: String,
    /// Display name of the sender (or the system label).
    pub username: String,
    /// RFC 3339, assigned at dispatch time.
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_system: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub receiver_id: Option<u64>,
}

impl ChatMessage {
    fn dispatch_timestamp() -> String {
        Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    /// Build a message from an authenticated sender. The sender id comes
    /// from the session, never from the client payload.
    pub fn from_user(session: &Session, text: String, receiver_id: u64) -> Self {
        Self {
            text,
            username: session.display_name.clone(),
            timestamp: Self::dispatch_timestamp(),
            is_system: None,
            sender_id: Some(session.user_id),
            receiver_id: Some(receiver_id),
        }
    }

    /// Build a synthetic system notice. System notices always target the
    /// public channel.
    pub fn system(text: String) -> Self {
        Self {
            text,
            username: SYSTEM_LABEL.to_string(),
            timestamp: Self::dispatch_timestamp(),
            is_system: Some(true),
            sender_id: None,
            receiver_id: None,
        }
    }
}

/// Deliver a message on the public channel: every registered session,
/// including the sender, receives it (clients render only what they
/// receive; there is no client-side echo).
pub fn deliver_public(registry: &ConnectionRegistry, message: ChatMessage) {
    let envelope = ServerEnvelope::Message {
        data: message,
        chat_id: PUBLIC_CHANNEL_ID,
    };
    broadcast_to_all(registry, &envelope);
}

/// Deliver a direct message to its target and echo it back to the sender.
/// `chatId` names the conversation peer from each receiver's perspective.
pub fn deliver_direct(sender: &Session, target: &Session, message: ChatMessage) {
    send_to_session(
        target,
        &ServerEnvelope::Message {
            data: message.clone(),
            chat_id: sender.user_id,
        },
    );
    send_to_session(
        sender,
        &ServerEnvelope::Message {
            data: message,
            chat_id: target.user_id,
        },
    );
}

/// Announce a join on the public channel.
pub fn announce_join(registry: &ConnectionRegistry, display_name: &str) {
    deliver_public(
        registry,
        ChatMessage::system(format!("{} joined the chat.", display_name)),
    );
}

/// Announce a departure on the public channel.
pub fn announce_leave(registry: &ConnectionRegistry, display_name: &str) {
    deliver_public(
        registry,
        ChatMessage::system(format!("{} left the chat.", display_name)),
    );
}
