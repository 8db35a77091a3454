//! Wire envelopes and inbound dispatch.
//!
//! Envelopes are internally-tagged JSON over text frames
//! (`{"type": "login", ...}`). Two top-level enums cover the two directions;
//! anything that fails to parse is answered with an error envelope and the
//! connection stays open.

use serde::{Deserialize, Serialize};

use crate::chat::{messages, presence};
use crate::chat::messages::ChatMessage;
use crate::chat::presence::RosterEntry;
use crate::registry::{RegistryError, Session, PUBLIC_CHANNEL_ID};
use crate::state::AppState;
use crate::ws::broadcast::send_to_sender;
use crate::ws::ConnectionSender;

// ---------------------------------------------------------------------------
// Client -> Server
// ---------------------------------------------------------------------------

/// Envelopes accepted from clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientEnvelope {
    /// Authenticate this connection with a display name. Valid only once,
    /// before any other envelope kind.
    #[serde(rename = "login")]
    Login { username: String },

    /// Send a message. `receiverId` 0 (or absent) addresses the public
    /// channel; any other value must name a currently registered user.
    #[serde(rename = "message")]
    Message {
        text: String,
        #[serde(rename = "receiverId", default)]
        receiver_id: u64,
    },

    /// Request the current roster snapshot.
    #[serde(rename = "getUsers")]
    GetUsers,
}

// ---------------------------------------------------------------------------
// Server -> Client
// ---------------------------------------------------------------------------

/// Envelopes sent to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEnvelope {
    /// Confirms identity assignment after a successful login.
    #[serde(rename = "login_success")]
    LoginSuccess {
        #[serde(rename = "userId")]
        user_id: u64,
        username: String,
    },

    /// Delivers a chat message. `chatId` names the chat the receiver should
    /// file it under: 0 for public traffic, the conversation peer's id for
    /// direct traffic.
    #[serde(rename = "message")]
    Message {
        data: ChatMessage,
        #[serde(rename = "chatId")]
        chat_id: u64,
    },

    /// Roster snapshot; the `{id: 0}` public-channel entry is always first.
    #[serde(rename = "usersList")]
    UsersList { users: Vec<RosterEntry> },

    /// Any recoverable failure, reported as a one-line notice.
    #[serde(rename = "error")]
    Error { message: String },
}

/// Reply to the caller with an error envelope. All protocol failures are
/// recoverable; none of them close the connection.
pub fn send_error(tx: &ConnectionSender, message: &str) {
    send_to_sender(
        tx,
        &ServerEnvelope::Error {
            message: message.to_string(),
        },
    );
}

/// Handle one inbound text frame: decode the envelope and dispatch.
///
/// `bound` is the session this connection authenticated as, owned by the
/// connection actor; it is the only session state the router touches.
pub fn handle_text_frame(
    text: &str,
    tx: &ConnectionSender,
    state: &AppState,
    bound: &mut Option<Session>,
) {
    let envelope = match serde_json::from_str::<ClientEnvelope>(text) {
        Ok(envelope) => envelope,
        Err(e) => {
            tracing::debug!(error = %e, "failed to decode envelope");
            send_error(tx, "malformed envelope");
            return;
        }
    };

    match envelope {
        ClientEnvelope::Login { username } => handle_login(&username, tx, state, bound),
        ClientEnvelope::Message { text, receiver_id } => {
            handle_message(text, receiver_id, tx, state, bound)
        }
        ClientEnvelope::GetUsers => presence::push_to_one(tx, &state.registry),
    }
}

/// Authenticate the connection. On success the join is announced on the
/// public channel, the caller gets `login_success`, and everyone gets a
/// fresh roster push, in that order.
fn handle_login(
    username: &str,
    tx: &ConnectionSender,
    state: &AppState,
    bound: &mut Option<Session>,
) {
    if bound.is_some() {
        // Policy: a second login on the same connection is rejected rather
        // than binding a second identity. The first session stays intact.
        send_error(tx, "already logged in");
        return;
    }

    let username = username.trim();
    if username.is_empty() {
        send_error(tx, "username must not be empty");
        return;
    }

    match state.registry.register(tx.clone(), username) {
        Ok(session) => {
            tracing::info!(
                user_id = session.user_id,
                username = %session.display_name,
                "session registered"
            );

            messages::announce_join(&state.registry, &session.display_name);
            send_to_sender(
                tx,
                &ServerEnvelope::LoginSuccess {
                    user_id: session.user_id,
                    username: session.display_name.clone(),
                },
            );
            presence::push_to_all(&state.registry);

            *bound = Some(session);
        }
        Err(err @ RegistryError::NameTaken(_)) => {
            tracing::debug!(username = %username, "login rejected: {}", err);
            send_error(tx, &err.to_string());
        }
    }
}

/// Route a chat message: broadcast for the public channel, targeted delivery
/// plus sender echo otherwise.
fn handle_message(
    text: String,
    receiver_id: u64,
    tx: &ConnectionSender,
    state: &AppState,
    bound: &Option<Session>,
) {
    let Some(session) = bound.as_ref() else {
        send_error(tx, "not authenticated");
        return;
    };

    let message = ChatMessage::from_user(session, text, receiver_id);

    if receiver_id == PUBLIC_CHANNEL_ID {
        messages::deliver_public(&state.registry, message);
    } else {
        match state.registry.lookup(receiver_id) {
            Some(target) => messages::deliver_direct(session, &target, message),
            None => send_error(tx, "user not online"),
        }
    }
}
