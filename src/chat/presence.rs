//! Roster snapshot building and presence push.
//!
//! The roster is derived from the registry on every push; there is no
//! separate presence store to fall out of sync.

use serde::{Deserialize, Serialize};

use crate::registry::{ConnectionRegistry, PUBLIC_CHANNEL_ID};
use crate::ws::broadcast::{broadcast_to_all, send_to_sender};
use crate::ws::protocol::ServerEnvelope;
use crate::ws::ConnectionSender;

/// Display name of the synthetic broadcast destination.
pub const PUBLIC_CHANNEL_NAME: &str = "Public Channel";

/// One roster row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RosterEntry {
    pub id: u64,
    pub username: String,
    pub connected: bool,
}

/// Build the current roster: the public-channel pseudo-entry first, then one
/// row per live session in ascending id order. Names are unique because the
/// registry enforces uniqueness at registration time.
pub fn roster_snapshot(registry: &ConnectionRegistry) -> Vec<RosterEntry> {
    let mut sessions = registry.all_sessions();
    sessions.sort_by_key(|session| session.user_id);

    let mut entries = Vec::with_capacity(sessions.len() + 1);
    entries.push(RosterEntry {
        id: PUBLIC_CHANNEL_ID,
        username: PUBLIC_CHANNEL_NAME.to_string(),
        connected: true,
    });
    entries.extend(sessions.into_iter().map(|session| RosterEntry {
        id: session.user_id,
        username: session.display_name,
        connected: true,
    }));
    entries
}

/// Push the roster to every registered session. Used after any join/leave.
pub fn push_to_all(registry: &ConnectionRegistry) {
    let envelope = ServerEnvelope::UsersList {
        users: roster_snapshot(registry),
    };
    broadcast_to_all(registry, &envelope);
}

/// Answer a single `getUsers` request without broadcasting.
pub fn push_to_one(tx: &ConnectionSender, registry: &ConnectionRegistry) {
    let envelope = ServerEnvelope::UsersList {
        users: roster_snapshot(registry),
    };
    send_to_sender(tx, &envelope);
}
