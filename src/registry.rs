//! Session bookkeeping: the single ownership authority for live connections.
//!
//! The registry maps a user id to its Session and is the only place allowed
//! to add or remove them. It performs no network I/O itself; delivery happens
//! through the per-connection senders it hands out.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::ws::ConnectionSender;

/// Reserved roster id for the broadcast destination. Never assigned to a
/// real session; the id counter starts above it.
pub const PUBLIC_CHANNEL_ID: u64 = 0;

/// One authenticated participant bound to one live connection.
///
/// The `sender` is the connection's single-writer queue: pushing a frame here
/// is safe even while the connection is being torn down, because a send into
/// a closed channel is a no-op.
#[derive(Debug, Clone)]
pub struct Session {
    pub user_id: u64,
    pub display_name: String,
    pub sender: ConnectionSender,
    /// Liveness flag: cleared by each heartbeat sweep, restored when the
    /// peer answers the probe.
    alive: Arc<AtomicBool>,
}

impl Session {
    /// Record that the peer answered a liveness probe.
    pub fn mark_alive(&self) {
        self.alive.store(true, Ordering::SeqCst);
    }

    /// Clear the liveness flag, returning the previous value. A `false`
    /// return means the peer never answered the last probe.
    pub fn take_alive(&self) -> bool {
        self.alive.swap(false, Ordering::SeqCst)
    }
}

/// Errors surfaced by session registration.
#[derive(Debug)]
pub enum RegistryError {
    /// Another live session already holds this display name.
    NameTaken(String),
}

impl std::fmt::Display for RegistryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NameTaken(name) => write!(f, "username \"{}\" already taken", name),
        }
    }
}

/// Registry of live sessions, keyed by user id. Display names are tracked in
/// a second map so uniqueness can be enforced at registration time.
pub struct ConnectionRegistry {
    sessions: DashMap<u64, Session>,
    names: DashMap<String, u64>,
    next_id: AtomicU64,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
            names: DashMap::new(),
            next_id: AtomicU64::new(PUBLIC_CHANNEL_ID + 1),
        }
    }

    /// Create and store a Session for a freshly authenticated connection.
    ///
    /// Ids are issued monotonically and never reused, so an id observed by
    /// an in-flight direct message can never silently point at a different
    /// participant. Fails if the display name is already held by a live
    /// session.
    pub fn register(
        &self,
        sender: ConnectionSender,
        display_name: &str,
    ) -> Result<Session, RegistryError> {
        match self.names.entry(display_name.to_string()) {
            Entry::Occupied(_) => Err(RegistryError::NameTaken(display_name.to_string())),
            Entry::Vacant(slot) => {
                let user_id = self.next_id.fetch_add(1, Ordering::Relaxed);
                let session = Session {
                    user_id,
                    display_name: display_name.to_string(),
                    sender,
                    alive: Arc::new(AtomicBool::new(true)),
                };
                slot.insert(user_id);
                self.sessions.insert(user_id, session.clone());
                Ok(session)
            }
        }
    }

    /// Remove a session, freeing its display name. Returns `None` if the id
    /// is not registered: explicit close and heartbeat timeout may race to
    /// remove the same session, and only the caller that actually removed it
    /// should emit the departure notifications.
    pub fn unregister(&self, user_id: u64) -> Option<Session> {
        let (_, session) = self.sessions.remove(&user_id)?;
        self.names.remove(&session.display_name);
        Some(session)
    }

    /// Look up a live session for direct delivery.
    pub fn lookup(&self, user_id: u64) -> Option<Session> {
        self.sessions.get(&user_id).map(|entry| entry.value().clone())
    }

    /// Snapshot of all live sessions. Safe to take while registrations and
    /// removals from other connections are in flight.
    pub fn all_sessions(&self) -> Vec<Session> {
        self.sessions.iter().map(|entry| entry.value().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
