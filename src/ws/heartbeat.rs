//! Periodic liveness sweep over all registered sessions.
//!
//! Each sweep clears every session's liveness flag and sends a Ping; the
//! connection actor restores the flag when the pong arrives. A session whose
//! flag is still clear at the next sweep missed a whole period and is dropped
//! through the same cleanup path as a clean disconnect, so a half-open
//! connection becomes observable within at most two sweep periods.

use axum::extract::ws::{CloseFrame, Message};
use tokio::time::interval;

use crate::state::AppState;
use crate::ws::actor;

/// Close code sent to a connection dropped for missing two probes.
const CLOSE_STALE: u16 = 1001;

/// Run the sweep timer until the process exits.
pub async fn run(state: AppState) {
    let mut timer = interval(state.heartbeat_interval);
    // Skip the first immediate tick
    timer.tick().await;

    loop {
        timer.tick().await;
        sweep_once(&state);
    }
}

/// One sweep: drop sessions that never answered the previous probe, then
/// probe everyone else.
pub fn sweep_once(state: &AppState) {
    for session in state.registry.all_sessions() {
        if session.take_alive() {
            let _ = session.sender.send(Message::Ping(Vec::new().into()));
        } else {
            tracing::warn!(
                user_id = session.user_id,
                username = %session.display_name,
                "missed two heartbeat probes, dropping connection"
            );
            actor::cleanup_session(state, &session);
            let _ = session.sender.send(Message::Close(Some(CloseFrame {
                code: CLOSE_STALE,
                reason: "heartbeat timeout".into(),
            })));
        }
    }
}
