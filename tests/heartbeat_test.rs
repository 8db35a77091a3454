//! Sweep behavior driven directly against the library: stale sessions are
//! removed through the same idempotent cleanup path as a clean disconnect.

use std::time::Duration;

use axum::extract::ws::Message;
use serde_json::Value;
use tokio::sync::mpsc;

use relay_server::registry::Session;
use relay_server::state::AppState;
use relay_server::ws::{actor, heartbeat};

fn test_state() -> AppState {
    AppState::new(Duration::from_secs(30))
}

/// Register a session backed by an in-process channel standing in for the
/// connection's writer queue.
fn fake_connection(state: &AppState, name: &str) -> (Session, mpsc::UnboundedReceiver<Message>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let session = state.registry.register(tx, name).expect("register");
    (session, rx)
}

/// Drain everything currently queued for a connection, split into parsed
/// text frames and counts of control frames.
fn drain(rx: &mut mpsc::UnboundedReceiver<Message>) -> (Vec<Value>, usize, usize) {
    let mut texts = Vec::new();
    let mut pings = 0;
    let mut closes = 0;
    while let Ok(msg) = rx.try_recv() {
        match msg {
            Message::Text(text) => {
                texts.push(serde_json::from_str(text.as_str()).expect("invalid JSON frame"))
            }
            Message::Ping(_) => pings += 1,
            Message::Close(_) => closes += 1,
            _ => {}
        }
    }
    (texts, pings, closes)
}

#[tokio::test]
async fn unanswered_probe_drops_session_within_two_sweeps() {
    let state = test_state();
    let (ghost, mut ghost_rx) = fake_connection(&state, "ghost");
    let (watcher, mut watcher_rx) = fake_connection(&state, "watcher");

    // First sweep: both sessions are probed and their flags cleared.
    heartbeat::sweep_once(&state);

    // The watcher answers its probe; the ghost never does.
    watcher.mark_alive();

    // Second sweep: the ghost missed a full period and is dropped.
    heartbeat::sweep_once(&state);

    assert!(state.registry.lookup(ghost.user_id).is_none());
    assert!(state.registry.lookup(watcher.user_id).is_some());

    // The ghost connection was probed once, then force-closed. It receives
    // no departure notice of its own.
    let (ghost_texts, ghost_pings, ghost_closes) = drain(&mut ghost_rx);
    assert_eq!(ghost_pings, 1);
    assert_eq!(ghost_closes, 1);
    assert!(ghost_texts.is_empty());

    // The watcher observed exactly one "left" notice and one roster push
    // that no longer lists the ghost.
    let (watcher_texts, watcher_pings, _) = drain(&mut watcher_rx);
    assert!(watcher_pings >= 1);

    let notices: Vec<&Value> = watcher_texts
        .iter()
        .filter(|frame| frame["type"] == "message")
        .collect();
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0]["data"]["text"], "ghost left the chat.");
    assert_eq!(notices[0]["data"]["isSystem"], true);

    let rosters: Vec<&Value> = watcher_texts
        .iter()
        .filter(|frame| frame["type"] == "usersList")
        .collect();
    assert_eq!(rosters.len(), 1);
    let users = rosters[0]["users"].as_array().unwrap();
    assert!(users
        .iter()
        .all(|u| u["id"].as_u64().unwrap() != ghost.user_id));
}

#[tokio::test]
async fn answered_probes_keep_sessions_alive_indefinitely() {
    let state = test_state();
    let (session, mut rx) = fake_connection(&state, "steady");

    for _ in 0..5 {
        heartbeat::sweep_once(&state);
        session.mark_alive();
    }

    assert!(state.registry.lookup(session.user_id).is_some());
    let (texts, pings, closes) = drain(&mut rx);
    assert_eq!(pings, 5);
    assert_eq!(closes, 0);
    assert!(texts.is_empty());
}

#[tokio::test]
async fn raced_cleanup_emits_a_single_departure() {
    let state = test_state();
    let (leaver, _leaver_rx) = fake_connection(&state, "leaver");
    let (watcher, mut watcher_rx) = fake_connection(&state, "watcher");

    // Simulate the explicit close and the heartbeat timeout both tearing
    // down the same session.
    actor::cleanup_session(&state, &leaver);
    actor::cleanup_session(&state, &leaver);

    let (watcher_texts, _, _) = drain(&mut watcher_rx);
    let notices = watcher_texts
        .iter()
        .filter(|frame| frame["type"] == "message")
        .count();
    let rosters = watcher_texts
        .iter()
        .filter(|frame| frame["type"] == "usersList")
        .count();
    assert_eq!(notices, 1, "exactly one departure notice");
    assert_eq!(rosters, 1, "exactly one roster push");
    assert!(state.registry.lookup(watcher.user_id).is_some());
}

#[tokio::test]
async fn cleanup_races_sweep_without_double_notification() {
    let state = test_state();
    let (doomed, _doomed_rx) = fake_connection(&state, "doomed");
    let (watcher, mut watcher_rx) = fake_connection(&state, "watcher");

    // The doomed session answers nothing; an explicit cleanup lands between
    // the two sweeps, before the timeout path would have fired.
    heartbeat::sweep_once(&state);
    watcher.mark_alive();
    actor::cleanup_session(&state, &doomed);
    heartbeat::sweep_once(&state);
    // A later explicit close for the already-swept session is a no-op.
    actor::cleanup_session(&state, &doomed);

    let (watcher_texts, _, _) = drain(&mut watcher_rx);
    let doomed_notices = watcher_texts
        .iter()
        .filter(|frame| {
            frame["type"] == "message" && frame["data"]["text"] == "doomed left the chat."
        })
        .count();
    assert_eq!(doomed_notices, 1);
}
