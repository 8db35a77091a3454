//! ReconnectingClient behavior against a live server: initial login + roster
//! resync, the periodic roster re-poll, error surfacing, and automatic
//! reconnection after the server goes away.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::mpsc;

use relay_server::client::{ClientConfig, ClientEvent, ReconnectingClient};
use relay_server::routes;
use relay_server::state::AppState;

async fn start_test_server() -> SocketAddr {
    let state = AppState::new(Duration::from_secs(60));
    let app = routes::build_router(state);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    addr
}

fn test_config(addr: SocketAddr, username: &str) -> ClientConfig {
    let mut config = ClientConfig::new(format!("ws://{}/ws", addr), username);
    config.reconnect_delay = Duration::from_millis(100);
    config.roster_poll_interval = Duration::from_millis(200);
    config
}

async fn next_event(events: &mut mpsc::UnboundedReceiver<ClientEvent>) -> ClientEvent {
    tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("timed out waiting for a client event")
        .expect("client task ended")
}

async fn wait_for_connected(events: &mut mpsc::UnboundedReceiver<ClientEvent>) -> u64 {
    loop {
        if let ClientEvent::Connected { user_id, .. } = next_event(events).await {
            return user_id;
        }
    }
}

#[tokio::test]
async fn client_logs_in_and_synchronizes_the_roster() {
    let addr = start_test_server().await;
    let (handle, mut events) = ReconnectingClient::spawn(test_config(addr, "nomad"));

    let user_id = wait_for_connected(&mut events).await;
    assert_eq!(user_id, 1);

    // A roster arrives from the join push or the explicit getUsers; either
    // way it lists the public channel first and the client itself.
    let roster = loop {
        if let ClientEvent::Roster(roster) = next_event(&mut events).await {
            break roster;
        }
    };
    assert_eq!(roster[0].id, 0);
    assert_eq!(roster[0].username, "Public Channel");
    assert!(roster.iter().any(|entry| entry.username == "nomad"));

    // A public send comes back as a delivery, not a local echo.
    handle.send_public("hello out there");
    let (data, chat_id) = loop {
        if let ClientEvent::Message { data, chat_id } = next_event(&mut events).await {
            if data.is_system.is_none() {
                break (data, chat_id);
            }
        }
    };
    assert_eq!(chat_id, 0);
    assert_eq!(data.text, "hello out there");
    assert_eq!(data.username, "nomad");
    assert_eq!(data.sender_id, Some(user_id));

    // An explicit roster request outside the poll also gets answered.
    handle.request_roster();
    let roster = loop {
        if let ClientEvent::Roster(roster) = next_event(&mut events).await {
            break roster;
        }
    };
    assert_eq!(roster[0].id, 0);

    handle.shutdown();
}

#[tokio::test]
async fn client_repolls_the_roster_on_an_interval() {
    let addr = start_test_server().await;
    let (handle, mut events) = ReconnectingClient::spawn(test_config(addr, "poller"));

    wait_for_connected(&mut events).await;

    // Without any request from us, the poll timer keeps roster snapshots
    // coming as a defense against a missed push.
    let mut rosters = 0;
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while rosters < 3 && tokio::time::Instant::now() < deadline {
        if let Ok(Some(ClientEvent::Roster(_))) =
            tokio::time::timeout(Duration::from_millis(500), events.recv()).await
        {
            rosters += 1;
        }
    }
    assert!(rosters >= 3, "expected repeated roster polls, got {}", rosters);

    handle.shutdown();
}

#[tokio::test]
async fn client_surfaces_server_errors() {
    let addr = start_test_server().await;
    let (first_handle, mut first_events) = ReconnectingClient::spawn(test_config(addr, "dup"));
    wait_for_connected(&mut first_events).await;

    // Same display name: the server rejects the second registration.
    let (second_handle, mut second_events) = ReconnectingClient::spawn(test_config(addr, "dup"));
    let message = loop {
        if let ClientEvent::ServerError(message) = next_event(&mut second_events).await {
            break message;
        }
    };
    assert!(message.contains("taken"), "unexpected error: {}", message);

    first_handle.shutdown();
    second_handle.shutdown();
}

#[tokio::test]
async fn client_reconnects_and_reestablishes_session_after_restart() {
    // Learn a free port, then serve on it from a runtime we can kill to take
    // every open connection down with it.
    let probe = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = probe.local_addr().unwrap();
    drop(probe);

    let first_runtime = tokio::runtime::Runtime::new().unwrap();
    first_runtime.spawn(serve_at(addr));

    let (handle, mut events) = ReconnectingClient::spawn(test_config(addr, "phoenix"));
    let first_id = wait_for_connected(&mut events).await;
    assert_eq!(first_id, 1);

    // Kill the server; the client observes the loss and starts retrying.
    first_runtime.shutdown_background();
    loop {
        if let ClientEvent::Disconnected = next_event(&mut events).await {
            break;
        }
    }

    // Bring a fresh server up on the same address; the client re-logins with
    // the same display name and gets an id issued by the new registry.
    let second_runtime = tokio::runtime::Runtime::new().unwrap();
    second_runtime.spawn(serve_at(addr));

    let second_id = wait_for_connected(&mut events).await;
    assert!(second_id >= 1);

    handle.shutdown();
    second_runtime.shutdown_background();
}

async fn serve_at(addr: SocketAddr) {
    let state = AppState::new(Duration::from_secs(60));
    let app = routes::build_router(state);

    // The port may still be releasing from a previous server instance.
    let listener = loop {
        match TcpListener::bind(addr).await {
            Ok(listener) => break listener,
            Err(_) => tokio::time::sleep(Duration::from_millis(50)).await,
        }
    };

    axum::serve(listener, app).await.unwrap();
}
