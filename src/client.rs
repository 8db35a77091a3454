//! Reconnecting WebSocket client for the relay protocol.
//!
//! The recovery contract on connection loss: retry with a fixed delay,
//! re-send `login` with the same display name (a fresh user id is expected;
//! the protocol does not guarantee identity continuity), then `getUsers` to
//! resynchronize the roster. The roster is also re-polled on a fixed
//! interval as a defense against a missed presence push.

use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::chat::messages::ChatMessage;
use crate::chat::presence::RosterEntry;
use crate::registry::PUBLIC_CHANNEL_ID;
use crate::ws::protocol::{ClientEnvelope, ServerEnvelope};

type WsWriter = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsReader = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Client-side settings. The defaults mirror the protocol contract: 3 s
/// between reconnect attempts, 5 s between roster re-polls.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub url: String,
    pub username: String,
    pub reconnect_delay: Duration,
    pub roster_poll_interval: Duration,
}

impl ClientConfig {
    pub fn new(url: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            username: username.into(),
            reconnect_delay: Duration::from_secs(3),
            roster_poll_interval: Duration::from_secs(5),
        }
    }
}

/// Events surfaced to the embedding application.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// `login_success` received. After a reconnect this carries a fresh id.
    Connected { user_id: u64, username: String },
    /// A delivered chat message, filed under `chat_id`.
    Message { data: ChatMessage, chat_id: u64 },
    /// A roster snapshot, pushed or polled.
    Roster(Vec<RosterEntry>),
    /// A server-reported protocol error (one-line notice).
    ServerError(String),
    /// Connection lost; the client retries automatically.
    Disconnected,
}

enum Command {
    Send { text: String, receiver_id: u64 },
    RequestRoster,
    Shutdown,
}

/// Cloneable handle for driving a running client task.
#[derive(Clone)]
pub struct ClientHandle {
    cmd_tx: mpsc::UnboundedSender<Command>,
}

impl ClientHandle {
    /// Queue a message. `PUBLIC_CHANNEL_ID` addresses the public channel.
    pub fn send_message(&self, text: impl Into<String>, receiver_id: u64) {
        let _ = self.cmd_tx.send(Command::Send {
            text: text.into(),
            receiver_id,
        });
    }

    /// Queue a public-channel message.
    pub fn send_public(&self, text: impl Into<String>) {
        self.send_message(text, PUBLIC_CHANNEL_ID);
    }

    /// Ask for a roster snapshot now, outside the regular poll.
    pub fn request_roster(&self) {
        let _ = self.cmd_tx.send(Command::RequestRoster);
    }

    /// Stop the client task. The current connection is closed cleanly and
    /// no reconnect is attempted.
    pub fn shutdown(&self) {
        let _ = self.cmd_tx.send(Command::Shutdown);
    }
}

/// Spawns the client task and hands back a handle plus the event stream.
pub struct ReconnectingClient;

impl ReconnectingClient {
    /// Spawn the client task. Events arrive on the returned receiver until
    /// `shutdown` is called or the handle and all its clones are dropped.
    pub fn spawn(config: ClientConfig) -> (ClientHandle, mpsc::UnboundedReceiver<ClientEvent>) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        tokio::spawn(run_client(config, cmd_rx, event_tx));
        (ClientHandle { cmd_tx }, event_rx)
    }
}

enum Drive {
    Lost,
    Shutdown,
}

async fn run_client(
    config: ClientConfig,
    mut cmd_rx: mpsc::UnboundedReceiver<Command>,
    event_tx: mpsc::UnboundedSender<ClientEvent>,
) {
    loop {
        let stream = match connect_async(config.url.as_str()).await {
            Ok((stream, _)) => stream,
            Err(e) => {
                tracing::debug!(error = %e, url = %config.url, "connect failed, retrying");
                if wait_reconnect(&mut cmd_rx, config.reconnect_delay).await {
                    return;
                }
                continue;
            }
        };

        match drive_connection(&config, stream, &mut cmd_rx, &event_tx).await {
            Drive::Shutdown => return,
            Drive::Lost => {
                let _ = event_tx.send(ClientEvent::Disconnected);
                if wait_reconnect(&mut cmd_rx, config.reconnect_delay).await {
                    return;
                }
            }
        }
    }
}

/// Sleep out the reconnect delay. Returns true if a shutdown arrived (or the
/// handle was dropped) while waiting. Sends queued while disconnected are
/// dropped; there is no offline buffer.
async fn wait_reconnect(cmd_rx: &mut mpsc::UnboundedReceiver<Command>, delay: Duration) -> bool {
    let sleep = tokio::time::sleep(delay);
    tokio::pin!(sleep);
    loop {
        tokio::select! {
            _ = &mut sleep => return false,
            cmd = cmd_rx.recv() => match cmd {
                Some(Command::Shutdown) | None => return true,
                Some(_) => {}
            },
        }
    }
}

/// Drive one live connection: re-establish identity and roster state, then
/// multiplex inbound frames, outbound commands, and the roster poll timer.
async fn drive_connection(
    config: &ClientConfig,
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    cmd_rx: &mut mpsc::UnboundedReceiver<Command>,
    event_tx: &mpsc::UnboundedSender<ClientEvent>,
) -> Drive {
    let (mut write, mut read): (WsWriter, WsReader) = stream.split();

    let login = ClientEnvelope::Login {
        username: config.username.clone(),
    };
    if send_envelope(&mut write, &login).await.is_err()
        || send_envelope(&mut write, &ClientEnvelope::GetUsers).await.is_err()
    {
        return Drive::Lost;
    }

    let mut poll = tokio::time::interval(config.roster_poll_interval);
    // Skip the immediate tick; the explicit getUsers above covers it.
    poll.tick().await;

    loop {
        tokio::select! {
            frame = read.next() => match frame {
                Some(Ok(Message::Text(text))) => handle_server_frame(text.as_str(), event_tx),
                Some(Ok(Message::Ping(data))) => {
                    if write.send(Message::Pong(data)).await.is_err() {
                        return Drive::Lost;
                    }
                }
                Some(Ok(Message::Close(_))) | None => return Drive::Lost,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!(error = %e, "client receive error");
                    return Drive::Lost;
                }
            },
            cmd = cmd_rx.recv() => match cmd {
                Some(Command::Send { text, receiver_id }) => {
                    let envelope = ClientEnvelope::Message { text, receiver_id };
                    if send_envelope(&mut write, &envelope).await.is_err() {
                        return Drive::Lost;
                    }
                }
                Some(Command::RequestRoster) => {
                    if send_envelope(&mut write, &ClientEnvelope::GetUsers).await.is_err() {
                        return Drive::Lost;
                    }
                }
                Some(Command::Shutdown) | None => {
                    let _ = write.send(Message::Close(None)).await;
                    return Drive::Shutdown;
                }
            },
            _ = poll.tick() => {
                if send_envelope(&mut write, &ClientEnvelope::GetUsers).await.is_err() {
                    return Drive::Lost;
                }
            }
        }
    }
}

fn handle_server_frame(text: &str, event_tx: &mpsc::UnboundedSender<ClientEvent>) {
    let envelope = match serde_json::from_str::<ServerEnvelope>(text) {
        Ok(envelope) => envelope,
        Err(e) => {
            tracing::debug!(error = %e, "unrecognized server frame");
            return;
        }
    };

    let event = match envelope {
        ServerEnvelope::LoginSuccess { user_id, username } => {
            ClientEvent::Connected { user_id, username }
        }
        ServerEnvelope::Message { data, chat_id } => ClientEvent::Message { data, chat_id },
        ServerEnvelope::UsersList { users } => ClientEvent::Roster(users),
        ServerEnvelope::Error { message } => ClientEvent::ServerError(message),
    };
    let _ = event_tx.send(event);
}

async fn send_envelope(
    write: &mut WsWriter,
    envelope: &ClientEnvelope,
) -> Result<(), tokio_tungstenite::tungstenite::Error> {
    match serde_json::to_string(envelope) {
        Ok(text) => write.send(Message::text(text)).await,
        Err(_) => Ok(()),
    }
}
