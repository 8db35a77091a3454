pub mod actor;
pub mod broadcast;
pub mod handler;
pub mod heartbeat;
pub mod protocol;

use tokio::sync::mpsc;

/// Type alias for the sender half of a WebSocket connection's channel.
/// Other parts of the system can clone this to push frames to a specific
/// client; all frames for one connection flow through this single writer.
pub type ConnectionSender = mpsc::UnboundedSender<axum::extract::ws::Message>;
