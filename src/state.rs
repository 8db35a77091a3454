use std::sync::Arc;
use std::time::Duration;

use crate::registry::ConnectionRegistry;

/// Shared application state passed to all handlers via axum State extractor.
#[derive(Clone)]
pub struct AppState {
    /// Live session registry, the single mutation authority.
    pub registry: Arc<ConnectionRegistry>,
    /// Period of the liveness sweep.
    pub heartbeat_interval: Duration,
}

impl AppState {
    pub fn new(heartbeat_interval: Duration) -> Self {
        Self {
            registry: Arc::new(ConnectionRegistry::new()),
            heartbeat_interval,
        }
    }
}
