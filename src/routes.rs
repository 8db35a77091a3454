use axum::{routing::get, Router};

use crate::state::AppState;
use crate::ws::handler as ws_handler;

/// Build the axum Router.
///
/// The relay exposes a single persistent-connection endpoint. Page serving
/// and one-shot user creation are external collaborators and live elsewhere.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler::ws_upgrade))
        .with_state(state)
}
