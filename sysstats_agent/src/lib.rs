//! sysstats agent: samples host counters from `/proc` and streams them as JSON
//! to WebSocket clients, with per-client process monitoring and one-shot
//! discovery queries.

pub mod cli;
pub mod clock;
pub mod collectors;
pub mod config;
pub mod lifecycle;
pub mod monitor;
pub mod procfs;
pub mod proto;
pub mod response;
pub mod sampler;
pub mod session;
pub mod state;
pub mod types;
pub mod ws;

use axum::{routing::get, Router};

use crate::state::AppState;

/// Router serving the single `/ws` endpoint.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws::ws_handler))
        .with_state(state)
}
