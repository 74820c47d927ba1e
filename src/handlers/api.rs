//! Health and status endpoints

use std::sync::Arc;

use axum::extract::State;

use crate::state::AppState;

/// Liveness probe; also served at `/`.
pub async fn health_check() -> &'static str {
    "ok"
}

/// Short status line with the active-call gauge.
pub async fn status(State(state): State<Arc<AppState>>) -> String {
    format!("ok active_calls={}", state.active_calls())
}
