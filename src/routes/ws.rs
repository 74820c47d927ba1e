//! Telephony stream route configuration
//!
//! `GET /ws` (alias `/media-stream`) upgrades to the bidirectional
//! stream protocol described in `handlers::call::messages`. The alias
//! exists because some dial plans hardcode the legacy path.
//!
//! An optional `?token=<t>` query is checked against the configured
//! bearer at upgrade; without it, authentication falls to the stream's
//! `start` event.

use axum::{Router, routing::get};
use tower_http::trace::TraceLayer;

use crate::handlers::call::call_handler;
use crate::state::AppState;
use std::sync::Arc;

/// Create the telephony stream router.
pub fn create_ws_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/ws", get(call_handler))
        .route("/media-stream", get(call_handler))
        .layer(TraceLayer::new_for_http())
}
