//! Health route configuration

use axum::{Router, routing::get};

use crate::handlers::api;
use crate::state::AppState;
use std::sync::Arc;

/// Create the public health router. No authentication: these endpoints
/// exist for load balancers and process supervisors.
pub fn create_api_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(api::health_check))
        .route("/health", get(api::health_check))
        .route("/status", get(api::status))
}
