//! HTTP and WebSocket request handlers
//!
//! - `api` - health and status endpoints
//! - `call` - telephony stream upgrade and the per-call bridge

pub mod api;
pub mod call;

// Re-export commonly used handlers for convenient access
pub use call::call_handler;
