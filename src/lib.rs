pub mod config;
pub mod core;
pub mod handlers;
pub mod routes;
pub mod state;

// Re-export commonly used items for convenience
pub use crate::config::{BridgeConfig, ConfigError};
pub use crate::core::*;
pub use crate::state::AppState;
