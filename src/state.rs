//! Shared application state

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::config::BridgeConfig;

/// State shared across all handlers. Configuration is immutable after
/// startup; the only mutable piece is the active-call gauge.
pub struct AppState {
    pub config: Arc<BridgeConfig>,
    active_calls: AtomicUsize,
}

impl AppState {
    pub fn new(config: BridgeConfig) -> Self {
        Self {
            config: Arc::new(config),
            active_calls: AtomicUsize::new(0),
        }
    }

    pub fn call_started(&self) {
        self.active_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn call_ended(&self) {
        self.active_calls.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn active_calls(&self) -> usize {
        self.active_calls.load(Ordering::Relaxed)
    }
}
