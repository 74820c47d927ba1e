//! Per-call bridge: telephony protocol, upgrade handling, orchestration

pub mod call;
pub mod handler;
pub mod messages;

pub use call::{AiState, Call, CallFlow};
pub use handler::call_handler;
