pub mod agent;
pub mod audio;
pub mod turn;

// Re-export commonly used types for convenience
pub use agent::{AgentConnectConfig, AgentError, AgentEvent, AgentHandle};
pub use audio::{AudioFormat, FramePacer, UpstreamBuffer};
pub use turn::{TurnConfig, TurnController, TurnEnd, TurnState};
