//! Agent session endpoints and connect-time tunables

use std::time::Duration;

/// HTTPS endpoint that issues short-lived pre-authenticated WSS URLs.
pub const SIGNED_URL_ENDPOINT: &str =
    "https://api.elevenlabs.io/v1/convai/conversation/get_signed_url";

/// Direct WSS endpoint used when the signed-URL path is unavailable.
pub const DIRECT_WSS_ENDPOINT: &str = "wss://api.elevenlabs.io/v1/convai/conversation";

/// Header carrying the provider API key.
pub const API_KEY_HEADER: &str = "xi-api-key";

/// Connection parameters for one agent session.
#[derive(Debug, Clone)]
pub struct AgentConnectConfig {
    pub api_key: String,
    pub agent_id: String,
    /// Bound on the signed-URL HTTP request; on expiry the session falls
    /// back to the direct transport.
    pub signed_url_timeout: Duration,
    /// How long to wait for the metadata event before assuming defaults.
    pub metadata_fallback: Duration,
}

impl AgentConnectConfig {
    /// Nudge deadlines measured from transport open. Each fires only if
    /// the agent has produced no audio yet.
    pub const NUDGE_SCHEDULE: [Duration; 3] = [
        Duration::from_secs(2),
        Duration::from_secs(4),
        Duration::from_secs(6),
    ];

    pub fn signed_url(&self) -> String {
        format!("{}?agent_id={}", SIGNED_URL_ENDPOINT, self.agent_id)
    }

    pub fn direct_url(&self) -> String {
        format!("{}?agent_id={}", DIRECT_WSS_ENDPOINT, self.agent_id)
    }
}
