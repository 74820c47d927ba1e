//! Process configuration
//!
//! Configuration is read once from environment variables (a `.env` file
//! is loaded in `main` before this runs), validated, and then frozen for
//! the life of the process behind an `Arc`. Nothing here is mutated
//! after startup; per-call state lives on the `Call`.

use std::env;
use std::time::Duration;

use thiserror::Error;

use crate::core::audio::FRAME_MS;

/// Configuration errors surfaced at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    MissingVar(&'static str),

    #[error("invalid value for {name}: {value:?}")]
    InvalidVar { name: &'static str, value: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Immutable bridge configuration.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    // Server settings
    pub host: String,
    pub port: u16,

    // Agent provider
    /// ElevenLabs API key used for the signed-URL request and the direct
    /// WSS handshake.
    pub elevenlabs_api_key: String,
    /// Agent used for "discovery" calls and as the overall default.
    pub agent_id_discovery: String,
    /// Agent used for "daily" calls; discovery agent is used if unset.
    pub agent_id_daily: Option<String>,

    // Telephony authentication
    /// Optional bearer checked at upgrade (query string) or in the
    /// stream `start` event. No token means an open listener.
    pub auth_token: Option<String>,

    // Timing tunables (milliseconds)
    pub silence_ms: u64,
    pub utterance_max_ms: u64,
    pub buffer_ms: u64,
    pub metadata_fallback_ms: u64,
    pub signed_url_timeout_ms: u64,

    /// Log every Nth outbound telephony frame.
    pub log_frame_sample: u64,
}

impl BridgeConfig {
    /// Load from environment variables with defaults, then validate.
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = Self {
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: parse_var("PORT", 8080)?,
            elevenlabs_api_key: require_var("ELEVENLABS_API_KEY")?,
            agent_id_discovery: require_var("AGENT_ID_DISCOVERY")?,
            agent_id_daily: env::var("AGENT_ID_DAILY").ok().filter(|s| !s.is_empty()),
            auth_token: env::var("BRIDGE_AUTH_TOKEN").ok().filter(|s| !s.is_empty()),
            silence_ms: parse_var("SILENCE_MS", 800)?,
            utterance_max_ms: parse_var("UTTERANCE_MAX_MS", 3000)?,
            buffer_ms: parse_var("BUFFER_MS", 200)?,
            metadata_fallback_ms: parse_var("METADATA_FALLBACK_MS", 1000)?,
            signed_url_timeout_ms: parse_var("SIGNED_URL_TIMEOUT_MS", 5000)?,
            log_frame_sample: parse_var("LOG_FRAME_SAMPLE", 50)?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate invariants the rest of the service relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::Invalid("PORT must be nonzero".into()));
        }
        for (name, value) in [
            ("SILENCE_MS", self.silence_ms),
            ("UTTERANCE_MAX_MS", self.utterance_max_ms),
            ("BUFFER_MS", self.buffer_ms),
            ("METADATA_FALLBACK_MS", self.metadata_fallback_ms),
            ("SIGNED_URL_TIMEOUT_MS", self.signed_url_timeout_ms),
            ("LOG_FRAME_SAMPLE", self.log_frame_sample),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{name} must be nonzero")));
            }
        }
        if self.buffer_ms % FRAME_MS != 0 {
            return Err(ConfigError::Invalid(format!(
                "BUFFER_MS must be a multiple of the {FRAME_MS} ms frame duration"
            )));
        }
        Ok(())
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Agent id for the given mode; the daily agent falls back to the
    /// discovery agent when not configured.
    pub fn agent_id_for_mode(&self, mode: &str) -> &str {
        match mode {
            "daily" => self
                .agent_id_daily
                .as_deref()
                .unwrap_or(&self.agent_id_discovery),
            _ => &self.agent_id_discovery,
        }
    }

    pub fn silence(&self) -> Duration {
        Duration::from_millis(self.silence_ms)
    }

    pub fn max_utterance(&self) -> Duration {
        Duration::from_millis(self.utterance_max_ms)
    }

    pub fn metadata_fallback(&self) -> Duration {
        Duration::from_millis(self.metadata_fallback_ms)
    }

    pub fn signed_url_timeout(&self) -> Duration {
        Duration::from_millis(self.signed_url_timeout_ms)
    }

    /// Upstream packet threshold in μ-law bytes (8 bytes per ms).
    pub fn packet_bytes(&self) -> usize {
        (self.buffer_ms * 8) as usize
    }
}

fn require_var(name: &'static str) -> Result<String, ConfigError> {
    env::var(name)
        .ok()
        .filter(|s| !s.is_empty())
        .ok_or(ConfigError::MissingVar(name))
}

fn parse_var<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) if !raw.is_empty() => raw.parse().map_err(|_| ConfigError::InvalidVar {
            name,
            value: raw,
        }),
        _ => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> BridgeConfig {
        BridgeConfig {
            host: "0.0.0.0".into(),
            port: 8080,
            elevenlabs_api_key: "key".into(),
            agent_id_discovery: "agent_disc".into(),
            agent_id_daily: None,
            auth_token: None,
            silence_ms: 800,
            utterance_max_ms: 3000,
            buffer_ms: 200,
            metadata_fallback_ms: 1000,
            signed_url_timeout_ms: 5000,
            log_frame_sample: 50,
        }
    }

    #[test]
    fn default_config_validates() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn zero_tunables_are_rejected() {
        let mut config = base_config();
        config.silence_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn buffer_must_align_to_frames() {
        let mut config = base_config();
        config.buffer_ms = 190;
        assert!(config.validate().is_err());
        config.buffer_ms = 220;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn packet_bytes_follows_buffer_ms() {
        // 200 ms of μ-law at 8 kHz is ten 160-byte frames.
        assert_eq!(base_config().packet_bytes(), 1600);
    }

    #[test]
    fn daily_mode_falls_back_to_discovery_agent() {
        let mut config = base_config();
        assert_eq!(config.agent_id_for_mode("daily"), "agent_disc");
        config.agent_id_daily = Some("agent_daily".into());
        assert_eq!(config.agent_id_for_mode("daily"), "agent_daily");
        assert_eq!(config.agent_id_for_mode("discovery"), "agent_disc");
    }
}
