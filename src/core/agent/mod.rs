//! Conversational-agent session (provider side of the bridge)
//!
//! This module owns everything that talks to the AI provider: the
//! signed-URL handshake with its direct-WSS fallback, the initiation
//! record, inbound frame classification, keepalive, and the nudging
//! strategy for agents that stay silent after connect.
//!
//! [`connect`] returns immediately with a command handle; the connection
//! itself is established inside a spawned socket task that reports
//! progress through [`AgentEvent`]s. The task is the socket's single
//! writer, so all outbound records are serialized by construction.

pub mod client;
pub mod config;
pub mod messages;

use bytes::Bytes;
use thiserror::Error;

pub use client::{AgentHandle, connect};
pub use config::AgentConnectConfig;
pub use messages::{AgentControl, DynamicVariables, UserMessageBody};

use crate::core::audio::AudioFormat;

/// Errors from the agent session.
#[derive(Debug, Error)]
pub enum AgentError {
    /// The signed-URL endpoint rejected or failed the request.
    #[error("signed URL request failed: {0}")]
    SignedUrl(String),

    /// Neither the signed nor the direct transport could be established.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// The session command channel is gone.
    #[error("not connected")]
    NotConnected,

    /// An outbound record could not be serialized.
    #[error("serialization error: {0}")]
    Serialization(String),
}

pub type AgentResult<T> = Result<T, AgentError>;

/// Session lifecycle events and classified inbound traffic, delivered to
/// the call orchestrator in arrival order.
#[derive(Debug)]
pub enum AgentEvent {
    /// Transport established and the initiation record sent. Audio may be
    /// written from this point on.
    Open,

    /// Formats are known: either real metadata arrived or the fallback
    /// timer fired and the defaults were assumed.
    Ready {
        input_format: AudioFormat,
        output_format: AudioFormat,
        optimistic: bool,
    },

    /// Decoded agent audio in the session's output format.
    Audio(Bytes),

    /// The agent detected barge-in; the telephony playout buffer should
    /// be cleared.
    Interruption,

    /// Transcription of caller speech, diagnostic only.
    UserTranscript(String),

    /// Agent response text, diagnostic only.
    AgentResponse(String),

    /// The provider reported an error record. Fatal for the call.
    ProviderError(String),

    /// Both connect strategies failed.
    ConnectFailed(String),

    /// The socket closed.
    Closed { graceful: bool },
}
