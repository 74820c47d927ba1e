//! Telephony stream protocol
//!
//! The telephony side speaks JSON text frames, one record per frame,
//! tagged by `event`. Inbound records carry control events and base64
//! μ-law media; outbound records carry sequenced media, playback marks,
//! and the `clear` control used for barge-in.
//!
//! Sequencing fields are strings on the wire even though they are
//! counters; that is the telephony vendor's convention and is preserved
//! here.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

// =============================================================================
// Inbound events (telephony -> bridge)
// =============================================================================

/// Inbound stream events.
#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum TelephonyInbound {
    /// Transport-level hello; carries nothing the bridge needs.
    Connected,

    /// Stream metadata: the stream id and the custom parameters the
    /// dial-out handler attached (token, agent selection, caller info).
    Start {
        #[serde(default, rename = "streamSid")]
        stream_sid: Option<String>,
        start: StartMeta,
    },

    /// One 20 ms frame of base64 μ-law audio.
    Media { media: MediaPayload },

    /// Playback acknowledgement for a previously sent mark.
    Mark { mark: MarkPayload },

    /// The call is over.
    Stop,

    /// Any event this bridge does not act on.
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
pub struct StartMeta {
    #[serde(default, rename = "streamSid")]
    pub stream_sid: Option<String>,
    #[serde(default, rename = "customParameters")]
    pub custom_parameters: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
pub struct MediaPayload {
    /// `inbound` or `outbound`; absent means inbound.
    #[serde(default)]
    pub track: Option<String>,
    /// Base64 μ-law bytes.
    pub payload: String,
}

impl MediaPayload {
    /// Whether this frame is caller audio. The stream may echo our own
    /// outbound track back; those frames are ignored.
    pub fn is_inbound(&self) -> bool {
        match self.track.as_deref() {
            None => true,
            Some(track) => track == "inbound",
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct MarkPayload {
    pub name: String,
}

// =============================================================================
// Outbound records (bridge -> telephony)
// =============================================================================

/// Outbound stream records.
#[derive(Debug, Serialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum TelephonyOutbound {
    /// One sequenced 20 ms μ-law frame.
    Media {
        #[serde(rename = "streamSid")]
        stream_sid: String,
        #[serde(rename = "sequenceNumber")]
        sequence_number: String,
        media: OutboundMedia,
    },

    /// Named mark paired with each media frame so playback progress is
    /// observable.
    Mark {
        #[serde(rename = "streamSid")]
        stream_sid: String,
        mark: OutboundMark,
    },

    /// Drop the telephony playout buffer (barge-in).
    Clear {
        #[serde(rename = "streamSid")]
        stream_sid: String,
    },
}

#[derive(Debug, Serialize)]
pub struct OutboundMedia {
    pub track: String,
    pub chunk: String,
    pub timestamp: String,
    /// Base64 of exactly 160 μ-law bytes.
    pub payload: String,
}

#[derive(Debug, Serialize)]
pub struct OutboundMark {
    pub name: String,
}

impl TelephonyOutbound {
    pub fn media(stream_sid: &str, seq: u64, chunk: u64, ts_ms: u64, payload_b64: String) -> Self {
        TelephonyOutbound::Media {
            stream_sid: stream_sid.to_string(),
            sequence_number: seq.to_string(),
            media: OutboundMedia {
                track: "outbound".to_string(),
                chunk: chunk.to_string(),
                timestamp: ts_ms.to_string(),
                payload: payload_b64,
            },
        }
    }

    pub fn mark(stream_sid: &str, chunk: u64) -> Self {
        TelephonyOutbound::Mark {
            stream_sid: stream_sid.to_string(),
            mark: OutboundMark {
                name: format!("chunk-{chunk}"),
            },
        }
    }

    pub fn clear(stream_sid: &str) -> Self {
        TelephonyOutbound::Clear {
            stream_sid: stream_sid.to_string(),
        }
    }
}

/// Routing for the telephony writer task.
#[derive(Debug)]
pub enum TelephonyRoute {
    Outgoing(TelephonyOutbound),
    /// Close the socket with the given code and reason, then stop.
    Close { code: u16, reason: &'static str },
}

/// Close codes used on the telephony socket.
pub mod close_codes {
    /// Normal closure.
    pub const NORMAL: u16 = 1000;
    /// Policy violation: authentication failed.
    pub const POLICY_VIOLATION: u16 = 1008;
    /// Internal error: the agent side could not be established or died.
    pub const INTERNAL_ERROR: u16 = 1011;
}
