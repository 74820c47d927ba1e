//! Audio primitives for the call path
//!
//! This module holds the pure building blocks of the media pipeline:
//!
//! - `codec`: G.711 μ-law transcoding and the 8 kHz ↔ 16 kHz resampler
//! - `pacer`: outbound frame splitting with monotonic sequencing
//! - `buffer`: upstream accumulation of caller audio before agent delivery
//!
//! Everything here is stateless across calls; per-call state (counters,
//! pending bytes) lives inside the structs a `Call` owns.

pub mod buffer;
pub mod codec;
pub mod pacer;

pub use buffer::UpstreamBuffer;
pub use pacer::{FramePacer, PacedFrame};

/// Duration of one telephony frame in milliseconds.
pub const FRAME_MS: u64 = 20;

/// Size of one 20 ms μ-law frame at 8 kHz.
pub const ULAW_FRAME_BYTES: usize = 160;

/// Audio formats negotiated with the agent provider.
///
/// The telephony side is always μ-law at 8 kHz; the agent may request
/// linear PCM at 8 or 16 kHz for its input, output, or both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AudioFormat {
    /// G.711 μ-law, 8 kHz (the telephony line format)
    #[default]
    Ulaw8000,
    /// 16-bit signed little-endian PCM, 16 kHz
    Pcm16k,
    /// 16-bit signed little-endian PCM, 8 kHz
    Pcm8k,
}

impl AudioFormat {
    /// Parse a provider format string. Unknown strings fall back to μ-law,
    /// which is what the telephony integration advertises to agents.
    pub fn from_wire(s: &str) -> Self {
        match s {
            "ulaw_8000" | "mulaw_8000" => AudioFormat::Ulaw8000,
            "pcm_16000" | "pcm16_16000" => AudioFormat::Pcm16k,
            "pcm_8000" | "pcm16_8000" => AudioFormat::Pcm8k,
            other => {
                tracing::warn!(format = other, "unknown audio format, assuming ulaw_8000");
                AudioFormat::Ulaw8000
            }
        }
    }

    /// Bytes that one 20 ms slice occupies in this format.
    pub fn frame_bytes(self) -> usize {
        match self {
            AudioFormat::Ulaw8000 => ULAW_FRAME_BYTES,
            AudioFormat::Pcm16k => ULAW_FRAME_BYTES * 4,
            AudioFormat::Pcm8k => ULAW_FRAME_BYTES * 2,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_parsing_accepts_both_spellings() {
        assert_eq!(AudioFormat::from_wire("ulaw_8000"), AudioFormat::Ulaw8000);
        assert_eq!(AudioFormat::from_wire("pcm_16000"), AudioFormat::Pcm16k);
        assert_eq!(AudioFormat::from_wire("pcm16_16000"), AudioFormat::Pcm16k);
        assert_eq!(AudioFormat::from_wire("pcm_8000"), AudioFormat::Pcm8k);
    }

    #[test]
    fn unknown_format_defaults_to_ulaw() {
        assert_eq!(AudioFormat::from_wire("opus_48000"), AudioFormat::Ulaw8000);
    }

    #[test]
    fn frame_bytes_match_sample_math() {
        // 20 ms at 8 kHz = 160 samples; μ-law is 1 byte/sample, PCM16 is 2.
        assert_eq!(AudioFormat::Ulaw8000.frame_bytes(), 160);
        assert_eq!(AudioFormat::Pcm8k.frame_bytes(), 320);
        assert_eq!(AudioFormat::Pcm16k.frame_bytes(), 640);
    }
}
