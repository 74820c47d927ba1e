//! Outbound frame pacing
//!
//! Agent audio arrives in arbitrarily sized payloads; the telephony side
//! wants exact 20 ms μ-law frames with monotonically increasing sequence,
//! chunk, and timestamp fields. `FramePacer` owns those counters for the
//! lifetime of a call and never rewinds them.
//!
//! The pacer does not sleep: frames are handed out as fast as the caller
//! can write them, and the telephony side buffers to line rate.

use super::codec;
use super::{AudioFormat, FRAME_MS, ULAW_FRAME_BYTES};

/// One sequenced 20 ms frame ready for the telephony socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacedFrame {
    pub seq: u64,
    pub chunk: u64,
    pub ts_ms: u64,
    /// Exactly 160 μ-law bytes.
    pub payload: Vec<u8>,
}

/// Splits agent output into sequenced telephony frames.
#[derive(Debug, Default)]
pub struct FramePacer {
    seq: u64,
    chunk: u64,
    ts_ms: u64,
    /// μ-law bytes waiting for a full frame.
    pending: Vec<u8>,
    /// Odd trailing byte of a PCM16 payload, kept until its pair arrives.
    pcm_tail: Option<u8>,
}

impl FramePacer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ingest one agent payload and return every complete frame it yields.
    ///
    /// Partial frames are carried over to the next payload so no audio is
    /// dropped mid-utterance; a sub-20 ms tail at the very end of a call
    /// is discarded with the pacer.
    pub fn push(&mut self, payload: &[u8], format: AudioFormat) -> Vec<PacedFrame> {
        match format {
            AudioFormat::Ulaw8000 => self.pending.extend_from_slice(payload),
            AudioFormat::Pcm16k => {
                let samples = self.take_samples(payload);
                let narrow = codec::downsample_16k_to_8k(&samples);
                self.pending.extend(codec::mulaw_encode(&narrow));
            }
            AudioFormat::Pcm8k => {
                let samples = self.take_samples(payload);
                self.pending.extend(codec::mulaw_encode(&samples));
            }
        }
        self.drain_frames()
    }

    /// Counters already handed out, for diagnostics.
    pub fn frames_emitted(&self) -> u64 {
        self.seq
    }

    fn take_samples(&mut self, payload: &[u8]) -> Vec<i16> {
        let mut bytes = Vec::with_capacity(payload.len() + 1);
        if let Some(tail) = self.pcm_tail.take() {
            bytes.push(tail);
        }
        bytes.extend_from_slice(payload);
        if bytes.len() % 2 != 0 {
            self.pcm_tail = bytes.pop();
        }
        codec::pcm_bytes_to_samples(&bytes)
    }

    fn drain_frames(&mut self) -> Vec<PacedFrame> {
        let complete = self.pending.len() / ULAW_FRAME_BYTES;
        let mut frames = Vec::with_capacity(complete);
        for slice in self.pending.chunks_exact(ULAW_FRAME_BYTES) {
            self.seq += 1;
            self.chunk += 1;
            let ts_ms = self.ts_ms;
            self.ts_ms += FRAME_MS;
            frames.push(PacedFrame {
                seq: self.seq,
                chunk: self.chunk,
                ts_ms,
                payload: slice.to_vec(),
            });
        }
        let consumed = complete * ULAW_FRAME_BYTES;
        self.pending.drain(..consumed);
        frames
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ulaw_payload_splits_into_exact_frames() {
        let mut pacer = FramePacer::new();
        // 800 ms of μ-law: 40 frames.
        let frames = pacer.push(&vec![0xFFu8; 40 * 160], AudioFormat::Ulaw8000);
        assert_eq!(frames.len(), 40);
        assert_eq!(frames[0].seq, 1);
        assert_eq!(frames[0].ts_ms, 0);
        assert_eq!(frames[39].seq, 40);
        assert_eq!(frames[39].chunk, 40);
        assert_eq!(frames[39].ts_ms, 780);
        assert!(frames.iter().all(|f| f.payload.len() == 160));
    }

    #[test]
    fn counters_are_monotonic_across_payloads() {
        let mut pacer = FramePacer::new();
        let first = pacer.push(&vec![0u8; 320], AudioFormat::Ulaw8000);
        let second = pacer.push(&vec![0u8; 160], AudioFormat::Ulaw8000);
        assert_eq!(first.last().unwrap().seq, 2);
        assert_eq!(second[0].seq, 3);
        assert_eq!(second[0].ts_ms, 40);
    }

    #[test]
    fn partial_frames_carry_over() {
        let mut pacer = FramePacer::new();
        assert!(pacer.push(&[0u8; 100], AudioFormat::Ulaw8000).is_empty());
        let frames = pacer.push(&[0u8; 60], AudioFormat::Ulaw8000);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].payload.len(), 160);
    }

    #[test]
    fn pcm16_wideband_is_transcoded_and_framed() {
        let mut pacer = FramePacer::new();
        // 20 ms at 16 kHz PCM16 = 640 bytes -> one 160-byte μ-law frame.
        let payload = vec![0u8; 640];
        let frames = pacer.push(&payload, AudioFormat::Pcm16k);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].payload.len(), 160);
        // PCM zero encodes to μ-law silence.
        assert!(frames[0].payload.iter().all(|&b| b == 0xFF));
    }

    #[test]
    fn odd_pcm_byte_is_held_for_next_payload() {
        let mut pacer = FramePacer::new();
        let frames = pacer.push(&vec![0u8; 641], AudioFormat::Pcm16k);
        assert_eq!(frames.len(), 1);
        // The held byte pairs with the next payload's first byte.
        let frames = pacer.push(&vec![0u8; 639], AudioFormat::Pcm16k);
        assert_eq!(frames.len(), 1);
    }

    #[test]
    fn pcm_narrowband_skips_resampling() {
        let mut pacer = FramePacer::new();
        // 20 ms at 8 kHz PCM16 = 320 bytes.
        let frames = pacer.push(&vec![0u8; 320], AudioFormat::Pcm8k);
        assert_eq!(frames.len(), 1);
    }
}
