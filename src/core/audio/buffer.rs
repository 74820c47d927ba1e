//! Upstream caller-audio accumulation
//!
//! The agent provider handles coarse packets better than raw 20 ms
//! frames, so inbound caller audio is pooled here until roughly a packet
//! worth (default 200 ms) is available or a flush is forced by a turn
//! boundary, a stop event, or the session becoming ready.

use bytes::Bytes;

/// Accumulates μ-law caller frames in arrival order.
#[derive(Debug)]
pub struct UpstreamBuffer {
    data: Vec<u8>,
    packet_bytes: usize,
}

impl UpstreamBuffer {
    /// `packet_bytes` is the flush threshold; 200 ms of μ-law is 1600.
    pub fn new(packet_bytes: usize) -> Self {
        Self {
            data: Vec::with_capacity(packet_bytes * 2),
            packet_bytes,
        }
    }

    pub fn push(&mut self, frame: &[u8]) {
        self.data.extend_from_slice(frame);
    }

    /// Whether a full packet is waiting.
    pub fn is_full(&self) -> bool {
        self.data.len() >= self.packet_bytes
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Drain everything buffered so far. Returns `None` when empty, so a
    /// flush against an empty buffer never produces a record.
    pub fn take(&mut self) -> Option<Bytes> {
        if self.data.is_empty() {
            return None;
        }
        Some(Bytes::from(std::mem::take(&mut self.data)))
    }
}
