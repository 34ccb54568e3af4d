//! Access-unit reassembly from raw video datagrams
//!
//! The video channel carries an unframed Annex-B stream chopped into
//! datagrams. Every fragment except the last of an access unit is full-sized,
//! so a short fragment marks the end of a unit once enough data has
//! accumulated to be a plausible picture.

use tracing::{trace, warn};

use crate::config::VideoConfig;

/// Accumulates video payloads until an access unit is complete.
#[derive(Debug)]
pub struct FrameAssembler {
    buffer: Vec<u8>,
    mtu_threshold: usize,
    min_access_unit: usize,
    max_access_unit: usize,
    dropped: u64,
}

impl FrameAssembler {
    pub fn new(mtu_threshold: usize, min_access_unit: usize, max_access_unit: usize) -> Self {
        Self {
            buffer: Vec::new(),
            mtu_threshold,
            min_access_unit,
            max_access_unit: max_access_unit.max(min_access_unit),
            dropped: 0,
        }
    }

    pub fn from_config(config: &VideoConfig) -> Self {
        Self::new(config.mtu_threshold, config.min_access_unit, config.max_access_unit)
    }

    /// Append one datagram payload.
    ///
    /// Returns the completed access unit when `payload` is shorter than the MTU
    /// threshold and the accumulated buffer is longer than the minimum access
    /// unit size. The accumulator is empty afterwards.
    pub fn push(&mut self, payload: &[u8]) -> Option<Vec<u8>> {
        self.buffer.extend_from_slice(payload);

        if payload.len() < self.mtu_threshold && self.buffer.len() > self.min_access_unit {
            trace!(len = self.buffer.len(), "Access unit complete");
            return Some(std::mem::take(&mut self.buffer));
        }

        if self.buffer.len() > self.max_access_unit {
            self.dropped += 1;
            warn!(
                len = self.buffer.len(),
                cap = self.max_access_unit,
                dropped = self.dropped,
                "No end-of-frame fragment seen, dropping accumulated video"
            );
            self.buffer = Vec::new();
        }

        None
    }

    /// Bytes currently accumulated.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Number of accumulators discarded for exceeding the cap.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
    }
}
