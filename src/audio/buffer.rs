//! Growable byte store for downloads of unknown length.
//!
//! Capacity grows in fixed steps (never multiplicatively) up to a hard cap.
//! Bytes that would exceed the cap are dropped: a clip that is too long is
//! truncated, not rejected.

use crate::defaults;
use crate::error::{Result, TalkbackError};

/// Sizing policy for a [`DownloadBuffer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferConfig {
    /// Capacity reserved when the buffer is created.
    pub initial_bytes: usize,
    /// Capacity added each time an append does not fit.
    pub growth_bytes: usize,
    /// Capacity the buffer never grows beyond.
    pub max_bytes: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            initial_bytes: defaults::DOWNLOAD_INITIAL_BYTES,
            growth_bytes: defaults::DOWNLOAD_GROWTH_BYTES,
            max_bytes: defaults::DOWNLOAD_MAX_BYTES,
        }
    }
}

/// Byte buffer that accumulates one download.
///
/// Invariant: `len() <= capacity() <= max_bytes`.
#[derive(Debug)]
pub struct DownloadBuffer {
    data: Vec<u8>,
    capacity: usize,
    config: BufferConfig,
    truncated: bool,
}

impl DownloadBuffer {
    /// Creates an empty buffer with `initial_bytes` reserved (clamped to the cap).
    pub fn new(config: BufferConfig) -> Self {
        let capacity = config.initial_bytes.min(config.max_bytes);
        Self {
            data: Vec::with_capacity(capacity),
            capacity,
            config,
            truncated: false,
        }
    }

    /// Appends bytes, growing capacity in whole steps as needed.
    ///
    /// Returns the number of bytes accepted, which is less than `bytes.len()`
    /// once the hard cap is hit. Fails with `BufferFull` only when there is no
    /// room at all and `bytes` is non-empty.
    pub fn append(&mut self, bytes: &[u8]) -> Result<usize> {
        if bytes.is_empty() {
            return Ok(0);
        }

        let room = self.config.max_bytes - self.data.len();
        if room == 0 {
            self.truncated = true;
            return Err(TalkbackError::BufferFull {
                capacity: self.capacity,
            });
        }

        let accepted = bytes.len().min(room);
        if accepted < bytes.len() {
            self.truncated = true;
        }

        self.ensure_capacity(self.data.len() + accepted);
        self.data.extend_from_slice(&bytes[..accepted]);
        Ok(accepted)
    }

    /// Pre-sizes the buffer for a known total length (capped at `max_bytes`).
    pub fn reserve_total(&mut self, total: usize) {
        let target = total.min(self.config.max_bytes);
        if target > self.capacity {
            self.data.reserve_exact(target - self.data.len());
            self.capacity = target;
        }
    }

    fn ensure_capacity(&mut self, needed: usize) {
        if needed <= self.capacity {
            return;
        }
        let step = self.config.growth_bytes.max(1);
        let missing = needed - self.capacity;
        let steps = missing.div_ceil(step);
        let new_capacity = self
            .capacity
            .saturating_add(steps.saturating_mul(step))
            .min(self.config.max_bytes);

        self.data.reserve_exact(new_capacity - self.data.len());
        tracing::trace!(
            from = self.capacity,
            to = new_capacity,
            "download buffer grown"
        );
        self.capacity = new_capacity;
    }

    /// Number of bytes written.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true when nothing has been written.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Logical capacity (grows in `growth_bytes` steps).
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns true if any bytes were dropped at the hard cap.
    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    /// Bytes written so far.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Consumes the buffer, handing its bytes to the new owner.
    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }
}
