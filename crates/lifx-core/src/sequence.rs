//! Per-device sequence number allocation
//!
//! Sequence 0 is never handed out: it marks broadcasts and sends that do not
//! expect an acknowledgement or a response.

use crate::{Error, Result};

/// Cycling allocator of request sequence numbers in `[1, 255]`
#[derive(Debug, Clone, Default)]
pub struct SequenceAllocator {
    last: u8,
}

impl SequenceAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next free sequence number after the last one issued.
    ///
    /// Values for which `is_outstanding` returns true are skipped. Fails with
    /// [`Error::SequenceExhausted`] when all 255 values are in use.
    pub fn next<F>(&mut self, is_outstanding: F) -> Result<u8>
    where
        F: Fn(u8) -> bool,
    {
        let mut candidate = self.last;
        for _ in 0..u8::MAX {
            candidate = if candidate == u8::MAX { 1 } else { candidate + 1 };
            if !is_outstanding(candidate) {
                self.last = candidate;
                return Ok(candidate);
            }
        }
        Err(Error::SequenceExhausted)
    }

    /// Last sequence number issued (0 if none yet)
    pub fn last(&self) -> u8 {
        self.last
    }
}
