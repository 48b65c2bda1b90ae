//! Assembles a streamed HTTP body into one contiguous buffer.
//!
//! The buffer is kept NUL-terminated after every append so it can be handed to
//! C-string consumers as-is. Growth uses fallible reservation: running out of
//! memory aborts the current fetch instead of the process.

use std::collections::TryReserveError;
use thiserror::Error;

/// Growing the buffer failed; the in-flight fetch must be abandoned.
#[derive(Error, Debug)]
#[error("response buffer allocation of {requested} bytes failed: {source}")]
pub struct AllocationFailure {
    pub requested: usize,
    #[source]
    pub source: TryReserveError,
}

/// Owned body buffer for exactly one request-response cycle.
#[derive(Debug, Default)]
pub struct ResponseAccumulator {
    // Holds `len` body bytes followed by a single NUL once anything arrived.
    buf: Vec<u8>,
    len: usize,
}

impl ResponseAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one delivered chunk.
    ///
    /// On failure the accumulator is left exactly as before the call.
    pub fn on_chunk(&mut self, chunk: &[u8]) -> Result<(), AllocationFailure> {
        let required = self.len + chunk.len() + 1;
        if required > self.buf.len() {
            let additional = required - self.buf.len();
            self.buf
                .try_reserve_exact(additional)
                .map_err(|source| AllocationFailure {
                    requested: required,
                    source,
                })?;
        }

        self.buf.truncate(self.len);
        self.buf.extend_from_slice(chunk);
        self.buf.push(0);
        self.len += chunk.len();
        Ok(())
    }

    /// Number of body bytes accumulated so far.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Body bytes including the terminator; empty before the first chunk.
    pub fn as_bytes_with_nul(&self) -> &[u8] {
        &self.buf
    }

    /// Drop any accumulated content and release the allocation.
    pub fn reset(&mut self) {
        self.buf = Vec::new();
        self.len = 0;
    }

    /// Hand the body over; `None` when nothing was ever appended.
    pub fn finalize(mut self) -> Option<Vec<u8>> {
        if self.buf.is_empty() {
            return None;
        }
        self.buf.truncate(self.len);
        Some(self.buf)
    }
}
