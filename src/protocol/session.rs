//! Per-transfer bookkeeping.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

// ============================================================================
// TransferSession
// ============================================================================

/// State of one in-flight chunked upload.
///
/// Created when a transfer begins and discarded when it completes or aborts;
/// never persisted. Maintains the invariant
/// `chunks_acked <= chunks_sent <= total_chunks`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferSession {
    /// Total payload size in bytes.
    total_bytes: usize,
    /// Chunk size in bytes; the final chunk may be shorter.
    chunk_size: usize,
    /// Chunks written to the link so far.
    chunks_sent: usize,
    /// Chunks acknowledged by the device so far.
    chunks_acked: usize,
}

impl TransferSession {
    /// Creates a session for a payload of `total_bytes` split at `chunk_size`.
    ///
    /// # Panics
    ///
    /// Panics in debug builds if `chunk_size` is zero; the engine validates
    /// the chunk size before any session exists.
    #[inline]
    #[must_use]
    pub fn new(total_bytes: usize, chunk_size: usize) -> Self {
        debug_assert!(chunk_size > 0, "chunk size must be at least 1");
        Self {
            total_bytes,
            chunk_size,
            chunks_sent: 0,
            chunks_acked: 0,
        }
    }

    /// Number of chunks the payload splits into: `ceil(total / chunk)`.
    #[inline]
    #[must_use]
    pub fn total_chunks(&self) -> usize {
        self.total_bytes.div_ceil(self.chunk_size)
    }

    /// Total payload size in bytes.
    #[inline]
    #[must_use]
    pub fn total_bytes(&self) -> usize {
        self.total_bytes
    }

    /// Chunks written so far.
    #[inline]
    #[must_use]
    pub fn chunks_sent(&self) -> usize {
        self.chunks_sent
    }

    /// Chunks acknowledged so far.
    #[inline]
    #[must_use]
    pub fn chunks_acked(&self) -> usize {
        self.chunks_acked
    }

    /// Returns `true` once every chunk has been acknowledged.
    #[inline]
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.chunks_acked == self.total_chunks()
    }

    /// Records one chunk written to the link.
    pub fn record_sent(&mut self) {
        self.chunks_sent += 1;
        debug_assert!(self.chunks_sent <= self.total_chunks());
    }

    /// Records one chunk acknowledged by the device.
    pub fn record_acked(&mut self) {
        self.chunks_acked += 1;
        debug_assert!(self.chunks_acked <= self.chunks_sent);
    }
}

impl fmt::Display for TransferSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} chunks acked ({} bytes)",
            self.chunks_acked,
            self.total_chunks(),
            self.total_bytes
        )
    }
}

// ============================================================================
// Tests
// ============================================================================
