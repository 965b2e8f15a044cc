//! Line Framing
//!
//! Turns raw upstream deliveries into update batches.
//!
//! Bytes are buffered until a `\n` completes a line, so a delivery that ends
//! mid-line (or mid-character) is carried over to the next one. Each call to
//! [`LineFramer::push`] yields exactly one batch holding every record
//! completed by that delivery, possibly none.
//!
//! # Limits
//!
//! A partial line that grows past the configured maximum is discarded along
//! with the rest of that line, preventing an upstream that never sends a
//! newline from growing the buffer without bound.

use crate::record::{UpdateBatch, UpdateRecord};

/// Default maximum length of a single line (64 KB)
pub const MAX_LINE_LENGTH: usize = 64 * 1024;

/// Initial buffer capacity
const MIN_BUFFER_CAPACITY: usize = 1024;

/// Counters kept by the framer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FramerStats {
    /// Non-blank complete lines seen
    pub lines: u64,
    /// Lines that produced a record
    pub records: u64,
    /// Lines dropped as malformed or unknown
    pub dropped: u64,
    /// Partial lines discarded for exceeding the length limit
    pub overflowed: u64,
}

/// Buffers partial lines and parses complete ones
#[derive(Debug)]
pub struct LineFramer {
    buffer: Vec<u8>,
    max_line_length: usize,
    /// Set after an overflow until the next line boundary
    discarding: bool,
    stats: FramerStats,
}

impl Default for LineFramer {
    fn default() -> Self {
        Self::new()
    }
}

impl LineFramer {
    /// Create a framer with the default line length limit
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_line_length(MAX_LINE_LENGTH)
    }

    /// Create a framer with a custom line length limit
    #[must_use]
    pub fn with_max_line_length(max_line_length: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(MIN_BUFFER_CAPACITY),
            max_line_length: max_line_length.max(1),
            discarding: false,
            stats: FramerStats::default(),
        }
    }

    /// Feed one raw delivery and collect the records it completes
    pub fn push(&mut self, data: &[u8]) -> UpdateBatch {
        let mut data = data;
        if self.discarding {
            match data.iter().position(|&b| b == b'\n') {
                Some(pos) => {
                    data = &data[pos + 1..];
                    self.discarding = false;
                }
                None => return UpdateBatch::new(),
            }
        }

        self.buffer.extend_from_slice(data);

        let mut batch = UpdateBatch::new();
        let mut start = 0;
        while let Some(pos) = self.buffer[start..].iter().position(|&b| b == b'\n') {
            let end = start + pos;
            let line = &self.buffer[start..end];
            let line = line.strip_suffix(b"\r").unwrap_or(line);

            if !line.is_empty() {
                self.stats.lines += 1;
                match std::str::from_utf8(line) {
                    Ok(text) => match UpdateRecord::parse_line(text) {
                        Ok(record) => {
                            self.stats.records += 1;
                            batch.push(record);
                        }
                        Err(e) => {
                            self.stats.dropped += 1;
                            tracing::debug!(error = %e, "Dropping upstream line");
                        }
                    },
                    Err(e) => {
                        self.stats.dropped += 1;
                        tracing::debug!(error = %e, "Dropping non UTF-8 upstream line");
                    }
                }
            }

            start = end + 1;
        }
        self.buffer.drain(..start);

        if self.buffer.len() > self.max_line_length {
            tracing::warn!(
                pending = self.buffer.len(),
                max = self.max_line_length,
                "Partial line exceeds maximum length, discarding"
            );
            self.stats.overflowed += 1;
            self.buffer.clear();
            self.discarding = true;
        }

        batch
    }

    /// Number of buffered bytes belonging to an incomplete line
    #[must_use]
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Drop any partial line, returning how many bytes were discarded
    ///
    /// Called when the upstream ends: a line split across a reopen is not
    /// recoverable.
    pub fn reset(&mut self) -> usize {
        let discarded = self.buffer.len();
        self.buffer.clear();
        self.discarding = false;
        discarded
    }

    /// Counters since creation
    #[must_use]
    pub fn stats(&self) -> FramerStats {
        self.stats
    }
}
