//! Fragmentation codec for the notify/write characteristics
//!
//! Outbound text is cut into fixed-size byte chunks:
//! ```text
//! [ chunk 0: max bytes ][ chunk 1: max bytes ] ... [ chunk n: remainder ]
//! ```
//!
//! Boundaries fall on byte offsets, so a multi-byte character may straddle
//! two chunks. Peers concatenate chunks in arrival order.

use bytes::{Buf, BytesMut};
use thiserror::Error;
use tracing::warn;

use crate::link::MAX_LINE_BYTES;

/// Errors that can occur during inbound reassembly
#[derive(Error, Debug, PartialEq, Eq)]
pub enum CodecError {
    #[error("Inbound line too long: {len} bytes (max: {max})")]
    LineTooLong { len: usize, max: usize },
}

/// Split a payload into chunks of at most `max_chunk_bytes` bytes
///
/// A zero chunk size is treated as one byte. The returned iterator borrows
/// the payload and can be recomputed at will.
pub fn split(data: &[u8], max_chunk_bytes: usize) -> std::slice::Chunks<'_, u8> {
    data.chunks(max_chunk_bytes.max(1))
}

/// Number of chunks `split` will produce
pub fn chunk_count(data: &[u8], max_chunk_bytes: usize) -> usize {
    data.len().div_ceil(max_chunk_bytes.max(1))
}

/// Concatenate fragments in arrival order
pub fn join<I, B>(fragments: I) -> Vec<u8>
where
    I: IntoIterator<Item = B>,
    B: AsRef<[u8]>,
{
    let mut out = Vec::new();
    for fragment in fragments {
        out.extend_from_slice(fragment.as_ref());
    }
    out
}

/// Per-peer reassembly buffer for inbound command text
#[derive(Debug)]
pub struct LineAssembler {
    buffer: BytesMut,
    max_line: usize,
}

impl Default for LineAssembler {
    fn default() -> Self {
        Self::new(MAX_LINE_BYTES)
    }
}

impl LineAssembler {
    /// Create an assembler that rejects lines above `max_line` bytes
    pub fn new(max_line: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(max_line.min(4096)),
            max_line,
        }
    }

    /// Append a fragment
    pub fn extend(&mut self, fragment: &[u8]) {
        self.buffer.extend_from_slice(fragment);
    }

    /// Take the next newline-terminated line, if one is buffered
    ///
    /// Call repeatedly until it returns `Ok(None)`. The terminator (and a
    /// preceding `\r`) is not part of the returned line. An over-long line
    /// is discarded and reported.
    pub fn next_line(&mut self) -> Result<Option<String>, CodecError> {
        let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') else {
            if self.buffer.len() > self.max_line {
                let len = self.buffer.len();
                self.buffer.clear();
                return Err(CodecError::LineTooLong {
                    len,
                    max: self.max_line,
                });
            }
            return Ok(None);
        };

        let mut line = self.buffer.split_to(pos);
        self.buffer.advance(1);
        if line.last() == Some(&b'\r') {
            line.truncate(line.len() - 1);
        }
        self.finish(line)
    }

    /// Take whatever is buffered as a complete line (write-complete signal)
    pub fn flush(&mut self) -> Result<Option<String>, CodecError> {
        if self.buffer.is_empty() {
            return Ok(None);
        }
        let line = self.buffer.split();
        self.finish(line)
    }

    /// Get the current buffer length
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    fn finish(&self, line: BytesMut) -> Result<Option<String>, CodecError> {
        if line.len() > self.max_line {
            return Err(CodecError::LineTooLong {
                len: line.len(),
                max: self.max_line,
            });
        }
        match String::from_utf8(line.to_vec()) {
            Ok(text) => Ok(Some(text)),
            Err(e) => {
                warn!(
                    "[LINK] Inbound line is not valid UTF-8 ({}), replacing invalid bytes",
                    e.utf8_error()
                );
                Ok(Some(String::from_utf8_lossy(e.as_bytes()).into_owned()))
            }
        }
    }
}
