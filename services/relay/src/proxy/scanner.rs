//! Header region scanning.
//!
//! Isolates the leading header region of a connection (request line, header
//! lines, and the terminating empty line) from an otherwise unparsed byte
//! stream. The scan stops exactly after the empty line so whatever follows
//! stays in the reader and can be streamed to the downstream untouched.
//!
//! The body may be arbitrarily large or never end (upgraded connections),
//! so the scanner never reads ahead into it and never holds more than the
//! configured bound in memory.

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use crate::error::SessionError;

/// Default upper bound for a header region (128 KiB).
pub const DEFAULT_MAX_HEADER_BYTES: usize = 1 << 17;

/// Initial allocation for the header buffer; most headers fit.
const INITIAL_CAPACITY: usize = 1024;

/// The raw bytes of a header region, terminating empty line included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderRegion(Bytes);

impl HeaderRegion {
    /// Wrap bytes that are already known to form a header region.
    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_bytes(self) -> Bytes {
        self.0
    }
}

/// Finite-state detector for the CR LF CR LF boundary.
///
/// Counts consecutive CR LF separators. Any byte that is not part of a
/// separator resets the count; two in a row mark the empty line.
#[derive(Debug, Default, Clone)]
pub struct HeaderBoundary {
    pending_cr: bool,
    separators: u8,
}

impl HeaderBoundary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the next chunk of the stream.
    ///
    /// Returns the number of bytes of `chunk` that belong to the header
    /// region if the boundary ends inside it, `None` if more input is
    /// needed. Must not be fed again after it returned `Some`.
    pub fn feed(&mut self, chunk: &[u8]) -> Option<usize> {
        for (i, &byte) in chunk.iter().enumerate() {
            match byte {
                b'\n' if self.pending_cr => {
                    self.pending_cr = false;
                    self.separators += 1;
                    if self.separators == 2 {
                        return Some(i + 1);
                    }
                }
                b'\r' => {
                    // A CR directly after a CR: the first one was not a separator.
                    if self.pending_cr {
                        self.separators = 0;
                    }
                    self.pending_cr = true;
                }
                _ => {
                    self.pending_cr = false;
                    self.separators = 0;
                }
            }
        }
        None
    }
}

/// Reads the header region off the front of a buffered stream.
#[derive(Debug, Clone)]
pub struct HeaderScanner {
    max_bytes: usize,
}

impl HeaderScanner {
    /// Create a scanner bounded to `max_bytes` of header.
    pub fn new(max_bytes: usize) -> Self {
        Self { max_bytes }
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    /// Scan the header region from `reader`.
    ///
    /// On success the reader is positioned at the first byte after the
    /// empty line; any bytes it already buffered past that point are left
    /// in its buffer.
    pub async fn scan<R: AsyncBufRead + Unpin>(
        &self,
        reader: &mut R,
    ) -> Result<HeaderRegion, SessionError> {
        let mut region = BytesMut::with_capacity(INITIAL_CAPACITY.min(self.max_bytes));
        let mut boundary = HeaderBoundary::new();

        loop {
            let available = reader
                .fill_buf()
                .await
                .map_err(SessionError::HeaderReadFailed)?;

            if available.is_empty() {
                return Err(SessionError::ConnectionClosed {
                    received: region.len(),
                });
            }

            let budget = self.max_bytes - region.len();
            let window = &available[..available.len().min(budget)];

            match boundary.feed(window) {
                Some(end) => {
                    region.extend_from_slice(&window[..end]);
                    reader.consume(end);
                    return Ok(HeaderRegion(region.freeze()));
                }
                None => {
                    let taken = window.len();
                    region.extend_from_slice(window);
                    reader.consume(taken);

                    if region.len() >= self.max_bytes {
                        return Err(SessionError::HeaderTooLarge {
                            limit: self.max_bytes,
                        });
                    }
                }
            }
        }
    }
}

impl Default for HeaderScanner {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_HEADER_BYTES)
    }
}
