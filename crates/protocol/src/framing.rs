//! Newline-delimited framing.
//!
//! [`LineFramer`] is a [`Decoder`] for use with
//! [`tokio_util::codec::FramedRead`].  It never yields an error: oversized
//! lines and trailing garbage are dropped with a log line so that a read
//! loop survives any input.

use bytes::BytesMut;
use tokio_util::codec::Decoder;

/// Lines longer than this are discarded.
pub const DEFAULT_MAX_LINE_BYTES: usize = 4 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct LineFramer {
    max_line_bytes: usize,
    /// Bytes already scanned for `\n` in the current buffer.
    next_index: usize,
    /// Set while skipping the tail of an oversized line.
    discarding: bool,
}

impl Default for LineFramer {
    fn default() -> Self {
        Self::new()
    }
}

impl LineFramer {
    pub fn new() -> Self {
        Self::with_max_line_bytes(DEFAULT_MAX_LINE_BYTES)
    }

    pub fn with_max_line_bytes(max_line_bytes: usize) -> Self {
        Self {
            max_line_bytes,
            next_index: 0,
            discarding: false,
        }
    }
}

impl Decoder for LineFramer {
    type Item = String;
    type Error = std::io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<String>, Self::Error> {
        loop {
            let start = self.next_index.min(buf.len());
            let newline = buf[start..].iter().position(|b| *b == b'\n');
            let Some(offset) = newline else {
                // One byte of slack for a `\r` whose `\n` has not arrived.
                if buf.len() > self.max_line_bytes.saturating_add(1) {
                    tracing::warn!(
                        bytes = buf.len(),
                        limit = self.max_line_bytes,
                        "line exceeds maximum length, discarding"
                    );
                    buf.clear();
                    self.discarding = true;
                    self.next_index = 0;
                } else {
                    self.next_index = buf.len();
                }
                return Ok(None);
            };

            let end = start + offset;
            let frame = buf.split_to(end + 1);
            self.next_index = 0;

            if self.discarding {
                self.discarding = false;
                continue;
            }

            let mut line = &frame[..end];
            if let Some(stripped) = line.strip_suffix(b"\r") {
                line = stripped;
            }
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            if line.len() > self.max_line_bytes {
                tracing::warn!(
                    bytes = line.len(),
                    limit = self.max_line_bytes,
                    "line exceeds maximum length, discarding"
                );
                continue;
            }

            return Ok(Some(String::from_utf8_lossy(line).into_owned()));
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<String>, Self::Error> {
        if let Some(line) = self.decode(buf)? {
            return Ok(Some(line));
        }
        if !buf.is_empty() {
            tracing::debug!(bytes = buf.len(), "discarding unterminated data at end of stream");
            buf.clear();
        }
        self.next_index = 0;
        self.discarding = false;
        Ok(None)
    }
}
