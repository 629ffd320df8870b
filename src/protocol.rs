//! Wire protocol for client-server chat.
//!
//! Every message in either direction is one line terminated by `\n`. Lines
//! from the server may carry a `MSG:` prefix in front of the display text.

use std::borrow::Cow;

/// Prefix the server puts in front of chat text.
pub const MSG_PREFIX: &str = "MSG:";

/// Line terminator used on the wire.
pub const LINE_TERMINATOR: u8 = b'\n';

/// One complete message received from the server, delimiter excluded.
///
/// Kept as raw bytes; nothing guarantees the server sends valid UTF-8.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line(Vec<u8>);

impl Line {
    /// The line as text, with invalid UTF-8 replaced.
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.0)
    }
}

/// Extract the display text from a server line.
///
/// Total: a line without the prefix is shown as-is.
pub fn decode(line: &str) -> &str {
    line.strip_prefix(MSG_PREFIX).unwrap_or(line)
}

/// Encode one operator line for the wire.
pub fn encode(line: &[u8]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(line.len() + 1);
    bytes.extend_from_slice(line);
    bytes.push(LINE_TERMINATOR);
    bytes
}

/// Framing for messages: newline-delimited lines.
/// Reassembles a byte stream read in arbitrary chunks.
pub mod framing {
    use super::{Line, LINE_TERMINATOR};
    use thiserror::Error;

    /// Framing errors.
    #[derive(Debug, Error, PartialEq, Eq)]
    pub enum FrameError {
        /// The peer sent more than the allowed bytes without a line break.
        #[error("line too long: {len} bytes buffered without a newline (max {max})")]
        LineTooLong { len: usize, max: usize },
    }

    /// Splits incoming bytes into [`Line`]s, buffering any trailing partial line.
    #[derive(Debug)]
    pub struct Framer {
        buffer: Vec<u8>,
        /// Prefix of `buffer` already known to hold no delimiter.
        scanned: usize,
        max_line_bytes: usize,
    }

    impl Framer {
        /// Create a framer that tolerates up to `max_line_bytes` of pending partial line.
        pub fn new(max_line_bytes: usize) -> Self {
            Self {
                buffer: Vec::new(),
                scanned: 0,
                max_line_bytes,
            }
        }

        /// Append `bytes` and return every line they complete, in order.
        ///
        /// Bytes after the last delimiter stay buffered for the next call.
        pub fn feed(&mut self, bytes: &[u8]) -> Vec<Line> {
            self.buffer.extend_from_slice(bytes);

            let mut lines = Vec::new();
            let mut cut = 0;
            while let Some(offset) = self.buffer[self.scanned..]
                .iter()
                .position(|&b| b == LINE_TERMINATOR)
            {
                let end = self.scanned + offset;
                lines.push(Line(self.buffer[cut..end].to_vec()));
                cut = end + 1;
                self.scanned = cut;
            }

            self.buffer.drain(..cut);
            self.scanned = self.buffer.len();
            lines
        }

        /// Fail if the pending partial line has outgrown the limit.
        pub fn ensure_bounded(&self) -> Result<(), FrameError> {
            if self.buffer.len() > self.max_line_bytes {
                return Err(FrameError::LineTooLong {
                    len: self.buffer.len(),
                    max: self.max_line_bytes,
                });
            }
            Ok(())
        }

        /// Number of buffered bytes that do not yet form a line.
        pub fn pending(&self) -> usize {
            self.buffer.len()
        }
    }
}
