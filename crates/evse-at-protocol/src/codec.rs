//! Line-based codec for AT communication.
//!
//! Commands are terminated with `\r\n`. The controller answers with lines
//! terminated by `\r\n` or a bare `\n`; the UART hands us arbitrary chunks, so
//! partial lines are buffered across reads.

use bytes::{Buf, BytesMut};
use log::warn;

/// Maximum response line length. Longer lines are discarded.
pub const MAX_LINE_LENGTH: usize = 512;

/// Terminator appended to every outbound command.
pub const COMMAND_TERMINATOR: &[u8] = b"\r\n";

/// A codec for reading and writing AT lines.
#[derive(Debug, Default)]
pub struct LineCodec {
    /// Buffer for accumulating incoming data.
    buffer: BytesMut,
    /// Number of lines dropped for exceeding [`MAX_LINE_LENGTH`].
    discarded: u64,
}

impl LineCodec {
    /// Create a new line codec.
    pub fn new() -> Self {
        LineCodec {
            buffer: BytesMut::with_capacity(MAX_LINE_LENGTH * 2),
            discarded: 0,
        }
    }

    /// Add received data to the buffer.
    pub fn push(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Try to decode one complete, non-empty line from the buffer.
    ///
    /// Returns `None` if no complete line is buffered yet. Empty lines are
    /// skipped; overlong lines are dropped with a warning.
    pub fn decode_line(&mut self) -> Option<String> {
        loop {
            let Some(end) = self.buffer.iter().position(|&b| b == b'\r' || b == b'\n') else {
                if self.buffer.len() > MAX_LINE_LENGTH {
                    warn!(
                        "Line too long ({} bytes), discarding partial data",
                        self.buffer.len()
                    );
                    self.buffer.clear();
                    self.discarded += 1;
                }
                return None;
            };

            let line_data = self.buffer.split_to(end);
            while !self.buffer.is_empty() && (self.buffer[0] == b'\r' || self.buffer[0] == b'\n') {
                self.buffer.advance(1);
            }

            if line_data.len() > MAX_LINE_LENGTH {
                warn!("Line too long ({} bytes), discarding", line_data.len());
                self.discarded += 1;
                continue;
            }

            let line = String::from_utf8_lossy(&line_data);
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            return Some(line.to_string());
        }
    }

    /// Encode a command for transmission.
    ///
    /// Appends the `\r\n` terminator.
    pub fn encode_command(cmd: &str) -> Vec<u8> {
        let mut buf = Vec::with_capacity(cmd.len() + COMMAND_TERMINATOR.len());
        buf.extend_from_slice(cmd.as_bytes());
        buf.extend_from_slice(COMMAND_TERMINATOR);
        buf
    }

    /// Get the number of buffered bytes.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Number of overlong lines dropped so far.
    pub fn discarded_lines(&self) -> u64 {
        self.discarded
    }

    /// Clear the buffer.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}
