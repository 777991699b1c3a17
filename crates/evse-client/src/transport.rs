//! Line transport between the client and the controller.
//!
//! The link is half-duplex and line oriented. [`SerialTransport`] adapts any
//! byte stream (a serial port in production) and buffers partial lines with a
//! [`LineCodec`]. [`MemoryTransport`] is an in-memory loopback used to script
//! controller responses.

use std::io::{ErrorKind, Read, Write};

use evse_at_protocol::LineCodec;
use tracing::trace;

use crate::error::TransportError;

/// Size of a single read from the underlying stream.
const READ_CHUNK: usize = 256;

/// A non-blocking line transport.
pub trait Transport {
    /// Write one command line. The terminator is added by the transport.
    fn send(&mut self, command: &str) -> Result<(), TransportError>;

    /// Return one complete line if available, without blocking the caller.
    fn poll_incoming(&mut self) -> Result<Option<String>, TransportError>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn send(&mut self, command: &str) -> Result<(), TransportError> {
        (**self).send(command)
    }

    fn poll_incoming(&mut self) -> Result<Option<String>, TransportError> {
        (**self).poll_incoming()
    }
}

// ============================================================================
// Stream transport
// ============================================================================

/// Transport over a byte stream such as a serial port.
///
/// The stream should be configured with a short read timeout; timeouts are
/// treated as "no data yet".
pub struct SerialTransport<P> {
    port: P,
    codec: LineCodec,
    buf: [u8; READ_CHUNK],
}

impl<P: Read + Write> SerialTransport<P> {
    /// Wrap a stream.
    pub fn new(port: P) -> Self {
        SerialTransport {
            port,
            codec: LineCodec::new(),
            buf: [0; READ_CHUNK],
        }
    }

    /// Get a reference to the underlying stream.
    pub fn port(&self) -> &P {
        &self.port
    }

    /// Number of overlong lines discarded so far.
    pub fn discarded_lines(&self) -> u64 {
        self.codec.discarded_lines()
    }

    fn fill(&mut self) -> Result<(), TransportError> {
        match self.port.read(&mut self.buf) {
            Ok(n) => {
                self.codec.push(&self.buf[..n]);
                Ok(())
            }
            Err(ref e)
                if matches!(
                    e.kind(),
                    ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted
                ) =>
            {
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::BrokenPipe || e.kind() == ErrorKind::NotConnected => {
                Err(TransportError::Disconnected)
            }
            Err(e) => Err(TransportError::Read(e)),
        }
    }
}

impl<P: Read + Write> Transport for SerialTransport<P> {
    fn send(&mut self, command: &str) -> Result<(), TransportError> {
        let data = LineCodec::encode_command(command);
        self.port
            .write_all(&data)
            .and_then(|_| self.port.flush())
            .map_err(|e| match e.kind() {
                ErrorKind::BrokenPipe | ErrorKind::NotConnected => TransportError::Disconnected,
                _ => TransportError::Write(e),
            })
    }

    fn poll_incoming(&mut self) -> Result<Option<String>, TransportError> {
        if let Some(line) = self.codec.decode_line() {
            return Ok(Some(line));
        }
        self.fill()?;
        Ok(self.codec.decode_line())
    }
}

// ============================================================================
// In-memory transport
// ============================================================================

/// Scripted in-memory transport.
///
/// Bytes fed with [`feed`](Self::feed) come out of `poll_incoming` as lines;
/// commands passed to `send` are recorded.
#[derive(Debug, Default)]
pub struct MemoryTransport {
    codec: LineCodec,
    sent: Vec<String>,
    fail_writes: bool,
}

impl MemoryTransport {
    /// Create an empty transport.
    pub fn new() -> Self {
        MemoryTransport {
            codec: LineCodec::new(),
            sent: Vec::new(),
            fail_writes: false,
        }
    }

    /// Queue raw bytes as if received from the controller.
    pub fn feed(&mut self, data: &str) {
        trace!("MemoryTransport: feed {:?}", data);
        self.codec.push(data.as_bytes());
    }

    /// Queue one line (terminator appended).
    pub fn feed_line(&mut self, line: &str) {
        self.feed(line);
        self.feed("\r\n");
    }

    /// Commands sent so far.
    pub fn sent(&self) -> &[String] {
        &self.sent
    }

    /// Drain the commands sent so far.
    pub fn take_sent(&mut self) -> Vec<String> {
        std::mem::take(&mut self.sent)
    }

    /// Make every subsequent `send` fail (simulated unplugged cable).
    pub fn set_fail_writes(&mut self, fail: bool) {
        self.fail_writes = fail;
    }
}

impl Transport for MemoryTransport {
    fn send(&mut self, command: &str) -> Result<(), TransportError> {
        if self.fail_writes {
            return Err(TransportError::Disconnected);
        }
        self.sent.push(command.to_string());
        Ok(())
    }

    fn poll_incoming(&mut self) -> Result<Option<String>, TransportError> {
        Ok(self.codec.decode_line())
    }
}
