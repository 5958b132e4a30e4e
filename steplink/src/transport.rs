//! Buffered, poll-driven byte transport over a [`Port`].

use std::io::ErrorKind;
use std::time::Duration;

use log::{error, trace};

use crate::error::{Error, Result};
use crate::port::Port;

/// Size of the internal read buffer.
pub const READ_BUFFER_SIZE: usize = 256;

/// Read failures that mean the other end is gone.
fn is_hang_up(kind: ErrorKind) -> bool {
    matches!(
        kind,
        ErrorKind::BrokenPipe | ErrorKind::NotConnected | ErrorKind::UnexpectedEof
    )
}

/// Non-blocking byte channel with an internal read buffer.
pub struct Transport<P: Port> {
    port: P,
    buffer: [u8; READ_BUFFER_SIZE],
    start: usize,
    end: usize,
}

impl<P: Port> Transport<P> {
    /// Wrap an open port.
    pub fn new(port: P) -> Self {
        Self {
            port,
            buffer: [0; READ_BUFFER_SIZE],
            start: 0,
            end: 0,
        }
    }

    /// Get a reference to the underlying port.
    pub fn port(&self) -> &P {
        &self.port
    }

    /// Get a mutable reference to the underlying port.
    pub fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }

    /// Consume the transport and return the underlying port.
    pub fn into_port(self) -> P {
        self.port
    }

    /// Bytes buffered and not yet consumed.
    pub fn available(&self) -> usize {
        self.end - self.start
    }

    /// Wait up to `timeout` for data and buffer whatever arrives.
    ///
    /// Performs exactly one read when the buffer is empty; returns the number
    /// of buffered bytes. A read of zero bytes, or a read failing because the
    /// line hung up, means the device went away and is reported as
    /// [`Error::Eof`].
    pub fn poll(&mut self, timeout: Duration) -> Result<usize> {
        if self.available() > 0 {
            return Ok(self.available());
        }
        if self.port.timeout() != timeout {
            self.port.set_timeout(timeout)?;
        }
        self.refill()?;
        Ok(self.available())
    }

    fn refill(&mut self) -> Result<()> {
        self.start = 0;
        self.end = 0;
        match self.port.read(&mut self.buffer) {
            Ok(0) => {
                error!("EOF detected on {}", self.port.name());
                Err(Error::Eof(self.port.name().to_string()))
            },
            Ok(n) => {
                trace!("Read {n} bytes: {:02x?}", &self.buffer[..n]);
                self.end = n;
                Ok(())
            },
            Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => Ok(()),
            Err(e) if e.kind() == ErrorKind::Interrupted => Ok(()),
            Err(e) if is_hang_up(e.kind()) => {
                error!("{} hung up: {e}", self.port.name());
                Err(Error::Eof(self.port.name().to_string()))
            },
            Err(e) => Err(Error::Io(e)),
        }
    }

    /// Drop everything buffered here and queued in the port.
    pub fn discard(&mut self) -> Result<()> {
        if self.available() > 0 {
            trace!("Discarding {} buffered bytes", self.available());
        }
        self.start = 0;
        self.end = 0;
        self.port.clear_buffers()
    }

    /// Take one buffered byte.
    pub fn read_byte(&mut self) -> Option<u8> {
        if self.start == self.end {
            return None;
        }
        let byte = self.buffer[self.start];
        self.start += 1;
        Some(byte)
    }

    /// Write all bytes, retrying while the port would block.
    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        trace!("Write {:02x?}", bytes);
        let mut rest = bytes;
        while !rest.is_empty() {
            match self.port.write(rest) {
                Ok(0) => {
                    return Err(Error::Io(std::io::Error::new(
                        ErrorKind::WriteZero,
                        "port accepted no bytes",
                    )));
                },
                Ok(n) => rest = &rest[n..],
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::Interrupted) => {},
                Err(e) => {
                    error!("Write to {} failed: {e}", self.port.name());
                    return Err(Error::Io(e));
                },
            }
        }
        self.port.flush()?;
        Ok(())
    }
}
