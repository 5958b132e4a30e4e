//! Byte-level port abstraction.
//!
//! The link driver never touches an OS handle directly. It talks to a
//! [`Port`], which is a plain `Read + Write` byte channel with a settable
//! read timeout. The timeout is what turns a blocking read into a bounded
//! readiness poll:
//!
//! ```text
//! +-------------------+
//! |    LinkDriver     |  retry rounds, dispatch
//! +---------+---------+
//!           |
//! +---------v---------+
//! |   Transport<P>    |  read buffer, EOF detection
//! +---------+---------+
//!           |
//! +---------v---------+
//! |     P: Port       |  NativePort (serialport) / test mocks
//! +-------------------+
//! ```
//!
//! A read that times out must surface as `ErrorKind::TimedOut` or
//! `ErrorKind::WouldBlock`. A read that returns `Ok(0)` means the other side
//! is gone.

#[cfg(feature = "native")]
pub mod native;

#[cfg(test)]
pub(crate) mod mock;

use std::io::{Read, Write};
use std::time::Duration;

use crate::error::Result;

/// Serial port configuration.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    /// Port name/path (e.g., "/dev/ttyACM0", "COM3").
    pub port_name: String,
    /// Baud rate.
    pub baud_rate: u32,
    /// Initial read timeout. Zero opens the port non-blocking.
    pub timeout: Duration,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: 115200,
            timeout: Duration::ZERO,
        }
    }
}

impl SerialConfig {
    /// Create a new configuration with port name and baud rate.
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
            ..Default::default()
        }
    }

    /// Set the initial timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Serial port information.
#[derive(Debug, Clone)]
pub struct PortInfo {
    /// Port name/path.
    pub name: String,
    /// USB vendor ID (if available).
    pub vid: Option<u16>,
    /// USB product ID (if available).
    pub pid: Option<u16>,
    /// Product string (if available).
    pub product: Option<String>,
}

/// Byte channel toward the microcontroller.
pub trait Port: Read + Write + Send {
    /// Set the read timeout used by the next read.
    fn set_timeout(&mut self, timeout: Duration) -> Result<()>;

    /// Get the current timeout.
    fn timeout(&self) -> Duration;

    /// Get the current baud rate.
    fn baud_rate(&self) -> u32;

    /// Discard anything queued in either direction.
    fn clear_buffers(&mut self) -> Result<()>;

    /// Get the port name/path.
    fn name(&self) -> &str;

    /// Close the port and release resources.
    fn close(&mut self) -> Result<()>;
}

#[cfg(feature = "native")]
pub use native::{NativePort, list_ports};
