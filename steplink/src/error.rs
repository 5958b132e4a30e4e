//! Error types for steplink.

use std::io;
use thiserror::Error;

/// Result type for steplink operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for steplink operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error on the transport.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error.
    #[cfg(feature = "native")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// The transport reported end-of-stream.
    #[error("End of stream on {0}")]
    Eof(String),

    /// The liveness handshake never completed.
    #[error("Handshake failed: {0}")]
    HandshakeFailed(String),

    /// Malformed or short reply from the device.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// A request was issued while another one is still outstanding.
    #[error("Request {requested:#04x} rejected: {outstanding:#04x} is still outstanding")]
    RequestOutstanding {
        /// Command code of the request already in flight.
        outstanding: u8,
        /// Command code of the rejected request.
        requested: u8,
    },

    /// The operation needs negotiated capabilities.
    #[error("Link is not synced")]
    NotSynced,

    /// A host-side index is outside the negotiated range.
    #[error("Invalid {kind} index {index} (limit {limit})")]
    InvalidIndex {
        /// What kind of index was checked (pin, motor, fragment, ...).
        kind: &'static str,
        /// The rejected index.
        index: usize,
        /// Exclusive upper bound.
        limit: usize,
    },

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Whether this error leaves the link without a usable device.
    ///
    /// Fatal errors demand a full process reset; nothing in this crate
    /// attempts to recover from them.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Eof(_) | Self::HandshakeFailed(_) | Self::Protocol(_)
        )
    }

    pub(crate) fn invalid(kind: &'static str, index: usize, limit: usize) -> Self {
        Self::InvalidIndex { kind, index, limit }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(Error::Eof("/dev/ttyACM0".into()).is_fatal());
        assert!(Error::HandshakeFailed("no echo".into()).is_fatal());
        assert!(Error::Protocol("short reply".into()).is_fatal());
        assert!(!Error::NotSynced.is_fatal());
        assert!(!Error::invalid("pin", 40, 20).is_fatal());
    }

    #[test]
    fn test_outstanding_display() {
        let err = Error::RequestOutstanding {
            outstanding: 0x4c,
            requested: 0x40,
        };
        let msg = err.to_string();
        assert!(msg.contains("0x40"), "{msg}");
        assert!(msg.contains("0x4c"), "{msg}");
    }
}
