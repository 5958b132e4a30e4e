//! # steplink
//!
//! Host-side driver for step/direction motion controllers on a serial link.
//!
//! This crate keeps a host in lockstep with a microcontroller that drives
//! stepper motors, including:
//!
//! - Liveness handshake and capability negotiation
//! - Request/reply exchanges with bounded retries
//! - Pin, ADC and motor state caches mirroring the controller
//! - Step fragment staging with credit-based flow control
//! - Dispatch of limit, sense, sample and drain events
//!
//! ## Features
//!
//! - `native` (default): Native serial port support
//! - `serde`: Serialization support for configuration types
//!
//! ## Example
//!
//! ```rust,no_run
//! use steplink::{Direction, LinkDriver, MotorConfig, Pin, SerialConfig, Topology};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     #[cfg(feature = "native")]
//!     {
//!         let mut link = LinkDriver::open(&SerialConfig::new("/dev/ttyACM0", 115200))?;
//!         link.connect()?;
//!
//!         let x = MotorConfig {
//!             step: Some(Pin::new(2)),
//!             dir: Some(Pin::new(3)),
//!             ..Default::default()
//!         };
//!         link.push_globals(None, 50)?;
//!         link.push_topology(Topology::new(vec![vec![x]]))?;
//!
//!         if link.admit_fragment()? {
//!             link.set_step(0, 0, 0, 4)?;
//!             link.set_direction(0, 0, Some(Direction::Positive))?;
//!             link.send_fragment(0)?;
//!             link.start()?;
//!         }
//!     }
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod consumer;
pub mod error;
pub mod link;
pub mod port;
pub mod protocol;
pub mod transport;

// Re-exports for convenience
#[cfg(feature = "native")]
pub use port::{NativePort, list_ports};
pub use {
    consumer::{LinkConsumer, LinkEvent, NullConsumer},
    error::{Error, Result},
    link::{
        DeviceState, LinkDriver, LinkState, MotionState, PendingRequest,
        cache::{AdcTable, MotorLinkState, MotorTable, PinCache, PinMode},
        capabilities::{Capabilities, TemperatureSensor},
        fragments::{Direction, FragmentBuffer},
        retry::{LinkConfig, RetryPolicy},
        topology::{MotorConfig, Pin, Topology},
    },
    port::{Port, PortInfo, SerialConfig},
    protocol::{Codec, Decoded, PlainCodec, Reply, Request},
    transport::Transport,
};
