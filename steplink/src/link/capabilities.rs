//! Capability block returned by the begin request, and sensor setup.
//!
//! ## Begin reply
//!
//! ```text
//! +------+-----+------------------+---------+--------+--------+---------+-----------+-------+
//! | Code | Len | Protocol version | Digital | Analog | Motors | Buffers | Fragments | Bytes |
//! +------+-----+------------------+---------+--------+--------+---------+-----------+-------+
//! | 1    | 1   | 4 (LE)           | 1       | 1      | 1      | 1       | 1         | 1     |
//! +------+-----+------------------+---------+--------+--------+---------+-----------+-------+
//! ```

use byteorder::{ByteOrder, LittleEndian};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::protocol::{NO_PIN, Request};

/// Length of a well-formed begin reply.
pub const BEGIN_REPLY_LEN: u8 = 12;

/// Largest calibration constant a temperature setup can carry.
pub const MAX_CALIBRATION: u16 = 0x3FFF;

/// Hardware limits reported by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Capabilities {
    /// Firmware protocol version.
    pub protocol_version: u32,
    /// Number of digital pins.
    pub digital_pins: u8,
    /// Number of analog inputs.
    pub analog_inputs: u8,
    /// Number of motor slots.
    pub motors: u8,
    /// Number of step buffers, one per motor.
    pub buffers: u8,
    /// Fragments in each buffer.
    pub fragments_per_buffer: u8,
    /// Bytes in each fragment.
    pub bytes_per_fragment: u8,
}

impl Capabilities {
    /// Parse a begin reply, code and length bytes included.
    pub fn parse(reply: &[u8]) -> Result<Self> {
        if reply.len() < usize::from(BEGIN_REPLY_LEN) {
            return Err(Error::Protocol(format!(
                "begin reply too short: {} bytes, expected {BEGIN_REPLY_LEN}",
                reply.len()
            )));
        }

        Ok(Self {
            protocol_version: LittleEndian::read_u32(&reply[2..6]),
            digital_pins: reply[6],
            analog_inputs: reply[7],
            motors: reply[8],
            buffers: reply[9],
            fragments_per_buffer: reply[10],
            bytes_per_fragment: reply[11],
        })
    }

    /// Samples one fragment can hold per motor.
    pub fn samples_per_fragment(&self) -> usize {
        usize::from(self.bytes_per_fragment) * crate::protocol::packing::SAMPLES_PER_BYTE
    }

    /// Encode as a begin reply, for simulated controllers.
    pub fn to_reply(&self) -> Vec<u8> {
        let mut reply = vec![0x60, BEGIN_REPLY_LEN, 0, 0, 0, 0];
        LittleEndian::write_u32(&mut reply[2..6], self.protocol_version);
        reply.extend_from_slice(&[
            self.digital_pins,
            self.analog_inputs,
            self.motors,
            self.buffers,
            self.fragments_per_buffer,
            self.bytes_per_fragment,
        ]);
        reply
    }
}

/// Binding of an analog input to a temperature sensor.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TemperatureSensor {
    /// Logical sensor id reported with every sample.
    pub id: u32,
    /// Analog input of the thermistor.
    pub thermistor_pin: u8,
    /// Digital pin powering the heater, if any.
    #[cfg_attr(feature = "serde", serde(default))]
    pub power_pin: Option<u8>,
    /// Heater output is active-low.
    #[cfg_attr(feature = "serde", serde(default))]
    pub inverted: bool,
    /// Whether the controller should regulate this sensor.
    #[cfg_attr(feature = "serde", serde(default))]
    pub active: bool,
    /// 14-bit ADC calibration constant.
    #[cfg_attr(feature = "serde", serde(default))]
    pub calibration: u16,
}

impl TemperatureSensor {
    /// Build the sensor setup request.
    pub fn setup_payload(&self) -> [u8; 8] {
        let [low, mut high] = (self.calibration & MAX_CALIBRATION).to_le_bytes();
        if self.inverted {
            high |= 0x40;
        }
        if !self.active {
            high |= 0x80;
        }
        [
            Request::AdcSetup.code(),
            self.thermistor_pin,
            self.power_pin.unwrap_or(NO_PIN),
            NO_PIN,
            low,
            high,
            NO_PIN,
            NO_PIN,
        ]
    }
}
