//! Packet framing contract and a checksum-free implementation.
//!
//! The driver does not own the wire framing. It hands payloads to a
//! [`Codec`] to be framed and feeds every received byte back into it,
//! getting link-level control events or complete packets in return.
//!
//! [`PlainCodec`] frames packets verbatim, applying only the toggle bit.
//! It is what loopback and simulated controllers speak.

use log::{debug, trace, warn};

use super::command::{PacketLen, TOGGLE_BIT};

/// Single-byte link control codes.
pub mod control {
    /// Incorrect packet; please resend.
    pub const NACK: [u8; 4] = [0xF0, 0x91, 0xA2, 0xC3];
    /// Packet received and accepted.
    pub const ACK: [u8; 4] = [0xC4, 0xA5, 0x96, 0xF7];
    /// Packet received but not accepted; do not resend unmodified.
    pub const STALL: [u8; 4] = [0x88, 0xE9, 0xDA, 0xBB];
    /// Identification request/reply.
    pub const ID: u8 = 0xBC;
    /// Debug message follows.
    pub const DEBUG: u8 = 0xDD;
    /// Device is starting up.
    pub const STARTUP: u8 = 0xEE;
    /// Clear stall.
    pub const STALLACK: u8 = 0x8F;
}

/// Outcome of feeding one byte to a codec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// The device accepted our last packet.
    Ack,
    /// The device wants our last packet again.
    Nack,
    /// The device refused our last packet.
    Stall,
    /// A complete inbound packet, code byte first.
    Packet(Vec<u8>),
    /// A retransmission of the previous inbound packet.
    ///
    /// It must be acknowledged again but not acted upon.
    Duplicate,
}

/// Framing layer call contract.
pub trait Codec: Send {
    /// Frame a payload for transmission.
    ///
    /// Each call frames a fresh packet. Retransmissions reuse the returned
    /// bytes instead of calling this again.
    fn frame(&mut self, payload: &[u8]) -> Vec<u8>;

    /// Feed one received byte.
    ///
    /// `sizer` tells the codec how long the packet starting with the bytes
    /// gathered so far will be.
    fn feed(&mut self, byte: u8, sizer: &dyn Fn(&[u8]) -> PacketLen) -> Option<Decoded>;

    /// Bytes acknowledging the last inbound packet.
    fn ack(&self) -> Vec<u8>;

    /// Bytes refusing the last inbound packet.
    fn stall(&self) -> Vec<u8>;

    /// Forget all sequencing state and return the raw bytes that make the
    /// device forget its own.
    fn resync(&mut self) -> Vec<u8>;
}

/// Verbatim framing with toggle-bit sequencing.
#[derive(Debug, Default)]
pub struct PlainCodec {
    tx_toggle: bool,
    rx_toggle: Option<bool>,
    partial: Vec<u8>,
}

impl PlainCodec {
    /// Create a codec with fresh sequencing state.
    pub fn new() -> Self {
        Self::default()
    }

    fn rx_slot(&self) -> usize {
        usize::from(self.rx_toggle.unwrap_or(false))
    }
}

impl Codec for PlainCodec {
    fn frame(&mut self, payload: &[u8]) -> Vec<u8> {
        let mut frame = payload.to_vec();
        if let Some(code) = frame.first_mut() {
            if self.tx_toggle {
                *code |= TOGGLE_BIT;
            } else {
                *code &= !TOGGLE_BIT;
            }
        }
        self.tx_toggle = !self.tx_toggle;
        frame
    }

    fn feed(&mut self, byte: u8, sizer: &dyn Fn(&[u8]) -> PacketLen) -> Option<Decoded> {
        if self.partial.is_empty() {
            if control::ACK.contains(&byte) {
                return Some(Decoded::Ack);
            }
            if control::NACK.contains(&byte) {
                return Some(Decoded::Nack);
            }
            if control::STALL.contains(&byte) {
                return Some(Decoded::Stall);
            }
            match byte {
                control::STARTUP => {
                    warn!("Controller reports startup");
                    return None;
                },
                control::ID | control::DEBUG | control::STALLACK => {
                    debug!("Ignoring control byte {byte:#04x}");
                    return None;
                },
                _ => {},
            }
        }

        self.partial.push(byte);
        match sizer(&self.partial) {
            PacketLen::NeedMore => None,
            PacketLen::Invalid => {
                trace!("Discarding unframed byte {byte:#04x}");
                self.partial.clear();
                None
            },
            PacketLen::Known(len) if self.partial.len() < len => None,
            PacketLen::Known(_) => {
                let packet = std::mem::take(&mut self.partial);
                let toggle = packet[0] & TOGGLE_BIT != 0;
                if self.rx_toggle == Some(toggle) {
                    debug!("Duplicate packet {:#04x}", packet[0]);
                    return Some(Decoded::Duplicate);
                }
                self.rx_toggle = Some(toggle);
                Some(Decoded::Packet(packet))
            },
        }
    }

    fn ack(&self) -> Vec<u8> {
        vec![control::ACK[self.rx_slot()]]
    }

    fn stall(&self) -> Vec<u8> {
        vec![control::STALL[self.rx_slot()]]
    }

    fn resync(&mut self) -> Vec<u8> {
        self.tx_toggle = false;
        self.rx_toggle = None;
        self.partial.clear();
        vec![control::ACK[0], control::ACK[1]]
    }
}
