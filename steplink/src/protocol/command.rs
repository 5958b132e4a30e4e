//! Request and reply codes of the controller link.
//!
//! Every packet starts with a one-byte code. Requests live at `0x40..=0x4C`,
//! replies at `0x60..=0x69`. Bit `0x10` is the retransmission toggle
//! maintained by the framing layer and carries no meaning for the payload,
//! so it is masked off before a code is interpreted.
//!
//! ## Inbound packet sizes
//!
//! ```text
//! +-----------+------------------+---------------------------------------+
//! | Reply     | Size (bytes)     | Layout                                |
//! +-----------+------------------+---------------------------------------+
//! | Ready     | byte[1]          | code, len, payload...                 |
//! | Pong      | 2                | code, counter                         |
//! | Pin       | 2                | code, level                           |
//! | Stopped   | 3 + 4 * motors   | code, motor, flags, pos LE i32 ...    |
//! | Done      | 2                | code, fragments                       |
//! | Underrun  | 2                | code, fragments                       |
//! | Adc       | 4                | code, pin, value LE u16               |
//! | Limit     | 3 + 4 * motors   | code, motor, flags, pos LE i32 ...    |
//! | Sense0/1  | 2 + 4 * motors   | code, motor, pos LE i32 ...           |
//! +-----------+------------------+---------------------------------------+
//! ```
//!
//! `motors` is the number of motors the host pushed with its last topology,
//! not the negotiated maximum.

use std::fmt;

/// Retransmission toggle bit carried in the code byte.
pub const TOGGLE_BIT: u8 = 0x10;

/// Pin or motor slot value meaning "not connected".
pub const NO_PIN: u8 = 0xFF;

/// Strip the toggle bit from a code byte.
#[inline]
pub fn strip_toggle(code: u8) -> u8 {
    code & !TOGGLE_BIT
}

/// Host-to-device request codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Request {
    /// Capability discovery (0x40).
    Begin = 0x40,
    /// Liveness probe (0x41).
    Ping = 0x41,
    /// Device reset (0x42).
    Reset = 0x42,
    /// Global setup: LED pin and step time (0x43).
    Setup = 0x43,
    /// Pin control (0x44).
    Control = 0x44,
    /// Motor setup (0x45).
    MotorSetup = 0x45,
    /// Temperature sensor setup (0x46).
    AdcSetup = 0x46,
    /// Fragment header (0x47).
    StartMove = 0x47,
    /// Fragment data for one motor (0x48).
    Move = 0x48,
    /// Start motion (0x49).
    Start = 0x49,
    /// Stop motion, reply carries positions (0x4A).
    Stop = 0x4A,
    /// Abort motion (0x4B).
    Abort = 0x4B,
    /// Read a pin (0x4C).
    GetPin = 0x4C,
}

impl Request {
    /// Raw code byte without toggle.
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Decode a request code, ignoring the toggle bit.
    pub fn from_code(code: u8) -> Option<Self> {
        Some(match strip_toggle(code) {
            0x40 => Self::Begin,
            0x41 => Self::Ping,
            0x42 => Self::Reset,
            0x43 => Self::Setup,
            0x44 => Self::Control,
            0x45 => Self::MotorSetup,
            0x46 => Self::AdcSetup,
            0x47 => Self::StartMove,
            0x48 => Self::Move,
            0x49 => Self::Start,
            0x4A => Self::Stop,
            0x4B => Self::Abort,
            0x4C => Self::GetPin,
            _ => return None,
        })
    }
}

/// Device-to-host reply and event codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Reply {
    /// Generic reply; also carries the capability block (0x60).
    Ready = 0x60,
    /// Liveness echo (0x61).
    Pong = 0x61,
    /// Pin level (0x62).
    Pin = 0x62,
    /// Motion stopped, with positions (0x63).
    Stopped = 0x63,
    /// Fragments drained (0x64).
    Done = 0x64,
    /// Queue ran dry (0x65).
    Underrun = 0x65,
    /// ADC sample (0x66).
    Adc = 0x66,
    /// Limit switch hit (0x67).
    Limit = 0x67,
    /// Sense pin went low (0x68).
    Sense0 = 0x68,
    /// Sense pin went high (0x69).
    Sense1 = 0x69,
}

impl Reply {
    /// Raw code byte without toggle.
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Decode a reply code, ignoring the toggle bit.
    pub fn from_code(code: u8) -> Option<Self> {
        Some(match strip_toggle(code) {
            0x60 => Self::Ready,
            0x61 => Self::Pong,
            0x62 => Self::Pin,
            0x63 => Self::Stopped,
            0x64 => Self::Done,
            0x65 => Self::Underrun,
            0x66 => Self::Adc,
            0x67 => Self::Limit,
            0x68 => Self::Sense0,
            0x69 => Self::Sense1,
            _ => return None,
        })
    }

    /// Offset of the first position field for packets carrying a position vector.
    pub fn position_offset(self) -> Option<usize> {
        match self {
            Self::Stopped | Self::Limit => Some(3),
            Self::Sense0 | Self::Sense1 => Some(2),
            _ => None,
        }
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}({:#04x})", self.code())
    }
}

/// Length of an inbound packet as far as it can be told from its head.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketLen {
    /// Total packet length in bytes, code included.
    Known(usize),
    /// More header bytes are needed to decide.
    NeedMore,
    /// The head does not start any known packet.
    Invalid,
}

/// Size an inbound packet from its first bytes.
pub fn reply_len(head: &[u8], active_motors: usize) -> PacketLen {
    let Some(&code) = head.first() else {
        return PacketLen::NeedMore;
    };
    let Some(reply) = Reply::from_code(code) else {
        return PacketLen::Invalid;
    };

    match reply {
        Reply::Ready => match head.get(1) {
            Some(&len) => PacketLen::Known(usize::from(len).max(2)),
            None => PacketLen::NeedMore,
        },
        Reply::Pong | Reply::Pin | Reply::Done | Reply::Underrun => PacketLen::Known(2),
        Reply::Adc => PacketLen::Known(4),
        Reply::Stopped | Reply::Limit | Reply::Sense0 | Reply::Sense1 => {
            // position_offset is Some for exactly these four.
            let offset = reply.position_offset().unwrap_or(3);
            PacketLen::Known(offset + 4 * active_motors)
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_toggle_is_ignored() {
        assert_eq!(Reply::from_code(0x77), Some(Reply::Limit));
        assert_eq!(Reply::from_code(0x67), Some(Reply::Limit));
        assert_eq!(Request::from_code(0x5C), Some(Request::GetPin));
        assert_eq!(Reply::from_code(0x6A), None);
        assert_eq!(Request::from_code(0x60), None);
    }

    #[test]
    fn test_reply_len_fixed() {
        assert_eq!(reply_len(&[0x61], 3), PacketLen::Known(2));
        assert_eq!(reply_len(&[0x72], 3), PacketLen::Known(2));
        assert_eq!(reply_len(&[0x66], 0), PacketLen::Known(4));
    }

    #[test]
    fn test_reply_len_scales_with_motors() {
        assert_eq!(reply_len(&[0x67], 3), PacketLen::Known(15));
        assert_eq!(reply_len(&[0x63], 0), PacketLen::Known(3));
        assert_eq!(reply_len(&[0x68], 2), PacketLen::Known(10));
        assert_eq!(reply_len(&[0x79], 1), PacketLen::Known(6));
    }

    #[test]
    fn test_reply_len_ready_reads_length_byte() {
        assert_eq!(reply_len(&[0x60], 0), PacketLen::NeedMore);
        assert_eq!(reply_len(&[0x60, 12], 0), PacketLen::Known(12));
        // A bogus short length still covers the header.
        assert_eq!(reply_len(&[0x60, 0], 0), PacketLen::Known(2));
    }

    #[test]
    fn test_reply_len_invalid() {
        assert_eq!(reply_len(&[0x12], 0), PacketLen::Invalid);
        assert_eq!(reply_len(&[], 0), PacketLen::NeedMore);
    }
}
