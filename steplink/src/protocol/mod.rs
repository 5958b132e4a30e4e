//! Wire protocol: codes, packet sizing, framing contract and step packing.

pub mod codec;
pub mod command;
pub mod packing;

// Re-export common types
pub use codec::{Codec, Decoded, PlainCodec};
pub use command::{NO_PIN, PacketLen, Reply, Request, TOGGLE_BIT, reply_len, strip_toggle};
