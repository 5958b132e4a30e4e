//! Nibble packing of step samples.
//!
//! Step data travels as 4-bit samples, two per byte, low nibble first:
//!
//! ```text
//!   byte 0          byte 1
//! +-------+-------+-------+-------+
//! | s1    | s0    | s3    | s2    |
//! +-------+-------+-------+-------+
//!  7     4 3     0 7     4 3     0
//! ```

/// Samples stored in one byte.
pub const SAMPLES_PER_BYTE: usize = 2;

/// Largest value a sample can hold.
pub const MAX_SAMPLE: u8 = 0x0F;

/// Number of bytes needed for `samples` packed samples.
#[inline]
pub fn packed_len(samples: usize) -> usize {
    samples.div_ceil(SAMPLES_PER_BYTE)
}

/// OR a sample into `bytes` at `position`.
///
/// The target nibble is expected to be zero. Returns `false` if `position`
/// falls outside `bytes`.
pub fn pack_sample(bytes: &mut [u8], position: usize, value: u8) -> bool {
    let Some(byte) = bytes.get_mut(position / SAMPLES_PER_BYTE) else {
        return false;
    };
    let shift = 4 * (position % SAMPLES_PER_BYTE);
    *byte |= (value & MAX_SAMPLE) << shift;
    true
}

/// Read the sample at `position`, if it exists.
pub fn unpack_sample(bytes: &[u8], position: usize) -> Option<u8> {
    let byte = bytes.get(position / SAMPLES_PER_BYTE)?;
    let shift = 4 * (position % SAMPLES_PER_BYTE);
    Some((byte >> shift) & MAX_SAMPLE)
}
