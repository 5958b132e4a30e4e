//! Step fragment staging and flow-control credit.
//!
//! The controller owns one ring of fragments per motor buffer. The host
//! mirrors it here: a grid of packed step samples indexed by buffer,
//! fragment and byte, a length and active-motor count per fragment, and a
//! direction per buffer and fragment.
//!
//! Credit counts fragments the controller can still accept. It starts full,
//! drops by one for every admitted fragment, and is returned by drain events.

use crate::error::{Error, Result};
use crate::link::capabilities::Capabilities;
use crate::protocol::Request;
use crate::protocol::packing::{MAX_SAMPLE, SAMPLES_PER_BYTE, pack_sample, packed_len, unpack_sample};

/// Direction of a motor within one fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Towards increasing positions.
    Positive,
    /// Towards decreasing positions.
    Negative,
}

/// Host mirror of the controller's fragment rings.
#[derive(Debug, Clone)]
pub struct FragmentBuffer {
    buffers: usize,
    fragments: usize,
    bytes: usize,
    data: Vec<u8>,
    lengths: Vec<u8>,
    active: Vec<u8>,
    directions: Vec<Option<Direction>>,
    ceiling: u32,
    free: u32,
}

impl FragmentBuffer {
    /// Allocate a zeroed grid with full credit.
    pub fn new(caps: &Capabilities) -> Self {
        let buffers = usize::from(caps.buffers);
        let fragments = usize::from(caps.fragments_per_buffer);
        let bytes = usize::from(caps.bytes_per_fragment);
        Self {
            buffers,
            fragments,
            bytes,
            data: vec![0; buffers * fragments * bytes],
            lengths: vec![0; fragments],
            active: vec![0; fragments],
            directions: vec![None; buffers * fragments],
            ceiling: u32::from(caps.fragments_per_buffer),
            free: u32::from(caps.fragments_per_buffer),
        }
    }

    /// Number of per-motor buffers.
    pub fn buffers(&self) -> usize {
        self.buffers
    }

    /// Fragments per buffer; also the credit ceiling.
    pub fn capacity(&self) -> usize {
        self.fragments
    }

    /// Bytes per fragment.
    pub fn bytes_per_fragment(&self) -> usize {
        self.bytes
    }

    /// Fragments the controller can still accept.
    pub fn free(&self) -> u32 {
        self.free
    }

    fn check(&self, buffer: usize, fragment: usize) -> Result<()> {
        if buffer >= self.buffers {
            return Err(Error::invalid("buffer", buffer, self.buffers));
        }
        if fragment >= self.fragments {
            return Err(Error::invalid("fragment", fragment, self.fragments));
        }
        Ok(())
    }

    fn cell_range(&self, buffer: usize, fragment: usize) -> std::ops::Range<usize> {
        let start = (buffer * self.fragments + fragment) * self.bytes;
        start..start + self.bytes
    }

    /// Packed samples of one buffer in one fragment.
    pub fn cell(&self, buffer: usize, fragment: usize) -> Result<&[u8]> {
        self.check(buffer, fragment)?;
        Ok(&self.data[self.cell_range(buffer, fragment)])
    }

    /// Stored sample count of a fragment.
    pub fn len(&self, fragment: usize) -> Option<usize> {
        self.lengths.get(fragment).map(|&l| usize::from(l))
    }

    /// Motors that carried a direction when the fragment was last sent.
    pub fn active_motors(&self, fragment: usize) -> Option<usize> {
        self.active.get(fragment).map(|&a| usize::from(a))
    }

    /// Direction of a buffer within a fragment.
    pub fn direction(&self, buffer: usize, fragment: usize) -> Option<Direction> {
        self.check(buffer, fragment).ok()?;
        self.directions[buffer * self.fragments + fragment]
    }

    /// Read back one sample.
    pub fn step(&self, fragment: usize, buffer: usize, position: usize) -> Option<u8> {
        unpack_sample(self.cell(buffer, fragment).ok()?, position)
    }

    /// OR a step sample into a cleared fragment; the fragment grows to cover
    /// `position`.
    ///
    /// The sample count travels in one byte, so positions past 254 are
    /// rejected even when the fragment has room for them.
    pub fn set_step(&mut self, fragment: usize, buffer: usize, position: usize, value: u8) -> Result<()> {
        self.check(buffer, fragment)?;
        if value > MAX_SAMPLE {
            return Err(Error::invalid("step sample", usize::from(value), usize::from(MAX_SAMPLE) + 1));
        }
        let limit = (self.bytes * SAMPLES_PER_BYTE).min(usize::from(u8::MAX));
        let Some(count) = position.checked_add(1).and_then(|n| u8::try_from(n).ok()) else {
            return Err(Error::invalid("sample position", position, limit));
        };
        let range = self.cell_range(buffer, fragment);
        if !pack_sample(&mut self.data[range], position, value) {
            return Err(Error::invalid("sample position", position, limit));
        }
        let len = &mut self.lengths[fragment];
        *len = (*len).max(count);
        Ok(())
    }

    /// Set or clear the direction of a buffer within a fragment.
    pub fn set_direction(&mut self, fragment: usize, buffer: usize, direction: Option<Direction>) -> Result<()> {
        self.check(buffer, fragment)?;
        self.directions[buffer * self.fragments + fragment] = direction;
        Ok(())
    }

    /// Zero a fragment in every buffer.
    pub fn clear(&mut self, fragment: usize) -> Result<()> {
        if fragment >= self.fragments {
            return Err(Error::invalid("fragment", fragment, self.fragments));
        }
        for buffer in 0..self.buffers {
            let range = self.cell_range(buffer, fragment);
            self.data[range].fill(0);
            self.directions[buffer * self.fragments + fragment] = None;
        }
        self.lengths[fragment] = 0;
        self.active[fragment] = 0;
        Ok(())
    }

    /// Take one unit of credit; false when the controller is full.
    pub fn try_admit(&mut self) -> bool {
        if self.free == 0 {
            return false;
        }
        self.free -= 1;
        true
    }

    /// Return credit from a drain event, clamped at capacity.
    pub fn replenish(&mut self, count: u8) -> u32 {
        self.free = (self.free + u32::from(count)).min(self.ceiling);
        self.free
    }

    /// The controller flushed its queue.
    pub fn reset_credit(&mut self) {
        self.free = self.ceiling;
    }

    /// Build the packets that transmit a fragment.
    ///
    /// `dir_inverted` lists the direction polarity of every active motor
    /// slot; buffer `i` belongs to slot `i`. The header comes first, then
    /// one data packet per motor that moves in this fragment.
    pub fn encode(&mut self, fragment: usize, dir_inverted: &[bool]) -> Result<Vec<Vec<u8>>> {
        if fragment >= self.fragments {
            return Err(Error::invalid("fragment", fragment, self.fragments));
        }
        if dir_inverted.len() > self.buffers {
            return Err(Error::invalid("motor", dir_inverted.len() - 1, self.buffers));
        }

        let len = self.lengths[fragment];
        let bytes = packed_len(usize::from(len));
        let mut packets = Vec::with_capacity(dir_inverted.len() + 1);

        for (buffer, &inverted) in dir_inverted.iter().enumerate() {
            let Some(direction) = self.directions[buffer * self.fragments + fragment] else {
                continue;
            };
            let reverse = (direction == Direction::Negative) ^ inverted;
            let slot = u8::try_from(buffer).map_err(|_| Error::invalid("buffer", buffer, self.buffers))?;
            let mut packet = vec![Request::Move.code(), slot, u8::from(reverse)];
            let range = self.cell_range(buffer, fragment);
            packet.extend_from_slice(&self.data[range][..bytes]);
            packets.push(packet);
        }

        let active = u8::try_from(packets.len()).map_err(|_| Error::invalid("motor", packets.len(), self.buffers))?;
        self.active[fragment] = active;
        packets.insert(0, vec![Request::StartMove.code(), len, active]);
        Ok(packets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps() -> Capabilities {
        Capabilities {
            protocol_version: 1,
            digital_pins: 20,
            analog_inputs: 4,
            motors: 3,
            buffers: 2,
            fragments_per_buffer: 8,
            bytes_per_fragment: 4,
        }
    }

    #[test]
    fn test_new_grid_is_zeroed() {
        let buffer = FragmentBuffer::new(&caps());
        assert_eq!(buffer.buffers(), 2);
        assert_eq!(buffer.capacity(), 8);
        assert_eq!(buffer.bytes_per_fragment(), 4);
        assert_eq!(buffer.free(), 8);
        for b in 0..2 {
            for f in 0..8 {
                assert_eq!(buffer.cell(b, f).unwrap(), &[0, 0, 0, 0]);
                assert_eq!(buffer.direction(b, f), None);
            }
        }
        assert!((0..8).all(|f| buffer.len(f) == Some(0)));
        assert!((0..8).all(|f| buffer.active_motors(f) == Some(0)));
    }

    #[test]
    fn test_set_step_grows_length() {
        let mut buffer = FragmentBuffer::new(&caps());
        buffer.set_step(2, 1, 5, 3).unwrap();
        assert_eq!(buffer.len(2), Some(6));
        buffer.set_step(2, 0, 1, 1).unwrap();
        assert_eq!(buffer.len(2), Some(6));
        assert_eq!(buffer.step(2, 1, 5), Some(3));
        assert_eq!(buffer.cell(1, 2).unwrap(), &[0, 0, 0x30, 0]);
    }

    #[test]
    fn test_set_step_bounds() {
        let mut buffer = FragmentBuffer::new(&caps());
        assert!(buffer.set_step(0, 2, 0, 1).is_err());
        assert!(buffer.set_step(8, 0, 0, 1).is_err());
        assert!(buffer.set_step(0, 0, 8, 1).is_err());
        assert!(buffer.set_step(0, 0, 0, 16).is_err());
        assert_eq!(buffer.len(0), Some(0));
    }

    #[test]
    fn test_set_step_stops_at_one_byte_length() {
        let mut wide = caps();
        wide.bytes_per_fragment = 200;
        let mut buffer = FragmentBuffer::new(&wide);

        let err = buffer.set_step(0, 0, 300, 1).unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidIndex {
                kind: "sample position",
                index: 300,
                limit: 255
            }
        ));
        assert!(buffer.set_step(0, 0, 255, 1).is_err());
        assert_eq!(buffer.len(0), Some(0));
        assert_eq!(buffer.step(0, 0, 255), Some(0));

        buffer.set_step(0, 0, 254, 1).unwrap();
        assert_eq!(buffer.len(0), Some(255));
        buffer.set_direction(0, 0, Some(Direction::Positive)).unwrap();
        let packets = buffer.encode(0, &[false]).unwrap();
        assert_eq!(packets[0], vec![0x47, 255, 1]);
        assert_eq!(packets[1].len(), 3 + 128);
    }

    #[test]
    fn test_clear_resets_fragment() {
        let mut buffer = FragmentBuffer::new(&caps());
        buffer.set_step(3, 0, 2, 7).unwrap();
        buffer.set_direction(3, 0, Some(Direction::Negative)).unwrap();
        buffer.encode(3, &[false]).unwrap();
        assert_eq!(buffer.active_motors(3), Some(1));

        buffer.clear(3).unwrap();
        assert_eq!(buffer.cell(0, 3).unwrap(), &[0, 0, 0, 0]);
        assert_eq!(buffer.direction(0, 3), None);
        assert_eq!(buffer.len(3), Some(0));
        assert_eq!(buffer.active_motors(3), Some(0));
    }

    #[test]
    fn test_credit_is_bounded() {
        let mut buffer = FragmentBuffer::new(&caps());
        for _ in 0..8 {
            assert!(buffer.try_admit());
        }
        assert!(!buffer.try_admit());
        assert_eq!(buffer.free(), 0);
        assert_eq!(buffer.replenish(3), 3);
        assert_eq!(buffer.replenish(200), 8);
        buffer.try_admit();
        buffer.reset_credit();
        assert_eq!(buffer.free(), 8);
    }

    #[test]
    fn test_encode_skips_idle_motors() {
        let mut buffer = FragmentBuffer::new(&caps());
        for position in 0..4 {
            buffer.set_step(0, 1, position, 1).unwrap();
        }
        buffer.set_direction(0, 1, Some(Direction::Positive)).unwrap();

        let packets = buffer.encode(0, &[false, false]).unwrap();
        assert_eq!(
            packets,
            vec![vec![0x47, 4, 1], vec![0x48, 1, 0, 0x11, 0x11]]
        );
    }

    #[test]
    fn test_encode_applies_dir_polarity() {
        let mut buffer = FragmentBuffer::new(&caps());
        buffer.set_step(1, 0, 0, 2).unwrap();
        buffer.set_direction(1, 0, Some(Direction::Positive)).unwrap();
        buffer.set_direction(1, 1, Some(Direction::Negative)).unwrap();

        let packets = buffer.encode(1, &[true, true]).unwrap();
        assert_eq!(packets[0], vec![0x47, 1, 2]);
        assert_eq!(packets[1], vec![0x48, 0, 1, 0x02]);
        assert_eq!(packets[2], vec![0x48, 1, 0, 0x00]);
    }

    #[test]
    fn test_encode_rejects_too_many_motors() {
        let mut buffer = FragmentBuffer::new(&caps());
        assert!(buffer.encode(0, &[false, false, false]).is_err());
    }
}
