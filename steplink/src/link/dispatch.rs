//! Routing of inbound packets.
//!
//! Events update the host tables and are acknowledged before the consumer
//! hears about them. Events naming an index outside the negotiated tables
//! are refused with a stall. Anything else completes the outstanding
//! request.

use byteorder::{ByteOrder, LittleEndian};
use log::{debug, trace, warn};

use super::{LinkDriver, MotionState};
use crate::error::Result;
use crate::port::Port;
use crate::protocol::{Codec, NO_PIN, Reply};

/// Decode `count` little-endian positions.
pub(super) fn read_positions(bytes: &[u8], count: usize) -> Option<Vec<i32>> {
    let bytes = bytes.get(..count * 4)?;
    Some(bytes.chunks_exact(4).map(LittleEndian::read_i32).collect())
}

impl<P: Port, C: Codec> LinkDriver<P, C> {
    /// Route one decoded packet.
    ///
    /// Called by [`service`](Self::service) for every packet that is not a
    /// retransmission.
    pub fn dispatch(&mut self, packet: &[u8]) -> Result<()> {
        let Some(&code) = packet.first() else {
            return Ok(());
        };
        trace!("Packet {packet:02x?}");

        match Reply::from_code(code) {
            Some(Reply::Pong) => self.on_echo(packet),
            Some(reply @ (Reply::Limit | Reply::Sense0 | Reply::Sense1)) => self.on_trigger(reply, packet),
            Some(Reply::Adc) => self.on_adc(packet),
            Some(reply @ (Reply::Done | Reply::Underrun)) => self.on_drain(reply, packet),
            _ => self.on_reply(packet),
        }
    }

    fn on_echo(&mut self, packet: &[u8]) -> Result<()> {
        self.echo = packet.get(1).copied();
        debug!("Echo {:?}", self.echo);
        self.write_ack()
    }

    fn on_reply(&mut self, packet: &[u8]) -> Result<()> {
        let Some(pending) = self.pending.take() else {
            warn!("Unexpected packet {:#04x} with no request outstanding", packet[0]);
            return Ok(());
        };
        trace!(
            "Reply {:#04x} to {:#04x} after {} retries",
            packet[0], pending.command, pending.retries
        );
        self.reply = Some(packet.to_vec());
        self.write_ack()
    }

    fn on_trigger(&mut self, reply: Reply, packet: &[u8]) -> Result<()> {
        let slot = usize::from(packet.get(1).copied().unwrap_or(NO_PIN));
        let negotiated = self.device.as_ref().map_or(0, |d| d.motors.len());
        if slot >= negotiated || slot >= self.active_motors {
            warn!("{reply} for invalid motor {slot}");
            return self.write_stall();
        }

        let offset = reply.position_offset().unwrap_or(3);
        let Some(positions) = read_positions(packet.get(offset..).unwrap_or_default(), self.active_motors)
        else {
            warn!("{reply} too short: {} bytes", packet.len());
            return self.write_stall();
        };
        self.write_ack()?;

        let (Some(device), Some((axis, motor))) = (self.device.as_mut(), self.topology.locate(slot)) else {
            return Ok(());
        };
        device.motors.reconcile(&positions);

        if reply == Reply::Limit {
            device.fragments.reset_credit();
            let steps = device.motors.get(slot).map_or(0, |m| m.position);
            let position = self
                .topology
                .motor(slot)
                .map_or(f64::from(steps), |m| m.to_units(steps));
            let pending = std::mem::take(&mut self.pending_callbacks);
            self.motion = MotionState::Stopping;
            warn!("Limit hit on axis {axis} motor {motor} at {position}");
            self.consumer.on_limit(axis, motor, position, pending);
        } else {
            let rising = reply == Reply::Sense1;
            if let Ok(state) = device.motors.get_mut(slot) {
                state.sensed = true;
            }
            debug!("Sense on axis {axis} motor {motor}: {}", if rising { "high" } else { "low" });
            self.consumer.on_sense(axis, motor, rising);
        }
        Ok(())
    }

    fn on_adc(&mut self, packet: &[u8]) -> Result<()> {
        let pin = usize::from(packet.get(1).copied().unwrap_or(NO_PIN));
        let Some(value) = packet.get(2..4).map(LittleEndian::read_u16) else {
            warn!("ADC packet too short: {} bytes", packet.len());
            return self.write_stall();
        };

        let recorded = self.device.as_mut().map(|d| d.adc.record(pin, value));
        let sensor = match recorded {
            Some(Ok(sensor)) => sensor,
            Some(Err(e)) => {
                warn!("ADC sample refused: {e}");
                return self.write_stall();
            },
            None => {
                warn!("ADC sample before negotiation");
                return self.write_stall();
            },
        };
        self.write_ack()?;

        trace!("ADC {pin} = {value}");
        if let Some(sensor) = sensor {
            self.consumer.on_temperature_sample(sensor, value);
        }
        Ok(())
    }

    fn on_drain(&mut self, reply: Reply, packet: &[u8]) -> Result<()> {
        let count = packet.get(1).copied().unwrap_or(0);
        let Some(device) = self.device.as_mut() else {
            warn!("{reply} before negotiation");
            return self.write_stall();
        };
        let free = device.fragments.replenish(count);

        if reply == Reply::Underrun && self.motion == MotionState::Running {
            warn!("Controller ran out of fragments");
            self.motion = MotionState::Idle;
        }
        self.write_ack()?;

        trace!("{count} fragments drained, {free} free");
        self.consumer.on_fragments_available(free);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_positions() {
        let mut bytes = Vec::new();
        for p in [100i32, -50, 75] {
            bytes.extend_from_slice(&p.to_le_bytes());
        }
        assert_eq!(read_positions(&bytes, 3), Some(vec![100, -50, 75]));
        assert_eq!(read_positions(&bytes, 2), Some(vec![100, -50]));
        assert_eq!(read_positions(&bytes, 4), None);
        assert_eq!(read_positions(&[], 0), Some(vec![]));
    }
}
