//! Receivers for asynchronous controller events.
//!
//! The driver hands every decoded event to one [`LinkConsumer`]. Callbacks
//! run on the driver's thread, in the middle of a wait, and get no access to
//! the driver itself; a consumer that needs to react on the link records
//! what happened and acts once the driver call returns.

use std::sync::mpsc::Sender;

/// Callbacks for controller events. All methods default to doing nothing.
pub trait LinkConsumer: Send {
    /// A limit switch stopped the motion.
    ///
    /// `position` is the motor's host position in user units.
    /// `pending_callbacks` counts move-completion callbacks that were queued
    /// and will never fire.
    fn on_limit(&mut self, axis: usize, motor: usize, position: f64, pending_callbacks: u32) {
        let _ = (axis, motor, position, pending_callbacks);
    }

    /// A sense input changed level.
    fn on_sense(&mut self, axis: usize, motor: usize, rising: bool) {
        let _ = (axis, motor, rising);
    }

    /// A bound temperature sensor produced a sample.
    fn on_temperature_sample(&mut self, sensor: u32, raw: u16) {
        let _ = (sensor, raw);
    }

    /// Fragments drained; `free` is the credit now available.
    fn on_fragments_available(&mut self, free: u32) {
        let _ = free;
    }
}

/// Consumer that drops every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullConsumer;

impl LinkConsumer for NullConsumer {}

/// Owned copy of a consumer callback.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    /// See [`LinkConsumer::on_limit`].
    Limit {
        /// Axis index.
        axis: usize,
        /// Motor index within the axis.
        motor: usize,
        /// Host position in user units.
        position: f64,
        /// Move callbacks that were pending.
        pending_callbacks: u32,
    },
    /// See [`LinkConsumer::on_sense`].
    Sense {
        /// Axis index.
        axis: usize,
        /// Motor index within the axis.
        motor: usize,
        /// The input went high.
        rising: bool,
    },
    /// See [`LinkConsumer::on_temperature_sample`].
    Temperature {
        /// Sensor id.
        sensor: u32,
        /// Raw ADC reading.
        raw: u16,
    },
    /// See [`LinkConsumer::on_fragments_available`].
    FragmentsAvailable {
        /// Free credit.
        free: u32,
    },
}

/// Forward events over a channel. A closed receiver drops them.
impl LinkConsumer for Sender<LinkEvent> {
    fn on_limit(&mut self, axis: usize, motor: usize, position: f64, pending_callbacks: u32) {
        let _ = self.send(LinkEvent::Limit {
            axis,
            motor,
            position,
            pending_callbacks,
        });
    }

    fn on_sense(&mut self, axis: usize, motor: usize, rising: bool) {
        let _ = self.send(LinkEvent::Sense { axis, motor, rising });
    }

    fn on_temperature_sample(&mut self, sensor: u32, raw: u16) {
        let _ = self.send(LinkEvent::Temperature { sensor, raw });
    }

    fn on_fragments_available(&mut self, free: u32) {
        let _ = self.send(LinkEvent::FragmentsAvailable { free });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn test_sender_forwards_events() {
        let (tx, rx) = mpsc::channel();
        let mut consumer: Box<dyn LinkConsumer> = Box::new(tx);
        consumer.on_sense(1, 0, true);
        consumer.on_fragments_available(5);
        assert_eq!(
            rx.try_recv().unwrap(),
            LinkEvent::Sense {
                axis: 1,
                motor: 0,
                rising: true
            }
        );
        assert_eq!(rx.try_recv().unwrap(), LinkEvent::FragmentsAvailable { free: 5 });
    }

    #[test]
    fn test_closed_receiver_is_ignored() {
        let (tx, rx) = mpsc::channel();
        drop(rx);
        let mut consumer = tx;
        consumer.on_temperature_sample(0, 1);
    }
}
