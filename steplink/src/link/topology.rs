//! Axis and motor layout.
//!
//! Motors are grouped into axes on the host, but the controller only knows
//! a flat list of motor slots. [`Topology`] keeps both views and the index
//! table between them.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::protocol::{NO_PIN, Request};

/// Motor setup flag: slot drives a motor.
pub const MOTOR_ACTIVE: u8 = 0x80;
/// Motor setup flag: step pin is active-low.
pub const INVERT_STEP: u8 = 0x20;
/// Motor setup flag: negative-direction limit switch is active-low.
pub const INVERT_LIMIT_MIN: u8 = 0x08;
/// Motor setup flag: positive-direction limit switch is active-low.
pub const INVERT_LIMIT_MAX: u8 = 0x10;

/// A digital pin with its polarity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Pin {
    /// Pin number on the controller.
    pub index: u8,
    /// Logical high is physical low.
    #[cfg_attr(feature = "serde", serde(default))]
    pub inverted: bool,
}

impl Pin {
    /// An active-high pin.
    pub const fn new(index: u8) -> Self {
        Self {
            index,
            inverted: false,
        }
    }

    /// An active-low pin.
    pub const fn inverted(index: u8) -> Self {
        Self {
            index,
            inverted: true,
        }
    }
}

fn pin_index(pin: Option<Pin>) -> u8 {
    pin.map_or(NO_PIN, |p| p.index)
}

fn pin_inverted(pin: Option<Pin>) -> bool {
    pin.is_some_and(|p| p.inverted)
}

/// Pins and scale of one motor.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct MotorConfig {
    /// Step pulse output.
    pub step: Option<Pin>,
    /// Direction output.
    pub dir: Option<Pin>,
    /// Limit switch hit when moving in the negative direction.
    pub limit_min: Option<Pin>,
    /// Limit switch hit when moving in the positive direction.
    pub limit_max: Option<Pin>,
    /// Sense input reported through sense events.
    pub sense: Option<Pin>,
    /// Steps per user unit; positions reported to consumers are divided by it.
    pub steps_per_unit: f64,
}

impl Default for MotorConfig {
    fn default() -> Self {
        Self {
            step: None,
            dir: None,
            limit_min: None,
            limit_max: None,
            sense: None,
            steps_per_unit: 1.0,
        }
    }
}

impl MotorConfig {
    /// Whether the direction output is active-low.
    pub fn dir_inverted(&self) -> bool {
        pin_inverted(self.dir)
    }

    /// Convert a step count into user units.
    pub fn to_units(&self, steps: i32) -> f64 {
        if self.steps_per_unit == 0.0 {
            return f64::from(steps);
        }
        f64::from(steps) / self.steps_per_unit
    }

    /// Build the motor setup request for a slot.
    ///
    /// The controller's limit slots are relative to the wire direction, so
    /// an inverted direction pin swaps them together with their flags.
    pub fn setup_payload(&self, slot: u8) -> [u8; 8] {
        let (negative, positive) = if self.dir_inverted() {
            (self.limit_max, self.limit_min)
        } else {
            (self.limit_min, self.limit_max)
        };

        let mut flags = MOTOR_ACTIVE;
        if pin_inverted(self.step) {
            flags |= INVERT_STEP;
        }
        if pin_inverted(negative) {
            flags |= INVERT_LIMIT_MIN;
        }
        if pin_inverted(positive) {
            flags |= INVERT_LIMIT_MAX;
        }

        [
            Request::MotorSetup.code(),
            slot,
            pin_index(self.step),
            pin_index(self.dir),
            pin_index(negative),
            pin_index(positive),
            pin_index(self.sense),
            flags,
        ]
    }

    /// Motor setup request that deactivates a slot.
    pub fn cleared_payload(slot: u8) -> [u8; 8] {
        [
            Request::MotorSetup.code(),
            slot,
            NO_PIN,
            NO_PIN,
            NO_PIN,
            NO_PIN,
            NO_PIN,
            0,
        ]
    }
}

/// Axes of motors with a flat slot index.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Topology {
    axes: Vec<Vec<MotorConfig>>,
    slots: Vec<(usize, usize)>,
}

impl Topology {
    /// Build from axes in slot order.
    pub fn new(axes: Vec<Vec<MotorConfig>>) -> Self {
        let slots = axes
            .iter()
            .enumerate()
            .flat_map(|(axis, motors)| (0..motors.len()).map(move |motor| (axis, motor)))
            .collect();
        Self { axes, slots }
    }

    /// The axes.
    pub fn axes(&self) -> &[Vec<MotorConfig>] {
        &self.axes
    }

    /// Total number of motors across all axes.
    pub fn motor_count(&self) -> usize {
        self.slots.len()
    }

    /// Flat slot of a motor.
    pub fn slot(&self, axis: usize, motor: usize) -> Option<usize> {
        self.slots.iter().position(|&s| s == (axis, motor))
    }

    /// Axis and motor of a flat slot.
    pub fn locate(&self, slot: usize) -> Option<(usize, usize)> {
        self.slots.get(slot).copied()
    }

    /// Configuration of a flat slot.
    pub fn motor(&self, slot: usize) -> Option<&MotorConfig> {
        let (axis, motor) = self.locate(slot)?;
        self.axes.get(axis)?.get(motor)
    }

    /// All motors in slot order.
    pub fn motors(&self) -> impl Iterator<Item = &MotorConfig> {
        self.axes.iter().flatten()
    }
}
