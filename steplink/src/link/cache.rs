//! Host-side mirrors of controller state.
//!
//! All tables are sized from the negotiated capabilities and are only
//! touched from the driver's thread.

use crate::error::{Error, Result};
use crate::link::topology::MotorConfig;

/// Drive mode of a digital pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PinMode {
    /// Output driven low.
    Low,
    /// Output driven high.
    High,
    /// Floating input.
    Input,
    /// Input with pull-up.
    PullUp,
}

impl PinMode {
    /// Apply pin polarity to a logical mode.
    pub fn physical(self, inverted: bool) -> Self {
        match (self, inverted) {
            (Self::Low, true) => Self::High,
            (Self::High, true) => Self::Low,
            (mode, _) => mode,
        }
    }

    /// Whether the pin is configured as an input.
    pub fn is_input(self) -> bool {
        matches!(self, Self::Input | Self::PullUp)
    }

    /// Control code on the wire.
    pub(crate) fn control_code(self) -> u8 {
        match self {
            Self::Low => 0,
            Self::High => 1,
            Self::Input => 2,
            Self::PullUp => 3,
        }
    }
}

/// Last mode commanded for every digital pin, in physical terms.
#[derive(Debug, Clone)]
pub struct PinCache {
    modes: Vec<PinMode>,
}

impl PinCache {
    /// All pins start as floating inputs.
    pub fn new(pins: usize) -> Self {
        Self {
            modes: vec![PinMode::Input; pins],
        }
    }

    /// Number of pins.
    pub fn len(&self) -> usize {
        self.modes.len()
    }

    /// Whether the controller has no digital pins.
    pub fn is_empty(&self) -> bool {
        self.modes.is_empty()
    }

    /// Cached mode of a pin.
    pub fn get(&self, pin: usize) -> Option<PinMode> {
        self.modes.get(pin).copied()
    }

    /// Record a mode; returns whether it differs from the cached one.
    pub fn update(&mut self, pin: usize, mode: PinMode) -> Result<bool> {
        let limit = self.modes.len();
        let slot = self
            .modes
            .get_mut(pin)
            .ok_or(Error::invalid("pin", pin, limit))?;
        if *slot == mode {
            return Ok(false);
        }
        *slot = mode;
        Ok(true)
    }
}

/// Latest sample and sensor binding of every analog input.
#[derive(Debug, Clone)]
pub struct AdcTable {
    values: Vec<Option<u16>>,
    bindings: Vec<Option<u32>>,
}

impl AdcTable {
    /// All inputs start unsampled and unbound.
    pub fn new(inputs: usize) -> Self {
        Self {
            values: vec![None; inputs],
            bindings: vec![None; inputs],
        }
    }

    /// Number of analog inputs.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the controller has no analog inputs.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn check(&self, pin: usize) -> Result<()> {
        if pin >= self.values.len() {
            return Err(Error::invalid("analog input", pin, self.values.len()));
        }
        Ok(())
    }

    /// Bind an input to a sensor id.
    pub fn bind(&mut self, pin: usize, sensor: u32) -> Result<()> {
        self.check(pin)?;
        self.bindings[pin] = Some(sensor);
        Ok(())
    }

    /// Sensor bound to an input.
    pub fn binding(&self, pin: usize) -> Option<u32> {
        self.bindings.get(pin).copied().flatten()
    }

    /// Store a sample; returns the bound sensor, if any.
    pub fn record(&mut self, pin: usize, value: u16) -> Result<Option<u32>> {
        self.check(pin)?;
        self.values[pin] = Some(value);
        Ok(self.bindings[pin])
    }

    /// Latest sample without consuming it.
    pub fn value(&self, pin: usize) -> Option<u16> {
        self.values.get(pin).copied().flatten()
    }

    /// Whether a fresh sample is waiting.
    pub fn is_ready(&self, pin: usize) -> bool {
        self.value(pin).is_some()
    }

    /// Consume the latest sample.
    pub fn take(&mut self, pin: usize) -> Result<Option<u16>> {
        self.check(pin)?;
        Ok(self.values[pin].take())
    }
}

/// Host view of one motor slot.
#[derive(Debug, Clone, Default)]
pub struct MotorLinkState {
    /// Host position minus controller position.
    pub offset: i32,
    /// Last known host position in steps.
    pub position: i32,
    /// A sense event fired since the last clear.
    pub sensed: bool,
    /// Pins of the motor in this slot; `None` while the slot is inactive.
    pub config: Option<MotorConfig>,
}

impl MotorLinkState {
    /// Whether a motor is configured in this slot.
    pub fn is_active(&self) -> bool {
        self.config.is_some()
    }
}

/// Per-slot motor state.
#[derive(Debug, Clone)]
pub struct MotorTable {
    motors: Vec<MotorLinkState>,
}

impl MotorTable {
    /// All slots start inactive at zero.
    pub fn new(slots: usize) -> Self {
        Self {
            motors: vec![MotorLinkState::default(); slots],
        }
    }

    /// Number of slots.
    pub fn len(&self) -> usize {
        self.motors.len()
    }

    /// Whether the controller has no motor slots.
    pub fn is_empty(&self) -> bool {
        self.motors.is_empty()
    }

    /// State of a slot.
    pub fn get(&self, slot: usize) -> Option<&MotorLinkState> {
        self.motors.get(slot)
    }

    /// Mutable state of a slot.
    pub fn get_mut(&mut self, slot: usize) -> Result<&mut MotorLinkState> {
        let limit = self.motors.len();
        self.motors
            .get_mut(slot)
            .ok_or(Error::invalid("motor", slot, limit))
    }

    /// Iterate over all slots.
    pub fn iter(&self) -> impl Iterator<Item = &MotorLinkState> {
        self.motors.iter()
    }

    /// Shift a slot's reference point without moving the motor.
    pub fn add_position(&mut self, slot: usize, diff: i32) -> Result<()> {
        let motor = self.get_mut(slot)?;
        motor.offset = motor.offset.wrapping_add(diff);
        motor.position = motor.position.wrapping_add(diff);
        Ok(())
    }

    /// Overwrite positions from a controller position vector.
    ///
    /// Every listed slot is updated before anyone can look at the table.
    pub fn reconcile(&mut self, device_positions: &[i32]) {
        for (motor, &device) in self.motors.iter_mut().zip(device_positions) {
            motor.position = device.wrapping_add(motor.offset);
        }
    }
}
