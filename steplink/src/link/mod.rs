//! Link driver.
//!
//! [`LinkDriver`] owns the transport, the framing codec and every host-side
//! table. All traffic is sequential: at most one request awaits a reply, and
//! at most one packet awaits its link-level acknowledgement. Every wait is a
//! bounded loop of poll rounds; while waiting, unsolicited events are
//! dispatched as they arrive.
//!
//! ```text
//!             handshake()            negotiate()
//!  Unsynced ─────────────▶ Syncing ─────────────▶ Synced
//!     ▲                                             │
//!     └──────── EOF, handshake failure, reset ──────┘
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use steplink::{LinkDriver, Pin, PinMode, SerialConfig};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut link = LinkDriver::open(&SerialConfig::new("/dev/ttyACM0", 115200))?;
//!     let caps = link.connect()?;
//!     println!("{} motors", caps.motors);
//!
//!     link.set_pin_mode(Pin::new(13), PinMode::High)?;
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod capabilities;
mod dispatch;
pub mod fragments;
pub mod retry;
pub mod topology;

use std::time::{Duration, Instant};

use byteorder::{ByteOrder, LittleEndian};
use log::{debug, error, info, trace, warn};

use crate::consumer::{LinkConsumer, NullConsumer};
use crate::error::{Error, Result};
use crate::port::Port;
use crate::protocol::{Codec, Decoded, NO_PIN, PlainCodec, Reply, Request, reply_len};
use crate::transport::Transport;
use cache::{AdcTable, MotorTable, PinCache, PinMode};
use capabilities::{Capabilities, TemperatureSensor};
use fragments::{Direction, FragmentBuffer};
use retry::{LinkConfig, RetryPolicy};
use topology::{MotorConfig, Pin, Topology};

#[cfg(feature = "native")]
use crate::port::{NativePort, SerialConfig};

/// Liveness probes sent by the handshake; it waits for the echo of the last.
const PROBE_COUNT: u8 = 3;

/// Control request flag: set the pin mode and level.
const CONTROL_SET_MODE: u8 = 0x0C;

/// Liveness of the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// No live controller.
    Unsynced,
    /// Echoes received, capabilities not yet negotiated.
    Syncing,
    /// Capabilities negotiated; all operations available.
    Synced,
}

/// Host view of motion on the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotionState {
    /// Nothing moving.
    Idle,
    /// The controller is executing fragments.
    Running,
    /// A limit or abort halted motion; fragments are refused until cleared.
    Stopping,
}

/// The request currently awaiting a reply.
#[derive(Debug, Clone)]
pub struct PendingRequest {
    /// Command code, toggle bit clear.
    pub command: u8,
    /// Retransmissions so far.
    pub retries: u32,
    /// When the full wait budget runs out.
    pub deadline: Instant,
    frame: Vec<u8>,
}

/// Tables sized from the negotiated capabilities.
#[derive(Debug, Clone)]
pub struct DeviceState {
    /// What the controller reported.
    pub capabilities: Capabilities,
    /// Digital pin modes.
    pub pins: PinCache,
    /// Analog samples and sensor bindings.
    pub adc: AdcTable,
    /// Motor offsets and positions.
    pub motors: MotorTable,
    /// Fragment staging and credit.
    pub fragments: FragmentBuffer,
}

impl DeviceState {
    fn new(capabilities: Capabilities) -> Self {
        Self {
            pins: PinCache::new(usize::from(capabilities.digital_pins)),
            adc: AdcTable::new(usize::from(capabilities.analog_inputs)),
            motors: MotorTable::new(usize::from(capabilities.motors)),
            fragments: FragmentBuffer::new(&capabilities),
            capabilities,
        }
    }
}

/// Host-side driver of one controller link.
///
/// Generic over the port and the framing codec.
pub struct LinkDriver<P: Port, C: Codec = PlainCodec> {
    transport: Transport<P>,
    codec: C,
    config: LinkConfig,
    consumer: Box<dyn LinkConsumer>,
    state: LinkState,
    motion: MotionState,
    pending: Option<PendingRequest>,
    reply: Option<Vec<u8>>,
    in_flight: Option<Vec<u8>>,
    echo: Option<u8>,
    device: Option<DeviceState>,
    topology: Topology,
    active_motors: usize,
    pending_callbacks: u32,
}

#[cfg(feature = "native")]
impl LinkDriver<NativePort> {
    /// Open a serial port and wrap it in an unsynced driver.
    pub fn open(config: &SerialConfig) -> Result<Self> {
        let port = NativePort::open(config)?;
        Ok(Self::new(port))
    }
}

impl<P: Port> LinkDriver<P> {
    /// Create an unsynced driver with plain framing.
    pub fn new(port: P) -> Self {
        Self::with_codec(port, PlainCodec::new())
    }
}

impl<P: Port, C: Codec> LinkDriver<P, C> {
    /// Create an unsynced driver with a custom framing codec.
    pub fn with_codec(port: P, codec: C) -> Self {
        Self {
            transport: Transport::new(port),
            codec,
            config: LinkConfig::default(),
            consumer: Box::new(NullConsumer),
            state: LinkState::Unsynced,
            motion: MotionState::Idle,
            pending: None,
            reply: None,
            in_flight: None,
            echo: None,
            device: None,
            topology: Topology::default(),
            active_motors: 0,
            pending_callbacks: 0,
        }
    }

    /// Replace the wait budgets.
    #[must_use]
    pub fn with_config(mut self, config: LinkConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the event consumer.
    #[must_use]
    pub fn with_consumer(mut self, consumer: impl LinkConsumer + 'static) -> Self {
        self.consumer = Box::new(consumer);
        self
    }

    /// Replace the event consumer in place.
    pub fn set_consumer(&mut self, consumer: Box<dyn LinkConsumer>) {
        self.consumer = consumer;
    }

    /// Get a reference to the underlying port.
    pub fn port(&self) -> &P {
        self.transport.port()
    }

    /// Get a mutable reference to the underlying port.
    pub fn port_mut(&mut self) -> &mut P {
        self.transport.port_mut()
    }

    /// Consume the driver and return the underlying port.
    pub fn into_port(self) -> P {
        self.transport.into_port()
    }

    /// Wait budgets in use.
    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    /// Liveness of the link.
    pub fn link_state(&self) -> LinkState {
        self.state
    }

    /// Host view of motion.
    pub fn motion_state(&self) -> MotionState {
        self.motion
    }

    /// Negotiated capabilities, once synced.
    pub fn capabilities(&self) -> Option<Capabilities> {
        self.device.as_ref().map(|d| d.capabilities)
    }

    /// Negotiated tables, once synced.
    pub fn device_state(&self) -> Option<&DeviceState> {
        self.device.as_ref()
    }

    /// The request awaiting a reply, if any.
    pub fn pending_request(&self) -> Option<&PendingRequest> {
        self.pending.as_ref()
    }

    /// Motor layout last pushed to the controller.
    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    /// Motor slots configured on the controller.
    pub fn active_motors(&self) -> usize {
        self.active_motors
    }

    fn device(&self) -> Result<&DeviceState> {
        self.device.as_ref().ok_or(Error::NotSynced)
    }

    fn device_mut(&mut self) -> Result<&mut DeviceState> {
        self.device.as_mut().ok_or(Error::NotSynced)
    }

    fn enter_unsynced(&mut self) {
        if self.state != LinkState::Unsynced {
            warn!("Link to {} lost", self.transport.port().name());
        }
        self.state = LinkState::Unsynced;
        self.motion = MotionState::Idle;
        self.pending = None;
        self.reply = None;
        self.in_flight = None;
        self.echo = None;
        self.device = None;
        self.active_motors = 0;
    }

    // ---- transport ----

    fn write_ack(&mut self) -> Result<()> {
        let ack = self.codec.ack();
        self.transport.write_bytes(&ack)
    }

    fn write_stall(&mut self) -> Result<()> {
        let stall = self.codec.stall();
        self.transport.write_bytes(&stall)
    }

    /// Run one poll round: wait up to `timeout`, then decode and dispatch
    /// everything that arrived.
    pub fn service(&mut self, timeout: Duration) -> Result<()> {
        if let Err(e) = self.transport.poll(timeout) {
            if e.is_fatal() {
                self.enter_unsynced();
            }
            if matches!(e, Error::Eof(_)) {
                if let Err(close) = self.transport.port_mut().close() {
                    warn!("Closing {} failed: {close}", self.transport.port().name());
                }
            }
            return Err(e);
        }

        while let Some(byte) = self.transport.read_byte() {
            let active = self.active_motors;
            let Some(decoded) = self.codec.feed(byte, &|head| reply_len(head, active)) else {
                continue;
            };
            match decoded {
                Decoded::Ack => {
                    trace!("Ack");
                    self.in_flight = None;
                },
                Decoded::Nack => {
                    debug!("Nack, resending");
                    self.retransmit()?;
                },
                Decoded::Stall => {
                    warn!("Controller refused the last packet");
                    self.in_flight = None;
                },
                Decoded::Duplicate => self.write_ack()?,
                Decoded::Packet(packet) => self.dispatch(&packet)?,
            }
        }
        Ok(())
    }

    /// Poll until `done` holds or the budget runs out; returns whether it held.
    fn await_with_retry(
        &mut self,
        policy: RetryPolicy,
        done: fn(&Self) -> bool,
        resend: fn(&mut Self) -> Result<()>,
    ) -> Result<bool> {
        for round in 0..policy.max_rounds {
            if done(self) {
                return Ok(true);
            }
            self.service(policy.round_timeout())?;
            if !done(self) && policy.resend_due(round) {
                resend(self)?;
            }
        }
        Ok(done(self))
    }

    fn retransmit(&mut self) -> Result<()> {
        if let Some(frame) = self.in_flight.clone() {
            debug!("Resending {:#04x}", frame[0]);
            self.transport.write_bytes(&frame)?;
        }
        Ok(())
    }

    fn deliver(&mut self, frame: Vec<u8>) -> Result<bool> {
        self.transport.write_bytes(&frame)?;
        self.in_flight = Some(frame);

        let acked = self.await_with_retry(self.config.send, |d| d.in_flight.is_none(), Self::retransmit)?;
        if !acked {
            let code = self.in_flight.take().map_or(0, |f| f[0]);
            warn!("Packet {code:#04x} was never acknowledged, continuing");
        }
        Ok(acked)
    }

    /// Send a packet and wait for its link-level acknowledgement.
    ///
    /// Returns `false` if the budget ran out; the link stays usable.
    pub fn send_with_ack(&mut self, payload: &[u8]) -> Result<bool> {
        let frame = self.codec.frame(payload);
        self.deliver(frame)
    }

    // ---- request/reply ----

    /// Send a request that expects a reply, without waiting for the reply.
    ///
    /// Fails with [`Error::RequestOutstanding`] and writes nothing if
    /// another request is still waiting.
    pub fn begin_request(&mut self, request: Request, args: &[u8]) -> Result<()> {
        if let Some(pending) = &self.pending {
            error!(
                "Request {:#04x} issued while {:#04x} is outstanding",
                request.code(),
                pending.command
            );
            return Err(Error::RequestOutstanding {
                outstanding: pending.command,
                requested: request.code(),
            });
        }

        let mut payload = Vec::with_capacity(args.len() + 1);
        payload.push(request.code());
        payload.extend_from_slice(args);
        let frame = self.codec.frame(&payload);

        self.reply = None;
        self.pending = Some(PendingRequest {
            command: request.code(),
            retries: 0,
            deadline: Instant::now() + self.config.send.ceiling() + self.config.reply.ceiling(),
            frame: frame.clone(),
        });

        if let Err(e) = self.deliver(frame) {
            self.pending = None;
            return Err(e);
        }
        Ok(())
    }

    fn resend_request(&mut self) -> Result<()> {
        let Some(pending) = self.pending.as_mut() else {
            return Ok(());
        };
        pending.retries += 1;
        debug!(
            "No reply to {:#04x}, resending (retry {})",
            pending.command, pending.retries
        );
        let frame = pending.frame.clone();
        self.deliver(frame).map(|_| ())
    }

    /// Wait for the reply to the outstanding request.
    ///
    /// Returns `None` when the budget runs out; the request is dropped and
    /// the link stays usable.
    pub fn await_reply(&mut self) -> Result<Option<Vec<u8>>> {
        if let Some(pending) = &self.pending {
            let command = pending.command;
            let answered = self.await_with_retry(self.config.reply, |d| d.pending.is_none(), Self::resend_request)?;
            if !answered {
                warn!("No reply to {command:#04x}, continuing without it");
                self.pending = None;
                return Ok(None);
            }
        }
        Ok(self.reply.take())
    }

    /// Send a request and wait for its reply.
    pub fn call(&mut self, request: Request, args: &[u8]) -> Result<Option<Vec<u8>>> {
        self.begin_request(request, args)?;
        self.await_reply()
    }

    // ---- liveness and negotiation ----

    /// Establish liveness.
    ///
    /// Resynchronizes the framing, sends three probes and waits for the echo
    /// of the last one. Skipped if that echo was already seen.
    pub fn handshake(&mut self) -> Result<()> {
        let last = PROBE_COUNT - 1;
        if self.echo == Some(last) {
            debug!("Link already live, handshake skipped");
            return Ok(());
        }

        info!(
            "Synchronizing with {} at {} baud...",
            self.transport.port().name(),
            self.transport.port().baud_rate()
        );
        self.state = LinkState::Syncing;
        self.echo = None;
        self.pending = None;
        self.in_flight = None;

        // Bytes from before the resync belong to a dead session.
        self.transport.discard()?;

        let sync = self.codec.resync();
        self.transport.write_bytes(&sync)?;
        for probe in 0..PROBE_COUNT {
            let frame = self.codec.frame(&[Request::Ping.code(), probe]);
            self.transport.write_bytes(&frame)?;
        }

        let live = self.await_with_retry(self.config.handshake, |d| d.echo == Some(PROBE_COUNT - 1), |_| Ok(()))?;
        if !live {
            error!("No echo from {}", self.transport.port().name());
            self.enter_unsynced();
            return Err(Error::HandshakeFailed(format!(
                "no echo after {} rounds",
                self.config.handshake.max_rounds
            )));
        }

        info!("Link is live");
        Ok(())
    }

    /// Query the controller's capabilities and size every table from them.
    pub fn negotiate(&mut self) -> Result<Capabilities> {
        if self.state != LinkState::Syncing {
            return Err(Error::NotSynced);
        }

        let parsed = self.call(Request::Begin, &[]).and_then(|reply| {
            let reply = reply.ok_or_else(|| Error::Protocol("no reply to begin request".to_string()))?;
            Capabilities::parse(&reply)
        });
        let caps = match parsed {
            Ok(caps) => caps,
            Err(e) => {
                error!("Capability negotiation failed: {e}");
                self.enter_unsynced();
                return Err(e);
            },
        };

        info!(
            "Controller v{}: {} pins, {} analog, {} motors, {} buffers of {}x{} bytes",
            caps.protocol_version,
            caps.digital_pins,
            caps.analog_inputs,
            caps.motors,
            caps.buffers,
            caps.fragments_per_buffer,
            caps.bytes_per_fragment
        );

        self.device = Some(DeviceState::new(caps));
        self.echo = None;
        self.motion = MotionState::Idle;
        self.active_motors = 0;
        self.pending_callbacks = 0;
        self.state = LinkState::Synced;
        Ok(caps)
    }

    /// Handshake, then negotiate.
    pub fn connect(&mut self) -> Result<Capabilities> {
        self.handshake()?;
        self.negotiate()
    }

    /// Reset the controller. The link must be re-established afterwards.
    pub fn device_reset(&mut self) -> Result<()> {
        info!("Resetting controller");
        self.send_with_ack(&[Request::Reset.code()])?;
        self.enter_unsynced();
        Ok(())
    }

    // ---- pins and sensors ----

    /// Drive a pin, skipping the request if the cache already matches.
    ///
    /// Polarity is applied before the comparison. Returns whether a request
    /// was sent.
    pub fn set_pin_mode(&mut self, pin: Pin, mode: PinMode) -> Result<bool> {
        let physical = mode.physical(pin.inverted);
        if !self.device_mut()?.pins.update(usize::from(pin.index), physical)? {
            trace!("Pin {} already {physical:?}", pin.index);
            return Ok(false);
        }

        debug!("Pin {} -> {physical:?}", pin.index);
        self.send_with_ack(&[
            Request::Control.code(),
            1,
            CONTROL_SET_MODE | physical.control_code(),
            pin.index,
        ])?;
        Ok(true)
    }

    /// Make a pin an output, driven logically low, unless it already is one.
    pub fn set_output(&mut self, pin: Pin) -> Result<bool> {
        let pins = &self.device()?.pins;
        let current = pins
            .get(usize::from(pin.index))
            .ok_or(Error::invalid("pin", usize::from(pin.index), pins.len()))?;
        if !current.is_input() {
            return Ok(false);
        }
        self.set_pin_mode(pin, PinMode::Low)
    }

    /// Read the logical level of a pin.
    ///
    /// Returns `None` if the controller never answered.
    pub fn read_pin(&mut self, pin: Pin) -> Result<Option<bool>> {
        let limit = self.device()?.pins.len();
        if usize::from(pin.index) >= limit {
            return Err(Error::invalid("pin", usize::from(pin.index), limit));
        }

        let Some(reply) = self.call(Request::GetPin, &[pin.index])? else {
            return Ok(None);
        };
        if Reply::from_code(reply[0]) != Some(Reply::Pin) {
            warn!("Expected pin reply, got {:#04x}", reply[0]);
            return Ok(None);
        }
        let level = reply.get(1).is_some_and(|&b| b != 0);
        Ok(Some(level ^ pin.inverted))
    }

    /// Bind an analog input to a sensor and configure it on the controller.
    pub fn setup_temperature(&mut self, sensor: &TemperatureSensor) -> Result<()> {
        let device = self.device_mut()?;
        if let Some(power) = sensor.power_pin {
            let limit = device.pins.len();
            if usize::from(power) >= limit {
                return Err(Error::invalid("pin", usize::from(power), limit));
            }
        }
        device.adc.bind(usize::from(sensor.thermistor_pin), sensor.id)?;

        debug!("Sensor {} on analog input {}", sensor.id, sensor.thermistor_pin);
        self.send_with_ack(&sensor.setup_payload())?;
        Ok(())
    }

    /// Consume the latest sample of an analog input.
    pub fn take_adc(&mut self, pin: usize) -> Result<Option<u16>> {
        self.device_mut()?.adc.take(pin)
    }

    /// Whether an analog input has a sample waiting.
    pub fn adc_ready(&self, pin: usize) -> Result<bool> {
        Ok(self.device()?.adc.is_ready(pin))
    }

    // ---- motors ----

    /// Push the LED pin and step time.
    pub fn push_globals(&mut self, led: Option<Pin>, step_time_us: u32) -> Result<()> {
        self.device()?;
        let mut payload = [Request::Setup.code(), led.map_or(NO_PIN, |p| p.index), 0, 0, 0, 0];
        LittleEndian::write_u32(&mut payload[2..], step_time_us);
        self.send_with_ack(&payload)?;
        Ok(())
    }

    /// Push a full motor layout; slots left over from a larger layout are
    /// cleared.
    pub fn push_topology(&mut self, topology: Topology) -> Result<()> {
        let caps = self.device()?.capabilities;
        let count = topology.motor_count();
        let limit = usize::from(caps.motors.min(caps.buffers));
        if count > limit {
            return Err(Error::Config(format!(
                "{count} motors configured, controller supports {limit}"
            )));
        }

        let motors = &mut self.device_mut()?.motors;
        for slot in 0..motors.len() {
            motors.get_mut(slot)?.config = topology.motor(slot).cloned();
        }
        self.topology = topology;

        let previous = self.active_motors;
        for slot in 0..count {
            self.push_motor(slot)?;
        }
        for slot in count..previous {
            self.send_with_ack(&MotorConfig::cleared_payload(slot_byte(slot)?))?;
        }
        self.active_motors = count;
        info!("Configured {count} motors");
        Ok(())
    }

    /// Push one slot of the current layout.
    pub fn push_motor(&mut self, slot: usize) -> Result<()> {
        self.device()?;
        let payload = self
            .topology
            .motor(slot)
            .ok_or(Error::invalid("motor", slot, self.topology.motor_count()))?
            .setup_payload(slot_byte(slot)?);
        self.send_with_ack(&payload)?;
        Ok(())
    }

    fn slot(&self, axis: usize, motor: usize) -> Result<usize> {
        self.topology.slot(axis, motor).ok_or(Error::invalid(
            "motor",
            motor,
            self.topology.axes().get(axis).map_or(0, Vec::len),
        ))
    }

    /// Shift a motor's reference point by `diff` steps.
    pub fn add_position(&mut self, axis: usize, motor: usize, diff: i32) -> Result<()> {
        let slot = self.slot(axis, motor)?;
        self.device_mut()?.motors.add_position(slot, diff)
    }

    /// Last known host position of a motor, in steps.
    pub fn position(&self, axis: usize, motor: usize) -> Result<i32> {
        let slot = self.slot(axis, motor)?;
        let motors = &self.device()?.motors;
        motors
            .get(slot)
            .map(|m| m.position)
            .ok_or(Error::invalid("motor", slot, motors.len()))
    }

    /// Queue a callback that fires when the current move completes.
    pub fn queue_move_callback(&mut self) {
        self.pending_callbacks += 1;
    }

    /// Move callbacks queued and not yet delivered.
    pub fn pending_callbacks(&self) -> u32 {
        self.pending_callbacks
    }

    // ---- fragments and motion ----

    fn check_slot(&self, slot: usize) -> Result<()> {
        if slot >= self.active_motors {
            return Err(Error::invalid("motor", slot, self.active_motors));
        }
        Ok(())
    }

    /// Store one step sample of a motor slot in a fragment.
    pub fn set_step(&mut self, fragment: usize, slot: usize, position: usize, value: u8) -> Result<()> {
        self.check_slot(slot)?;
        self.device_mut()?.fragments.set_step(fragment, slot, position, value)
    }

    /// Set the direction of a motor slot in a fragment; `None` leaves it idle.
    pub fn set_direction(&mut self, fragment: usize, slot: usize, direction: Option<Direction>) -> Result<()> {
        self.check_slot(slot)?;
        self.device_mut()?.fragments.set_direction(fragment, slot, direction)
    }

    /// Zero a fragment for reuse.
    pub fn clear_fragment(&mut self, fragment: usize) -> Result<()> {
        self.device_mut()?.fragments.clear(fragment)
    }

    /// Take one unit of credit for a new fragment; false when none is left.
    pub fn admit_fragment(&mut self) -> Result<bool> {
        Ok(self.device_mut()?.fragments.try_admit())
    }

    /// Credit currently available.
    pub fn free_fragments(&self) -> Result<u32> {
        Ok(self.device()?.fragments.free())
    }

    /// Transmit a staged fragment.
    ///
    /// Returns `false` without sending, or partway through, once motion is
    /// stopping.
    pub fn send_fragment(&mut self, fragment: usize) -> Result<bool> {
        if self.motion == MotionState::Stopping {
            debug!("Stopping, fragment {fragment} dropped");
            return Ok(false);
        }

        let active = self.active_motors;
        let inverted: Vec<bool> = self
            .device()?
            .motors
            .iter()
            .take(active)
            .map(|m| m.config.as_ref().is_some_and(MotorConfig::dir_inverted))
            .collect();
        let packets = self.device_mut()?.fragments.encode(fragment, &inverted)?;
        trace!("Fragment {fragment}: {} packets", packets.len());

        for packet in packets {
            if self.motion == MotionState::Stopping {
                debug!("Stopped while sending fragment {fragment}");
                return Ok(false);
            }
            self.send_with_ack(&packet)?;
        }
        Ok(true)
    }

    /// Start executing queued fragments. Only valid from idle.
    pub fn start(&mut self) -> Result<bool> {
        self.device()?;
        if self.motion != MotionState::Idle {
            debug!("Start ignored while {:?}", self.motion);
            return Ok(false);
        }
        self.motion = MotionState::Running;
        self.send_with_ack(&[Request::Start.code()])?;
        Ok(true)
    }

    /// Stop motion and take the controller's positions.
    ///
    /// Returns `false` if the controller never answered.
    pub fn stop(&mut self) -> Result<bool> {
        self.device()?;
        let Some(reply) = self.call(Request::Stop, &[])? else {
            return Ok(false);
        };
        if Reply::from_code(reply[0]) != Some(Reply::Stopped) {
            warn!("Expected stopped reply, got {:#04x}", reply[0]);
            return Ok(false);
        }

        let offset = Reply::Stopped.position_offset().unwrap_or(3);
        let positions = dispatch::read_positions(reply.get(offset..).unwrap_or_default(), self.active_motors)
            .ok_or_else(|| Error::Protocol(format!("stopped reply too short: {} bytes", reply.len())))?;

        let device = self.device_mut()?;
        device.motors.reconcile(&positions);
        device.fragments.reset_credit();
        self.motion = MotionState::Idle;
        info!("Motion stopped");
        Ok(true)
    }

    /// Abort motion without waiting for positions.
    pub fn abort(&mut self) -> Result<()> {
        self.device()?;
        self.send_with_ack(&[Request::Abort.code()])?;
        self.device_mut()?.fragments.reset_credit();
        self.motion = MotionState::Stopping;
        warn!("Motion aborted");
        Ok(())
    }

    /// Leave the stopping state so fragments are accepted again.
    pub fn clear_stop(&mut self) {
        if self.motion == MotionState::Stopping {
            debug!("Stop cleared");
            self.motion = MotionState::Idle;
        }
    }
}

/// Slot number as carried in the one-byte motor field.
fn slot_byte(slot: usize) -> Result<u8> {
    u8::try_from(slot).map_err(|_| Error::invalid("motor", slot, usize::from(u8::MAX) + 1))
}
