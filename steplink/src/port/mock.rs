//! In-memory port for protocol tests.
//!
//! Reads and writes are independent: reads drain a scripted device queue,
//! writes are captured. An optional responder plays the device and may queue
//! bytes in reaction to every host write.

use std::collections::VecDeque;
use std::io::{Read, Write};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::Result;
use crate::port::Port;
use crate::protocol::codec::control;
use crate::protocol::{Request, TOGGLE_BIT, strip_toggle};

type Responder = Box<dyn FnMut(&[u8], &mut Device) + Send>;

/// The simulated controller's outgoing side.
#[derive(Default)]
pub(crate) struct Device {
    rx: VecDeque<u8>,
    toggle: bool,
}

impl Device {
    /// Queue raw bytes.
    pub(crate) fn raw(&mut self, bytes: &[u8]) {
        self.rx.extend(bytes.iter().copied());
    }

    /// Queue a link-level acknowledgement.
    pub(crate) fn ack(&mut self) {
        self.rx.push_back(control::ACK[0]);
    }

    /// Queue a packet, alternating the toggle bit like a real device.
    pub(crate) fn packet(&mut self, payload: &[u8]) -> Vec<u8> {
        let mut packet = payload.to_vec();
        if self.toggle {
            packet[0] |= TOGGLE_BIT;
        }
        self.toggle = !self.toggle;
        self.rx.extend(packet.iter().copied());
        packet
    }
}

#[derive(Default)]
struct Inner {
    device: Device,
    writes: Vec<Vec<u8>>,
    reads: usize,
    hung_up: bool,
    read_error: Option<std::io::ErrorKind>,
    timeouts: Vec<Duration>,
    closed: bool,
    responder: Option<Responder>,
}

/// Cloneable handle; clones share the same state.
#[derive(Clone)]
pub(crate) struct MockPort {
    inner: Arc<Mutex<Inner>>,
    timeout: Duration,
}

impl MockPort {
    pub(crate) fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            timeout: Duration::ZERO,
        }
    }

    /// A port whose device acknowledges every request it receives.
    pub(crate) fn acking() -> Self {
        let port = Self::new();
        port.respond_with(|frame, device| {
            if Request::from_code(frame[0]).is_some() {
                device.ack();
            }
        });
        port
    }

    pub(crate) fn respond_with<F>(&self, responder: F)
    where
        F: FnMut(&[u8], &mut Device) + Send + 'static,
    {
        self.inner.lock().unwrap().responder = Some(Box::new(responder));
    }

    pub(crate) fn push_rx(&self, bytes: &[u8]) {
        self.inner.lock().unwrap().device.raw(bytes);
    }

    /// Queue a device packet and return it as framed on the wire.
    pub(crate) fn push_packet(&self, payload: &[u8]) -> Vec<u8> {
        self.inner.lock().unwrap().device.packet(payload)
    }

    pub(crate) fn hang_up(&self) {
        self.inner.lock().unwrap().hung_up = true;
    }

    /// Make every read fail with `kind` once the queue is drained.
    pub(crate) fn fail_reads(&self, kind: std::io::ErrorKind) {
        self.inner.lock().unwrap().read_error = Some(kind);
    }

    pub(crate) fn reads(&self) -> usize {
        self.inner.lock().unwrap().reads
    }

    pub(crate) fn timeouts_set(&self) -> usize {
        self.inner.lock().unwrap().timeouts.len()
    }

    pub(crate) fn closed(&self) -> bool {
        self.inner.lock().unwrap().closed
    }

    pub(crate) fn last_timeout(&self) -> Option<Duration> {
        self.inner.lock().unwrap().timeouts.last().copied()
    }

    pub(crate) fn written(&self) -> Vec<Vec<u8>> {
        self.inner.lock().unwrap().writes.clone()
    }

    /// Framed requests written so far, toggle bit stripped.
    pub(crate) fn requests(&self) -> Vec<Vec<u8>> {
        self.written()
            .into_iter()
            .filter(|w| Request::from_code(w[0]).is_some())
            .map(|mut w| {
                w[0] = strip_toggle(w[0]);
                w
            })
            .collect()
    }

    pub(crate) fn requests_of(&self, request: Request) -> Vec<Vec<u8>> {
        self.requests()
            .into_iter()
            .filter(|w| w[0] == request.code())
            .collect()
    }

    /// Single-byte control writes (acks and stalls) sent by the host.
    pub(crate) fn control_writes(&self) -> Vec<u8> {
        self.written()
            .into_iter()
            .filter(|w| w.len() == 1 && Request::from_code(w[0]).is_none())
            .map(|w| w[0])
            .collect()
    }

    pub(crate) fn clear_written(&self) {
        self.inner.lock().unwrap().writes.clear();
    }
}

impl Port for MockPort {
    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.timeout = timeout;
        self.inner.lock().unwrap().timeouts.push(timeout);
        Ok(())
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn baud_rate(&self) -> u32 {
        115200
    }

    fn clear_buffers(&mut self) -> Result<()> {
        self.inner.lock().unwrap().device.rx.clear();
        Ok(())
    }

    fn name(&self) -> &str {
        "mock"
    }

    fn close(&mut self) -> Result<()> {
        self.inner.lock().unwrap().closed = true;
        Ok(())
    }
}

impl Read for MockPort {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let mut inner = self.inner.lock().unwrap();
        inner.reads += 1;
        if inner.device.rx.is_empty() {
            if inner.hung_up {
                return Ok(0);
            }
            if let Some(kind) = inner.read_error {
                return Err(std::io::Error::new(kind, "line down"));
            }
            return Err(std::io::Error::new(std::io::ErrorKind::TimedOut, "no data"));
        }
        let n = buf.len().min(inner.device.rx.len());
        for b in buf.iter_mut().take(n) {
            *b = inner.device.rx.pop_front().unwrap();
        }
        Ok(n)
    }
}

impl Write for MockPort {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut inner = self.inner.lock().unwrap();
        inner.writes.push(buf.to_vec());
        if let Some(mut responder) = inner.responder.take() {
            responder(buf, &mut inner.device);
            inner.responder = Some(responder);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
