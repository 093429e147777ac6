//! Simulated coordinator behind the [`PortOpener`] seam.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use zlink_host::transport::{PortOpener, SerialIo};
use zlink_host::{LinkConfig, SchedulerConfig, TransportConfig, TransportError};
use zlink_protocol::{
    decode, encode, Command, FrameCodec, FrameReceiver, Value, CMD_STATUS, CMD_VERSION,
    MAX_COMMAND_SIZE,
};

/// Firmware version the simulated device reports.
pub const FIRMWARE: u32 = 0x2670_0500;

/// How the simulated device reacts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Confirms every command.
    Responsive,
    /// Reads everything, answers nothing.
    Silent,
    /// Only the update loader runs: answers the probe with its banner.
    Bootloader,
}

/// Port failure injected into a running session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Every read fails.
    Read,
    /// Every write fails.
    Write,
}

/// Device-side state shared with the port.
#[derive(Debug)]
pub struct Device {
    pub mode: Mode,
    pub state: u8,
    pub fault: Option<Fault>,
    receiver: FrameReceiver,
    output: VecDeque<u8>,
    /// Commands received from the host, in order.
    pub received: Vec<Command>,
}

impl Device {
    fn on_write(&mut self, data: &[u8]) {
        if data == b"ID\r\n" {
            if self.mode == Mode::Bootloader {
                self.output.extend(b"\r\nBootloader v1.4\r\n");
            }
            return;
        }
        for payload in self.receiver.feed_slice(data) {
            let Ok(command) = decode(&payload) else {
                continue;
            };
            self.received.push(command.clone());
            if self.mode == Mode::Responsive {
                let confirm = self.confirm(command);
                self.send(&confirm);
            }
        }
    }

    fn confirm(&self, mut command: Command) -> Command {
        match command.id {
            CMD_STATUS => command.values = vec![Value::U8(self.state), Value::U8(0)],
            CMD_VERSION => command.values = vec![Value::U32(FIRMWARE)],
            _ => {
                if let Some(first) = command.values.first_mut() {
                    if matches!(first, Value::U8(_)) {
                        *first = Value::U8(self.state);
                    }
                }
            }
        }
        command
    }

    fn send(&mut self, command: &Command) {
        let payload = encode(command, MAX_COMMAND_SIZE).expect("device encodes its reply");
        self.output.extend(FrameCodec::encode(&payload));
    }

    /// Number of received commands with `id`.
    pub fn count(&self, id: u8) -> usize {
        self.received.iter().filter(|c| c.id == id).count()
    }
}

/// Handle to the simulated device.
#[derive(Debug, Clone)]
pub struct MockDevice(Arc<Mutex<Device>>);

impl MockDevice {
    pub fn new(mode: Mode, state: u8) -> Self {
        MockDevice(Arc::new(Mutex::new(Device {
            mode,
            state,
            fault: None,
            receiver: FrameReceiver::new(),
            output: VecDeque::new(),
            received: Vec::new(),
        })))
    }

    /// Emit an unsolicited command.
    pub fn push(&self, command: &Command) {
        self.0.lock().send(command);
    }

    pub fn set_state(&self, state: u8) {
        self.0.lock().state = state;
    }

    /// Make the port fail from now on.
    pub fn fail(&self, fault: Fault) {
        self.0.lock().fault = Some(fault);
    }

    pub fn count(&self, id: u8) -> usize {
        self.0.lock().count(id)
    }

    /// Poll until `check` holds for the device or `timeout` passes.
    pub fn wait_until(&self, timeout: Duration, check: impl Fn(&Device) -> bool) -> bool {
        eventually(timeout, || check(&self.0.lock()))
    }
}

/// Poll `check` until it holds or `timeout` passes.
pub fn eventually(timeout: Duration, check: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    false
}

/// Port end of a [`MockDevice`].
pub struct MockPort {
    device: MockDevice,
}

impl SerialIo for MockPort {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = {
            let mut device = self.device.0.lock();
            if device.fault == Some(Fault::Read) {
                return Err(io::ErrorKind::BrokenPipe.into());
            }
            let n = buf.len().min(device.output.len());
            for (slot, byte) in buf.iter_mut().zip(device.output.drain(..n)) {
                *slot = byte;
            }
            n
        };
        if n == 0 {
            std::thread::sleep(Duration::from_millis(2));
            return Err(io::ErrorKind::TimedOut.into());
        }
        Ok(n)
    }

    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        let mut device = self.device.0.lock();
        if device.fault == Some(Fault::Write) {
            return Err(io::ErrorKind::BrokenPipe.into());
        }
        device.on_write(data);
        Ok(())
    }
}

/// Opens [`MockPort`]s, or fails like a port without access rights.
pub struct MockOpener {
    pub device: MockDevice,
    pub deny: bool,
}

impl PortOpener for MockOpener {
    type Port = MockPort;

    fn open(&self) -> Result<MockPort, TransportError> {
        if self.deny {
            return Err(TransportError::PermissionDenied(self.name()));
        }
        Ok(MockPort {
            device: self.device.clone(),
        })
    }

    fn name(&self) -> String {
        "mock".to_string()
    }
}

/// Link configuration with short timeouts.
pub fn fast_config() -> LinkConfig {
    LinkConfig {
        name: "test".to_string(),
        device: "mock".to_string(),
        scheduler: SchedulerConfig {
            confirm_timeout_ms: 100,
            ..SchedulerConfig::default()
        },
        transport: TransportConfig {
            bootloader_wait_ms: 50,
            read_timeout_ms: 2,
            ..TransportConfig::default()
        },
        ..LinkConfig::default()
    }
}
