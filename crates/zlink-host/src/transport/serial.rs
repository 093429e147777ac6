//! Serial port back-end and port discovery.
//!
//! Platform specifics are handled by the `serialport` crate.

use std::io::{Read, Write};
use std::time::Duration;

use serialport::{SerialPort, SerialPortType};

use super::{PortOpener, SerialIo};
use crate::config::{BaudRate, LinkConfig};
use crate::error::TransportError;

/// USB vendor/product pairs of known coordinator sticks.
const KNOWN_COORDINATORS: &[(u16, u16)] = &[
    // FTDI FT230X bridge
    (0x0403, 0x6015),
    // Native USB CDC firmware
    (0x1CF1, 0x0030),
];

impl SerialIo for Box<dyn SerialPort> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        Read::read(self, buf)
    }

    fn write_all(&mut self, data: &[u8]) -> std::io::Result<()> {
        Write::write_all(self, data)?;
        Write::flush(self)
    }
}

/// Opens a serial port with the configured baud rate.
#[derive(Debug, Clone)]
pub struct SerialPortOpener {
    path: String,
    baud_rate: BaudRate,
    read_timeout: Duration,
}

impl SerialPortOpener {
    /// Create an opener for `path`.
    pub fn new(path: impl Into<String>, baud_rate: BaudRate, read_timeout: Duration) -> Self {
        SerialPortOpener {
            path: path.into(),
            baud_rate,
            read_timeout,
        }
    }

    /// Create an opener from a link configuration.
    pub fn from_config(config: &LinkConfig) -> Self {
        Self::new(
            config.device.clone(),
            config.baud_rate,
            config.transport.read_timeout(),
        )
    }
}

impl PortOpener for SerialPortOpener {
    type Port = Box<dyn SerialPort>;

    fn open(&self) -> Result<Self::Port, TransportError> {
        serialport::new(&self.path, self.baud_rate.as_u32())
            .timeout(self.read_timeout)
            .open()
            .map_err(|e| match e.kind() {
                serialport::ErrorKind::Io(std::io::ErrorKind::PermissionDenied) => {
                    TransportError::PermissionDenied(self.path.clone())
                }
                _ => TransportError::Open {
                    port: self.path.clone(),
                    message: e.to_string(),
                },
            })
    }

    fn name(&self) -> String {
        self.path.clone()
    }
}

/// A serial port found on the system.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortInfo {
    /// Port path or name.
    pub name: String,
    /// USB vendor id.
    pub vid: Option<u16>,
    /// USB product id.
    pub pid: Option<u16>,
    /// USB manufacturer string.
    pub manufacturer: Option<String>,
    /// USB product string.
    pub product: Option<String>,
    /// USB serial number.
    pub serial_number: Option<String>,
}

impl PortInfo {
    /// Whether the USB ids match a known coordinator.
    pub fn looks_like_coordinator(&self) -> bool {
        match (self.vid, self.pid) {
            (Some(vid), Some(pid)) => KNOWN_COORDINATORS.contains(&(vid, pid)),
            _ => false,
        }
    }
}

impl From<serialport::SerialPortInfo> for PortInfo {
    fn from(info: serialport::SerialPortInfo) -> Self {
        match info.port_type {
            SerialPortType::UsbPort(usb) => PortInfo {
                name: info.port_name,
                vid: Some(usb.vid),
                pid: Some(usb.pid),
                manufacturer: usb.manufacturer,
                product: usb.product,
                serial_number: usb.serial_number,
            },
            _ => PortInfo {
                name: info.port_name,
                vid: None,
                pid: None,
                manufacturer: None,
                product: None,
                serial_number: None,
            },
        }
    }
}

/// Enumerate serial ports, likely coordinators first.
pub fn list_ports() -> Result<Vec<PortInfo>, TransportError> {
    let ports = serialport::available_ports().map_err(|e| TransportError::Open {
        port: "<enumerate>".to_string(),
        message: e.to_string(),
    })?;
    let mut ports: Vec<PortInfo> = ports.into_iter().map(PortInfo::from).collect();
    ports.sort_by_key(|p| (!p.looks_like_coordinator(), p.name.clone()));
    Ok(ports)
}
