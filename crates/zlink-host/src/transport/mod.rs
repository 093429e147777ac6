//! Transport layer.
//!
//! A [`Transport`] owns the physical connection and exposes it as two byte
//! rings plus a stream of [`TransportEvent`]s. The only implementation,
//! [`IoTransport`], runs a dedicated I/O thread over anything a
//! [`PortOpener`] produces: serial ports via [`SerialPortOpener`], or
//! in-memory devices in tests.
//!
//! ```text
//!   Closed ──open──> Opening ──port open──> ProbingBootloader
//!                                                │ probe written
//!                                                v
//!   Operational <──wait elapsed── AwaitingBootloaderTimeout
//!
//!   any state ──fatal I/O error or close──> Closed
//! ```

mod io;
mod ring;
mod serial;

pub use io::IoTransport;
pub use ring::ByteRing;
pub use serial::{list_ports, PortInfo, SerialPortOpener};

use std::fmt;

use crossbeam_channel::Receiver;

use crate::error::TransportError;
use crate::events::DisconnectReason;

/// Identification probe written right after the port opens.
pub const BOOTLOADER_PROBE: &[u8] = b"ID\r\n";
/// Text the update loader prints when it answers the probe.
pub const BOOTLOADER_BANNER: &[u8] = b"Bootloader";
/// Capacity of each ring buffer.
pub const RING_CAPACITY: usize = 4096;

/// Transport session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TransportState {
    /// No session.
    #[default]
    Closed,
    /// The port is being opened.
    Opening,
    /// The identification probe is being written.
    ProbingBootloader,
    /// Waiting for the bootloader wait to elapse.
    AwaitingBootloaderTimeout,
    /// Frames may flow.
    Operational,
}

impl fmt::Display for TransportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportState::Closed => write!(f, "closed"),
            TransportState::Opening => write!(f, "opening"),
            TransportState::ProbingBootloader => write!(f, "probing"),
            TransportState::AwaitingBootloaderTimeout => write!(f, "awaiting-bootloader"),
            TransportState::Operational => write!(f, "operational"),
        }
    }
}

/// Notification raised by a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportEvent {
    /// Inbound bytes are waiting in the ring.
    Readable,
    /// Bring-up finished; the transport is operational.
    Connected,
    /// The update loader banner was observed during bring-up.
    BootloaderActive,
    /// The session ended.
    Disconnected(DisconnectReason),
}

/// A [`TransportEvent`] tagged with the session that raised it.
///
/// Sessions are numbered from 1 and a new number is taken on every `open`.
/// Events of an ended session may still be queued after the next one starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionEvent {
    pub session: u64,
    pub event: TransportEvent,
}

/// Byte-level connection to the coordinator.
///
/// No method blocks on device I/O.
pub trait Transport: Send {
    /// Start a session. Progress is reported through [`events`](Transport::events).
    fn open(&mut self) -> Result<(), TransportError>;

    /// Number of the current session, or of the last one if closed.
    fn session(&self) -> u64;

    /// End the session. A `Disconnected(reason)` event follows if a session
    /// was running.
    fn close(&mut self, reason: DisconnectReason);

    /// Current session state.
    fn state(&self) -> TransportState;

    /// Queue a complete frame for transmission. Fails without queuing
    /// anything if the outbound ring cannot take all of it.
    fn write(&mut self, frame: &[u8]) -> Result<(), TransportError>;

    /// Move all buffered inbound bytes into `out`. Returns the count.
    fn read(&mut self, out: &mut Vec<u8>) -> usize;

    /// Next pending event, if any.
    fn poll_event(&mut self) -> Option<SessionEvent> {
        self.events().try_recv().ok()
    }

    /// Event stream of this transport, shared across sessions.
    fn events(&self) -> Receiver<SessionEvent>;
}

/// Blocking byte stream produced by a [`PortOpener`].
pub trait SerialIo: Send {
    /// Read available bytes, waiting at most the configured read timeout.
    /// A timeout is reported as `Ok(0)` or an error of kind `TimedOut`.
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize>;

    /// Write all of `data`.
    fn write_all(&mut self, data: &[u8]) -> std::io::Result<()>;
}

/// Opens the underlying device for an [`IoTransport`] session.
pub trait PortOpener: Send + Sync + 'static {
    /// Stream type of an open port.
    type Port: SerialIo + 'static;

    /// Open the device. Called on the I/O thread.
    fn open(&self) -> Result<Self::Port, TransportError>;

    /// Port path or identifier, for logs and metric labels.
    fn name(&self) -> String;
}
