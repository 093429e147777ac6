//! Error types for the link engine.

use std::path::PathBuf;

use thiserror::Error;
use zlink_protocol::EncodeError;

use crate::events::{CompletionStatus, DisconnectReason};

/// Errors raised by a [`Transport`](crate::transport::Transport).
#[derive(Debug, Error)]
pub enum TransportError {
    /// The operating system denied access to the port.
    #[error("permission denied opening {0}")]
    PermissionDenied(String),

    /// The port could not be opened.
    #[error("failed to open {port}: {message}")]
    Open {
        /// Port path.
        port: String,
        /// Error reported by the platform.
        message: String,
    },

    /// `open` was called while a session is running.
    #[error("transport already open")]
    AlreadyOpen,

    /// The transport is not operational.
    #[error("transport not connected")]
    NotConnected,

    /// The outbound ring buffer cannot take the frame.
    #[error("outbound buffer full: {len} bytes requested, {free} free")]
    OutboundFull {
        /// Frame length.
        len: usize,
        /// Free space in the ring.
        free: usize,
    },

    /// The I/O thread could not be started.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    /// Disconnect reason reported when this error ends a session.
    pub fn disconnect_reason(&self) -> DisconnectReason {
        match self {
            TransportError::PermissionDenied(_) => DisconnectReason::NoPermission,
            _ => DisconnectReason::IoError,
        }
    }
}

/// Errors returned synchronously by the scheduler.
#[derive(Debug, Error)]
pub enum ScheduleError {
    /// All command queue slots are occupied.
    #[error("command queue full ({0} slots)")]
    QueueFull(usize),

    /// The pending request ring is full.
    #[error("pending request queue full ({0} entries)")]
    PendingQueueFull(usize),

    /// The command cannot be encoded. Its completion fires with `Rejected`.
    #[error("command rejected: {0}")]
    Rejected(#[from] EncodeError),

    /// The link is not operational.
    #[error("link not connected")]
    NotConnected,
}

/// Errors loading or validating a [`LinkConfig`](crate::config::LinkConfig).
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read {path}: {source}")]
    Read {
        /// File path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The YAML document is malformed.
    #[error("invalid configuration: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// The baud rate is not one of the supported rates.
    #[error("unsupported baud rate {0} (supported: 38400, 57600, 115200, 230400)")]
    UnsupportedBaudRate(u32),

    /// No device path was configured.
    #[error("no device path configured")]
    MissingDevice,

    /// A numeric setting is out of range.
    #[error("invalid value for {field}: {reason}")]
    InvalidValue {
        /// Setting name.
        field: &'static str,
        /// Why it was rejected.
        reason: String,
    },
}

/// Top-level error of the link engine.
#[derive(Debug, Error)]
pub enum LinkError {
    /// Transport failure.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Scheduling failure.
    #[error(transparent)]
    Schedule(#[from] ScheduleError),

    /// Configuration failure.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The scheduler thread could not be started.
    #[error("failed to spawn link thread: {0}")]
    Spawn(#[source] std::io::Error),

    /// No answer arrived in time.
    #[error("timed out waiting for {0}")]
    Timeout(&'static str),

    /// A command completed without success.
    #[error("command failed: {0}")]
    Failed(CompletionStatus),
}

/// Result alias for link operations.
pub type Result<T> = std::result::Result<T, LinkError>;
