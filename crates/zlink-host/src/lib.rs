//! Host-side link engine for a network coordinator on a serial port.
//!
//! The engine is layered:
//!
//! - [`transport`]: opens the port on a dedicated I/O thread, probes for the
//!   update loader and moves bytes through bounded rings.
//! - [`scheduler`]: assigns sequence numbers, keeps at most `window` commands
//!   in flight, retries on timeout, polls the device status and drives bulk
//!   requests from the pending ring.
//! - [`link`]: runs the scheduler on its own thread and hands out a
//!   [`LinkHandle`] for submitting work and subscribing to [`LinkEvent`]s.
//!
//! Frame and command encoding lives in `zlink-protocol`.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use zlink_host::{Link, LinkConfig};
//! use zlink_protocol::{Command, CMD_VERSION};
//!
//! let config = LinkConfig::new("/dev/ttyACM0");
//! let link = Link::serial(&config)?;
//! link.open()?;
//! link.wait_connected(Duration::from_secs(2))?;
//! if let Some(request) = Command::request(CMD_VERSION) {
//!     let version = link.request(request, Duration::from_secs(5))?;
//!     println!("firmware {:08x}", version.scalar(0).unwrap_or_default());
//! }
//! # Ok::<(), zlink_host::LinkError>(())
//! ```

pub mod config;
pub mod error;
pub mod events;
pub mod link;
pub mod scheduler;
pub mod transport;

pub use config::{BaudRate, LinkConfig, SchedulerConfig, TransportConfig};
pub use error::{ConfigError, LinkError, Result, ScheduleError, TransportError};
pub use events::{
    CompletionCallback, CompletionStatus, DisconnectReason, EventFilter, LinkEvent, RequestId,
};
pub use link::{Link, LinkHandle};
pub use scheduler::{ConnectionState, Scheduler, SchedulerStats};
pub use transport::{list_ports, IoTransport, PortInfo, SerialPortOpener, Transport};
