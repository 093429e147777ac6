//! Coordinator Serial Protocol
//!
//! This crate provides the wire formats spoken between a host and a network
//! coordinator attached over a serial line.
//!
//! # Protocol Overview
//!
//! Two layers sit on top of the raw byte stream:
//!
//! - **Frames**: SLIP-style delimited packets. Each payload is followed by a
//!   16-bit two's-complement checksum, and the whole body is byte-stuffed so
//!   that the delimiter never appears inside a frame.
//! - **Commands**: The frame payload. A three byte header (`id`, `seq`,
//!   `status`) is followed by a little-endian total length and a sequence of
//!   fields whose shape is fixed per command id by the [`CommandTable`].
//!
//! # Example
//!
//! ```rust,ignore
//! use zlink_protocol::{Command, ProtocolSession, CMD_STATUS};
//!
//! let mut session = ProtocolSession::default();
//! let frame = session.encode_command(&Command::request(CMD_STATUS).unwrap().with_seq(1))?;
//!
//! session.feed(&received_bytes);
//! while let Some(result) = session.try_decode() {
//!     let command = result?;
//! }
//! ```

mod codec;
mod commands;
mod constants;
mod error;
mod frame;
mod types;

pub use codec::*;
pub use commands::*;
pub use constants::*;
pub use error::*;
pub use frame::*;
pub use types::*;
