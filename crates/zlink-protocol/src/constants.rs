//! Protocol constants
//!
//! Framing bytes, size limits, command ids and device state bits used by the
//! coordinator serial protocol.

// ============================================================================
// Framing
// ============================================================================

/// Frame delimiter. A single marker opens and closes every frame.
pub const FRAME_END: u8 = 0xC0;
/// Escape marker.
pub const FRAME_ESC: u8 = 0xDB;
/// Substitute sent after [`FRAME_ESC`] for an in-payload [`FRAME_END`].
pub const FRAME_ESC_END: u8 = 0xDC;
/// Substitute sent after [`FRAME_ESC`] for an in-payload [`FRAME_ESC`].
pub const FRAME_ESC_ESC: u8 = 0xDD;

/// Default receive capacity of a frame receiver, checksum bytes included.
pub const MAX_FRAME_SIZE: usize = 512;
/// Length of the checksum trailer.
pub const FRAME_CRC_SIZE: usize = 2;

// ============================================================================
// Command layout
// ============================================================================

/// Header bytes: command id, sequence number, status.
pub const HEADER_SIZE: usize = 3;
/// Header plus the stored length field.
pub const HEADER_WITH_LENGTH_SIZE: usize = HEADER_SIZE + 2;
/// Largest raw buffer a single `D` field may carry.
pub const MAX_BUFFER_LEN: usize = 128;
/// Upper bound for an encoded command.
pub const MAX_COMMAND_SIZE: usize = 256;

// ============================================================================
// Command ids
// ============================================================================

/// Acknowledgment. Header only.
pub const CMD_ACK: u8 = 0x01;
/// APS data confirm (fetched when the confirm bit is set).
pub const CMD_APS_DATA_CONFIRM: u8 = 0x04;
/// Device status report. Also used as keep-alive probe.
pub const CMD_STATUS: u8 = 0x07;
/// Request a network state change.
pub const CMD_CHANGE_NETWORK_STATE: u8 = 0x08;
/// Read a device parameter.
pub const CMD_READ_PARAMETER: u8 = 0x0A;
/// Write a device parameter.
pub const CMD_WRITE_PARAMETER: u8 = 0x0B;
/// Query the firmware version.
pub const CMD_VERSION: u8 = 0x0D;
/// Unsolicited device status change.
pub const CMD_STATUS_CHANGED: u8 = 0x0E;
/// APS data request (bulk application payload).
pub const CMD_APS_DATA_REQUEST: u8 = 0x12;
/// APS data indication (fetched when the indication bit is set).
pub const CMD_APS_DATA_INDICATION: u8 = 0x17;
/// MAC data poll seen by the coordinator.
pub const CMD_MAC_POLL: u8 = 0x1C;
/// Neighbor table update.
pub const CMD_UPDATE_NEIGHBOR: u8 = 0x1D;
/// Beacon received during a scan.
pub const CMD_BEACON_INDICATION: u8 = 0x1F;
/// Reboot into the update loader.
pub const CMD_UPDATE_BOOTLOADER: u8 = 0x21;
/// Slice of the neighbor table.
pub const CMD_NEIGHBOR_LIST: u8 = 0x2A;
/// Firmware debug log line.
pub const CMD_DEBUG_LOG: u8 = 0x30;

// ============================================================================
// Device state bits
// ============================================================================

/// Mask for the network state in the device state byte.
pub const DEVICE_STATE_NETWORK_MASK: u8 = 0x03;
/// An APS data confirm is waiting to be fetched.
pub const DEVICE_STATE_APS_CONFIRM: u8 = 0x04;
/// An APS data indication is waiting to be fetched.
pub const DEVICE_STATE_APS_INDICATION: u8 = 0x08;
/// Device configuration changed.
pub const DEVICE_STATE_CONF_CHANGED: u8 = 0x10;
/// The device has a free APS request slot.
pub const DEVICE_STATE_APS_REQUEST_FREE: u8 = 0x20;

/// Network state: not joined.
pub const NET_OFFLINE: u8 = 0;
/// Network state: joining.
pub const NET_JOINING: u8 = 1;
/// Network state: joined and operating.
pub const NET_CONNECTED: u8 = 2;
/// Network state: leaving.
pub const NET_LEAVING: u8 = 3;
