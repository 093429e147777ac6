//! Common types used in the protocol.

use crate::constants::*;

/// Network state reported in the low bits of the device state byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum NetworkState {
    /// Not part of a network.
    #[default]
    Offline,
    /// Joining or forming a network.
    Joining,
    /// Joined and operating.
    Connected,
    /// Leaving the network.
    Leaving,
}

impl From<u8> for NetworkState {
    fn from(state: u8) -> Self {
        match state & DEVICE_STATE_NETWORK_MASK {
            NET_OFFLINE => NetworkState::Offline,
            NET_JOINING => NetworkState::Joining,
            NET_CONNECTED => NetworkState::Connected,
            _ => NetworkState::Leaving,
        }
    }
}

impl From<NetworkState> for u8 {
    fn from(state: NetworkState) -> Self {
        match state {
            NetworkState::Offline => NET_OFFLINE,
            NetworkState::Joining => NET_JOINING,
            NetworkState::Connected => NET_CONNECTED,
            NetworkState::Leaving => NET_LEAVING,
        }
    }
}

impl std::fmt::Display for NetworkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NetworkState::Offline => write!(f, "offline"),
            NetworkState::Joining => write!(f, "joining"),
            NetworkState::Connected => write!(f, "connected"),
            NetworkState::Leaving => write!(f, "leaving"),
        }
    }
}

/// Status bytes extracted from an inbound command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusUpdate {
    /// Device state byte.
    pub state: u8,
    /// Extension byte, only present on status reports.
    pub ext: Option<u8>,
}

/// Device-reported channel state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct DeviceStatus {
    /// Device state byte.
    pub state: u8,
    /// Extension flags.
    pub ext: u8,
}

impl DeviceStatus {
    /// Create from the two raw bytes.
    pub const fn new(state: u8, ext: u8) -> Self {
        DeviceStatus { state, ext }
    }

    /// Merge an update. Returns `true` if either byte changed.
    pub fn apply(&mut self, update: StatusUpdate) -> bool {
        let before = *self;
        self.state = update.state;
        if let Some(ext) = update.ext {
            self.ext = ext;
        }
        before != *self
    }

    /// Network state.
    pub fn network_state(&self) -> NetworkState {
        NetworkState::from(self.state)
    }

    /// Whether the device is joined to a network.
    pub fn is_joined(&self) -> bool {
        self.network_state() == NetworkState::Connected
    }

    /// An APS data confirm waits to be fetched.
    pub fn confirm_pending(&self) -> bool {
        self.state & DEVICE_STATE_APS_CONFIRM != 0
    }

    /// An APS data indication waits to be fetched.
    pub fn indication_pending(&self) -> bool {
        self.state & DEVICE_STATE_APS_INDICATION != 0
    }

    /// The device accepts another APS data request.
    pub fn has_free_slot(&self) -> bool {
        self.state & DEVICE_STATE_APS_REQUEST_FREE != 0
    }

    /// Device configuration changed since the last read.
    pub fn config_changed(&self) -> bool {
        self.state & DEVICE_STATE_CONF_CHANGED != 0
    }
}

impl std::fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.network_state())?;
        if self.confirm_pending() {
            write!(f, " +confirm")?;
        }
        if self.indication_pending() {
            write!(f, " +indication")?;
        }
        if self.has_free_slot() {
            write!(f, " +free")?;
        }
        if self.config_changed() {
            write!(f, " +conf")?;
        }
        write!(f, " (0x{:02X}/0x{:02X})", self.state, self.ext)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_bits() {
        let status = DeviceStatus::new(0x2E, 0);
        assert_eq!(status.network_state(), NetworkState::Connected);
        assert!(status.is_joined());
        assert!(status.confirm_pending());
        assert!(status.indication_pending());
        assert!(status.has_free_slot());
        assert!(!status.config_changed());
    }

    #[test]
    fn test_apply_reports_change() {
        let mut status = DeviceStatus::default();
        assert!(status.apply(StatusUpdate { state: 0x22, ext: None }));
        assert!(!status.apply(StatusUpdate { state: 0x22, ext: None }));
        assert!(status.apply(StatusUpdate { state: 0x22, ext: Some(1) }));
        // A state-only update keeps the extension byte.
        assert!(!status.apply(StatusUpdate { state: 0x22, ext: None }));
        assert_eq!(status.ext, 1);
    }

    #[test]
    fn test_network_state_roundtrip() {
        for raw in 0..4u8 {
            assert_eq!(u8::from(NetworkState::from(raw)), raw);
        }
        assert_eq!(NetworkState::from(0xFD), NetworkState::Joining);
    }
}
