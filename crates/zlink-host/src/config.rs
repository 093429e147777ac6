//! Link configuration.
//!
//! Loaded from YAML; every field except the device path has a default.
//!
//! ```yaml
//! name: coordinator
//! device: /dev/ttyACM0
//! baud_rate: 115200
//! scheduler:
//!   confirm_timeout_ms: 1000
//!   max_retries: 2
//! ```

use std::fmt;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::ConfigError;

/// Supported serial baud rates. Other values are rejected, never clamped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BaudRate {
    /// 38400 baud.
    B38400,
    /// 57600 baud.
    B57600,
    /// 115200 baud.
    #[default]
    B115200,
    /// 230400 baud.
    B230400,
}

impl BaudRate {
    /// All supported rates in ascending order.
    pub const ALL: [BaudRate; 4] = [
        BaudRate::B38400,
        BaudRate::B57600,
        BaudRate::B115200,
        BaudRate::B230400,
    ];

    /// Numeric rate.
    pub const fn as_u32(self) -> u32 {
        match self {
            BaudRate::B38400 => 38_400,
            BaudRate::B57600 => 57_600,
            BaudRate::B115200 => 115_200,
            BaudRate::B230400 => 230_400,
        }
    }
}

impl TryFrom<u32> for BaudRate {
    type Error = ConfigError;

    fn try_from(rate: u32) -> Result<Self, Self::Error> {
        BaudRate::ALL
            .into_iter()
            .find(|b| b.as_u32() == rate)
            .ok_or(ConfigError::UnsupportedBaudRate(rate))
    }
}

impl fmt::Display for BaudRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u32())
    }
}

impl Serialize for BaudRate {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u32(self.as_u32())
    }
}

impl<'de> Deserialize<'de> for BaudRate {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let rate = u32::deserialize(deserializer)?;
        BaudRate::try_from(rate).map_err(serde::de::Error::custom)
    }
}

/// Scheduler timing and limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SchedulerConfig {
    /// Commands simultaneously awaiting a confirm.
    pub window: usize,
    /// Time to wait for a confirm before retrying.
    pub confirm_timeout_ms: u64,
    /// Retransmissions before a command fails with `Timeout`.
    pub max_retries: u8,
    /// Idle time after which a status probe is sent.
    pub keepalive_interval_ms: u64,
    /// Time without any confirm, with the window full, after which a probe is queued.
    pub stall_interval_ms: u64,
    /// Consecutive failures that tear the transport down.
    pub failure_threshold: u32,
    /// Reopen the transport after a failure teardown.
    pub auto_reconnect: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig {
            window: 2,
            confirm_timeout_ms: 1000,
            max_retries: 2,
            keepalive_interval_ms: 1000,
            stall_interval_ms: 5000,
            failure_threshold: 5,
            auto_reconnect: true,
        }
    }
}

impl SchedulerConfig {
    /// Confirm timeout as a duration.
    pub fn confirm_timeout(&self) -> Duration {
        Duration::from_millis(self.confirm_timeout_ms)
    }

    /// Keep-alive interval as a duration.
    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_millis(self.keepalive_interval_ms)
    }

    /// Stall interval as a duration.
    pub fn stall_interval(&self) -> Duration {
        Duration::from_millis(self.stall_interval_ms)
    }
}

/// I/O thread timing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TransportConfig {
    /// Time to wait for the update loader banner after the probe.
    pub bootloader_wait_ms: u64,
    /// Read timeout of the I/O thread.
    pub read_timeout_ms: u64,
    /// Consecutive write errors that end the session.
    pub max_write_errors: u32,
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportConfig {
            bootloader_wait_ms: 600,
            read_timeout_ms: 10,
            max_write_errors: 3,
        }
    }
}

impl TransportConfig {
    /// Bootloader wait as a duration.
    pub fn bootloader_wait(&self) -> Duration {
        Duration::from_millis(self.bootloader_wait_ms)
    }

    /// Read timeout as a duration.
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

/// Complete link configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LinkConfig {
    /// Link name used in logs and metric labels.
    #[serde(default = "default_name")]
    pub name: String,
    /// Serial device path or identifier.
    #[serde(default)]
    pub device: String,
    /// Baud rate.
    #[serde(default)]
    pub baud_rate: BaudRate,
    /// Scheduler settings.
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    /// Transport settings.
    #[serde(default)]
    pub transport: TransportConfig,
}

fn default_name() -> String {
    "coordinator".to_string()
}

impl Default for LinkConfig {
    fn default() -> Self {
        LinkConfig {
            name: default_name(),
            device: String::new(),
            baud_rate: BaudRate::default(),
            scheduler: SchedulerConfig::default(),
            transport: TransportConfig::default(),
        }
    }
}

impl LinkConfig {
    /// Configuration for `device` with default settings.
    pub fn new(device: impl Into<String>) -> Self {
        LinkConfig {
            device: device.into(),
            ..Default::default()
        }
    }

    /// Parse a YAML document.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: LinkConfig = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Load a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&text)
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.device.is_empty() {
            return Err(ConfigError::MissingDevice);
        }
        if self.scheduler.window == 0 {
            return Err(ConfigError::InvalidValue {
                field: "scheduler.window",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.scheduler.confirm_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "scheduler.confirm_timeout_ms",
                reason: "must be positive".to_string(),
            });
        }
        if self.scheduler.failure_threshold == 0 {
            return Err(ConfigError::InvalidValue {
                field: "scheduler.failure_threshold",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.transport.read_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "transport.read_timeout_ms",
                reason: "must be positive".to_string(),
            });
        }
        Ok(())
    }
}
