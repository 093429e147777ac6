//! Metrics infrastructure for the coordinator serial link.
//!
//! Every metric emitted by the link engine is a [`Metric`] constant in
//! [`metric_defs`]; emit sites use its `name` with [`MetricLabels`].
//!
//! # Example
//!
//! ```rust,ignore
//! use zlink_metrics::{MetricLabels, metric_defs, describe_metrics};
//!
//! // Initialize metrics descriptions at startup
//! describe_metrics();
//!
//! let labels = MetricLabels::new("/dev/ttyACM0", "coordinator");
//! metrics::counter!(metric_defs::FRAME_RX.name, &labels.to_labels()).increment(1);
//! ```
//!
//! With the `prometheus` feature enabled, [`install_prometheus_exporter`]
//! serves the recorded values over HTTP.

use metrics::{describe_counter, describe_gauge, describe_histogram, Unit};

/// The kind of metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    Counter,
    Gauge,
    Histogram,
}

/// A metric name with the metadata handed to the recorder.
#[derive(Debug, Clone)]
pub struct Metric {
    /// The metric name (e.g., "zlink.frame.rx").
    pub name: &'static str,
    pub kind: MetricKind,
    pub unit: Unit,
    pub description: &'static str,
}

impl Metric {
    const fn counter(name: &'static str, unit: Unit, description: &'static str) -> Self {
        Metric { name, kind: MetricKind::Counter, unit, description }
    }

    const fn gauge(name: &'static str, description: &'static str) -> Self {
        Metric { name, kind: MetricKind::Gauge, unit: Unit::Count, description }
    }

    const fn histogram(name: &'static str, unit: Unit, description: &'static str) -> Self {
        Metric { name, kind: MetricKind::Histogram, unit, description }
    }

    /// Registers this metric's description with the installed recorder.
    pub fn describe(&self) {
        match self.kind {
            MetricKind::Counter => describe_counter!(self.name, self.unit, self.description),
            MetricKind::Gauge => describe_gauge!(self.name, self.unit, self.description),
            MetricKind::Histogram => describe_histogram!(self.name, self.unit, self.description),
        }
    }
}

/// All metric definitions of the link engine.
///
/// Every metric carries the `port` and `link` labels. Per-command metrics add
/// `command`; rejections and disconnects add `reason`.
pub mod metric_defs {
    use super::{Metric, Unit};

    // ========================================================================
    // Framing
    // ========================================================================

    pub const FRAME_RX: Metric = Metric::counter(
        "zlink.frame.rx",
        Unit::Count,
        "Frames received with a valid checksum",
    );
    pub const FRAME_TX: Metric =
        Metric::counter("zlink.frame.tx", Unit::Count, "Frames written to the transport");
    pub const BYTES_RX: Metric = Metric::counter(
        "zlink.transport.rx_bytes",
        Unit::Bytes,
        "Raw bytes read from the serial port",
    );
    pub const BYTES_TX: Metric = Metric::counter(
        "zlink.transport.tx_bytes",
        Unit::Bytes,
        "Raw bytes written to the serial port",
    );
    pub const FRAME_CHECKSUM_ERRORS: Metric = Metric::counter(
        "zlink.frame.checksum_errors",
        Unit::Count,
        "Frames discarded because the checksum did not match",
    );
    pub const FRAME_ESCAPE_ERRORS: Metric = Metric::counter(
        "zlink.frame.escape_errors",
        Unit::Count,
        "Frames discarded because of an invalid escape sequence",
    );
    pub const FRAME_OVERFLOW_BYTES: Metric = Metric::counter(
        "zlink.frame.overflow_bytes",
        Unit::Bytes,
        "Bytes dropped because a frame exceeded the receive buffer",
    );

    // ========================================================================
    // Commands
    // ========================================================================

    pub const COMMAND_RX: Metric = Metric::counter(
        "zlink.command.rx",
        Unit::Count,
        "Commands decoded from received frames",
    );
    /// Retransmissions included.
    pub const COMMAND_TX: Metric =
        Metric::counter("zlink.command.tx", Unit::Count, "Commands sent to the device");
    pub const COMMAND_DECODE_ERRORS: Metric = Metric::counter(
        "zlink.command.decode_errors",
        Unit::Count,
        "Frames whose payload failed to decode as a command",
    );

    // ========================================================================
    // Scheduler
    // ========================================================================

    pub const SCHEDULER_RETRIES: Metric = Metric::counter(
        "zlink.scheduler.retries",
        Unit::Count,
        "Retransmissions after a confirm timeout",
    );
    pub const SCHEDULER_TIMEOUTS: Metric = Metric::counter(
        "zlink.scheduler.timeouts",
        Unit::Count,
        "Commands that exhausted their retries",
    );
    pub const SCHEDULER_REJECTED: Metric = Metric::counter(
        "zlink.scheduler.rejected",
        Unit::Count,
        "Submissions refused by the scheduler",
    );
    pub const SCHEDULER_QUEUE_DEPTH: Metric =
        Metric::gauge("zlink.scheduler.queue_depth", "Occupied command queue slots");
    pub const SCHEDULER_IN_FLIGHT: Metric =
        Metric::gauge("zlink.scheduler.in_flight", "Commands awaiting their confirm");
    pub const SCHEDULER_PENDING_REQUESTS: Metric = Metric::gauge(
        "zlink.scheduler.pending_requests",
        "Bulk requests waiting for a device slot",
    );
    pub const SCHEDULER_CONFIRM_LATENCY: Metric = Metric::histogram(
        "zlink.scheduler.confirm_latency_ms",
        Unit::Milliseconds,
        "Time from first transmission to the matching confirm",
    );

    // ========================================================================
    // Connection
    // ========================================================================

    pub const LINK_DISCONNECTS: Metric =
        Metric::counter("zlink.link.disconnects", Unit::Count, "Connection losses");
    pub const LINK_RECONNECTS: Metric = Metric::counter(
        "zlink.link.reconnects",
        Unit::Count,
        "Automatic reconnection attempts",
    );
    pub const LINK_FAILURE_COUNT: Metric = Metric::gauge(
        "zlink.link.failure_count",
        "Consecutive keep-alive or confirm failures",
    );

    pub const ALL: &[&Metric] = &[
        &FRAME_RX,
        &FRAME_TX,
        &BYTES_RX,
        &BYTES_TX,
        &FRAME_CHECKSUM_ERRORS,
        &FRAME_ESCAPE_ERRORS,
        &FRAME_OVERFLOW_BYTES,
        &COMMAND_RX,
        &COMMAND_TX,
        &COMMAND_DECODE_ERRORS,
        &SCHEDULER_RETRIES,
        &SCHEDULER_TIMEOUTS,
        &SCHEDULER_REJECTED,
        &SCHEDULER_QUEUE_DEPTH,
        &SCHEDULER_IN_FLIGHT,
        &SCHEDULER_PENDING_REQUESTS,
        &SCHEDULER_CONFIRM_LATENCY,
        &LINK_DISCONNECTS,
        &LINK_RECONNECTS,
        &LINK_FAILURE_COUNT,
    ];
}

/// Labels identifying one serial link.
///
/// # Example
///
/// ```rust
/// use zlink_metrics::MetricLabels;
///
/// let labels = MetricLabels::new("/dev/ttyACM0", "coordinator");
/// let extended = labels.with(&[("command", "STATUS".to_string())]);
/// assert_eq!(extended.len(), 3);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricLabels {
    /// Serial port path.
    pub port: String,
    /// Configured link name.
    pub link: String,
}

impl MetricLabels {
    /// Creates labels for the link `link` on `port`.
    pub fn new(port: impl Into<String>, link: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            link: link.into(),
        }
    }

    /// Converts the labels to the metrics crate label format.
    pub fn to_labels(&self) -> Vec<(&'static str, String)> {
        vec![("port", self.port.clone()), ("link", self.link.clone())]
    }

    /// Returns labels with additional key-value pairs.
    pub fn with(&self, extra: &[(&'static str, String)]) -> Vec<(&'static str, String)> {
        let mut labels = self.to_labels();
        labels.extend_from_slice(extra);
        labels
    }

    /// Returns labels with a `command` key.
    pub fn with_command(&self, command: &str) -> Vec<(&'static str, String)> {
        self.with(&[("command", command.to_string())])
    }
}

/// Describes all metrics of the link engine.
///
/// Call once at startup, after installing a recorder.
pub fn describe_metrics() {
    for metric in metric_defs::ALL {
        metric.describe();
    }
}

/// Install a Prometheus recorder serving scrapes on `addr`, then describe
/// every metric.
#[cfg(feature = "prometheus")]
pub fn install_prometheus_exporter(
    addr: std::net::SocketAddr,
) -> Result<(), metrics_exporter_prometheus::BuildError> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    describe_metrics();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_labels() {
        let labels = MetricLabels::new("/dev/ttyUSB0", "main");
        let label_vec = labels.to_labels();

        assert_eq!(label_vec.len(), 2);
        assert!(label_vec.contains(&("port", "/dev/ttyUSB0".to_string())));
        assert!(label_vec.contains(&("link", "main".to_string())));
    }

    #[test]
    fn test_with_command() {
        let labels = MetricLabels::new("COM3", "main");
        let extended = labels.with_command("APS_DATA_REQUEST");

        assert_eq!(extended.len(), 3);
        assert!(extended.contains(&("command", "APS_DATA_REQUEST".to_string())));
    }

    #[test]
    fn test_metric_definitions() {
        assert_eq!(metric_defs::FRAME_RX.kind, MetricKind::Counter);
        assert_eq!(metric_defs::SCHEDULER_QUEUE_DEPTH.kind, MetricKind::Gauge);
        assert_eq!(metric_defs::SCHEDULER_CONFIRM_LATENCY.kind, MetricKind::Histogram);
        assert_eq!(metric_defs::SCHEDULER_CONFIRM_LATENCY.unit, Unit::Milliseconds);
        assert_eq!(metric_defs::BYTES_TX.unit, Unit::Bytes);
    }

    #[test]
    fn test_metric_names_are_unique_and_prefixed() {
        let mut names: Vec<_> = metric_defs::ALL.iter().map(|m| m.name).collect();
        assert!(names.iter().all(|n| n.starts_with("zlink.")));
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), metric_defs::ALL.len());
    }

    #[test]
    fn test_describe_without_recorder() {
        // No recorder installed: describing is a no-op.
        describe_metrics();
    }
}
