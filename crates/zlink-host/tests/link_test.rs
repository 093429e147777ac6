//! End-to-end tests of the link against a simulated coordinator.
//!
//! Each test spawns an I/O thread and a link thread; they run with #[serial]
//! so timing assertions are not skewed by other tests competing for CPU.

mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use common::{eventually, fast_config, Fault, MockDevice, MockOpener, Mode, FIRMWARE};
use crossbeam_channel::bounded;
use parking_lot::Mutex;
use serial_test::serial;
use zlink_host::transport::IoTransport;
use zlink_host::{CompletionStatus, DisconnectReason, EventFilter, Link, LinkError, LinkEvent};
use zlink_protocol::{
    Command, Value, CMD_APS_DATA_CONFIRM, CMD_STATUS, CMD_STATUS_CHANGED, CMD_VERSION,
};

const WAIT: Duration = Duration::from_secs(2);

fn start(mode: Mode, state: u8) -> (Link<IoTransport<MockOpener>>, MockDevice) {
    let device = MockDevice::new(mode, state);
    let opener = MockOpener {
        device: device.clone(),
        deny: false,
    };
    let link = Link::with_opener(opener, &fast_config()).expect("link starts");
    (link, device)
}

// ============================================================================
// Connection
// ============================================================================

#[test]
#[serial]
fn test_probe_then_operational() {
    let (link, device) = start(Mode::Responsive, 0x22);
    let events = link.subscribe(EventFilter::Connection);
    let started = Instant::now();
    link.open().expect("open");

    assert_eq!(events.recv_timeout(WAIT), Ok(LinkEvent::Connected));
    // The bootloader probe window passes first.
    assert!(started.elapsed() >= Duration::from_millis(50));
    // The keep-alive goes out right after connecting.
    assert!(device.wait_until(WAIT, |d| d.count(CMD_STATUS) >= 1));
    assert!(eventually(WAIT, || link.device_status().is_joined()));
    link.shutdown();
}

#[test]
#[serial]
fn test_bootloader_banner_is_reported() {
    let (link, _device) = start(Mode::Bootloader, 0);
    let events = link.subscribe(EventFilter::Connection);
    link.open().expect("open");

    assert_eq!(events.recv_timeout(WAIT), Ok(LinkEvent::BootloaderActive));
    assert_eq!(events.recv_timeout(WAIT), Ok(LinkEvent::Connected));
    link.shutdown();
}

#[test]
#[serial]
fn test_permission_denied() {
    let device = MockDevice::new(Mode::Responsive, 0);
    let opener = MockOpener {
        device,
        deny: true,
    };
    let link = Link::with_opener(opener, &fast_config()).expect("link starts");
    let events = link.subscribe(EventFilter::Connection);
    link.open().expect("open spawns the I/O thread");

    assert_eq!(
        events.recv_timeout(WAIT),
        Ok(LinkEvent::Disconnected(DisconnectReason::NoPermission))
    );
    assert!(matches!(
        link.submit(Command::request(CMD_VERSION).unwrap(), None),
        Err(LinkError::Schedule(_))
    ));
}

// ============================================================================
// Commands
// ============================================================================

#[test]
#[serial]
fn test_request_round_trip() {
    let (link, _device) = start(Mode::Responsive, 0x22);
    link.open().expect("open");
    link.wait_connected(WAIT).expect("connected");

    let version = link
        .request(Command::request(CMD_VERSION).unwrap(), WAIT)
        .expect("version confirm");
    assert_eq!(version.scalar(0), Some(u64::from(FIRMWARE)));

    let status = link
        .request(Command::request(CMD_STATUS).unwrap(), WAIT)
        .expect("status confirm");
    assert_eq!(status.scalar(0), Some(0x22));

    assert!(eventually(WAIT, || link.stats().in_flight == 0));
    let stats = link.stats();
    assert_eq!(stats.in_flight, 0);
    assert!(stats.confirmed >= 2);
    assert_eq!(stats.timeouts, 0);
    link.shutdown();
}

#[test]
#[serial]
fn test_silent_device_times_out_after_retries() {
    let (link, device) = start(Mode::Silent, 0);
    link.open().expect("open");
    link.wait_connected(WAIT).expect("connected");

    let started = Instant::now();
    let result = link.request(Command::request(CMD_VERSION).unwrap(), WAIT);
    assert!(matches!(
        result,
        Err(LinkError::Failed(CompletionStatus::Timeout))
    ));
    // One transmission plus two retries, each waiting the full timeout.
    assert!(started.elapsed() >= Duration::from_millis(300));
    assert_eq!(device.count(CMD_VERSION), 3);
    link.shutdown();
}

#[test]
#[serial]
fn test_callback_may_use_handle() {
    let (link, _device) = start(Mode::Responsive, 0x02);
    link.open().expect("open");
    link.wait_connected(WAIT).expect("connected");

    let handle = link.handle();
    let (tx, rx) = bounded(1);
    link.submit(
        Command::request(CMD_VERSION).unwrap(),
        Some(Box::new(move |status, _| {
            // Runs without the scheduler lock held.
            let _ = tx.send((status, handle.stats().confirmed));
        })),
    )
    .expect("submit");

    let (status, confirmed) = rx.recv_timeout(WAIT).expect("callback fired");
    assert_eq!(status, CompletionStatus::Success);
    assert!(confirmed >= 1);
    link.shutdown();
}

#[test]
#[serial]
fn test_shutdown_fails_outstanding_commands() {
    let (link, _device) = start(Mode::Silent, 0);
    link.open().expect("open");
    link.wait_connected(WAIT).expect("connected");

    let outcomes = Arc::new(Mutex::new(Vec::new()));
    for _ in 0..3 {
        let outcomes = Arc::clone(&outcomes);
        link.submit(
            Command::request(CMD_VERSION).unwrap(),
            Some(Box::new(move |status, _| outcomes.lock().push(status))),
        )
        .expect("submit");
    }
    let events = link.subscribe(EventFilter::Connection);
    link.shutdown();

    assert_eq!(*outcomes.lock(), vec![CompletionStatus::Disconnected; 3]);
    assert_eq!(
        events.try_recv(),
        Ok(LinkEvent::Disconnected(DisconnectReason::Normal))
    );
}

#[test]
#[serial]
fn test_close_then_reopen() {
    let (link, _device) = start(Mode::Responsive, 0x22);
    let events = link.subscribe(EventFilter::Connection);
    link.open().expect("open");
    assert_eq!(events.recv_timeout(WAIT), Ok(LinkEvent::Connected));

    link.close();
    link.open().expect("reopen");
    let version = link
        .request(Command::request(CMD_VERSION).unwrap(), WAIT)
        .expect("version confirm after reopen");
    assert_eq!(version.scalar(0), Some(u64::from(FIRMWARE)));

    let seen: Vec<_> = events.try_iter().collect();
    assert_eq!(
        seen,
        vec![
            LinkEvent::Disconnected(DisconnectReason::Normal),
            LinkEvent::Connected
        ]
    );
    link.shutdown();
}

// ============================================================================
// Port failures
// ============================================================================

fn outstanding_after(fault: Fault) {
    let (link, device) = start(Mode::Silent, 0);
    let events = link.subscribe(EventFilter::Connection);
    link.open().expect("open");
    assert_eq!(events.recv_timeout(WAIT), Ok(LinkEvent::Connected));
    // Nothing else is written until the next keep-alive is due.
    assert!(device.wait_until(WAIT, |d| d.count(CMD_STATUS) >= 1));

    // A write fault only bites once there is something to write.
    if fault == Fault::Write {
        device.fail(fault);
    }
    let (tx, rx) = bounded(1);
    link.submit(
        Command::request(CMD_VERSION).unwrap(),
        Some(Box::new(move |status, _| {
            let _ = tx.send(status);
        })),
    )
    .expect("submit");
    device.fail(fault);

    assert_eq!(
        events.recv_timeout(WAIT),
        Ok(LinkEvent::Disconnected(DisconnectReason::IoError))
    );
    assert_eq!(rx.recv_timeout(WAIT), Ok(CompletionStatus::Disconnected));
    assert_eq!(link.stats().queued, 0);
    assert!(matches!(
        link.submit(Command::request(CMD_VERSION).unwrap(), None),
        Err(LinkError::Schedule(_))
    ));
    link.shutdown();
}

#[test]
#[serial]
fn test_read_error_ends_session() {
    outstanding_after(Fault::Read);
}

#[test]
#[serial]
fn test_repeated_write_errors_end_session() {
    outstanding_after(Fault::Write);
}

// ============================================================================
// Device status
// ============================================================================

#[test]
#[serial]
fn test_status_change_triggers_fetch() {
    let (link, device) = start(Mode::Responsive, 0x22);
    let changes = link.subscribe(EventFilter::DeviceStatus);
    link.open().expect("open");
    link.wait_connected(WAIT).expect("connected");
    assert!(eventually(WAIT, || link.device_status().is_joined()));

    device.push(&Command::new(
        CMD_STATUS_CHANGED,
        vec![Value::U8(0x26), Value::U8(0)],
    ));

    let changed = std::iter::from_fn(|| changes.recv_timeout(WAIT).ok()).find_map(|event| {
        match event {
            LinkEvent::DeviceStatusChanged(status) if status.confirm_pending() => Some(status),
            _ => None,
        }
    });
    assert!(changed.is_some());
    assert!(device.wait_until(WAIT, |d| d.count(CMD_APS_DATA_CONFIRM) >= 1));
    link.shutdown();
}
