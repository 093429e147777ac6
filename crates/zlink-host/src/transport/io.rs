//! Transport backed by a dedicated I/O thread.
//!
//! The thread owns the port. It alternates between draining the outbound
//! ring into the port and a short-timeout read that fills the inbound ring.
//! Both rings and the session state live behind one mutex; the lock is never
//! held across a port call.

use std::io::ErrorKind;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use tracing::{debug, info, trace, warn};
use zlink_metrics::{metric_defs, MetricLabels};

use super::{
    ByteRing, PortOpener, SerialIo, SessionEvent, Transport, TransportEvent, TransportState,
    BOOTLOADER_BANNER, BOOTLOADER_PROBE, RING_CAPACITY,
};
use crate::config::TransportConfig;
use crate::error::TransportError;
use crate::events::DisconnectReason;

/// State shared between the owner and the I/O thread.
#[derive(Debug)]
struct Shared {
    state: TransportState,
    inbound: ByteRing,
    outbound: ByteRing,
    /// Set by `close`; the thread exits with this reason.
    stop: Option<DisconnectReason>,
}

/// [`Transport`] running its port on a dedicated thread.
pub struct IoTransport<O: PortOpener> {
    opener: Arc<O>,
    config: TransportConfig,
    shared: Arc<Mutex<Shared>>,
    events_tx: Sender<SessionEvent>,
    events_rx: Receiver<SessionEvent>,
    session: u64,
    worker: Option<JoinHandle<()>>,
    labels: MetricLabels,
}

impl<O: PortOpener> IoTransport<O> {
    /// Create a closed transport.
    pub fn new(opener: O, config: TransportConfig) -> Self {
        let (events_tx, events_rx) = unbounded();
        let labels = MetricLabels::new(opener.name(), "default");
        IoTransport {
            opener: Arc::new(opener),
            config,
            shared: Arc::new(Mutex::new(Shared {
                state: TransportState::Closed,
                inbound: ByteRing::new(RING_CAPACITY),
                outbound: ByteRing::new(RING_CAPACITY),
                stop: None,
            })),
            events_tx,
            events_rx,
            session: 0,
            worker: None,
            labels,
        }
    }

    /// Set the labels attached to emitted metrics.
    pub fn with_labels(mut self, labels: MetricLabels) -> Self {
        self.labels = labels;
        self
    }

    /// The port opener.
    pub fn opener(&self) -> &O {
        &self.opener
    }

    /// Inbound bytes discarded because the ring was full.
    pub fn dropped_inbound(&self) -> u64 {
        self.shared.lock().inbound.dropped()
    }

    fn reap_finished_worker(&mut self) -> Result<(), TransportError> {
        match &self.worker {
            Some(worker) if !worker.is_finished() => Err(TransportError::AlreadyOpen),
            Some(_) => {
                if let Some(worker) = self.worker.take() {
                    let _ = worker.join();
                }
                Ok(())
            }
            None => Ok(()),
        }
    }
}

impl<O: PortOpener> Transport for IoTransport<O> {
    fn open(&mut self) -> Result<(), TransportError> {
        self.reap_finished_worker()?;
        {
            let mut shared = self.shared.lock();
            shared.state = TransportState::Opening;
            shared.inbound.clear();
            shared.outbound.clear();
            shared.stop = None;
        }
        self.session += 1;

        let worker = IoWorker {
            opener: Arc::clone(&self.opener),
            config: self.config.clone(),
            shared: Arc::clone(&self.shared),
            events: self.events_tx.clone(),
            session: self.session,
            name: self.opener.name(),
            labels: self.labels.to_labels(),
        };
        let spawned = thread::Builder::new()
            .name(format!("zlink-io-{}", self.labels.link))
            .spawn(move || worker.run());
        match spawned {
            Ok(handle) => {
                self.worker = Some(handle);
                Ok(())
            }
            Err(e) => {
                self.shared.lock().state = TransportState::Closed;
                Err(TransportError::Io(e))
            }
        }
    }

    fn session(&self) -> u64 {
        self.session
    }

    fn close(&mut self, reason: DisconnectReason) {
        if let Some(worker) = self.worker.take() {
            self.shared.lock().stop = Some(reason);
            if worker.join().is_err() {
                warn!("Transport[{}]: I/O thread panicked", self.opener.name());
            }
        }
    }

    fn state(&self) -> TransportState {
        self.shared.lock().state
    }

    fn write(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        let mut shared = self.shared.lock();
        if shared.state != TransportState::Operational {
            return Err(TransportError::NotConnected);
        }
        if !shared.outbound.push_all(frame) {
            return Err(TransportError::OutboundFull {
                len: frame.len(),
                free: shared.outbound.free(),
            });
        }
        Ok(())
    }

    fn read(&mut self, out: &mut Vec<u8>) -> usize {
        self.shared.lock().inbound.drain_into(out)
    }

    fn events(&self) -> Receiver<SessionEvent> {
        self.events_rx.clone()
    }
}

impl<O: PortOpener> Drop for IoTransport<O> {
    fn drop(&mut self) {
        self.close(DisconnectReason::Normal);
    }
}

/// Finds the banner in a byte stream delivered in arbitrary chunks.
#[derive(Debug)]
struct BannerScanner {
    window: Vec<u8>,
    seen: bool,
}

impl BannerScanner {
    fn new() -> Self {
        BannerScanner {
            window: Vec::with_capacity(BOOTLOADER_BANNER.len() * 2),
            seen: false,
        }
    }

    /// Returns `true` the first time the banner completes.
    fn feed(&mut self, data: &[u8]) -> bool {
        if self.seen {
            return false;
        }
        self.window.extend_from_slice(data);
        if self
            .window
            .windows(BOOTLOADER_BANNER.len())
            .any(|w| w == BOOTLOADER_BANNER)
        {
            self.seen = true;
            self.window.clear();
            return true;
        }
        let keep = BOOTLOADER_BANNER.len() - 1;
        if self.window.len() > keep {
            self.window.drain(..self.window.len() - keep);
        }
        false
    }
}

struct IoWorker<O: PortOpener> {
    opener: Arc<O>,
    config: TransportConfig,
    shared: Arc<Mutex<Shared>>,
    events: Sender<SessionEvent>,
    session: u64,
    name: String,
    labels: Vec<(&'static str, String)>,
}

impl<O: PortOpener> IoWorker<O> {
    fn run(self) {
        let reason = self.run_session();
        {
            let mut shared = self.shared.lock();
            shared.state = TransportState::Closed;
            shared.outbound.clear();
        }
        debug!("Transport[{}]: session ended ({})", self.name, reason);
        self.notify(TransportEvent::Disconnected(reason));
    }

    fn notify(&self, event: TransportEvent) {
        let _ = self.events.send(SessionEvent {
            session: self.session,
            event,
        });
    }

    fn set_state(&self, state: TransportState) {
        self.shared.lock().state = state;
    }

    fn run_session(&self) -> DisconnectReason {
        let mut port = match self.opener.open() {
            Ok(port) => port,
            Err(e) => {
                warn!("Transport[{}]: {}", self.name, e);
                return e.disconnect_reason();
            }
        };

        self.set_state(TransportState::ProbingBootloader);
        if let Err(e) = port.write_all(BOOTLOADER_PROBE) {
            warn!("Transport[{}]: probe write failed: {}", self.name, e);
            return DisconnectReason::IoError;
        }
        let deadline = Instant::now() + self.config.bootloader_wait();
        self.set_state(TransportState::AwaitingBootloaderTimeout);
        debug!("Transport[{}]: probe sent, waiting for bootloader", self.name);

        let mut banner = BannerScanner::new();
        let mut outgoing = Vec::new();
        let mut write_errors = 0u32;
        let mut buf = [0u8; 512];

        loop {
            let operational = {
                let mut shared = self.shared.lock();
                if let Some(reason) = shared.stop {
                    return reason;
                }
                shared.outbound.drain_into(&mut outgoing);
                shared.state == TransportState::Operational
            };

            if !outgoing.is_empty() {
                match port.write_all(&outgoing) {
                    Ok(()) => {
                        trace!("Transport[{}]: tx {}", self.name, hex::encode(&outgoing));
                        metrics::counter!(metric_defs::BYTES_TX.name, &self.labels)
                            .increment(outgoing.len() as u64);
                        outgoing.clear();
                        write_errors = 0;
                    }
                    Err(e) => {
                        write_errors += 1;
                        warn!(
                            "Transport[{}]: write failed ({}/{}): {}",
                            self.name, write_errors, self.config.max_write_errors, e
                        );
                        if write_errors >= self.config.max_write_errors {
                            return DisconnectReason::IoError;
                        }
                    }
                }
            }

            match port.read(&mut buf) {
                Ok(0) => {}
                Ok(n) => {
                    let data = &buf[..n];
                    metrics::counter!(metric_defs::BYTES_RX.name, &self.labels).increment(n as u64);
                    if operational {
                        trace!("Transport[{}]: rx {}", self.name, hex::encode(data));
                        let was_empty = {
                            let mut shared = self.shared.lock();
                            let was_empty = shared.inbound.is_empty();
                            let accepted = shared.inbound.push_lossy(data);
                            if accepted < n {
                                debug!(
                                    "Transport[{}]: inbound ring full, dropped {} bytes",
                                    self.name,
                                    n - accepted
                                );
                            }
                            was_empty
                        };
                        if was_empty {
                            self.notify(TransportEvent::Readable);
                        }
                    } else if banner.feed(data) {
                        info!("Transport[{}]: update loader is active", self.name);
                        self.notify(TransportEvent::BootloaderActive);
                    }
                }
                Err(e)
                    if matches!(
                        e.kind(),
                        ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted
                    ) => {}
                Err(e) => {
                    warn!("Transport[{}]: read failed: {}", self.name, e);
                    return DisconnectReason::IoError;
                }
            }

            if !operational && Instant::now() >= deadline {
                self.set_state(TransportState::Operational);
                info!("Transport[{}]: operational", self.name);
                self.notify(TransportEvent::Connected);
            }
        }
    }
}
