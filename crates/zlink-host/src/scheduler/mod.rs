//! Command scheduler.
//!
//! The scheduler owns the [`CommandQueue`], the [`PendingRequestQueue`] and
//! the transport. It is single threaded and never blocks: the caller drives
//! it with transport events and [`Scheduler::service_tick`], passing the
//! current time, and re-invokes it at the returned deadline.
//!
//! Queue item life cycle:
//!
//! ```text
//!   Init ──enqueue──> WaitSend ──sent──> WaitConfirm ──confirm──> Init
//!                        ^                    │
//!                        └──timeout, retries──┘
//!                              left
//! ```
//!
//! Completions and events are collected while the scheduler runs and handed
//! out by [`Scheduler::take_completions`], so callbacks never run while the
//! scheduler is borrowed.

mod pending;
mod queue;

pub use pending::{PendingRequestQueue, PENDING_CAPACITY};
pub use queue::{CommandQueue, ItemHandle, ItemState, Origin, QueueItem, QUEUE_CAPACITY};

use std::time::Instant;

use tracing::{debug, info, trace, warn};
use zlink_metrics::{metric_defs, MetricLabels};
use zlink_protocol::{
    Command, CommandTable, DeviceStatus, FrameCodec, FrameReceiver, ReceiverStats,
    CMD_APS_DATA_CONFIRM, CMD_APS_DATA_INDICATION, CMD_STATUS, MAX_COMMAND_SIZE,
};

use crate::config::SchedulerConfig;
use crate::error::{ScheduleError, TransportError};
use crate::events::{
    Completion, CompletionCallback, CompletionStatus, DisconnectReason, LinkEvent, RequestId,
};
use crate::transport::{SessionEvent, Transport, TransportEvent};

/// Resolves a bulk request id to the command carrying its payload.
pub type PayloadResolver = Box<dyn Fn(RequestId) -> Option<Command> + Send>;

/// Connection state as seen by the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    /// No transport session.
    #[default]
    Off,
    /// Transport bring-up in progress.
    Connecting,
    /// Commands flow.
    Operational,
}

/// Snapshot of scheduler counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    /// Transmissions, retransmissions included.
    pub sent: u64,
    /// Confirms matched to a queue item.
    pub confirmed: u64,
    /// Retransmissions after a timeout.
    pub retries: u64,
    /// Items failed with `Timeout`.
    pub timeouts: u64,
    /// Received frames that failed to decode.
    pub decode_errors: u64,
    /// Items awaiting a confirm.
    pub in_flight: usize,
    /// Occupied queue slots.
    pub queued: usize,
    /// Bulk requests in the pending ring.
    pub pending: usize,
    /// Consecutive failures since the last confirm.
    pub consecutive_failures: u32,
    /// Frame receiver counters.
    pub receiver: ReceiverStats,
}

/// Credit-based command scheduler over a [`Transport`].
pub struct Scheduler<T: Transport> {
    config: SchedulerConfig,
    transport: T,
    table: CommandTable,
    receiver: FrameReceiver,
    inbound: Vec<u8>,
    queue: CommandQueue,
    pending: PendingRequestQueue,
    resolver: Option<PayloadResolver>,
    status: DeviceStatus,
    connection: ConnectionState,
    next_seq: u8,
    connected_at: Option<Instant>,
    last_tx: Option<Instant>,
    last_confirm: Option<Instant>,
    failures: u32,
    bootloader_seen: bool,
    /// Transport session whose events are accepted. `None` once it ended.
    session: Option<u64>,
    wake: bool,
    completions: Vec<Completion>,
    stats: SchedulerStats,
    labels: MetricLabels,
}

impl<T: Transport> Scheduler<T> {
    /// Create a scheduler using the built-in command table.
    pub fn new(transport: T, config: SchedulerConfig) -> Self {
        Scheduler {
            config,
            transport,
            table: CommandTable::builtin().clone(),
            receiver: FrameReceiver::new(),
            inbound: Vec::new(),
            queue: CommandQueue::new(),
            pending: PendingRequestQueue::new(),
            resolver: None,
            status: DeviceStatus::default(),
            connection: ConnectionState::Off,
            next_seq: 0,
            connected_at: None,
            last_tx: None,
            last_confirm: None,
            failures: 0,
            bootloader_seen: false,
            session: None,
            wake: false,
            completions: Vec::new(),
            stats: SchedulerStats::default(),
            labels: MetricLabels::new("", "default"),
        }
    }

    /// Use `table` instead of the built-in command table.
    pub fn with_table(mut self, table: CommandTable) -> Self {
        self.table = table;
        self
    }

    /// Set the labels attached to emitted metrics.
    pub fn with_labels(mut self, labels: MetricLabels) -> Self {
        self.labels = labels;
        self
    }

    /// Install the bulk payload resolver.
    pub fn set_resolver<F>(&mut self, resolver: F)
    where
        F: Fn(RequestId) -> Option<Command> + Send + 'static,
    {
        self.resolver = Some(Box::new(resolver));
    }

    /// Command table in use.
    pub fn table(&self) -> &CommandTable {
        &self.table
    }

    /// The transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// The transport, mutably.
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// The command queue.
    pub fn queue(&self) -> &CommandQueue {
        &self.queue
    }

    /// Connection state.
    pub fn connection_state(&self) -> ConnectionState {
        self.connection
    }

    /// Last reported device status.
    pub fn device_status(&self) -> DeviceStatus {
        self.status
    }

    /// Items awaiting a confirm.
    pub fn in_flight(&self) -> usize {
        self.queue.count(ItemState::WaitConfirm)
    }

    /// Counter snapshot.
    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            in_flight: self.in_flight(),
            queued: self.queue.len(),
            pending: self.pending.len(),
            consecutive_failures: self.failures,
            receiver: self.receiver.stats(),
            ..self.stats
        }
    }

    /// Hand out deferred completions and events.
    pub fn take_completions(&mut self) -> Vec<Completion> {
        std::mem::take(&mut self.completions)
    }

    /// Start a transport session. Outstanding work is failed first.
    pub fn open(&mut self) -> Result<(), TransportError> {
        self.kill_all(CompletionStatus::Disconnected);
        self.receiver.reset();
        self.status = DeviceStatus::default();
        self.bootloader_seen = false;
        self.failures = 0;
        self.connection = ConnectionState::Connecting;
        if let Err(e) = self.transport.open() {
            self.connection = ConnectionState::Off;
            return Err(e);
        }
        self.session = Some(self.transport.session());
        debug!(
            "Scheduler[{}]: transport opening, session {}",
            self.labels.link,
            self.transport.session()
        );
        Ok(())
    }

    /// End the transport session and fail outstanding work.
    ///
    /// `Disconnected(Normal)` is published here; the transport's own report
    /// of the closed session is ignored when it arrives.
    pub fn close(&mut self) {
        self.end_session(DisconnectReason::Normal);
        self.transport.close(DisconnectReason::Normal);
    }

    /// Queue a command. The sequence number is assigned here.
    ///
    /// Fails fast when the queue is full. A command that cannot be encoded
    /// is refused before it takes a slot or a sequence number, and its
    /// callback fires with [`CompletionStatus::Rejected`].
    pub fn enqueue(
        &mut self,
        command: Command,
        callback: Option<CompletionCallback>,
    ) -> Result<ItemHandle, ScheduleError> {
        if self.connection == ConnectionState::Off {
            return Err(ScheduleError::NotConnected);
        }
        match self.insert(command, Origin::Caller(callback)) {
            Ok(handle) => Ok(handle),
            Err((err, origin)) => {
                let reason = match err {
                    ScheduleError::Rejected(_) => "encode",
                    _ => "queue_full",
                };
                metrics::counter!(
                    metric_defs::SCHEDULER_REJECTED.name,
                    &self.labels.with(&[("reason", reason.to_string())])
                )
                .increment(1);
                if let (ScheduleError::Rejected(_), Origin::Caller(Some(callback))) = (&err, origin)
                {
                    self.completions.push(Completion::Command {
                        callback,
                        status: CompletionStatus::Rejected,
                        response: None,
                    });
                }
                Err(err)
            }
        }
    }

    /// Queue a bulk request id. Its payload is resolved when a device slot
    /// frees up; the outcome arrives as [`LinkEvent::RequestCompleted`].
    pub fn submit_request(&mut self, id: RequestId) -> Result<(), ScheduleError> {
        if self.connection == ConnectionState::Off {
            return Err(ScheduleError::NotConnected);
        }
        if self.pending.push(id).is_err() {
            metrics::counter!(
                metric_defs::SCHEDULER_REJECTED.name,
                &self.labels.with(&[("reason", "pending_full".to_string())])
            )
            .increment(1);
            return Err(ScheduleError::PendingQueueFull(PENDING_CAPACITY));
        }
        self.wake = true;
        Ok(())
    }

    /// React to a transport notification. Events of any session other than
    /// the running one are dropped.
    pub fn handle_transport_event(&mut self, event: SessionEvent, now: Instant) {
        if self.session != Some(event.session) {
            debug!(
                "Scheduler[{}]: ignoring {:?} from ended session {}",
                self.labels.link, event.event, event.session
            );
            return;
        }
        match event.event {
            TransportEvent::Readable => self.process_inbound(now),
            TransportEvent::Connected => {
                info!("Scheduler[{}]: link operational", self.labels.link);
                self.connection = ConnectionState::Operational;
                self.connected_at = Some(now);
                self.last_tx = None;
                self.last_confirm = None;
                self.failures = 0;
                self.wake = true;
                self.completions.push(Completion::Event(LinkEvent::Connected));
            }
            TransportEvent::BootloaderActive => {
                self.bootloader_seen = true;
                self.completions
                    .push(Completion::Event(LinkEvent::BootloaderActive));
            }
            TransportEvent::Disconnected(reason) => self.end_session(reason),
        }
    }

    /// Fail outstanding work and go `Off`. Publishes `Disconnected(reason)`
    /// once per session.
    fn end_session(&mut self, reason: DisconnectReason) {
        self.kill_all(CompletionStatus::Disconnected);
        self.connection = ConnectionState::Off;
        self.connected_at = None;
        if self.session.take().is_none() {
            return;
        }
        info!("Scheduler[{}]: link down ({})", self.labels.link, reason);
        metrics::counter!(
            metric_defs::LINK_DISCONNECTS.name,
            &self.labels.with(&[("reason", reason.as_str().to_string())])
        )
        .increment(1);
        self.completions
            .push(Completion::Event(LinkEvent::Disconnected(reason)));
    }

    /// Drain inbound bytes from the transport and dispatch decoded commands.
    pub fn process_inbound(&mut self, now: Instant) {
        let mut data = std::mem::take(&mut self.inbound);
        data.clear();
        if self.transport.read(&mut data) > 0 {
            let before = self.receiver.stats();
            for &byte in &data {
                let Some(payload) = self.receiver.feed(byte) else {
                    continue;
                };
                metrics::counter!(metric_defs::FRAME_RX.name, &self.labels.to_labels())
                    .increment(1);
                match self.table.decode(&payload) {
                    Ok(command) => self.dispatch(command, now),
                    Err(e) => {
                        self.stats.decode_errors += 1;
                        metrics::counter!(
                            metric_defs::COMMAND_DECODE_ERRORS.name,
                            &self.labels.to_labels()
                        )
                        .increment(1);
                        debug!(
                            "Scheduler[{}]: dropping frame {}: {}",
                            self.labels.link,
                            hex::encode(&payload),
                            e
                        );
                    }
                }
            }
            self.record_receiver_errors(before);
        }
        self.inbound = data;
    }

    /// Run timeouts, background work and transmission.
    ///
    /// Returns the time at which the scheduler wants to be serviced again.
    pub fn service_tick(&mut self, now: Instant) -> Option<Instant> {
        self.wake = false;
        if self.connection != ConnectionState::Operational {
            return None;
        }

        self.sweep_timeouts(now);
        if self.connection != ConnectionState::Operational {
            return None;
        }
        self.schedule_background(now);
        self.send_ready(now);
        self.wake = false;
        self.update_gauges();
        self.next_deadline(now)
    }

    /// Earliest time the scheduler has work to do.
    pub fn next_deadline(&self, now: Instant) -> Option<Instant> {
        if self.connection != ConnectionState::Operational {
            return None;
        }
        let can_send = self.in_flight() < self.config.window;
        if self.wake
            || (can_send && self.queue.next_to_send().is_some())
            || self.background_ready()
        {
            return Some(now);
        }

        let timeout = self.config.confirm_timeout();
        let mut next = self
            .queue
            .iter()
            .filter(|(_, item)| item.state == ItemState::WaitConfirm)
            .filter_map(|(_, item)| item.sent_at.map(|t| t + timeout))
            .min();

        let mut consider = |t: Instant| next = Some(next.map_or(t, |n| n.min(t)));
        if !self.queue.contains_id(CMD_STATUS) {
            consider(self.last_tx.map_or(now, |t| t + self.config.keepalive_interval()));
            if !can_send {
                if let Some(t) = self.last_confirm.or(self.connected_at) {
                    consider(t + self.config.stall_interval());
                }
            }
        }
        next.map(|t| t.max(now))
    }

    /// Fail every queue item and pending request with `status`.
    pub fn kill_all(&mut self, status: CompletionStatus) {
        let items = self.queue.drain();
        let ids = self.pending.drain();
        if !items.is_empty() || !ids.is_empty() {
            debug!(
                "Scheduler[{}]: failing {} queued commands and {} requests ({})",
                self.labels.link,
                items.len(),
                ids.len(),
                status
            );
        }
        for item in items {
            self.finish(item, status, None);
        }
        for id in ids {
            self.completions.push(Completion::Request { id, status });
        }
        self.update_gauges();
    }

    fn insert(
        &mut self,
        mut command: Command,
        origin: Origin,
    ) -> Result<ItemHandle, (ScheduleError, Origin)> {
        if let Err(e) = self.table.encode(&command, MAX_COMMAND_SIZE) {
            warn!(
                "Scheduler[{}]: refusing {}: {}",
                self.labels.link,
                self.table.name(command.id),
                e
            );
            return Err((ScheduleError::Rejected(e), origin));
        }
        if self.queue.is_full() {
            return Err((ScheduleError::QueueFull(QUEUE_CAPACITY), origin));
        }

        let seq = self.allocate_seq();
        command.seq = seq;
        let id = command.id;
        let item = QueueItem {
            command,
            state: ItemState::WaitSend,
            retries: 0,
            sent_at: None,
            first_sent_at: None,
            origin,
        };
        let slot = match self.queue.insert(item) {
            Ok(slot) => slot,
            Err(item) => return Err((ScheduleError::QueueFull(QUEUE_CAPACITY), item.origin)),
        };
        trace!(
            "Scheduler[{}]: queued {} seq {} in slot {}",
            self.labels.link,
            self.table.name(id),
            seq,
            slot
        );
        if self.in_flight() < self.config.window {
            self.wake = true;
        }
        self.update_gauges();
        Ok(ItemHandle { slot, seq })
    }

    /// Next sequence number not held by any queued item.
    fn allocate_seq(&mut self) -> u8 {
        loop {
            self.next_seq = self.next_seq.wrapping_add(1);
            if !self.queue.seq_in_use(self.next_seq) {
                return self.next_seq;
            }
        }
    }

    fn keepalive_due(&self, now: Instant) -> bool {
        let idle = self
            .last_tx
            .map_or(true, |t| now.duration_since(t) >= self.config.keepalive_interval());
        let stalled = self.in_flight() >= self.config.window
            && self
                .last_confirm
                .or(self.connected_at)
                .is_some_and(|t| now.duration_since(t) >= self.config.stall_interval());
        idle || stalled
    }

    fn request_in_queue(&self) -> bool {
        self.queue
            .iter()
            .any(|(_, item)| matches!(item.origin, Origin::Request(_)))
    }

    fn background_ready(&self) -> bool {
        (self.status.confirm_pending() && !self.queue.contains_id(CMD_APS_DATA_CONFIRM))
            || (self.status.indication_pending()
                && !self.queue.contains_id(CMD_APS_DATA_INDICATION))
            || self.request_ready()
    }

    fn request_ready(&self) -> bool {
        self.status.is_joined()
            && self.status.has_free_slot()
            && !self.pending.is_empty()
            && !self.request_in_queue()
    }

    /// Queue at most one keep-alive, fetch or bulk request.
    fn schedule_background(&mut self, now: Instant) {
        if self.queue.is_full() {
            return;
        }
        if self.keepalive_due(now) && !self.queue.contains_id(CMD_STATUS) {
            self.enqueue_internal(CMD_STATUS);
        } else if self.status.confirm_pending() && !self.queue.contains_id(CMD_APS_DATA_CONFIRM) {
            self.enqueue_internal(CMD_APS_DATA_CONFIRM);
        } else if self.status.indication_pending()
            && !self.queue.contains_id(CMD_APS_DATA_INDICATION)
        {
            self.enqueue_internal(CMD_APS_DATA_INDICATION);
        } else if self.request_ready() {
            self.materialize_request();
        }
    }

    fn enqueue_internal(&mut self, id: u8) {
        let Some(command) = self.table.zeroed(id) else {
            return;
        };
        if let Err((e, _)) = self.insert(command, Origin::Internal) {
            debug!("Scheduler[{}]: {}", self.labels.link, e);
        }
    }

    fn materialize_request(&mut self) {
        let Some(id) = self.pending.pop() else {
            return;
        };
        let resolved = self.resolver.as_ref().and_then(|resolve| resolve(id));
        let Some(command) = resolved else {
            warn!("Scheduler[{}]: request {} has no payload", self.labels.link, id);
            self.completions.push(Completion::Request {
                id,
                status: CompletionStatus::Rejected,
            });
            return;
        };
        match self.insert(command, Origin::Request(id)) {
            Ok(handle) => trace!(
                "Scheduler[{}]: request {} queued as seq {}",
                self.labels.link,
                id,
                handle.seq
            ),
            Err((e, _)) => {
                warn!("Scheduler[{}]: request {} failed: {}", self.labels.link, id, e);
                self.completions.push(Completion::Request {
                    id,
                    status: CompletionStatus::Rejected,
                });
            }
        }
    }

    /// Move waiting items into the in-flight window.
    fn send_ready(&mut self, now: Instant) {
        while self.in_flight() < self.config.window {
            let Some(slot) = self.queue.next_to_send() else {
                break;
            };
            let Some(item) = self.queue.get(slot) else {
                break;
            };
            let id = item.command.id;
            let payload = match self.table.encode(&item.command, MAX_COMMAND_SIZE) {
                Ok(payload) => payload,
                Err(e) => {
                    warn!("Scheduler[{}]: dropping unencodable item: {}", self.labels.link, e);
                    if let Some(item) = self.queue.remove(slot) {
                        self.finish(item, CompletionStatus::Rejected, None);
                    }
                    continue;
                }
            };

            if let Err(e) = self.transport.write(&FrameCodec::encode(&payload)) {
                debug!("Scheduler[{}]: send deferred: {}", self.labels.link, e);
                break;
            }

            let name = self.table.name(id);
            if let Some(item) = self.queue.get_mut(slot) {
                item.state = ItemState::WaitConfirm;
                item.sent_at = Some(now);
                item.first_sent_at.get_or_insert(now);
                trace!(
                    "Scheduler[{}]: sent {} seq {} (retry {})",
                    self.labels.link,
                    name,
                    item.command.seq,
                    item.retries
                );
            }
            self.queue.mark_sent(slot);
            self.last_tx = Some(now);
            self.stats.sent += 1;
            metrics::counter!(metric_defs::FRAME_TX.name, &self.labels.to_labels()).increment(1);
            metrics::counter!(metric_defs::COMMAND_TX.name, &self.labels.with_command(name))
                .increment(1);
        }
    }

    fn sweep_timeouts(&mut self, now: Instant) {
        let timeout = self.config.confirm_timeout();
        let expired: Vec<usize> = self
            .queue
            .iter()
            .filter(|(_, item)| {
                item.state == ItemState::WaitConfirm
                    && item.sent_at.is_some_and(|t| now.duration_since(t) >= timeout)
            })
            .map(|(slot, _)| slot)
            .collect();

        for slot in expired {
            let Some(item) = self.queue.get_mut(slot) else {
                continue;
            };
            let name = self.table.name(item.command.id);
            if item.retries < self.config.max_retries {
                item.retries += 1;
                item.state = ItemState::WaitSend;
                debug!(
                    "Scheduler[{}]: {} seq {} timed out, retry {}/{}",
                    self.labels.link, name, item.command.seq, item.retries, self.config.max_retries
                );
                self.stats.retries += 1;
                metrics::counter!(
                    metric_defs::SCHEDULER_RETRIES.name,
                    &self.labels.with_command(name)
                )
                .increment(1);
            } else {
                warn!(
                    "Scheduler[{}]: {} seq {} failed after {} retries",
                    self.labels.link, name, item.command.seq, item.retries
                );
                self.stats.timeouts += 1;
                metrics::counter!(
                    metric_defs::SCHEDULER_TIMEOUTS.name,
                    &self.labels.with_command(name)
                )
                .increment(1);
                self.failures += 1;
                if let Some(item) = self.queue.remove(slot) {
                    self.finish(item, CompletionStatus::Timeout, None);
                }
            }
        }

        metrics::gauge!(metric_defs::LINK_FAILURE_COUNT.name, &self.labels.to_labels())
            .set(f64::from(self.failures));
        if self.failures >= self.config.failure_threshold {
            self.teardown();
        }
    }

    /// Tear the transport down after too many consecutive failures.
    fn teardown(&mut self) {
        let reason = if self.bootloader_seen {
            DisconnectReason::BootloaderOnly
        } else {
            DisconnectReason::Timeout
        };
        warn!(
            "Scheduler[{}]: {} consecutive failures, closing link ({})",
            self.labels.link, self.failures, reason
        );
        self.failures = 0;
        self.end_session(reason);
        self.transport.close(reason);

        if self.config.auto_reconnect {
            info!("Scheduler[{}]: reconnecting", self.labels.link);
            metrics::counter!(metric_defs::LINK_RECONNECTS.name, &self.labels.to_labels())
                .increment(1);
            if let Err(e) = self.open() {
                warn!("Scheduler[{}]: reconnect failed: {}", self.labels.link, e);
            }
        }
    }

    fn dispatch(&mut self, command: Command, now: Instant) {
        let name = self.table.name(command.id);
        metrics::counter!(metric_defs::COMMAND_RX.name, &self.labels.with_command(name))
            .increment(1);

        if let Some(slot) = self.queue.find_confirm(command.id, command.seq) {
            if let Some(item) = self.queue.remove(slot) {
                trace!(
                    "Scheduler[{}]: {} seq {} confirmed",
                    self.labels.link,
                    name,
                    command.seq
                );
                if let Some(first) = item.first_sent_at {
                    metrics::histogram!(
                        metric_defs::SCHEDULER_CONFIRM_LATENCY.name,
                        &self.labels.with_command(name)
                    )
                    .record(now.duration_since(first).as_secs_f64() * 1000.0);
                }
                self.failures = 0;
                self.last_confirm = Some(now);
                self.stats.confirmed += 1;
                self.wake = true;
                self.finish(item, CompletionStatus::Success, Some(command.clone()));
            }
        }

        if let Some(update) = self.table.status_update(&command) {
            if self.status.apply(update) {
                debug!(
                    "Scheduler[{}]: device status {}",
                    self.labels.link, self.status
                );
                self.wake = true;
                self.completions
                    .push(Completion::Event(LinkEvent::DeviceStatusChanged(self.status)));
            }
        }

        self.completions
            .push(Completion::Event(LinkEvent::Command(command)));
    }

    fn finish(&mut self, item: QueueItem, status: CompletionStatus, response: Option<Command>) {
        match item.origin {
            Origin::Internal | Origin::Caller(None) => {}
            Origin::Caller(Some(callback)) => self.completions.push(Completion::Command {
                callback,
                status,
                response,
            }),
            Origin::Request(id) => self.completions.push(Completion::Request { id, status }),
        }
    }

    fn record_receiver_errors(&self, before: ReceiverStats) {
        let after = self.receiver.stats();
        let labels = self.labels.to_labels();
        if after.checksum_errors > before.checksum_errors {
            metrics::counter!(metric_defs::FRAME_CHECKSUM_ERRORS.name, &labels)
                .increment(after.checksum_errors - before.checksum_errors);
        }
        if after.escape_errors > before.escape_errors {
            metrics::counter!(metric_defs::FRAME_ESCAPE_ERRORS.name, &labels)
                .increment(after.escape_errors - before.escape_errors);
        }
        if after.overflow_bytes > before.overflow_bytes {
            metrics::counter!(metric_defs::FRAME_OVERFLOW_BYTES.name, &labels)
                .increment(after.overflow_bytes - before.overflow_bytes);
        }
    }

    fn update_gauges(&self) {
        let labels = self.labels.to_labels();
        metrics::gauge!(metric_defs::SCHEDULER_QUEUE_DEPTH.name, &labels)
            .set(self.queue.len() as f64);
        metrics::gauge!(metric_defs::SCHEDULER_IN_FLIGHT.name, &labels)
            .set(self.in_flight() as f64);
        metrics::gauge!(metric_defs::SCHEDULER_PENDING_REQUESTS.name, &labels)
            .set(self.pending.len() as f64);
    }
}
