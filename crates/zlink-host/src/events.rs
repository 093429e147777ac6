//! Events published by the link and completion signalling.

use std::fmt;

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use zlink_protocol::{Command, DeviceStatus};

/// Why a transport session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DisconnectReason {
    /// Closed on request.
    Normal,
    /// The operating system denied access to the port.
    NoPermission,
    /// Too many consecutive confirm failures.
    Timeout,
    /// Read, write or open failure, or the device went away.
    IoError,
    /// Too many consecutive failures while only the update loader answered.
    BootloaderOnly,
}

impl DisconnectReason {
    /// Lowercase name, used as metric label.
    pub const fn as_str(&self) -> &'static str {
        match self {
            DisconnectReason::Normal => "normal",
            DisconnectReason::NoPermission => "no_permission",
            DisconnectReason::Timeout => "timeout",
            DisconnectReason::IoError => "io_error",
            DisconnectReason::BootloaderOnly => "bootloader_only",
        }
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Final status of a submitted command or bulk request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompletionStatus {
    /// The device confirmed the command.
    Success,
    /// No confirm arrived within the retry budget.
    Timeout,
    /// The link went down while the command was outstanding.
    Disconnected,
    /// The command could not be encoded, or a bulk payload could not be resolved.
    Rejected,
}

impl fmt::Display for CompletionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompletionStatus::Success => write!(f, "success"),
            CompletionStatus::Timeout => write!(f, "timeout"),
            CompletionStatus::Disconnected => write!(f, "disconnected"),
            CompletionStatus::Rejected => write!(f, "rejected"),
        }
    }
}

/// Opaque identifier of an externally owned bulk payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(pub u32);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Callback invoked once with the outcome of a submitted command. On success
/// the matching confirm is passed along.
pub type CompletionCallback = Box<dyn FnOnce(CompletionStatus, Option<&Command>) + Send>;

/// Event delivered to subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    /// The link became operational.
    Connected,
    /// The link went down.
    Disconnected(DisconnectReason),
    /// The update loader banner was seen during bring-up.
    BootloaderActive,
    /// Either device status byte changed.
    DeviceStatusChanged(DeviceStatus),
    /// A command was received from the device.
    Command(Command),
    /// A bulk request finished.
    RequestCompleted {
        /// Request identifier.
        id: RequestId,
        /// Outcome.
        status: CompletionStatus,
    },
}

/// Selects which events a subscriber receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventFilter {
    /// Every event.
    All,
    /// Received commands with this id.
    Command(u8),
    /// Connected, disconnected and bootloader events.
    Connection,
    /// Device status changes.
    DeviceStatus,
    /// Bulk request completions.
    Requests,
}

impl EventFilter {
    /// Whether `event` passes this filter.
    pub fn matches(&self, event: &LinkEvent) -> bool {
        match (self, event) {
            (EventFilter::All, _) => true,
            (EventFilter::Command(id), LinkEvent::Command(cmd)) => cmd.id == *id,
            (
                EventFilter::Connection,
                LinkEvent::Connected | LinkEvent::Disconnected(_) | LinkEvent::BootloaderActive,
            ) => true,
            (EventFilter::DeviceStatus, LinkEvent::DeviceStatusChanged(_)) => true,
            (EventFilter::Requests, LinkEvent::RequestCompleted { .. }) => true,
            _ => false,
        }
    }
}

/// Fan-out of link events to channel subscribers.
///
/// Subscribers whose receiver was dropped are pruned on the next publish.
#[derive(Default)]
pub struct Subscribers {
    senders: Mutex<Vec<(EventFilter, Sender<LinkEvent>)>>,
}

impl Subscribers {
    /// Create an empty subscriber list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber.
    pub fn subscribe(&self, filter: EventFilter) -> Receiver<LinkEvent> {
        let (tx, rx) = unbounded();
        self.senders.lock().push((filter, tx));
        rx
    }

    /// Deliver `event` to every matching subscriber.
    pub fn publish(&self, event: &LinkEvent) {
        self.senders
            .lock()
            .retain(|(filter, tx)| !filter.matches(event) || tx.send(event.clone()).is_ok());
    }

    /// Number of live subscribers.
    pub fn len(&self) -> usize {
        self.senders.lock().len()
    }

    /// Whether there are no subscribers.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for Subscribers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscribers").field("len", &self.len()).finish()
    }
}

/// Work the scheduler defers until its lock is released.
pub enum Completion {
    /// Outcome of a submitted command.
    Command {
        /// Callback to invoke.
        callback: CompletionCallback,
        /// Outcome.
        status: CompletionStatus,
        /// Matching confirm on success.
        response: Option<Command>,
    },
    /// Outcome of a bulk request.
    Request {
        /// Request identifier.
        id: RequestId,
        /// Outcome.
        status: CompletionStatus,
    },
    /// Event to publish.
    Event(LinkEvent),
}

impl Completion {
    /// Invoke the callback or publish the event.
    pub fn fire(self, subscribers: &Subscribers) {
        match self {
            Completion::Command {
                callback,
                status,
                response,
            } => callback(status, response.as_ref()),
            Completion::Request { id, status } => {
                subscribers.publish(&LinkEvent::RequestCompleted { id, status })
            }
            Completion::Event(event) => subscribers.publish(&event),
        }
    }
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Completion::Command { status, .. } => {
                f.debug_struct("Command").field("status", status).finish()
            }
            Completion::Request { id, status } => f
                .debug_struct("Request")
                .field("id", id)
                .field("status", status)
                .finish(),
            Completion::Event(event) => f.debug_tuple("Event").field(event).finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zlink_protocol::{Value, CMD_STATUS, CMD_VERSION};

    #[test]
    fn test_filter_matching() {
        let status = LinkEvent::Command(Command::new(CMD_STATUS, vec![Value::U8(0), Value::U8(0)]));
        assert!(EventFilter::All.matches(&status));
        assert!(EventFilter::Command(CMD_STATUS).matches(&status));
        assert!(!EventFilter::Command(CMD_VERSION).matches(&status));
        assert!(!EventFilter::Connection.matches(&status));
        assert!(EventFilter::Connection.matches(&LinkEvent::Disconnected(DisconnectReason::Normal)));
        assert!(EventFilter::Requests.matches(&LinkEvent::RequestCompleted {
            id: RequestId(1),
            status: CompletionStatus::Success,
        }));
    }

    #[test]
    fn test_dropped_subscribers_are_pruned() {
        let subscribers = Subscribers::new();
        let keep = subscribers.subscribe(EventFilter::All);
        let dropped = subscribers.subscribe(EventFilter::All);
        drop(dropped);

        subscribers.publish(&LinkEvent::Connected);
        assert_eq!(subscribers.len(), 1);
        assert_eq!(keep.try_recv().unwrap(), LinkEvent::Connected);
    }

    #[test]
    fn test_completion_fires_callback() {
        let (tx, rx) = unbounded();
        let completion = Completion::Command {
            callback: Box::new(move |status, response| {
                tx.send((status, response.map(|c| c.seq))).unwrap();
            }),
            status: CompletionStatus::Success,
            response: Some(Command::new(CMD_VERSION, vec![Value::U32(1)]).with_seq(4)),
        };
        completion.fire(&Subscribers::new());
        assert_eq!(rx.try_recv().unwrap(), (CompletionStatus::Success, Some(4)));
    }
}
