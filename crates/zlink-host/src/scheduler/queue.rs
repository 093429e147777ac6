//! Fixed-capacity command queue.

use std::time::Instant;

use zlink_protocol::Command;

use crate::events::{CompletionCallback, RequestId};

/// Number of command queue slots.
pub const QUEUE_CAPACITY: usize = 32;

/// Scheduling state of a queue slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ItemState {
    /// Free slot.
    #[default]
    Init,
    /// Waiting for room in the in-flight window.
    WaitSend,
    /// Sent, waiting for the matching confirm.
    WaitConfirm,
}

/// Who is told about the outcome of a queue item.
pub enum Origin {
    /// Generated by the scheduler itself (keep-alive, fetch).
    Internal,
    /// Submitted command with an optional callback.
    Caller(Option<CompletionCallback>),
    /// Materialized bulk request.
    Request(RequestId),
}

/// Identifies a queued command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ItemHandle {
    /// Queue slot.
    pub slot: usize,
    /// Sequence number assigned to the command.
    pub seq: u8,
}

/// One occupied queue slot.
pub struct QueueItem {
    /// The command, sequence number assigned.
    pub command: Command,
    /// Scheduling state.
    pub state: ItemState,
    /// Retransmissions so far.
    pub retries: u8,
    /// Time of the last transmission.
    pub sent_at: Option<Instant>,
    /// Time of the first transmission.
    pub first_sent_at: Option<Instant>,
    /// Completion target.
    pub origin: Origin,
}

impl QueueItem {
    /// Whether this item waits for a confirm with `id` and `seq`.
    pub fn awaits(&self, id: u8, seq: u8) -> bool {
        self.state == ItemState::WaitConfirm && self.command.id == id && self.command.seq == seq
    }
}

/// Circular array of queue slots with independent write and send pointers.
pub struct CommandQueue {
    slots: Vec<Option<QueueItem>>,
    /// Next slot to try on insert.
    write: usize,
    /// Slot after the most recently sent item.
    send: usize,
}

impl Default for CommandQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        CommandQueue {
            slots: (0..QUEUE_CAPACITY).map(|_| None).collect(),
            write: 0,
            send: 0,
        }
    }

    /// Occupied slot count.
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// Whether every slot is free.
    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(Option::is_none)
    }

    /// Whether every slot is occupied.
    pub fn is_full(&self) -> bool {
        self.slots.iter().all(Option::is_some)
    }

    /// Whether any occupied slot uses `seq`.
    pub fn seq_in_use(&self, seq: u8) -> bool {
        self.iter().any(|(_, item)| item.command.seq == seq)
    }

    /// Whether a command with `id` is queued or in flight.
    pub fn contains_id(&self, id: u8) -> bool {
        self.iter().any(|(_, item)| item.command.id == id)
    }

    /// Items in `state`.
    pub fn count(&self, state: ItemState) -> usize {
        self.iter().filter(|(_, item)| item.state == state).count()
    }

    /// Store `item` in a free slot. Returns the item back if the queue is full.
    pub fn insert(&mut self, item: QueueItem) -> Result<usize, QueueItem> {
        let free = (0..QUEUE_CAPACITY)
            .map(|i| (self.write + i) % QUEUE_CAPACITY)
            .find(|&i| self.slots[i].is_none());
        match free {
            Some(slot) => {
                self.slots[slot] = Some(item);
                self.write = (slot + 1) % QUEUE_CAPACITY;
                Ok(slot)
            }
            None => Err(item),
        }
    }

    /// Free a slot.
    pub fn remove(&mut self, slot: usize) -> Option<QueueItem> {
        self.slots.get_mut(slot).and_then(Option::take)
    }

    /// Item in `slot`.
    pub fn get(&self, slot: usize) -> Option<&QueueItem> {
        self.slots.get(slot).and_then(Option::as_ref)
    }

    /// Mutable item in `slot`.
    pub fn get_mut(&mut self, slot: usize) -> Option<&mut QueueItem> {
        self.slots.get_mut(slot).and_then(Option::as_mut)
    }

    /// Oldest item waiting to be sent, scanning forward from the send pointer.
    pub fn next_to_send(&self) -> Option<usize> {
        (0..QUEUE_CAPACITY)
            .map(|i| (self.send + i) % QUEUE_CAPACITY)
            .find(|&i| matches!(&self.slots[i], Some(item) if item.state == ItemState::WaitSend))
    }

    /// Advance the send pointer past `slot`.
    pub fn mark_sent(&mut self, slot: usize) {
        self.send = (slot + 1) % QUEUE_CAPACITY;
    }

    /// Slot of the item awaiting the confirm `(id, seq)`.
    pub fn find_confirm(&self, id: u8, seq: u8) -> Option<usize> {
        self.iter()
            .find(|(_, item)| item.awaits(id, seq))
            .map(|(slot, _)| slot)
    }

    /// Occupied slots with their items.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &QueueItem)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|item| (i, item)))
    }

    /// Free every slot, returning the items.
    pub fn drain(&mut self) -> Vec<QueueItem> {
        self.write = 0;
        self.send = 0;
        self.slots.iter_mut().filter_map(Option::take).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zlink_protocol::CMD_STATUS;

    fn item(seq: u8, state: ItemState) -> QueueItem {
        QueueItem {
            command: Command::request(CMD_STATUS).unwrap().with_seq(seq),
            state,
            retries: 0,
            sent_at: None,
            first_sent_at: None,
            origin: Origin::Internal,
        }
    }

    #[test]
    fn test_insert_until_full() {
        let mut queue = CommandQueue::new();
        for seq in 0..QUEUE_CAPACITY as u8 {
            assert!(queue.insert(item(seq, ItemState::WaitSend)).is_ok());
        }
        assert!(queue.is_full());
        assert!(queue.insert(item(99, ItemState::WaitSend)).is_err());

        queue.remove(5);
        assert_eq!(queue.insert(item(99, ItemState::WaitSend)).ok(), Some(5));
    }

    #[test]
    fn test_next_to_send_scans_from_send_pointer() {
        let mut queue = CommandQueue::new();
        let a = queue.insert(item(1, ItemState::WaitSend)).ok().unwrap();
        let b = queue.insert(item(2, ItemState::WaitSend)).ok().unwrap();
        assert_eq!(queue.next_to_send(), Some(a));

        queue.get_mut(a).unwrap().state = ItemState::WaitConfirm;
        queue.mark_sent(a);
        assert_eq!(queue.next_to_send(), Some(b));

        // A retried item behind the pointer is still found.
        queue.get_mut(b).unwrap().state = ItemState::WaitConfirm;
        queue.mark_sent(b);
        queue.get_mut(a).unwrap().state = ItemState::WaitSend;
        assert_eq!(queue.next_to_send(), Some(a));
    }

    #[test]
    fn test_find_confirm_requires_wait_confirm() {
        let mut queue = CommandQueue::new();
        let slot = queue.insert(item(7, ItemState::WaitSend)).ok().unwrap();
        assert_eq!(queue.find_confirm(CMD_STATUS, 7), None);
        queue.get_mut(slot).unwrap().state = ItemState::WaitConfirm;
        assert_eq!(queue.find_confirm(CMD_STATUS, 7), Some(slot));
        assert_eq!(queue.find_confirm(CMD_STATUS, 8), None);
    }
}
