//! Ring of bulk request identifiers awaiting a device slot.

use crate::events::RequestId;

/// Number of pending request entries.
pub const PENDING_CAPACITY: usize = 16;

/// Fixed-capacity FIFO of [`RequestId`]s.
#[derive(Debug, Clone)]
pub struct PendingRequestQueue {
    ids: [Option<RequestId>; PENDING_CAPACITY],
    head: usize,
    len: usize,
}

impl Default for PendingRequestQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl PendingRequestQueue {
    /// Create an empty ring.
    pub const fn new() -> Self {
        PendingRequestQueue {
            ids: [None; PENDING_CAPACITY],
            head: 0,
            len: 0,
        }
    }

    /// Queued id count.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the ring is empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Whether the ring is full.
    pub fn is_full(&self) -> bool {
        self.len == PENDING_CAPACITY
    }

    /// Append `id`. Returns it back when full.
    pub fn push(&mut self, id: RequestId) -> Result<(), RequestId> {
        if self.is_full() {
            return Err(id);
        }
        let tail = (self.head + self.len) % PENDING_CAPACITY;
        self.ids[tail] = Some(id);
        self.len += 1;
        Ok(())
    }

    /// Remove the oldest id.
    pub fn pop(&mut self) -> Option<RequestId> {
        if self.is_empty() {
            return None;
        }
        let id = self.ids[self.head].take();
        self.head = (self.head + 1) % PENDING_CAPACITY;
        self.len -= 1;
        id
    }

    /// Remove every id, oldest first.
    pub fn drain(&mut self) -> Vec<RequestId> {
        std::iter::from_fn(|| self.pop()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_order_across_wrap() {
        let mut ring = PendingRequestQueue::new();
        for i in 0..10 {
            ring.push(RequestId(i)).unwrap();
        }
        for i in 0..10 {
            assert_eq!(ring.pop(), Some(RequestId(i)));
        }
        for i in 10..26 {
            ring.push(RequestId(i)).unwrap();
        }
        assert!(ring.is_full());
        assert_eq!(ring.push(RequestId(99)), Err(RequestId(99)));
        assert_eq!(ring.drain(), (10..26).map(RequestId).collect::<Vec<_>>());
        assert!(ring.is_empty());
    }
}
