//! Bounded byte ring shared between the I/O thread and the scheduler.

use std::collections::VecDeque;

/// Fixed-capacity FIFO of bytes.
#[derive(Debug, Clone)]
pub struct ByteRing {
    bytes: VecDeque<u8>,
    capacity: usize,
    dropped: u64,
}

impl ByteRing {
    /// Create an empty ring holding at most `capacity` bytes.
    pub fn new(capacity: usize) -> Self {
        ByteRing {
            bytes: VecDeque::with_capacity(capacity),
            capacity,
            dropped: 0,
        }
    }

    /// Buffered byte count.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the ring is empty.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Remaining space.
    pub fn free(&self) -> usize {
        self.capacity - self.bytes.len()
    }

    /// Bytes discarded by [`push_lossy`](Self::push_lossy) so far.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Append `data` only if all of it fits.
    pub fn push_all(&mut self, data: &[u8]) -> bool {
        if data.len() > self.free() {
            return false;
        }
        self.bytes.extend(data);
        true
    }

    /// Append as much of `data` as fits, counting the rest as dropped.
    /// Returns the number of bytes accepted.
    pub fn push_lossy(&mut self, data: &[u8]) -> usize {
        let accepted = data.len().min(self.free());
        self.bytes.extend(&data[..accepted]);
        self.dropped += (data.len() - accepted) as u64;
        accepted
    }

    /// Move every buffered byte into `out`.
    pub fn drain_into(&mut self, out: &mut Vec<u8>) -> usize {
        let n = self.bytes.len();
        out.extend(self.bytes.drain(..));
        n
    }

    /// Discard buffered bytes.
    pub fn clear(&mut self) {
        self.bytes.clear();
    }
}
