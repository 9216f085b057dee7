//! Fixed-capacity circular byte store.

use bytes::{Bytes, BytesMut};

/// Retains the most recent `capacity` bytes written to a mount.
///
/// Not synchronized on its own; [`Mount`](super::Mount) keeps it behind the
/// same lock as the listener set.
pub struct RingBuffer {
    data: Box<[u8]>,
    /// Next write position, always `< capacity`.
    cursor: usize,
    /// Valid bytes, never more than `capacity`.
    len: usize,
}

impl RingBuffer {
    /// Creates an empty buffer. A zero capacity is bumped to one byte.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            data: vec![0u8; capacity.max(1)].into_boxed_slice(),
            cursor: 0,
            len: 0,
        }
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Appends `chunk`, overwriting the oldest bytes once full.
    pub fn write(&mut self, chunk: &[u8]) {
        let capacity = self.capacity();
        // Only the tail of an oversized chunk can survive.
        let chunk = if chunk.len() > capacity {
            let skipped = chunk.len() - capacity;
            self.cursor = (self.cursor + skipped) % capacity;
            &chunk[skipped..]
        } else {
            chunk
        };

        let first = chunk.len().min(capacity - self.cursor);
        self.data[self.cursor..self.cursor + first].copy_from_slice(&chunk[..first]);
        let rest = chunk.len() - first;
        if rest > 0 {
            self.data[..rest].copy_from_slice(&chunk[first..]);
        }

        self.cursor = (self.cursor + chunk.len()) % capacity;
        self.len = (self.len + chunk.len()).min(capacity);
    }

    /// Returns the most recent `min(max_bytes, len)` bytes in stream order.
    #[must_use]
    pub fn tail(&self, max_bytes: usize) -> Bytes {
        let n = max_bytes.min(self.len);
        if n == 0 {
            return Bytes::new();
        }
        let capacity = self.capacity();
        let start = (self.cursor + capacity - n) % capacity;
        let mut out = BytesMut::with_capacity(n);
        if start + n <= capacity {
            out.extend_from_slice(&self.data[start..start + n]);
        } else {
            out.extend_from_slice(&self.data[start..]);
            out.extend_from_slice(&self.data[..n - (capacity - start)]);
        }
        out.freeze()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_buffer_has_no_tail() {
        let ring = RingBuffer::new(8);
        assert!(ring.tail(8).is_empty());
        assert!(ring.is_empty());
    }

    #[test]
    fn tail_is_bounded_by_written_bytes() {
        let mut ring = RingBuffer::new(8);
        ring.write(b"abc");
        assert_eq!(&ring.tail(100)[..], b"abc");
        assert_eq!(&ring.tail(2)[..], b"bc");
    }

    #[test]
    fn wraparound_keeps_last_capacity_bytes_in_order() {
        let mut ring = RingBuffer::new(10);
        let mut all = Vec::new();
        for i in 0..7u8 {
            let chunk: Vec<u8> = (0..3).map(|j| i * 3 + j).collect();
            all.extend_from_slice(&chunk);
            ring.write(&chunk);
        }
        assert_eq!(ring.len(), 10);
        assert_eq!(&ring.tail(10)[..], &all[all.len() - 10..]);
        assert_eq!(&ring.tail(4)[..], &all[all.len() - 4..]);
    }

    #[test]
    fn oversized_chunk_keeps_its_tail() {
        let mut ring = RingBuffer::new(4);
        ring.write(b"xy");
        ring.write(b"0123456789");
        assert_eq!(&ring.tail(4)[..], b"6789");
        ring.write(b"a");
        assert_eq!(&ring.tail(4)[..], b"789a");
    }
}
