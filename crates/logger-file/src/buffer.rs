//! Fixed-capacity, append-only byte buffer

use std::fmt;

/// Slot number a pool assigns to each buffer it allocates
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BufferId(pub(crate) usize);

impl fmt::Display for BufferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// An append did not fit in the remaining space
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("append of {requested} bytes exceeds remaining capacity of {remaining}")]
pub struct CapacityExceeded {
    /// Bytes the caller tried to append
    pub requested: usize,
    /// Bytes that were free
    pub remaining: usize,
}

/// Pre-allocated byte region with a write cursor.
///
/// Storage is allocated once and reused across `reset` calls. Not
/// thread-safe by itself; the pool guards it.
pub struct FixedBuffer {
    id: BufferId,
    storage: Box<[u8]>,
    cursor: usize,
    records: usize,
}

impl FixedBuffer {
    /// Allocate a buffer of `capacity` bytes
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self::with_id(BufferId(0), capacity)
    }

    pub(crate) fn with_id(id: BufferId, capacity: usize) -> Self {
        Self {
            id,
            storage: vec![0; capacity].into_boxed_slice(),
            cursor: 0,
            records: 0,
        }
    }

    /// Slot number of this buffer within its pool
    #[inline]
    #[must_use]
    pub const fn id(&self) -> BufferId {
        self.id
    }

    /// Total size fixed at construction
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    /// Bytes written so far
    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.cursor
    }

    /// Whether nothing has been written since the last reset
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.cursor == 0
    }

    /// Bytes still free
    #[inline]
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.capacity() - self.cursor
    }

    /// Number of successful appends since the last reset
    #[inline]
    #[must_use]
    pub const fn records(&self) -> usize {
        self.records
    }

    /// The written bytes
    #[inline]
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.storage[..self.cursor]
    }

    /// Append `bytes` as one record, or reject it if it does not fit
    pub fn append(&mut self, bytes: &[u8]) -> Result<(), CapacityExceeded> {
        let remaining = self.remaining();
        if bytes.len() > remaining {
            return Err(CapacityExceeded {
                requested: bytes.len(),
                remaining,
            });
        }

        let end = self.cursor + bytes.len();
        self.storage[self.cursor..end].copy_from_slice(bytes);
        self.cursor = end;
        self.records += 1;
        Ok(())
    }

    /// Rewind to empty, zeroing the previously written bytes
    pub fn reset(&mut self) {
        self.storage[..self.cursor].fill(0);
        self.cursor = 0;
        self.records = 0;
    }
}

impl fmt::Debug for FixedBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FixedBuffer")
            .field("id", &self.id)
            .field("capacity", &self.capacity())
            .field("len", &self.cursor)
            .field("records", &self.records)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_append_and_remaining() {
        let mut buffer = FixedBuffer::new(16);
        assert_eq!(buffer.remaining(), 16);

        buffer.append(b"hello\n").unwrap();
        assert_eq!(buffer.len(), 6);
        assert_eq!(buffer.remaining(), 10);
        assert_eq!(buffer.records(), 1);
        assert_eq!(buffer.as_bytes(), b"hello\n");
    }

    #[test]
    fn test_rejects_overflow() {
        let mut buffer = FixedBuffer::new(8);
        buffer.append(b"12345").unwrap();

        let err = buffer.append(b"6789").unwrap_err();
        assert_eq!(
            err,
            CapacityExceeded {
                requested: 4,
                remaining: 3
            }
        );

        // A rejected append leaves the buffer untouched
        assert_eq!(buffer.as_bytes(), b"12345");
        assert_eq!(buffer.records(), 1);

        // Exactly filling the buffer is fine
        buffer.append(b"678").unwrap();
        assert_eq!(buffer.remaining(), 0);
    }

    #[test]
    fn test_reset_zeroes_storage() {
        let mut buffer = FixedBuffer::new(8);
        buffer.append(b"secret").unwrap();
        buffer.reset();

        assert!(buffer.is_empty());
        assert_eq!(buffer.records(), 0);
        assert_eq!(buffer.capacity(), 8);
        assert!(buffer.storage.iter().all(|&b| b == 0));
    }

    proptest! {
        #[test]
        fn prop_never_exceeds_capacity(
            capacity in 1usize..256,
            chunks in proptest::collection::vec(proptest::collection::vec(any::<u8>(), 0..64), 0..32),
        ) {
            let mut buffer = FixedBuffer::new(capacity);
            let mut expected = Vec::new();

            for chunk in &chunks {
                let before = buffer.remaining();
                match buffer.append(chunk) {
                    Ok(()) => {
                        prop_assert!(chunk.len() <= before);
                        expected.extend_from_slice(chunk);
                    }
                    Err(_) => prop_assert!(chunk.len() > before),
                }
                prop_assert!(buffer.len() <= buffer.capacity());
                prop_assert_eq!(buffer.remaining(), buffer.capacity() - buffer.len());
            }

            prop_assert_eq!(buffer.as_bytes(), expected.as_slice());
        }
    }
}
