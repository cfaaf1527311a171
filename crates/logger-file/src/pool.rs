//! Producer/consumer buffer pool
//!
//! Producers append into the current buffer under a short lock. When it
//! fills, it moves to the FIFO full queue and a recycled (or newly
//! allocated) buffer takes its place. The worker takes full buffers,
//! writes them out and hands them back through `recycle`.
//!
//! Every buffer the pool allocated is always in exactly one place:
//! current, the full queue, the empty list, or in flight with the worker.

use crate::buffer::{BufferId, FixedBuffer};
use crate::config::FileLoggerConfig;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::mem;

/// Outcome of `BufferPool::append`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendResult {
    /// The bytes are in the pool; `swapped` is set when the append moved
    /// the previous current buffer to the full queue
    Written {
        /// Whether a buffer swap happened
        swapped: bool,
    },
    /// The bytes were not taken
    Rejected(Rejection),
}

impl AppendResult {
    /// Whether the bytes were accepted
    #[must_use]
    pub const fn is_written(&self) -> bool {
        matches!(self, Self::Written { .. })
    }
}

/// Why an append was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Rejection {
    /// The bytes alone exceed one buffer's capacity
    #[error("record of {len} bytes exceeds buffer capacity of {capacity}")]
    TooLarge {
        /// Length of the rejected bytes
        len: usize,
        /// Capacity of a single buffer
        capacity: usize,
    },
    /// Every allocatable buffer is full or in flight
    #[error("buffer pool exhausted")]
    PoolExhausted,
    /// The pool was closed
    #[error("buffer pool closed")]
    Closed,
}

/// What the consumer side received
#[derive(Debug)]
pub enum Next {
    /// The oldest full buffer; return it with `recycle`
    Full(FixedBuffer),
    /// `signal` was called and no full buffer was waiting
    Signal,
    /// The pool is closed and the full queue is empty
    Closed,
}

/// Point-in-time view of the pool's accounting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Buffers allocated over the pool's lifetime
    pub allocated: usize,
    /// Buffers waiting in the full queue
    pub full: usize,
    /// Buffers available for reuse
    pub empty: usize,
    /// Buffers handed to the consumer and not yet recycled
    pub in_flight: usize,
    /// Bytes in the current buffer
    pub current_len: usize,
    /// Records in the current buffer
    pub current_records: usize,
}

impl PoolStats {
    /// Whether every allocated buffer is accounted for exactly once
    #[must_use]
    pub const fn is_balanced(&self) -> bool {
        self.allocated == 1 + self.full + self.empty + self.in_flight
    }
}

struct PoolState {
    current: FixedBuffer,
    full: VecDeque<FixedBuffer>,
    empty: Vec<FixedBuffer>,
    allocated: usize,
    in_flight: usize,
    signals: usize,
    closed: bool,
}

impl PoolState {
    /// Pop a recycled buffer or allocate a new one within the bound
    fn acquire(&mut self, buffer_size: usize, max_buffers: usize) -> Option<FixedBuffer> {
        if let Some(buffer) = self.empty.pop() {
            return Some(buffer);
        }

        if self.allocated < max_buffers {
            let buffer = FixedBuffer::with_id(BufferId(self.allocated), buffer_size);
            self.allocated += 1;
            return Some(buffer);
        }

        None
    }

    /// Move the current buffer to the full queue, installing `fresh`
    fn retire_current(&mut self, fresh: FixedBuffer) {
        let retired = mem::replace(&mut self.current, fresh);
        self.full.push_back(retired);
    }
}

/// Buffers for one log stream, shared by producers and its worker
pub struct BufferPool {
    state: Mutex<PoolState>,
    ready: Condvar,
    buffer_size: usize,
    max_buffers: usize,
}

impl BufferPool {
    /// Create a pool of `buffer_size`-byte buffers, allocating at most
    /// `max_buffers` of them (never fewer than one)
    #[must_use]
    pub fn new(buffer_size: usize, max_buffers: usize) -> Self {
        Self {
            state: Mutex::new(PoolState {
                current: FixedBuffer::with_id(BufferId(0), buffer_size),
                full: VecDeque::new(),
                empty: Vec::new(),
                allocated: 1,
                in_flight: 0,
                signals: 0,
                closed: false,
            }),
            ready: Condvar::new(),
            buffer_size,
            max_buffers: max_buffers.max(1),
        }
    }

    /// Create a pool sized from the logger configuration
    #[must_use]
    pub fn from_config(config: &FileLoggerConfig) -> Self {
        Self::new(config.buffer_size, config.max_buffers)
    }

    /// Capacity of every buffer in this pool
    #[inline]
    #[must_use]
    pub const fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Append one encoded record.
    ///
    /// Only memory is touched while the lock is held.
    pub fn append(&self, bytes: &[u8]) -> AppendResult {
        if bytes.len() > self.buffer_size {
            return AppendResult::Rejected(Rejection::TooLarge {
                len: bytes.len(),
                capacity: self.buffer_size,
            });
        }

        let mut state = self.state.lock();
        if state.closed {
            return AppendResult::Rejected(Rejection::Closed);
        }

        if state.current.append(bytes).is_ok() {
            return AppendResult::Written { swapped: false };
        }

        let Some(fresh) = state.acquire(self.buffer_size, self.max_buffers) else {
            return AppendResult::Rejected(Rejection::PoolExhausted);
        };
        state.retire_current(fresh);

        // A fresh buffer always has room for anything within buffer_size
        let appended = state.current.append(bytes).is_ok();
        debug_assert!(appended);
        drop(state);

        self.ready.notify_one();
        AppendResult::Written { swapped: true }
    }

    /// Move the current buffer to the full queue even if it is not full,
    /// installing a fresh one.
    ///
    /// Returns `false` only when no replacement buffer can be obtained, in
    /// which case the current buffer stays where it is.
    pub fn request_flush(&self) -> bool {
        let mut state = self.state.lock();
        let Some(fresh) = state.acquire(self.buffer_size, self.max_buffers) else {
            return false;
        };
        state.retire_current(fresh);
        drop(state);

        self.ready.notify_one();
        true
    }

    /// Block until a full buffer is available, a signal arrives, or the
    /// pool is closed and drained.
    ///
    /// Full buffers take priority, in the order they were filled.
    pub fn take_next_full(&self) -> Next {
        let mut state = self.state.lock();
        loop {
            if let Some(buffer) = state.full.pop_front() {
                state.in_flight += 1;
                return Next::Full(buffer);
            }
            if state.signals > 0 {
                state.signals = 0;
                return Next::Signal;
            }
            if state.closed {
                return Next::Closed;
            }
            self.ready.wait(&mut state);
        }
    }

    /// Take the oldest full buffer without waiting
    pub fn try_take_full(&self) -> Option<FixedBuffer> {
        let mut state = self.state.lock();
        let buffer = state.full.pop_front()?;
        state.in_flight += 1;
        Some(buffer)
    }

    /// Return a drained buffer for reuse
    pub fn recycle(&self, mut buffer: FixedBuffer) {
        buffer.reset();

        let mut state = self.state.lock();
        state.in_flight = state.in_flight.saturating_sub(1);
        state.empty.push(buffer);
    }

    /// Wake the consumer so it checks its control messages
    pub fn signal(&self) {
        self.state.lock().signals += 1;
        self.ready.notify_all();
    }

    /// Refuse further appends and wake the consumer
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.ready.notify_all();
    }

    /// Whether `close` has been called
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Snapshot of the pool's accounting
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        let state = self.state.lock();
        PoolStats {
            allocated: state.allocated,
            full: state.full.len(),
            empty: state.empty.len(),
            in_flight: state.in_flight,
            current_len: state.current.len(),
            current_records: state.current.records(),
        }
    }
}
