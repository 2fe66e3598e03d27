//! Bounded drop-oldest ring buffer

use crate::RingBufferError;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard};

/// Default buffer capacity (frame batches waiting for analysis)
pub const DEFAULT_CAPACITY: usize = 5;

struct Inner<T> {
    items: VecDeque<T>,
    closed: bool,
}

/// Multi-producer ring buffer that evicts the oldest entry when full.
///
/// Producers never block; a consumer blocks in [`RingBuffer::pop`] until an
/// entry arrives or the buffer is closed.
pub struct RingBuffer<T> {
    inner: Mutex<Inner<T>>,
    available: Condvar,
    /// Capacity of the buffer
    capacity: usize,
    /// Entries evicted before a consumer saw them
    total_dropped: AtomicUsize,
}

impl<T> RingBuffer<T> {
    /// Create a new ring buffer with given capacity (at least 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(Inner {
                items: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            available: Condvar::new(),
            capacity,
            total_dropped: AtomicUsize::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner<T>> {
        // Entries are plain values; a panicking holder cannot leave them half-written
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Push an entry, evicting and returning the oldest one if the buffer is full
    pub fn push(&self, item: T) -> Result<Option<T>, RingBufferError> {
        let mut inner = self.lock();
        if inner.closed {
            return Err(RingBufferError::Closed);
        }

        let evicted = if inner.items.len() >= self.capacity {
            self.total_dropped.fetch_add(1, Ordering::Relaxed);
            inner.items.pop_front()
        } else {
            None
        };

        inner.items.push_back(item);
        drop(inner);

        self.available.notify_one();
        Ok(evicted)
    }

    /// Block until an entry is available; `None` once closed and drained
    pub fn pop(&self) -> Option<T> {
        let mut inner = self.lock();
        loop {
            if let Some(item) = inner.items.pop_front() {
                return Some(item);
            }
            if inner.closed {
                return None;
            }
            inner = self
                .available
                .wait(inner)
                .unwrap_or_else(|e| e.into_inner());
        }
    }

    /// Reject further pushes and wake blocked consumers
    pub fn close(&self) {
        self.lock().closed = true;
        self.available.notify_all();
    }

    /// Get the number of entries currently in the buffer
    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    /// Check if buffer is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get total entries evicted unread
    pub fn total_dropped(&self) -> usize {
        self.total_dropped.load(Ordering::Relaxed)
    }
}
