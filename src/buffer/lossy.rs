//! Bounded queue that favors recent writes over complete delivery.
//!
//! Producers never wait for the consumer: when the queue is full the oldest
//! buffered item is evicted to make room. Eviction and admission happen in the
//! same critical section, so neither other producers nor the reader can see
//! the queue over capacity.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

struct State<T> {
    items: VecDeque<T>,
    closed: bool,
    evicted: u64,
}

/// Fixed-capacity multi-producer, single-consumer lossy queue
pub struct LossyQueue<T> {
    state: Mutex<State<T>>,
    available: Condvar,
    capacity: usize,
}

impl<T> LossyQueue<T> {
    /// Create a queue holding at most `capacity` items (minimum 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            state: Mutex::new(State {
                items: VecDeque::with_capacity(capacity),
                closed: false,
                evicted: 0,
            }),
            available: Condvar::new(),
            capacity,
        }
    }

    fn lock(&self) -> MutexGuard<'_, State<T>> {
        // Every critical section leaves the deque consistent, so a panic
        // elsewhere does not invalidate the state.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Admit `value`, evicting the oldest buffered item if the queue is full.
    ///
    /// Values written after [`close`](Self::close) are dropped.
    pub fn write(&self, value: T) {
        let mut state = self.lock();
        if state.closed {
            return;
        }
        if state.items.len() >= self.capacity {
            state.items.pop_front();
            state.evicted += 1;
        }
        state.items.push_back(value);
        drop(state);
        self.available.notify_one();
    }

    /// Block until an item is available.
    ///
    /// Returns `None` once the queue is closed and every retained item has been
    /// read.
    pub fn read(&self) -> Option<T> {
        let mut state = self.lock();
        loop {
            if let Some(value) = state.items.pop_front() {
                return Some(value);
            }
            if state.closed {
                return None;
            }
            state = self
                .available
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Stop accepting writes and wake the reader so it can drain and finish
    pub fn close(&self) {
        self.lock().closed = true;
        self.available.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Number of items currently buffered
    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of items discarded to admit newer writes
    pub fn evicted(&self) -> u64 {
        self.lock().evicted
    }
}
