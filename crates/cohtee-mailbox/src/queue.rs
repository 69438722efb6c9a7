// Author: Lukas Bower
// Purpose: Provide the bounded FIFO used for each cross-world direction.

//! Capacity-bounded FIFO with a non-blocking producer side.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

use crate::{MailboxError, ShutdownToken, WAKE_INTERVAL};

/// Bounded FIFO queue. Pushing never blocks; popping blocks with a
/// bounded wait and observes the shutdown token at every wake.
pub struct BoundedQueue<T> {
    inner: Mutex<VecDeque<T>>,
    ready: Condvar,
    capacity: usize,
}

impl<T> BoundedQueue<T> {
    /// Create a queue holding at most `capacity` items.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(VecDeque::with_capacity(capacity)),
            ready: Condvar::new(),
            capacity,
        }
    }

    /// Append an item, failing with [`MailboxError::Full`] at capacity.
    pub fn try_push(&self, item: T) -> Result<(), MailboxError> {
        let mut queue = self.inner.lock().expect("queue lock poisoned");
        if queue.len() >= self.capacity {
            return Err(MailboxError::Full);
        }
        queue.push_back(item);
        drop(queue);
        self.ready.notify_one();
        Ok(())
    }

    /// Remove the oldest item without blocking.
    pub fn try_pop(&self) -> Option<T> {
        self.inner.lock().expect("queue lock poisoned").pop_front()
    }

    /// Apply `f` to the oldest item without removing it.
    pub fn peek<R>(&self, f: impl FnOnce(&T) -> R) -> Option<R> {
        self.inner
            .lock()
            .expect("queue lock poisoned")
            .front()
            .map(f)
    }

    /// Number of queued items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().expect("queue lock poisoned").len()
    }

    /// Whether the queue holds no items.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Block until an item is available or shutdown is signalled.
    pub fn pop(&self, shutdown: &ShutdownToken) -> Result<T, MailboxError> {
        let mut queue = self.inner.lock().expect("queue lock poisoned");
        loop {
            if let Some(item) = queue.pop_front() {
                return Ok(item);
            }
            if shutdown.is_triggered() {
                return Err(MailboxError::Shutdown);
            }
            let (guard, _) = self
                .ready
                .wait_timeout(queue, WAKE_INTERVAL)
                .expect("queue lock poisoned");
            queue = guard;
        }
    }
}
