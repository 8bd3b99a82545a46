//! Lock-guarded message queue bridging application threads and the pumps.
//!
//! Two instances exist per client: the outbox (application → writer) and the
//! mailbox (reader → application). Both are multi-producer safe but each has a
//! single consumer by convention.
//!
//! Items live in a [`LinkedList`] so that a whole batch can be spliced in or
//! taken out in constant time while the lock is held. The lock only ever
//! covers the structural mutation, never socket I/O.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use mailbus::sync::queue::{MessageQueue, Timeout};
//!
//! let queue = MessageQueue::<u32>::new();
//! queue.push(7);
//! assert!(queue.wait_for_push(Timeout::Duration(Duration::from_millis(1))));
//! assert_eq!(queue.drain_all().into_iter().collect::<Vec<_>>(), vec![7]);
//! ```

use std::collections::LinkedList;
use std::time::Duration;

use minstant::Instant;
use parking_lot::{Condvar, Mutex};

/// Timeout specification for blocking operations.
#[derive(Debug, Clone, Copy)]
pub enum Timeout {
    /// Wait indefinitely.
    Infinite,
    /// Wait for at most the specified duration.
    Duration(Duration),
}

impl From<Duration> for Timeout {
    fn from(d: Duration) -> Self {
        Self::Duration(d)
    }
}

struct Inner<T, S> {
    items: LinkedList<T>,
    side: S,
    /// Bumped on every push; waiters compare against it to detect a push.
    pushes: u64,
    /// Bumped by [`MessageQueue::wake_all`].
    wakeups: u64,
}

/// Insertion-ordered, thread-safe queue with O(1) batch hand-off.
///
/// `S` is side state guarded by the same lock as the items. The mailbox uses
/// it to keep the skew estimate under the lock that orders inbound packets.
pub struct MessageQueue<T, S = ()> {
    inner: Mutex<Inner<T, S>>,
    pushed: Condvar,
}

impl<T> MessageQueue<T> {
    /// Creates an empty queue with no side state.
    #[must_use]
    pub fn new() -> Self {
        Self::with_side(())
    }
}

impl<T> Default for MessageQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, S> MessageQueue<T, S> {
    /// Creates an empty queue carrying `side` under its lock.
    #[must_use]
    pub fn with_side(side: S) -> Self {
        Self {
            inner: Mutex::new(Inner {
                items: LinkedList::new(),
                side,
                pushes: 0,
                wakeups: 0,
            }),
            pushed: Condvar::new(),
        }
    }

    /// Appends one item and wakes any waiter.
    pub fn push(&self, item: T) {
        let mut inner = self.inner.lock();
        inner.items.push_back(item);
        inner.pushes = inner.pushes.wrapping_add(1);
        drop(inner);
        self.pushed.notify_all();
    }

    /// Splices a whole batch onto the back in constant time.
    ///
    /// An empty batch is not a push and wakes nobody.
    pub fn push_batch(&self, mut batch: LinkedList<T>) {
        if batch.is_empty() {
            return;
        }
        let mut inner = self.inner.lock();
        inner.items.append(&mut batch);
        inner.pushes = inner.pushes.wrapping_add(1);
        drop(inner);
        self.pushed.notify_all();
    }

    /// Removes and returns the entire contents, leaving the queue empty.
    #[must_use]
    pub fn drain_all(&self) -> LinkedList<T> {
        std::mem::take(&mut self.inner.lock().items)
    }

    /// Number of queued items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().items.len()
    }

    /// Whether the queue is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().items.is_empty()
    }

    /// Blocks until an item is pushed or the timeout elapses.
    ///
    /// Returns `true` straight away if the queue already holds items, and
    /// `false` on timeout or when released by [`wake_all`](Self::wake_all)
    /// with the queue still empty.
    pub fn wait_for_push(&self, timeout: Timeout) -> bool {
        let deadline = match timeout {
            Timeout::Infinite => None,
            Timeout::Duration(d) => Some(Instant::now() + d),
        };

        let mut inner = self.inner.lock();
        if !inner.items.is_empty() {
            return true;
        }
        let pushes = inner.pushes;
        let wakeups = inner.wakeups;

        while inner.pushes == pushes && inner.wakeups == wakeups {
            match deadline {
                None => self.pushed.wait(&mut inner),
                Some(dl) => {
                    let Some(remaining) = dl.checked_duration_since(Instant::now()) else {
                        break;
                    };
                    if self.pushed.wait_for(&mut inner, remaining).timed_out() {
                        break;
                    }
                }
            }
        }

        !inner.items.is_empty()
    }

    /// Releases every thread blocked in [`wait_for_push`](Self::wait_for_push).
    pub fn wake_all(&self) {
        let mut inner = self.inner.lock();
        inner.wakeups = inner.wakeups.wrapping_add(1);
        drop(inner);
        self.pushed.notify_all();
    }

    /// Runs `f` with the lock held, giving access to the items and side state.
    ///
    /// Waiters are woken if `f` leaves the queue non-empty.
    pub fn with_locked<R>(&self, f: impl FnOnce(&mut LinkedList<T>, &mut S) -> R) -> R {
        let mut inner = self.inner.lock();
        let Inner { items, side, .. } = &mut *inner;
        let result = f(items, side);
        let filled = !inner.items.is_empty();
        if filled {
            inner.pushes = inner.pushes.wrapping_add(1);
        }
        drop(inner);
        if filled {
            self.pushed.notify_all();
        }
        result
    }

    /// Reads the side state under the lock.
    pub fn side<R>(&self, f: impl FnOnce(&S) -> R) -> R {
        f(&self.inner.lock().side)
    }
}
