//! Ordering primitives for window reads.
//!
//! [`StampSequencer`] hands out strictly increasing stamps and only lets a
//! result commit if nothing newer has committed. [`LatestSlot`] is a depth-1
//! mailbox: writers overwrite, a single consumer drains the newest value.
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;

#[derive(Debug, Default)]
pub struct StampSequencer {
    issued: AtomicU64,
    committed: Mutex<u64>,
}

impl StampSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next stamp; the first issued stamp is 1.
    pub fn issue(&self) -> u64 {
        self.issued.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn latest_issued(&self) -> u64 {
        self.issued.load(Ordering::SeqCst)
    }

    pub fn last_committed(&self) -> u64 {
        *lock(&self.committed)
    }

    /// Run `apply` if `stamp` is newer than every committed stamp.
    ///
    /// `apply` runs under the commit lock, so two accepted commits can never
    /// land in the sink out of stamp order.
    pub fn commit_with<F: FnOnce()>(&self, stamp: u64, apply: F) -> bool {
        let mut committed = lock(&self.committed);
        if stamp <= *committed {
            return false;
        }
        *committed = stamp;
        apply();
        true
    }
}

#[derive(Debug)]
struct SlotState<T> {
    value: Option<T>,
    closed: bool,
}

/// Depth-1 latest-wins mailbox.
#[derive(Debug)]
pub struct LatestSlot<T> {
    state: Mutex<SlotState<T>>,
    notify: Notify,
}

impl<T> Default for LatestSlot<T> {
    fn default() -> Self {
        Self { state: Mutex::new(SlotState { value: None, closed: false }), notify: Notify::new() }
    }
}

impl<T> LatestSlot<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace whatever is pending. Returns true if a value was overwritten.
    pub fn replace(&self, value: T) -> bool {
        self.merge(|_| value)
    }

    /// Fold `update` into the pending value, if any.
    pub fn merge<F: FnOnce(Option<T>) -> T>(&self, update: F) -> bool {
        let replaced = {
            let mut state = lock(&self.state);
            if state.closed {
                return false;
            }
            let previous = state.value.take();
            let replaced = previous.is_some();
            state.value = Some(update(previous));
            replaced
        };
        self.notify.notify_one();
        replaced
    }

    pub fn take(&self) -> Option<T> {
        lock(&self.state).value.take()
    }

    pub fn is_pending(&self) -> bool {
        lock(&self.state).value.is_some()
    }

    /// Wake the consumer for good; later writes are dropped.
    pub fn close(&self) {
        lock(&self.state).closed = true;
        self.notify.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.state).closed
    }

    /// Wait until a value is pending (true) or the slot is closed (false).
    pub async fn ready(&self) -> bool {
        loop {
            let notified = self.notify.notified();
            {
                let state = lock(&self.state);
                if state.closed {
                    return false;
                }
                if state.value.is_some() {
                    return true;
                }
            }
            notified.await;
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
