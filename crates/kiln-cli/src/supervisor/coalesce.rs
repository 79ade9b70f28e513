//! Single-slot, latest-wins hand-off between a producer and one consumer.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;

/// Holds at most one pending value. Offering while a value is pending
/// replaces it, so a burst of triggers collapses into one follow-up action
/// no matter how long the consumer is busy.
pub struct CoalescingSlot<T> {
    pending: Mutex<Option<T>>,
    notify: Notify,
    closed: AtomicBool,
}

impl<T> CoalescingSlot<T> {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(None),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Store `value`, replacing any pending one. Returns `true` when a
    /// pending value was replaced.
    pub fn offer(&self, value: T) -> bool {
        let replaced = self.pending.lock().replace(value).is_some();
        self.notify.notify_one();
        replaced
    }

    /// Take the pending value without waiting.
    pub fn take(&self) -> Option<T> {
        self.pending.lock().take()
    }

    pub fn is_pending(&self) -> bool {
        self.pending.lock().is_some()
    }

    /// Wait for the next value. Returns `None` once the slot is closed and
    /// drained.
    pub async fn next(&self) -> Option<T> {
        loop {
            let notified = self.notify.notified();
            if let Some(value) = self.take() {
                return Some(value);
            }
            if self.closed.load(Ordering::SeqCst) {
                return None;
            }
            notified.await;
        }
    }

    /// Wake the consumer and make `next` return `None` once drained.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.notify.notify_one();
    }
}

impl<T> Default for CoalescingSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}
