//! Keyed listener registry with synchronous delivery.
//!
//! A [`Notifier`] fans a payload out to every listener subscribed under a
//! matching key, on the triggering thread, in subscription order. Listener
//! panics are contained and logged; they never reach the trigger caller and
//! never block later listeners.
//!
//! Delivery works on a snapshot: a listener that subscribes or unsubscribes
//! from inside its own callback changes future triggers, not the one in
//! flight.

use crate::error::FailureCause;
use core::fmt;
use parking_lot::Mutex;
use smallvec::SmallVec;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

/// Handle for a registered listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub{}", self.0)
    }
}

struct Subscription<K, P> {
    id: SubscriptionId,
    kind: K,
    listener: Arc<dyn Fn(&P) + Send + Sync>,
}

struct NotifierInner<K, P> {
    entries: SmallVec<[Subscription<K, P>; 4]>,
    next: u64,
}

/// Listener registry keyed by an event kind `K`, delivering payloads `&P`.
pub struct Notifier<K, P> {
    inner: Mutex<NotifierInner<K, P>>,
}

impl<K, P> Notifier<K, P> {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(NotifierInner {
                entries: SmallVec::new(),
                next: 0,
            }),
        }
    }

    /// Registers `listener` under `kind`.
    pub fn subscribe<F>(&self, kind: K, listener: F) -> SubscriptionId
    where
        F: Fn(&P) + Send + Sync + 'static,
    {
        let mut inner = self.inner.lock();
        let id = SubscriptionId(inner.next);
        inner.next += 1;
        inner.entries.push(Subscription {
            id,
            kind,
            listener: Arc::new(listener),
        });
        id
    }

    /// Removes one listener. Returns `false` for unknown or stale ids.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut inner = self.inner.lock();
        match inner.entries.iter().position(|entry| entry.id == id) {
            Some(index) => {
                inner.entries.remove(index);
                true
            }
            None => false,
        }
    }

    /// Detaches every listener.
    pub fn clear(&self) {
        let drained = {
            let mut inner = self.inner.lock();
            std::mem::take(&mut inner.entries)
        };
        // Listener drop can run arbitrary code; do it outside the lock.
        drop(drained);
    }

    /// Number of currently subscribed listeners, all kinds.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Delivers `payload` to every listener under `kind`, synchronously.
    pub fn trigger(&self, kind: &K, payload: &P)
    where
        K: PartialEq,
    {
        let matching: SmallVec<[(SubscriptionId, Arc<dyn Fn(&P) + Send + Sync>); 4]> = {
            let inner = self.inner.lock();
            inner
                .entries
                .iter()
                .filter(|entry| entry.kind == *kind)
                .map(|entry| (entry.id, Arc::clone(&entry.listener)))
                .collect()
        };
        for (id, listener) in matching {
            if let Err(payload_panic) = catch_unwind(AssertUnwindSafe(|| listener(payload))) {
                let cause = FailureCause::from_panic(payload_panic);
                tracing::error!(subscription = %id, %cause, "notification listener panicked");
            }
        }
    }
}

impl<K, P> Default for Notifier<K, P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, P> fmt::Debug for Notifier<K, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Notifier")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}
