//! Ordered registry of completion listeners.
//!
//! Listeners fire at most once each, in registration order. The registry is
//! drained exactly once, by whichever settle path wins, and the drained
//! snapshot is delivered outside the cell lock. Removal is best-effort and
//! only possible before the drain.

use crate::error::FailureCause;
use crate::types::SettledOutcome;
use core::fmt;
use smallvec::SmallVec;
use std::panic::{AssertUnwindSafe, catch_unwind};

/// A boxed completion listener.
pub(crate) type Callback<T> = Box<dyn FnOnce(&SettledOutcome<T>) + Send>;

/// The snapshot taken out of a [`CallbackSet`] for delivery.
pub(crate) type DrainedCallbacks<T> = SmallVec<[(CallbackId, Callback<T>); 4]>;

/// Handle for a registered completion listener.
///
/// Ids are allocated per cell, in registration order. A listener that was
/// registered on an already-settled cell still receives an id, even though
/// it runs before registration returns and can no longer be removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallbackId(u64);

impl fmt::Display for CallbackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cb{}", self.0)
    }
}

/// The per-cell listener registry.
///
/// Lives inside the cell's state mutex; all mutation happens under that lock.
pub(crate) struct CallbackSet<T> {
    entries: DrainedCallbacks<T>,
    next: u64,
    delivery_started: bool,
}

impl<T> CallbackSet<T> {
    pub(crate) fn new() -> Self {
        Self {
            entries: SmallVec::new(),
            next: 0,
            delivery_started: false,
        }
    }

    /// Hands out the next listener id without storing anything.
    ///
    /// Used for the late-registration path where the listener runs
    /// immediately instead of being queued.
    pub(crate) fn allocate_id(&mut self) -> CallbackId {
        let id = CallbackId(self.next);
        self.next += 1;
        id
    }

    /// Appends a listener, preserving registration order.
    pub(crate) fn register(&mut self, callback: Callback<T>) -> CallbackId {
        let id = self.allocate_id();
        self.entries.push((id, callback));
        id
    }

    /// Removes a pending listener. Fails once delivery has started.
    pub(crate) fn remove(&mut self, id: CallbackId) -> bool {
        if self.delivery_started {
            return false;
        }
        match self.entries.iter().position(|(entry, _)| *entry == id) {
            Some(index) => {
                // Order matters for the remaining listeners, so no swap_remove.
                drop(self.entries.remove(index));
                true
            }
            None => false,
        }
    }

    /// Drains every pending listener and marks the set as delivered.
    pub(crate) fn take_for_delivery(&mut self) -> DrainedCallbacks<T> {
        self.delivery_started = true;
        std::mem::take(&mut self.entries)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<T> Default for CallbackSet<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs one listener, containing any panic it raises.
///
/// A listener's own panic is logged and never reaches the state-transition
/// caller, and it does not stop delivery to the listeners behind it.
pub(crate) fn deliver_one<T>(id: CallbackId, callback: Callback<T>, outcome: &SettledOutcome<T>) {
    if let Err(payload) = catch_unwind(AssertUnwindSafe(|| callback(outcome))) {
        let cause = FailureCause::from_panic(payload);
        tracing::error!(callback = %id, %cause, "completion listener panicked");
    }
}

/// Delivers a drained snapshot in registration order.
pub(crate) fn deliver_all<T>(callbacks: DrainedCallbacks<T>, outcome: &SettledOutcome<T>) {
    for (id, callback) in callbacks {
        deliver_one(id, callback, outcome);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn outcome() -> SettledOutcome<u32> {
        SettledOutcome::Finished(7)
    }

    // ---- id allocation ----

    #[test]
    fn ids_are_allocated_in_order() {
        let mut set: CallbackSet<u32> = CallbackSet::new();
        let a = set.allocate_id();
        let b = set.register(Box::new(|_| {}));
        let c = set.allocate_id();
        assert!(a < b && b < c);
        // allocate_id does not store anything
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn id_display_is_compact() {
        let mut set: CallbackSet<u32> = CallbackSet::new();
        let id = set.allocate_id();
        assert_eq!(format!("{id}"), "cb0");
    }

    // ---- removal ----

    #[test]
    fn remove_keeps_the_remaining_order() {
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let mut set: CallbackSet<u32> = CallbackSet::new();
        let mut ids = Vec::new();
        for tag in ["first", "middle", "last"] {
            let order = Arc::clone(&order);
            ids.push(set.register(Box::new(move |_| order.lock().unwrap().push(tag))));
        }
        assert!(set.remove(ids[1]));
        assert!(!set.remove(ids[1]), "second removal should find nothing");

        deliver_all(set.take_for_delivery(), &outcome());
        assert_eq!(*order.lock().unwrap(), vec!["first", "last"]);
    }

    #[test]
    fn remove_fails_after_delivery_started() {
        let mut set: CallbackSet<u32> = CallbackSet::new();
        let id = set.register(Box::new(|_| {}));
        let drained = set.take_for_delivery();
        assert_eq!(drained.len(), 1);
        assert!(!set.remove(id));
        assert!(set.is_empty());
    }

    // ---- delivery ----

    #[test]
    fn delivery_continues_past_a_panicking_listener() {
        let reached = Arc::new(AtomicUsize::new(0));
        let mut set: CallbackSet<u32> = CallbackSet::new();
        set.register(Box::new(|_| panic!("listener exploded")));
        {
            let reached = Arc::clone(&reached);
            set.register(Box::new(move |_| {
                reached.fetch_add(1, Ordering::SeqCst);
            }));
        }
        deliver_all(set.take_for_delivery(), &outcome());
        assert_eq!(reached.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn drain_is_a_one_shot() {
        let mut set: CallbackSet<u32> = CallbackSet::new();
        set.register(Box::new(|_| {}));
        assert_eq!(set.take_for_delivery().len(), 1);
        assert!(set.take_for_delivery().is_empty());
    }
}
