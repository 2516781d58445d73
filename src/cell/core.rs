//! The single-assignment result cell.
//!
//! [`Completable`] is the foundational state machine: pending, then settled
//! exactly once as finished, failed, or cancelled. Waiters block on a
//! per-cell condvar; listeners are delivered outside the lock in
//! registration order. Two rules shape everything here:
//!
//! - **Cancel wins.** A cancellation that lands before the computation's own
//!   report fixes the outcome as cancelled. The late report still consumes
//!   the single completion slot, but its payload is discarded and handed to
//!   the undo hook for rollback.
//! - **State, then notify.** Flags change under the per-cell lock; waiter
//!   wakeups and listener delivery happen afterwards, outside the lock, so a
//!   listener that checks [`Completable::is_done`] from inside its own
//!   callback always observes `true`.
//!
//! While a computation is in flight (`active`), a cancellation records the
//! outcome and wakes waiters immediately, but leaves listener delivery to
//! whichever of `set_result`/`set_failure` the computation eventually calls.
//! That call also receives the discarded payload for rollback.

use crate::cell::callbacks::{Callback, CallbackId, CallbackSet, deliver_all, deliver_one};
use crate::error::{CellError, FailureCause, SettleError};
use crate::types::{CancelReason, CellId, SettledOutcome};
use core::fmt;
use parking_lot::{Condvar, Mutex};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::Thread;
use std::time::{Duration, Instant};

/// Rollback hook invoked with the discarded payload when cancellation wins.
type UndoHook<T> = Box<dyn FnOnce(Option<T>) + Send>;

/// Best-effort interrupt delivery to a computation thread.
///
/// Firing raises the computation's cancel flag and unparks its thread, so a
/// body blocked in [`std::thread::park`] re-checks the flag promptly. It is
/// a request, never a guarantee.
#[derive(Debug)]
pub(crate) struct Interrupter {
    flag: Arc<AtomicBool>,
    thread: Thread,
}

impl Interrupter {
    pub(crate) const fn new(flag: Arc<AtomicBool>, thread: Thread) -> Self {
        Self { flag, thread }
    }

    pub(crate) fn fire(&self) {
        self.flag.store(true, Ordering::Release);
        self.thread.unpark();
    }
}

/// Everything a cell handle points at.
struct CellShared<T> {
    id: CellId,
    label: String,
    state: Mutex<CellState<T>>,
    done: Condvar,
}

/// Mutable cell state, guarded by the per-cell mutex.
struct CellState<T> {
    /// The single completion slot has been consumed by `set_result` or
    /// `set_failure`. Distinct from `settled`: a cancel-race leaves the
    /// outcome cancelled while still consuming the slot.
    computed: bool,
    /// A computation is currently running (or, for out-of-band completion,
    /// still owes its report).
    active: bool,
    settled: Option<Arc<SettledOutcome<T>>>,
    callbacks: CallbackSet<T>,
    undo: Option<UndoHook<T>>,
    interrupter: Option<Interrupter>,
}

/// Single-assignment, cancellable result cell.
///
/// Handles are cheap to clone and all point at the same cell. A cell settles
/// exactly once; after that every observation — [`wait`](Self::wait),
/// [`try_get`](Self::try_get), listeners — sees the same outcome.
pub struct Completable<T> {
    shared: Arc<CellShared<T>>,
}

impl<T> Clone for Completable<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> Completable<T> {
    /// Creates a pending cell with an auto-generated label.
    #[must_use]
    pub fn new() -> Self {
        let id = CellId::fresh();
        Self::build(id, format!("cell-{}", id.as_u64()))
    }

    /// Creates a pending cell with a caller-supplied diagnostic label.
    #[must_use]
    pub fn with_label(label: impl Into<String>) -> Self {
        Self::build(CellId::fresh(), label.into())
    }

    fn build(id: CellId, label: String) -> Self {
        Self {
            shared: Arc::new(CellShared {
                id,
                label,
                state: Mutex::new(CellState {
                    computed: false,
                    active: false,
                    settled: None,
                    callbacks: CallbackSet::new(),
                    undo: None,
                    interrupter: None,
                }),
                done: Condvar::new(),
            }),
        }
    }

    /// The cell's opaque id.
    #[must_use]
    pub fn id(&self) -> CellId {
        self.shared.id
    }

    /// The cell's diagnostic label.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.shared.label
    }

    /// True once the cell has settled, forever after.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.shared.state.lock().settled.is_some()
    }

    /// True if the settled outcome is a cancellation.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.shared
            .state
            .lock()
            .settled
            .as_ref()
            .is_some_and(|outcome| outcome.is_cancelled())
    }

    /// True if the settled outcome is a failure.
    #[must_use]
    pub fn is_failed(&self) -> bool {
        self.shared
            .state
            .lock()
            .settled
            .as_ref()
            .is_some_and(|outcome| outcome.is_failed())
    }

    /// True if the settled outcome is a finished value.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.shared
            .state
            .lock()
            .settled
            .as_ref()
            .is_some_and(|outcome| outcome.is_finished())
    }

    /// True while a computation is running against this cell.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.shared.state.lock().active
    }

    /// Requests cancellation with a default user reason.
    ///
    /// See [`cancel_with`](Self::cancel_with).
    pub fn cancel(&self, interrupt: bool) -> bool {
        self.cancel_with(CancelReason::default(), interrupt)
    }

    /// Requests cancellation, recording `reason` in the outcome.
    ///
    /// Returns `true` on exactly the first call that transitions the cell;
    /// a cell that already settled (by any path) returns `false`. Waiters
    /// are woken immediately. If a computation is in flight, `interrupt`
    /// fires its best-effort interrupt and listener delivery is left to the
    /// computation's own completion call; otherwise listeners are delivered
    /// before this returns.
    pub fn cancel_with(&self, reason: CancelReason, interrupt: bool) -> bool {
        let kind = reason.kind();
        let (delivery, interrupter) = {
            let mut guard = self.shared.state.lock();
            if guard.settled.is_some() {
                return false;
            }
            let outcome = Arc::new(SettledOutcome::Cancelled(reason));
            guard.settled = Some(Arc::clone(&outcome));
            let interrupter = if interrupt && guard.active {
                guard.interrupter.take()
            } else {
                None
            };
            let delivery = if guard.active {
                None
            } else {
                Some((guard.callbacks.take_for_delivery(), outcome))
            };
            self.shared.done.notify_all();
            (delivery, interrupter)
        };
        if let Some(interrupter) = interrupter {
            interrupter.fire();
        }
        match delivery {
            Some((callbacks, outcome)) => {
                tracing::debug!(cell = %self.shared.id, label = %self.shared.label, %kind, "cancelled");
                deliver_all(callbacks, &outcome);
            }
            None => {
                tracing::debug!(
                    cell = %self.shared.id,
                    %kind,
                    "cancel recorded; delivery deferred to the in-flight computation"
                );
            }
        }
        true
    }

    /// Records a successful result.
    ///
    /// Consumes the single completion slot; a second completion call is an
    /// invalid-state fault. If a cancellation already landed, the value is
    /// discarded: the undo hook receives it for rollback, the deferred
    /// cancellation listeners run, and the call still returns `Ok` because
    /// the slot was consumed.
    pub fn set_result(&self, value: T) -> Result<(), SettleError> {
        self.complete(Ok(value))
    }

    /// Records a failure.
    ///
    /// Same slot discipline as [`set_result`](Self::set_result). Under a
    /// cancel race the cause is discarded (logged) and the undo hook runs
    /// with no payload.
    pub fn set_failure(&self, cause: FailureCause) -> Result<(), SettleError> {
        self.complete(Err(cause))
    }

    fn complete(&self, report: Result<T, FailureCause>) -> Result<(), SettleError> {
        let (callbacks, undo, outcome, discarded) = {
            let mut guard = self.shared.state.lock();
            if guard.computed {
                return Err(SettleError::AlreadyComputed {
                    cell: self.shared.id,
                });
            }
            guard.computed = true;
            guard.active = false;
            guard.interrupter = None;
            let callbacks = guard.callbacks.take_for_delivery();
            let undo = guard.undo.take();
            if let Some(existing) = guard.settled.clone() {
                // Cancel won the race; waiters were already woken back then.
                (callbacks, undo, existing, Some(report))
            } else {
                let outcome = Arc::new(match report {
                    Ok(value) => SettledOutcome::Finished(value),
                    Err(cause) => SettledOutcome::Failed(cause),
                });
                guard.settled = Some(Arc::clone(&outcome));
                self.shared.done.notify_all();
                (callbacks, undo, outcome, None)
            }
        };

        if let Some(report) = discarded {
            let payload = match report {
                Ok(value) => {
                    tracing::debug!(
                        cell = %self.shared.id,
                        label = %self.shared.label,
                        "result discarded: cancellation won the race"
                    );
                    Some(value)
                }
                Err(cause) => {
                    tracing::debug!(
                        cell = %self.shared.id,
                        %cause,
                        "failure discarded: cancellation won the race"
                    );
                    None
                }
            };
            if let Some(undo) = undo {
                if let Err(panic) = catch_unwind(AssertUnwindSafe(|| undo(payload))) {
                    let cause = FailureCause::from_panic(panic);
                    tracing::error!(cell = %self.shared.id, %cause, "undo hook panicked");
                }
            }
        }
        deliver_all(callbacks, &outcome);
        Ok(())
    }

    /// Blocks until the cell settles and maps the outcome.
    ///
    /// Finished yields the value; failed and cancelled yield the matching
    /// [`CellError`]. Repeated calls observe the identical outcome.
    pub fn wait(&self) -> Result<T, CellError>
    where
        T: Clone,
    {
        let outcome = {
            let mut guard = self.shared.state.lock();
            loop {
                if let Some(outcome) = guard.settled.as_ref() {
                    break Arc::clone(outcome);
                }
                self.shared.done.wait(&mut guard);
            }
        };
        outcome.to_result()
    }

    /// Blocks up to `timeout` for the cell to settle.
    ///
    /// Expiry yields [`CellError::WaitTimeout`]; the cell itself is
    /// unaffected and a later wait can still succeed.
    pub fn wait_timeout(&self, timeout: Duration) -> Result<T, CellError>
    where
        T: Clone,
    {
        let Some(deadline) = Instant::now().checked_add(timeout) else {
            // Unrepresentable deadline: treat as unbounded.
            return self.wait();
        };
        let outcome = {
            let mut guard = self.shared.state.lock();
            loop {
                if let Some(outcome) = guard.settled.as_ref() {
                    break Arc::clone(outcome);
                }
                if self.shared.done.wait_until(&mut guard, deadline).timed_out() {
                    // One last look: the settle path may have landed while
                    // this thread was timing out.
                    match guard.settled.as_ref() {
                        Some(outcome) => break Arc::clone(outcome),
                        None => return Err(CellError::WaitTimeout),
                    }
                }
            }
        };
        outcome.to_result()
    }

    /// Non-blocking peek: `None` while pending, the mapped outcome once
    /// settled.
    #[must_use]
    pub fn try_get(&self) -> Option<Result<T, CellError>>
    where
        T: Clone,
    {
        let outcome = self.shared.state.lock().settled.clone()?;
        Some(outcome.to_result())
    }

    /// The settled outcome itself, shared, without cloning the payload.
    #[must_use]
    pub fn settled(&self) -> Option<Arc<SettledOutcome<T>>> {
        self.shared.state.lock().settled.clone()
    }

    /// Registers a completion listener.
    ///
    /// Pending cell: the listener is queued and fires exactly once when the
    /// cell settles, in registration order relative to other queued
    /// listeners. Settled cell: the listener runs on the calling thread
    /// before this returns. Either way the returned id is unique to this
    /// cell.
    pub fn add_callback<F>(&self, listener: F) -> CallbackId
    where
        F: FnOnce(&SettledOutcome<T>) + Send + 'static,
    {
        let listener: Callback<T> = Box::new(listener);
        let (id, immediate) = {
            let mut guard = self.shared.state.lock();
            match guard.settled.clone() {
                Some(outcome) => (guard.callbacks.allocate_id(), Some((listener, outcome))),
                None => (guard.callbacks.register(listener), None),
            }
        };
        if let Some((listener, outcome)) = immediate {
            deliver_one(id, listener, &outcome);
        }
        id
    }

    /// Best-effort removal of a queued listener.
    ///
    /// Returns `false` if the listener already ran, was already removed, or
    /// delivery has started.
    pub fn remove_callback(&self, id: CallbackId) -> bool {
        self.shared.state.lock().callbacks.remove(id)
    }

    /// Installs the rollback hook for a discarded computation payload.
    ///
    /// Runs at most once, only when a completion call loses the cancel race:
    /// with `Some(value)` for a discarded result, `None` for a discarded
    /// failure. Installing a second hook replaces the first; installing one
    /// on a settled cell is a logged no-op.
    pub fn set_undo<F>(&self, hook: F)
    where
        F: FnOnce(Option<T>) + Send + 'static,
    {
        let mut guard = self.shared.state.lock();
        if guard.settled.is_some() || guard.computed {
            drop(guard);
            tracing::debug!(cell = %self.shared.id, "undo hook ignored: cell already settled");
            return;
        }
        let replaced = guard.undo.replace(Box::new(hook)).is_some();
        drop(guard);
        if replaced {
            tracing::debug!(cell = %self.shared.id, "undo hook replaced");
        }
    }

    /// Claims the cell for a computation run.
    ///
    /// Fails (returns `false`) if the cell has settled, consumed its
    /// completion slot, or already has a running computation. On success the
    /// cell is `active` and holds the interrupter for cancel delivery.
    pub(crate) fn begin_computation(&self, interrupter: Option<Interrupter>) -> bool {
        let mut guard = self.shared.state.lock();
        if guard.settled.is_some() || guard.computed || guard.active {
            return false;
        }
        guard.active = true;
        guard.interrupter = interrupter;
        true
    }

    /// Drops the interrupter while keeping the cell active.
    ///
    /// Used when a computation body returns but completion is owed out of
    /// band: the body's thread is gone, so there is nothing left to
    /// interrupt.
    pub(crate) fn clear_interrupter(&self) {
        self.shared.state.lock().interrupter = None;
    }
}

impl<T> Default for Completable<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Completable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("Completable");
        s.field("id", &self.shared.id)
            .field("label", &self.shared.label);
        // try_lock so a Debug print from inside a guarded section stays safe
        match self.shared.state.try_lock() {
            Some(guard) => s
                .field("computed", &guard.computed)
                .field("active", &guard.active)
                .field("settled", &guard.settled.as_ref().map(|o| o.kind()))
                .field("pending_callbacks", &guard.callbacks.len())
                .finish(),
            None => s.finish_non_exhaustive(),
        }
    }
}
