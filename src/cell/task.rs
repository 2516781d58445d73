//! Computation wrapper that feeds its outcome into a cell.
//!
//! [`Task`] claims its cell, runs a user body exactly once, and reports the
//! body's result, error, or panic through the cell's completion slot. While
//! the body runs, a `cancel(true)` on the cell raises the body's cancel flag
//! and unparks its thread. Cancellation stays cooperative: the body decides
//! when to notice the flag, and whatever it eventually reports is subject to
//! the cell's cancel-wins rule.
//!
//! A [deferred](Task::deferred) body does not finish the cell by returning.
//! It receives a [`Completer`] and hands it to whoever will produce the
//! outcome later, out of band. Dropping the completer without reporting
//! fails the cell rather than leaving waiters stuck.

use crate::cell::core::{Completable, Interrupter};
use crate::error::FailureCause;
use parking_lot::Mutex;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

/// Cooperative cancellation context handed to a task body.
///
/// The body polls [`is_cancel_requested`](Self::is_cancel_requested) at its
/// own checkpoints. A blocked body should park with
/// [`std::thread::park_timeout`] and re-check on wakeup; the interrupt path
/// unparks the thread when the flag is raised.
#[derive(Debug)]
pub struct TaskContext {
    cancel_flag: Arc<AtomicBool>,
}

impl TaskContext {
    /// True once someone requested cancellation with interrupt delivery.
    #[must_use]
    pub fn is_cancel_requested(&self) -> bool {
        self.cancel_flag.load(Ordering::Acquire)
    }
}

/// Direct body: returning settles the cell.
type DirectBody<T> = Box<dyn FnOnce(&TaskContext) -> Result<T, FailureCause> + Send>;

/// Deferred body: returning leaves the cell to the [`Completer`].
type DeferredBody<T> = Box<dyn FnOnce(&TaskContext, Completer<T>) -> Result<(), FailureCause> + Send>;

enum TaskBody<T> {
    Direct(DirectBody<T>),
    Deferred(DeferredBody<T>),
}

/// A computation bound to a [`Completable`].
///
/// [`run`](Self::run) is idempotent against re-entry and refuses to start on
/// a cell that was already cancelled, claimed, or completed; in all of those
/// cases it is a logged no-op.
pub struct Task<T> {
    cell: Completable<T>,
    body: Mutex<Option<TaskBody<T>>>,
}

impl<T> Task<T> {
    /// Wraps a body whose return value settles the cell.
    pub fn new<F>(body: F) -> Self
    where
        F: FnOnce(&TaskContext) -> Result<T, FailureCause> + Send + 'static,
    {
        Self {
            cell: Completable::new(),
            body: Mutex::new(Some(TaskBody::Direct(Box::new(body)))),
        }
    }

    /// Like [`new`](Self::new), with a diagnostic label for the cell.
    pub fn with_label<F>(label: impl Into<String>, body: F) -> Self
    where
        F: FnOnce(&TaskContext) -> Result<T, FailureCause> + Send + 'static,
    {
        Self {
            cell: Completable::with_label(label),
            body: Mutex::new(Some(TaskBody::Direct(Box::new(body)))),
        }
    }

    /// Wraps a body that completes the cell out of band.
    ///
    /// The body receives a [`Completer`] and typically moves it somewhere
    /// else — another thread, a registry of pending replies. Returning `Ok`
    /// keeps the cell open; returning `Err` or panicking fails the cell
    /// immediately, completer or not.
    pub fn deferred<F>(body: F) -> Self
    where
        F: FnOnce(&TaskContext, Completer<T>) -> Result<(), FailureCause> + Send + 'static,
    {
        Self {
            cell: Completable::new(),
            body: Mutex::new(Some(TaskBody::Deferred(Box::new(body)))),
        }
    }

    /// Like [`deferred`](Self::deferred), with a diagnostic label.
    pub fn deferred_with_label<F>(label: impl Into<String>, body: F) -> Self
    where
        F: FnOnce(&TaskContext, Completer<T>) -> Result<(), FailureCause> + Send + 'static,
    {
        Self {
            cell: Completable::with_label(label),
            body: Mutex::new(Some(TaskBody::Deferred(Box::new(body)))),
        }
    }

    /// The underlying cell.
    #[must_use]
    pub fn cell(&self) -> &Completable<T> {
        &self.cell
    }

    /// Requests cancellation; `interrupt` also pokes a running body.
    pub fn cancel(&self, interrupt: bool) -> bool {
        self.cell.cancel(interrupt)
    }

    /// True once the cell has settled.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.cell.is_done()
    }

    /// True if the cell settled as cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cell.is_cancelled()
    }

    /// Runs the body on the calling thread, exactly once.
    ///
    /// Re-entry, a consumed body, or a cell that already settled all turn
    /// this into a logged no-op. A body panic is captured and reported as a
    /// failure, never propagated.
    pub fn run(&self) {
        let Some(body) = self.body.lock().take() else {
            tracing::debug!(cell = %self.cell.id(), "run skipped: body already consumed");
            return;
        };
        let flag = Arc::new(AtomicBool::new(false));
        let interrupter = Interrupter::new(Arc::clone(&flag), thread::current());
        if !self.cell.begin_computation(Some(interrupter)) {
            tracing::debug!(cell = %self.cell.id(), "run skipped: cell already claimed or settled");
            return;
        }
        let context = TaskContext { cancel_flag: flag };
        match body {
            TaskBody::Direct(body) => {
                match catch_unwind(AssertUnwindSafe(|| body(&context))) {
                    Ok(Ok(value)) => self.report_result(value),
                    Ok(Err(cause)) => self.report_failure(cause),
                    Err(payload) => self.report_failure(FailureCause::from_panic(payload)),
                }
            }
            TaskBody::Deferred(body) => {
                let report = Arc::new(DropReport::new());
                let completer = Completer::new(self.cell.clone(), Arc::clone(&report));
                match catch_unwind(AssertUnwindSafe(|| body(&context, completer))) {
                    Ok(Ok(())) => {
                        // Completion is now owed out of band; the body's
                        // thread is gone, so there is nothing left to
                        // interrupt.
                        self.cell.clear_interrupter();
                        report.armed.store(true, Ordering::SeqCst);
                        if report.dropped.load(Ordering::SeqCst)
                            && self.cell.set_failure(FailureCause::msg(DROPPED_WITHOUT_REPORT)).is_ok()
                        {
                            tracing::warn!(cell = %self.cell.id(), "completion handle dropped without a report");
                        }
                    }
                    Ok(Err(cause)) => self.report_failure(cause),
                    Err(payload) => self.report_failure(FailureCause::from_panic(payload)),
                }
            }
        }
    }

    fn report_result(&self, value: T) {
        if let Err(err) = self.cell.set_result(value) {
            tracing::debug!(cell = %self.cell.id(), %err, "late result ignored");
        }
    }

    fn report_failure(&self, cause: FailureCause) {
        if let Err(err) = self.cell.set_failure(cause) {
            tracing::debug!(cell = %self.cell.id(), %err, "late failure ignored");
        }
    }
}

impl<T> core::fmt::Debug for Task<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Task")
            .field("cell", &self.cell)
            .field("body_pending", &self.body.lock().is_some())
            .finish()
    }
}

const DROPPED_WITHOUT_REPORT: &str = "completion handle dropped without a report";

/// Hand-off protocol between `run()` and the completer it issues.
///
/// The drop-report stays disarmed until the deferred body returns `Ok`, so a
/// completer dropping at closure exit cannot mask the body's own error or
/// panic. `run()` arms it and then covers the case where the completer was
/// already gone; a completer outliving the body reports on drop itself.
struct DropReport {
    armed: AtomicBool,
    dropped: AtomicBool,
}

impl DropReport {
    const fn new() -> Self {
        Self {
            armed: AtomicBool::new(false),
            dropped: AtomicBool::new(false),
        }
    }
}

/// Single-use capability to settle a deferred task's cell.
///
/// Consumed by [`finish`](Self::finish) or [`fail`](Self::fail). Dropping an
/// unused completer fails the cell so waiters and deferred cancellation
/// listeners are not stranded. The one exception is a drop inside the
/// deferred body itself: there the body's own `Err` or panic owns the
/// report, and the drop stays silent.
pub struct Completer<T> {
    cell: Option<Completable<T>>,
    report: Arc<DropReport>,
}

impl<T> Completer<T> {
    pub(crate) const fn new(cell: Completable<T>, report: Arc<DropReport>) -> Self {
        Self {
            cell: Some(cell),
            report,
        }
    }

    /// Reports a successful value.
    ///
    /// Returns `true` if this call consumed the cell's completion slot —
    /// including under a cancel race, where the slot is consumed but the
    /// value is discarded.
    pub fn finish(mut self, value: T) -> bool {
        match self.cell.take() {
            Some(cell) => report(&cell, Ok(value)),
            None => false,
        }
    }

    /// Reports a failure. Same slot semantics as [`finish`](Self::finish).
    pub fn fail(mut self, cause: FailureCause) -> bool {
        match self.cell.take() {
            Some(cell) => report(&cell, Err(cause)),
            None => false,
        }
    }

    /// True if the cell already settled (peek; the completer stays usable).
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.cell.as_ref().is_some_and(Completable::is_done)
    }
}

fn report<T>(cell: &Completable<T>, outcome: Result<T, FailureCause>) -> bool {
    let result = match outcome {
        Ok(value) => cell.set_result(value),
        Err(cause) => cell.set_failure(cause),
    };
    match result {
        Ok(()) => true,
        Err(err) => {
            tracing::debug!(cell = %cell.id(), %err, "out-of-band completion ignored");
            false
        }
    }
}

impl<T> Drop for Completer<T> {
    fn drop(&mut self) {
        let Some(cell) = self.cell.take() else {
            return;
        };
        // SeqCst pairs with the arming store in `run()`: whichever side
        // observes the other reports, so the cell is never stranded.
        self.report.dropped.store(true, Ordering::SeqCst);
        if !self.report.armed.load(Ordering::SeqCst) {
            // The body still owns the report; its error or panic is about
            // to land in `run()`.
            return;
        }
        if cell.set_failure(FailureCause::msg(DROPPED_WITHOUT_REPORT)).is_ok() {
            tracing::warn!(cell = %cell.id(), "completion handle dropped without a report");
        }
    }
}

impl<T> core::fmt::Debug for Completer<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Completer")
            .field("live", &self.cell.is_some())
            .finish()
    }
}
