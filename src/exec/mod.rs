//! Pluggable execution of reaction units.
//!
//! Everything that leaves the state machines — activity bodies, lifecycle
//! reactions — goes through [`Executor::submit`]. The contract is small:
//! run the unit eventually, and say whether there is anything to wait on.
//! [`CallerThread`] runs the unit inline and reports nothing to wait on;
//! [`ThreadPool`](pool::ThreadPool) queues it and hands back a
//! [`SubmitHandle`].
//!
//! An executor must tolerate `submit` being called from inside a running
//! unit; both implementations here do.

pub mod global;
pub mod pool;

pub use global::{default_executor, install_default_executor, reset_default_executor};
pub use pool::ThreadPool;

use crate::cell::Promise;
use crate::error::{CellError, FailureCause};
use crate::types::CancelReason;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::time::Duration;

/// A unit of work handed to an executor.
pub type WorkUnit = Box<dyn FnOnce() + Send>;

/// Where reaction units run.
///
/// Implementations decide the thread and the ordering. Returning `None`
/// means nothing was scheduled that a caller could block on — either the
/// unit already ran inline, or the executor refused it.
pub trait Executor: Send + Sync {
    /// Submits a unit for execution.
    fn submit(&self, unit: WorkUnit) -> Option<SubmitHandle>;
}

/// Runs every unit inline on the submitting thread.
///
/// This is the process default: no parallelism, no queue, nothing to wait
/// on. A panic inside the unit propagates to the submitter, which is the
/// same thread that would have seen it without an executor in between.
#[derive(Debug, Clone, Copy, Default)]
pub struct CallerThread;

impl Executor for CallerThread {
    fn submit(&self, unit: WorkUnit) -> Option<SubmitHandle> {
        unit();
        None
    }
}

/// Completion observation for a queued unit.
///
/// Settles finished when the unit ran to completion, failed when it
/// panicked, and cancelled when the pool discarded it at shutdown.
#[derive(Debug, Clone)]
pub struct SubmitHandle {
    done: Promise<()>,
}

impl SubmitHandle {
    /// Wraps a unit so its completion drives a fresh handle.
    ///
    /// The returned unit catches the original's panic, reports it through
    /// the handle, and never unwinds into the worker running it.
    #[must_use]
    pub fn instrument(unit: WorkUnit) -> (WorkUnit, Self) {
        let handle = Self {
            done: Promise::with_label("submit-handle"),
        };
        let signal = handle.clone();
        let wrapped: WorkUnit = Box::new(move || match catch_unwind(AssertUnwindSafe(unit)) {
            Ok(()) => {
                signal.done.finish(());
            }
            Err(payload) => {
                let cause = FailureCause::from_panic(payload);
                tracing::error!(%cause, "submitted unit panicked");
                signal.done.fail(cause);
            }
        });
        (wrapped, handle)
    }

    /// True once the unit ran, panicked, or was discarded.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.done.is_done()
    }

    /// Blocks until the unit completes.
    pub fn wait(&self) -> Result<(), CellError> {
        self.done.wait()
    }

    /// Blocks up to `timeout` for the unit to complete.
    pub fn wait_timeout(&self, timeout: Duration) -> Result<(), CellError> {
        self.done.wait_timeout(timeout)
    }

    /// Non-blocking peek at the unit's completion.
    #[must_use]
    pub fn try_get(&self) -> Option<Result<(), CellError>> {
        self.done.try_get()
    }

    /// Marks the unit as discarded by pool shutdown.
    pub(crate) fn cancel_shutdown(&self) {
        self.done.cancel_with(CancelReason::shutdown(), false);
    }
}
