//! Externally-settled cells.
//!
//! A [`Promise`] owns no computation: the only ways to reach a terminal
//! state are [`finish`](Promise::finish), [`fail`](Promise::fail), and the
//! cancel family. Unlike the raw cell, repeated settle calls are swallowed
//! by policy rather than surfaced as faults — a failure path commonly sheds
//! a cascade of secondary failures, and only the first one matters.
//!
//! A promise can also *stage* an outcome before anyone is ready to observe
//! it, then [`release`](Promise::release) it later. The staged slot holds at
//! most one outcome; staging and releasing follow the same first-wins
//! discipline as the cell itself.

use crate::cell::callbacks::CallbackId;
use crate::cell::core::Completable;
use crate::error::{CellError, FailureCause};
use crate::types::{CancelReason, CellId, SettledOutcome};
use core::fmt;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

enum StagedOutcome<T> {
    Finish(T),
    Fail(FailureCause),
}

struct PromiseInner<T> {
    cell: Completable<T>,
    /// Lock order: `staged` first, then the cell's own lock. Never the
    /// reverse — nothing under the cell lock reaches back into `staged`.
    staged: Mutex<Option<StagedOutcome<T>>>,
}

/// A cell whose outcome is supplied only from outside.
///
/// Handles are cheap to clone and all point at the same promise.
pub struct Promise<T> {
    inner: Arc<PromiseInner<T>>,
}

impl<T> Clone for Promise<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Promise<T> {
    /// Creates a pending promise with an auto-generated label.
    #[must_use]
    pub fn new() -> Self {
        Self::from_cell(Completable::new())
    }

    /// Creates a pending promise with a diagnostic label.
    #[must_use]
    pub fn with_label(label: impl Into<String>) -> Self {
        Self::from_cell(Completable::with_label(label))
    }

    fn from_cell(cell: Completable<T>) -> Self {
        Self {
            inner: Arc::new(PromiseInner {
                cell,
                staged: Mutex::new(None),
            }),
        }
    }

    /// The promise's opaque id.
    #[must_use]
    pub fn id(&self) -> CellId {
        self.inner.cell.id()
    }

    /// The promise's diagnostic label.
    #[must_use]
    pub fn label(&self) -> &str {
        self.inner.cell.label()
    }

    /// Settles the promise with a value.
    ///
    /// Returns `true` if this call consumed the completion slot — including
    /// under a cancel race, where the outcome stays cancelled and the value
    /// is discarded to the undo hook. A promise that was already finished or
    /// failed swallows the call and returns `false`.
    pub fn finish(&self, value: T) -> bool {
        match self.inner.cell.set_result(value) {
            Ok(()) => true,
            Err(err) => {
                tracing::debug!(cell = %self.id(), %err, "finish swallowed");
                false
            }
        }
    }

    /// Settles the promise with a failure. Same policy as
    /// [`finish`](Self::finish).
    pub fn fail(&self, cause: FailureCause) -> bool {
        match self.inner.cell.set_failure(cause) {
            Ok(()) => true,
            Err(err) => {
                tracing::debug!(cell = %self.id(), %err, "fail swallowed");
                false
            }
        }
    }

    /// Requests cancellation with a default user reason.
    pub fn cancel(&self, interrupt: bool) -> bool {
        self.inner.cell.cancel(interrupt)
    }

    /// Requests cancellation with an explicit reason.
    pub fn cancel_with(&self, reason: CancelReason, interrupt: bool) -> bool {
        self.inner.cell.cancel_with(reason, interrupt)
    }

    /// Stages a value without settling the promise.
    ///
    /// The staged slot is first-wins: staging over an existing staged
    /// outcome, or onto an already-settled promise, is a logged no-op
    /// returning `false`.
    pub fn stage_finish(&self, value: T) -> bool {
        self.stage(StagedOutcome::Finish(value))
    }

    /// Stages a failure without settling the promise.
    pub fn stage_fail(&self, cause: FailureCause) -> bool {
        self.stage(StagedOutcome::Fail(cause))
    }

    fn stage(&self, outcome: StagedOutcome<T>) -> bool {
        let mut staged = self.inner.staged.lock();
        if staged.is_some() {
            drop(staged);
            tracing::debug!(cell = %self.id(), "stage ignored: an outcome is already staged");
            return false;
        }
        if self.inner.cell.is_done() {
            drop(staged);
            tracing::debug!(cell = %self.id(), "stage ignored: promise already settled");
            return false;
        }
        *staged = Some(outcome);
        true
    }

    /// True while an outcome sits in the staged slot.
    #[must_use]
    pub fn has_staged(&self) -> bool {
        self.inner.staged.lock().is_some()
    }

    /// Releases the staged outcome into the promise.
    ///
    /// Routes through [`finish`](Self::finish)/[`fail`](Self::fail), so a
    /// cancellation that landed between staging and release still wins.
    /// Returns `false` when nothing was staged or the settle was swallowed.
    pub fn release(&self) -> bool {
        let staged = self.inner.staged.lock().take();
        match staged {
            Some(StagedOutcome::Finish(value)) => self.finish(value),
            Some(StagedOutcome::Fail(cause)) => self.fail(cause),
            None => {
                tracing::debug!(cell = %self.id(), "release ignored: nothing staged");
                false
            }
        }
    }

    /// True once the promise has settled, forever after.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.inner.cell.is_done()
    }

    /// True if the settled outcome is a cancellation.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cell.is_cancelled()
    }

    /// True if the settled outcome is a failure.
    #[must_use]
    pub fn is_failed(&self) -> bool {
        self.inner.cell.is_failed()
    }

    /// True if the settled outcome is a finished value.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.inner.cell.is_finished()
    }

    /// Blocks until the promise settles. See [`Completable::wait`].
    pub fn wait(&self) -> Result<T, CellError>
    where
        T: Clone,
    {
        self.inner.cell.wait()
    }

    /// Blocks up to `timeout`. See [`Completable::wait_timeout`].
    pub fn wait_timeout(&self, timeout: Duration) -> Result<T, CellError>
    where
        T: Clone,
    {
        self.inner.cell.wait_timeout(timeout)
    }

    /// Non-blocking peek. See [`Completable::try_get`].
    #[must_use]
    pub fn try_get(&self) -> Option<Result<T, CellError>>
    where
        T: Clone,
    {
        self.inner.cell.try_get()
    }

    /// The settled outcome itself, shared.
    #[must_use]
    pub fn settled(&self) -> Option<Arc<SettledOutcome<T>>> {
        self.inner.cell.settled()
    }

    /// Registers a completion listener. See [`Completable::add_callback`].
    pub fn add_callback<F>(&self, listener: F) -> CallbackId
    where
        F: FnOnce(&SettledOutcome<T>) + Send + 'static,
    {
        self.inner.cell.add_callback(listener)
    }

    /// Best-effort listener removal. See [`Completable::remove_callback`].
    pub fn remove_callback(&self, id: CallbackId) -> bool {
        self.inner.cell.remove_callback(id)
    }

    /// Installs the rollback hook. See [`Completable::set_undo`].
    pub fn set_undo<F>(&self, hook: F)
    where
        F: FnOnce(Option<T>) + Send + 'static,
    {
        self.inner.cell.set_undo(hook);
    }
}

impl<T> Default for Promise<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Promise")
            .field("cell", &self.inner.cell)
            .field("staged", &self.has_staged())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::init_test_logging;
    use crate::types::CancelKind;

    fn init_test(test_name: &str) {
        init_test_logging();
        crate::test_phase!(test_name);
    }

    #[test]
    fn first_settle_wins_duplicates_swallowed() {
        init_test("first_settle_wins_duplicates_swallowed");
        let promise: Promise<u32> = Promise::new();
        let first = promise.finish(1);
        let dup_finish = promise.finish(2);
        let dup_fail = promise.fail(FailureCause::msg("too late"));
        crate::assert_with_log!(first, "first finish lands", true, first);
        crate::assert_with_log!(!dup_finish, "second finish swallowed", false, dup_finish);
        crate::assert_with_log!(!dup_fail, "late fail swallowed", false, dup_fail);

        let value = promise.wait().unwrap();
        crate::assert_with_log!(value == 1, "first value kept", 1, value);
        crate::test_complete!("first_settle_wins_duplicates_swallowed");
    }

    #[test]
    fn finish_after_cancel_consumes_slot_but_outcome_stays_cancelled() {
        init_test("finish_after_cancel_consumes_slot_but_outcome_stays_cancelled");
        let promise: Promise<u32> = Promise::with_label("doomed");
        let cancelled = promise.cancel_with(CancelReason::user("changed my mind"), false);
        crate::assert_with_log!(cancelled, "cancel transitions", true, cancelled);

        let finished = promise.finish(7);
        crate::assert_with_log!(finished, "slot still consumable", true, finished);
        crate::assert_with_log!(
            promise.is_cancelled(),
            "cancellation wins",
            true,
            promise.is_cancelled()
        );

        let err = promise.wait().unwrap_err();
        crate::assert_with_log!(
            matches!(err, CellError::Cancelled(ref r) if r.kind() == CancelKind::User),
            "wait raises the cancellation",
            "Cancelled(user)",
            format!("{err:?}")
        );
        crate::test_complete!("finish_after_cancel_consumes_slot_but_outcome_stays_cancelled");
    }

    #[test]
    fn staged_outcome_releases_later() {
        init_test("staged_outcome_releases_later");
        let promise: Promise<String> = Promise::new();
        let staged = promise.stage_finish("held back".to_string());
        crate::assert_with_log!(staged, "staging succeeds", true, staged);
        crate::assert_with_log!(!promise.is_done(), "staging does not settle", false, promise.is_done());
        crate::assert_with_log!(promise.has_staged(), "slot occupied", true, promise.has_staged());

        let released = promise.release();
        crate::assert_with_log!(released, "release settles", true, released);
        let value = promise.wait().unwrap();
        crate::assert_with_log!(
            value == "held back",
            "released value observed",
            "held back",
            value
        );
        crate::test_complete!("staged_outcome_releases_later");
    }

    #[test]
    fn staged_slot_is_first_wins() {
        init_test("staged_slot_is_first_wins");
        let promise: Promise<u32> = Promise::new();
        assert!(promise.stage_finish(1));
        let second = promise.stage_fail(FailureCause::msg("competing"));
        crate::assert_with_log!(!second, "second stage refused", false, second);

        promise.release();
        let value = promise.wait().unwrap();
        crate::assert_with_log!(value == 1, "first staged outcome wins", 1, value);
        crate::test_complete!("staged_slot_is_first_wins");
    }

    #[test]
    fn release_after_cancel_defers_to_the_cancellation() {
        init_test("release_after_cancel_defers_to_the_cancellation");
        let promise: Promise<u32> = Promise::new();
        assert!(promise.stage_finish(3));
        assert!(promise.cancel(false));

        let released = promise.release();
        crate::assert_with_log!(
            released,
            "release consumes the slot",
            true,
            released
        );
        crate::assert_with_log!(
            promise.is_cancelled(),
            "outcome stays cancelled",
            true,
            promise.is_cancelled()
        );
        crate::test_complete!("release_after_cancel_defers_to_the_cancellation");
    }

    #[test]
    fn stage_and_release_edge_cases() {
        init_test("stage_and_release_edge_cases");
        let promise: Promise<u32> = Promise::new();
        let empty_release = promise.release();
        crate::assert_with_log!(!empty_release, "empty release is a no-op", false, empty_release);

        promise.finish(4);
        let late_stage = promise.stage_finish(5);
        crate::assert_with_log!(!late_stage, "stage after settle refused", false, late_stage);
        crate::test_complete!("stage_and_release_edge_cases");
    }
}
