//! The activity lifecycle engine.
//!
//! An [`Activity`] wraps a [`Promise`] in a supervised lifecycle:
//! `Created -> Active -> {Ok, Cancelled, Failed}`, with a parent/child tree,
//! an attribute bag, a per-activity notification channel, and an external
//! monitor. Terminal transitions run a fixed epilogue exactly once:
//!
//! 1. the terminal event (`finished` or `failed`; cancellation emits neither),
//! 2. for cancellation, a depth-first cascade into non-terminal children,
//! 3. the unconditional `finally` event,
//! 4. listener and attribute teardown, and detachment from the parent.
//!
//! `enter` and `cancel` may race. The loser's side effects are bounded: a
//! cancel landing while `enter` is in flight can observe the `entered` event
//! after the terminal one, but the settled outcome itself is single-assignment
//! and never reclassified.

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use smallvec::SmallVec;

use crate::cell::Promise;
use crate::error::{CellError, FailureCause};
use crate::exec::{Executor, WorkUnit, default_executor};
use crate::label::{LabelLookup, NoLabels};
use crate::notify::{Notifier, SubscriptionId};
use crate::types::{ActivityId, CancelReason, SettledKind, SettledOutcome};

use super::attrs::{AttrBag, AttrValue, BagSealed};
use super::handle::{ActivityControl, ActivityEvent, ActivityRef, ActivitySnapshot};
use super::monitor::LifecycleMonitor;
use super::state::{ActivityEventKind, ActivityState};

type Hook = Box<dyn FnOnce() + Send>;
type BodyFn<T> = Box<dyn FnOnce(&Activity<T>) -> Result<Option<T>, FailureCause> + Send>;
type Validator<T> = Box<dyn Fn(&T) -> bool + Send + Sync>;

/// Everything `enter` consumes: the hooks around the transition and the
/// optional computation body. Taking this out of its slot is the
/// single-shot gate for entry.
struct EnterSetup<T> {
    before: Option<Hook>,
    after: Option<Hook>,
    body: Option<BodyFn<T>>,
}

struct ActivityInner<T> {
    id: ActivityId,
    label: String,
    promise: Promise<T>,
    entered: AtomicBool,
    setup: Mutex<Option<EnterSetup<T>>>,
    parent: Mutex<Option<Weak<dyn ActivityControl>>>,
    children: Mutex<SmallVec<[ActivityRef; 4]>>,
    attrs: AttrBag,
    notifier: Notifier<ActivityEventKind, ActivityEvent>,
    monitor: Arc<LifecycleMonitor>,
    executor: Arc<dyn Executor>,
    labels: Arc<dyn LabelLookup>,
    validator: Option<Validator<T>>,
}

impl<T: Send + Sync + 'static> ActivityInner<T> {
    fn current_state(&self) -> ActivityState {
        self.promise.settled().map_or_else(
            || {
                if self.entered.load(Ordering::Acquire) {
                    ActivityState::Active
                } else {
                    ActivityState::Created
                }
            },
            |outcome| match outcome.kind() {
                SettledKind::Finished => ActivityState::Ok,
                SettledKind::Failed => ActivityState::Failed,
                SettledKind::Cancelled => ActivityState::Cancelled,
            },
        )
    }

    /// Local listeners first, then the external monitor.
    fn emit(&self, event: &ActivityEvent) {
        self.notifier.trigger(&event.kind, event);
        self.monitor.dispatch(event);
    }

    /// Runs as a completion callback on the settling thread, after the
    /// promise published its outcome and released its lock.
    fn on_settled(inner: &Arc<Self>, outcome: &SettledOutcome<T>) {
        let me = ActivityRef::new(Arc::clone(inner) as Arc<dyn ActivityControl>);
        match outcome {
            SettledOutcome::Finished(_) => {
                inner.emit(&ActivityEvent::lifecycle(
                    ActivityEventKind::Finished,
                    me.clone(),
                ));
            }
            SettledOutcome::Failed(cause) => {
                inner.emit(&ActivityEvent::failed(me.clone(), cause.clone()));
            }
            SettledOutcome::Cancelled(reason) => {
                // Depth-first cascade. Snapshot under the lock, cancel outside
                // it: a cancelled child's own teardown re-enters this node
                // through remove_child.
                let children: Vec<ActivityRef> =
                    { inner.children.lock().iter().cloned().collect() };
                for child in children {
                    let cascaded = child.cancel_with(CancelReason::parent_cancelled(), false);
                    if cascaded {
                        tracing::debug!(
                            parent = %inner.id,
                            child = %child.id(),
                            original = %reason.kind(),
                            "cancellation cascaded to child"
                        );
                    }
                }
            }
        }
        // The epilogue fires on every terminal path, exactly once.
        inner.emit(&ActivityEvent::lifecycle(ActivityEventKind::Finally, me));
        inner.notifier.clear();
        inner.attrs.seal_and_clear();
        let parent = inner.parent.lock().take();
        if let Some(parent) = parent.and_then(|weak| weak.upgrade()) {
            parent.remove_child(inner.id);
        }
    }
}

impl<T: Send + Sync + 'static> ActivityControl for ActivityInner<T> {
    fn id(&self) -> ActivityId {
        self.id
    }

    fn label(&self) -> &str {
        &self.label
    }

    fn state(&self) -> ActivityState {
        self.current_state()
    }

    fn cancel_with(&self, reason: CancelReason, interrupt: bool) -> bool {
        self.promise.cancel_with(reason, interrupt)
    }

    fn add_child(&self, child: ActivityRef) -> bool {
        // State is read inside the children lock. The cancel cascade snapshots
        // children under the same lock after the outcome is published, so a
        // child admitted here is either in that snapshot or refused below.
        let mut children = self.children.lock();
        if self.current_state().is_terminal() {
            return false;
        }
        if child.is_terminal() {
            tracing::debug!(parent = %self.id, child = %child.id(), "refusing terminal child");
            return false;
        }
        children.push(child);
        true
    }

    fn remove_child(&self, id: ActivityId) {
        self.children.lock().retain(|child| child.id() != id);
    }

    fn snapshot(&self) -> ActivitySnapshot {
        let children: Vec<ActivityRef> = { self.children.lock().iter().cloned().collect() };
        let settled = self.promise.settled();
        ActivitySnapshot {
            id: self.id,
            label: self.label.clone(),
            state: self.current_state(),
            attribute_keys: self.attrs.keys(),
            cancel_kind: settled
                .as_deref()
                .and_then(|outcome| outcome.cancel_reason().map(CancelReason::kind)),
            children: children.iter().map(ActivityRef::snapshot).collect(),
        }
    }
}

/// A supervised lifecycle around a [`Promise`].
///
/// Cheap to clone; all clones drive the same lifecycle. Dropping every clone
/// of a non-terminal activity drops it silently, but a registered parent
/// keeps its children alive until they terminate.
pub struct Activity<T> {
    inner: Arc<ActivityInner<T>>,
}

impl<T> Clone for Activity<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Send + Sync + 'static> Activity<T> {
    /// Start configuring an activity.
    #[must_use]
    pub fn builder() -> ActivityBuilder<T> {
        ActivityBuilder::new()
    }

    /// Stable identifier, unique within the process.
    #[must_use]
    pub fn id(&self) -> ActivityId {
        self.inner.id
    }

    /// The label this activity was built with.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.inner.label
    }

    /// The label, resolved through the configured lookup table.
    #[must_use]
    pub fn display_label(&self) -> String {
        self.inner.labels.display(&self.inner.label)
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ActivityState {
        self.inner.current_state()
    }

    /// True once any terminal state is reached.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.state().is_terminal()
    }

    /// Type-erased handle, for parent edges and event payloads.
    #[must_use]
    pub fn handle(&self) -> ActivityRef {
        ActivityRef::new(Arc::clone(&self.inner) as Arc<dyn ActivityControl>)
    }

    /// The parent, while both sides are alive and attached.
    #[must_use]
    pub fn parent(&self) -> Option<ActivityRef> {
        self.inner
            .parent
            .lock()
            .as_ref()
            .and_then(Weak::upgrade)
            .map(ActivityRef::new)
    }

    /// Currently registered children.
    #[must_use]
    pub fn children(&self) -> Vec<ActivityRef> {
        self.inner.children.lock().iter().cloned().collect()
    }

    /// Point-in-time view of this activity and its subtree.
    #[must_use]
    pub fn snapshot(&self) -> ActivitySnapshot {
        self.inner.snapshot()
    }

    /// Transition from `Created` to `Active`.
    ///
    /// Runs the before-hook, registers with the parent, publishes the
    /// `entered` event, runs the after-hook, and submits the body (if any) to
    /// the executor without waiting for it. If the parent is already
    /// terminal the activity cancels itself instead of going active.
    ///
    /// Entry is single-shot: later calls log and return the current state,
    /// as does entry on an already-terminal activity. Hook panics are
    /// contained and logged; entry proceeds.
    pub fn enter(&self) -> ActivityState {
        if self.inner.promise.is_done() {
            tracing::debug!(activity = %self.id(), "enter ignored: already terminal");
            return self.state();
        }
        let taken = self.inner.setup.lock().take();
        let Some(EnterSetup {
            before,
            after,
            body,
        }) = taken
        else {
            tracing::debug!(activity = %self.id(), "enter ignored: already entered");
            return self.state();
        };

        if let Some(before) = before {
            run_hook(self.id(), "before_enter", before);
        }
        self.inner.entered.store(true, Ordering::Release);

        let parent = self.inner.parent.lock().as_ref().and_then(Weak::upgrade);
        if let Some(parent) = parent {
            if parent.state().is_terminal() || !parent.add_child(self.handle()) {
                tracing::debug!(
                    activity = %self.id(),
                    parent = %parent.id(),
                    "could not attach to parent; cancelling on entry"
                );
                self.inner
                    .promise
                    .cancel_with(CancelReason::parent_cancelled(), false);
                return self.state();
            }
        }

        self.inner.emit(&ActivityEvent::lifecycle(
            ActivityEventKind::Entered,
            self.handle(),
        ));
        if let Some(after) = after {
            run_hook(self.id(), "after_enter", after);
        }

        if let Some(body) = body {
            let activity = self.clone();
            let unit: WorkUnit = Box::new(move || run_body(&activity, body));
            // Entry never blocks on the body; its outcome flows back through
            // finish and fail.
            drop(self.inner.executor.submit(unit));
        }
        self.state()
    }

    /// Record a successful result, gated by validation.
    ///
    /// A configured validator sees the candidate first; rejection leaves the
    /// activity active so the producer can correct and finish again. Returns
    /// true when the value was accepted and this call settled the outcome.
    pub fn finish(&self, value: T) -> bool {
        if let Some(validator) = self.inner.validator.as_ref() {
            match catch_unwind(AssertUnwindSafe(|| validator(&value))) {
                Ok(true) => {}
                Ok(false) => {
                    tracing::info!(
                        activity = %self.id(),
                        "finish rejected by validation; still active"
                    );
                    return false;
                }
                Err(payload) => {
                    let cause = FailureCause::from_panic(payload);
                    tracing::error!(
                        activity = %self.id(),
                        %cause,
                        "validator panicked; finish rejected"
                    );
                    return false;
                }
            }
        }
        self.inner.promise.finish(value)
    }

    /// Record a failure.
    ///
    /// A cause that carries a cancellation anywhere in its chain is not a
    /// real failure: it redirects to cancellation with the embedded reason,
    /// so wrapped cancellations never misreport as `Failed`.
    pub fn fail(&self, cause: FailureCause) -> bool {
        if let Some(reason) = cause.as_cancellation() {
            let reason = reason.clone();
            tracing::debug!(
                activity = %self.id(),
                kind = %reason.kind(),
                "failure carries a cancellation; cancelling instead"
            );
            return self.inner.promise.cancel_with(reason, false);
        }
        self.inner.promise.fail(cause)
    }

    /// Cancel with the default user reason. See [`Activity::cancel_with`].
    pub fn cancel(&self, interrupt: bool) -> bool {
        self.cancel_with(CancelReason::default(), interrupt)
    }

    /// Cancel this activity and cascade into its non-terminal children.
    ///
    /// Returns false when the activity already terminated; the first
    /// terminal outcome sticks and cancellation of a terminal activity is a
    /// no-op.
    pub fn cancel_with(&self, reason: CancelReason, interrupt: bool) -> bool {
        self.inner.promise.cancel_with(reason, interrupt)
    }

    /// Store an attribute, publishing `attribute_changed` on success.
    ///
    /// Writes after termination are ignored and return false: the bag was
    /// sealed by the terminal epilogue.
    pub fn set_attribute(&self, key: impl Into<String>, value: impl Into<AttrValue>) -> bool {
        let key = key.into();
        match self.inner.attrs.set(key.clone(), value.into()) {
            Ok(_previous) => {
                self.inner
                    .emit(&ActivityEvent::attribute_changed(self.handle(), key));
                true
            }
            Err(BagSealed) => {
                tracing::debug!(
                    activity = %self.id(),
                    key = %key,
                    "attribute write ignored: activity terminal"
                );
                false
            }
        }
    }

    /// Read an attribute.
    #[must_use]
    pub fn attribute(&self, key: &str) -> Option<AttrValue> {
        self.inner.attrs.get(key)
    }

    /// Remove an attribute, publishing `attribute_changed` if it existed.
    pub fn remove_attribute(&self, key: &str) -> Option<AttrValue> {
        let removed = self.inner.attrs.remove(key);
        if removed.is_some() {
            self.inner.emit(&ActivityEvent::attribute_changed(
                self.handle(),
                key.to_owned(),
            ));
        }
        removed
    }

    /// Attribute keys currently present, in sorted order.
    #[must_use]
    pub fn attribute_keys(&self) -> Vec<String> {
        self.inner.attrs.keys()
    }

    /// Listen for one event kind on this activity's notification channel.
    ///
    /// All listeners detach automatically right after the `finally` event.
    pub fn subscribe<F>(&self, kind: ActivityEventKind, listener: F) -> SubscriptionId
    where
        F: Fn(&ActivityEvent) + Send + Sync + 'static,
    {
        self.inner.notifier.subscribe(kind, listener)
    }

    /// Detach one listener. False when it already fired its way out or the
    /// channel was torn down.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.notifier.unsubscribe(id)
    }

    /// The settled outcome, if any, without cloning the payload.
    #[must_use]
    pub fn outcome(&self) -> Option<Arc<SettledOutcome<T>>> {
        self.inner.promise.settled()
    }
}

impl<T: Clone + Send + Sync + 'static> Activity<T> {
    /// Block until terminal, then report the outcome.
    pub fn wait(&self) -> Result<T, CellError> {
        self.inner.promise.wait()
    }

    /// Block until terminal or `timeout` elapses.
    pub fn wait_timeout(&self, timeout: Duration) -> Result<T, CellError> {
        self.inner.promise.wait_timeout(timeout)
    }

    /// Non-blocking peek at the outcome.
    #[must_use]
    pub fn try_result(&self) -> Option<Result<T, CellError>> {
        self.inner.promise.try_get()
    }
}

impl<T: Send + Sync + 'static> fmt::Debug for Activity<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Activity")
            .field("id", &self.inner.id)
            .field("label", &self.inner.label)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

fn run_hook(activity: ActivityId, stage: &str, hook: Hook) {
    if let Err(payload) = catch_unwind(AssertUnwindSafe(hook)) {
        let cause = FailureCause::from_panic(payload);
        tracing::error!(
            activity = %activity,
            stage,
            %cause,
            "entry hook panicked; entry continues"
        );
    }
}

fn run_body<T: Send + Sync + 'static>(activity: &Activity<T>, body: BodyFn<T>) {
    match catch_unwind(AssertUnwindSafe(|| body(activity))) {
        Ok(Ok(Some(value))) => {
            let accepted = activity.finish(value);
            if !accepted {
                tracing::debug!(activity = %activity.id(), "body result not accepted");
            }
        }
        // The body went interactive; completion arrives later through
        // finish, fail, or cancel.
        Ok(Ok(None)) => {}
        Ok(Err(cause)) => {
            let recorded = activity.fail(cause);
            if !recorded {
                tracing::debug!(
                    activity = %activity.id(),
                    "body failure arrived after termination"
                );
            }
        }
        Err(payload) => {
            let cause = FailureCause::from_panic(payload);
            tracing::error!(
                activity = %activity.id(),
                %cause,
                "activity body panicked; state unchanged"
            );
        }
    }
}

/// Configures and builds an [`Activity`].
pub struct ActivityBuilder<T> {
    label: Option<String>,
    parent: Option<Weak<dyn ActivityControl>>,
    executor: Option<Arc<dyn Executor>>,
    monitor: Option<Arc<LifecycleMonitor>>,
    labels: Option<Arc<dyn LabelLookup>>,
    validator: Option<Validator<T>>,
    before: Option<Hook>,
    after: Option<Hook>,
    body: Option<BodyFn<T>>,
}

impl<T: Send + Sync + 'static> ActivityBuilder<T> {
    fn new() -> Self {
        Self {
            label: None,
            parent: None,
            executor: None,
            monitor: None,
            labels: None,
            validator: None,
            before: None,
            after: None,
            body: None,
        }
    }

    /// Human-readable label. Defaults to `activity-{id}`.
    #[must_use]
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Attach under `parent` on entry. The parent holds the strong edge;
    /// this side keeps only a weak back-reference.
    #[must_use]
    pub fn parent(mut self, parent: &ActivityRef) -> Self {
        self.parent = Some(parent.as_weak());
        self
    }

    /// Where the body and monitor-independent work runs. Defaults to the
    /// process-wide executor.
    #[must_use]
    pub fn executor(mut self, executor: Arc<dyn Executor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Lifecycle monitor to notify. Defaults to the shared inactive one.
    #[must_use]
    pub fn monitor(mut self, monitor: Arc<LifecycleMonitor>) -> Self {
        self.monitor = Some(monitor);
        self
    }

    /// Label lookup for display names. Defaults to [`NoLabels`].
    #[must_use]
    pub fn labels(mut self, labels: Arc<dyn LabelLookup>) -> Self {
        self.labels = Some(labels);
        self
    }

    /// Gate `finish` behind `validate`: a rejected value leaves the
    /// activity active.
    #[must_use]
    pub fn validate<F>(mut self, validate: F) -> Self
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        self.validator = Some(Box::new(validate));
        self
    }

    /// Hook that runs just before the transition to active.
    #[must_use]
    pub fn before_enter<F>(mut self, hook: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        self.before = Some(Box::new(hook));
        self
    }

    /// Hook that runs right after the `entered` event.
    #[must_use]
    pub fn after_enter<F>(mut self, hook: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        self.after = Some(Box::new(hook));
        self
    }

    /// Computation body, submitted to the executor on entry.
    ///
    /// `Ok(Some(value))` finishes the activity with `value`, `Ok(None)`
    /// leaves it active for an interactive completion, and `Err` fails it.
    #[must_use]
    pub fn body<F>(mut self, body: F) -> Self
    where
        F: FnOnce(&Activity<T>) -> Result<Option<T>, FailureCause> + Send + 'static,
    {
        self.body = Some(Box::new(body));
        self
    }

    /// Build the activity in `Created`, wired to observe its own settling.
    #[must_use]
    pub fn build(self) -> Activity<T> {
        let id = ActivityId::fresh();
        let label = self
            .label
            .unwrap_or_else(|| format!("activity-{}", id.as_u64()));
        let promise = Promise::with_label(label.clone());
        let inner = Arc::new(ActivityInner {
            id,
            label,
            promise,
            entered: AtomicBool::new(false),
            setup: Mutex::new(Some(EnterSetup {
                before: self.before,
                after: self.after,
                body: self.body,
            })),
            parent: Mutex::new(self.parent),
            children: Mutex::new(SmallVec::new()),
            attrs: AttrBag::new(),
            notifier: Notifier::new(),
            monitor: self.monitor.unwrap_or_else(LifecycleMonitor::inactive),
            executor: self.executor.unwrap_or_else(default_executor),
            labels: self.labels.unwrap_or_else(|| Arc::new(NoLabels)),
            validator: self.validator,
        });
        let weak = Arc::downgrade(&inner);
        inner.promise.add_callback(move |outcome| {
            if let Some(inner) = weak.upgrade() {
                ActivityInner::on_settled(&inner, outcome);
            }
        });
        Activity { inner }
    }
}

impl<T: Send + Sync + 'static> Default for ActivityBuilder<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for ActivityBuilder<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActivityBuilder")
            .field("label", &self.label)
            .field("has_parent", &self.parent.is_some())
            .field("has_body", &self.body.is_some())
            .field("has_validator", &self.validator.is_some())
            .finish_non_exhaustive()
    }
}
