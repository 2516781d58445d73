//! External lifecycle monitoring.
//!
//! A [`LifecycleMonitor`] forwards activity events to one
//! [`LifecycleReactor`] through an injected executor. Dispatch policy:
//!
//! - an inactive monitor drops events outright (the kill switch);
//! - reactions are contained, a panicking reactor is logged and the
//!   lifecycle that emitted the event is unaffected;
//! - in synchronous mode the emitting thread waits for the reaction on
//!   `entered`, `attribute_changed`, and `finally` only. It never waits on
//!   `finished` or `failed`; `finally` follows both and is the sync point.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::FailureCause;
use crate::exec::{CallerThread, Executor, WorkUnit};

use super::handle::ActivityEvent;
use super::handle::ActivityRef;
use super::state::ActivityEventKind;

/// Receives lifecycle events. Every method defaults to a no-op, so an
/// implementation overrides only the moments it cares about.
pub trait LifecycleReactor: Send + Sync {
    /// The activity transitioned to active.
    fn entered(&self, _activity: &ActivityRef) {}

    /// An attribute was set or removed.
    fn attribute_changed(&self, _activity: &ActivityRef, _key: &str) {}

    /// The activity failed with `cause`.
    fn failed(&self, _activity: &ActivityRef, _cause: &FailureCause) {}

    /// The activity finished with an accepted value.
    fn finished(&self, _activity: &ActivityRef) {}

    /// Terminal epilogue; fires exactly once for every terminal activity.
    fn finally(&self, _activity: &ActivityRef) {}
}

/// Reactor that ignores everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopReactor;

impl LifecycleReactor for NoopReactor {}

/// Routes lifecycle events to a reactor via an executor, with a kill switch.
pub struct LifecycleMonitor {
    reactor: Arc<dyn LifecycleReactor>,
    executor: Arc<dyn Executor>,
    active: AtomicBool,
    synchronous: bool,
}

impl LifecycleMonitor {
    /// Start configuring a monitor.
    #[must_use]
    pub fn builder() -> LifecycleMonitorBuilder {
        LifecycleMonitorBuilder::new()
    }

    /// The shared always-off monitor. Its reactor is a no-op, so toggling it
    /// active has no observable effect.
    #[must_use]
    pub fn inactive() -> Arc<Self> {
        static INACTIVE: OnceLock<Arc<LifecycleMonitor>> = OnceLock::new();
        Arc::clone(INACTIVE.get_or_init(|| {
            Arc::new(Self {
                reactor: Arc::new(NoopReactor),
                executor: Arc::new(CallerThread),
                active: AtomicBool::new(false),
                synchronous: false,
            })
        }))
    }

    /// Whether events are currently delivered.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Flip the kill switch. Deactivation stops all future dispatch;
    /// reactions already submitted keep running.
    pub fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::Release);
    }

    /// Whether the emitting thread waits for waitable reactions.
    #[must_use]
    pub const fn is_synchronous(&self) -> bool {
        self.synchronous
    }

    pub(crate) fn dispatch(&self, event: &ActivityEvent) {
        if !self.is_active() {
            tracing::trace!(
                activity = %event.activity.id(),
                kind = %event.kind,
                "monitor inactive; event dropped"
            );
            return;
        }
        let reactor = Arc::clone(&self.reactor);
        let owned = event.clone();
        let kind = event.kind;
        let unit: WorkUnit = Box::new(move || react(reactor.as_ref(), &owned));
        let handle = self.executor.submit(unit);
        if self.synchronous && should_wait(kind) {
            if let Some(handle) = handle {
                if let Err(err) = handle.wait() {
                    tracing::debug!(
                        kind = %kind,
                        %err,
                        "synchronous reaction did not complete cleanly"
                    );
                }
            }
        }
    }
}

impl std::fmt::Debug for LifecycleMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleMonitor")
            .field("active", &self.is_active())
            .field("synchronous", &self.synchronous)
            .finish_non_exhaustive()
    }
}

/// `finished` and `failed` are excluded so a reactor that waits on the
/// activity cannot deadlock against the thread that settled it.
const fn should_wait(kind: ActivityEventKind) -> bool {
    matches!(
        kind,
        ActivityEventKind::Entered
            | ActivityEventKind::AttributeChanged
            | ActivityEventKind::Finally
    )
}

fn react(reactor: &dyn LifecycleReactor, event: &ActivityEvent) {
    let outcome = catch_unwind(AssertUnwindSafe(|| match event.kind {
        ActivityEventKind::Entered => reactor.entered(&event.activity),
        ActivityEventKind::AttributeChanged => {
            let key = event.attribute_key.as_deref().unwrap_or_default();
            reactor.attribute_changed(&event.activity, key);
        }
        ActivityEventKind::Failed => {
            let cause = event
                .cause
                .clone()
                .unwrap_or_else(|| FailureCause::msg("unspecified failure"));
            reactor.failed(&event.activity, &cause);
        }
        ActivityEventKind::Finished => reactor.finished(&event.activity),
        ActivityEventKind::Finally => reactor.finally(&event.activity),
    }));
    if let Err(payload) = outcome {
        let cause = FailureCause::from_panic(payload);
        tracing::error!(
            activity = %event.activity.id(),
            kind = %event.kind,
            %cause,
            "lifecycle reaction panicked"
        );
    }
}

/// Configures a [`LifecycleMonitor`].
pub struct LifecycleMonitorBuilder {
    reactor: Option<Arc<dyn LifecycleReactor>>,
    executor: Option<Arc<dyn Executor>>,
    synchronous: bool,
}

impl LifecycleMonitorBuilder {
    fn new() -> Self {
        Self {
            reactor: None,
            executor: None,
            synchronous: false,
        }
    }

    /// The reactor to deliver events to. Defaults to [`NoopReactor`].
    #[must_use]
    pub fn reactor(mut self, reactor: Arc<dyn LifecycleReactor>) -> Self {
        self.reactor = Some(reactor);
        self
    }

    /// Where reactions run. Defaults to [`CallerThread`].
    #[must_use]
    pub fn executor(mut self, executor: Arc<dyn Executor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Wait for waitable reactions on the emitting thread.
    #[must_use]
    pub const fn synchronous(mut self, synchronous: bool) -> Self {
        self.synchronous = synchronous;
        self
    }

    /// Build the monitor, active from the start.
    #[must_use]
    pub fn build(self) -> Arc<LifecycleMonitor> {
        Arc::new(LifecycleMonitor {
            reactor: self.reactor.unwrap_or_else(|| Arc::new(NoopReactor)),
            executor: self.executor.unwrap_or_else(|| Arc::new(CallerThread)),
            active: AtomicBool::new(true),
            synchronous: self.synchronous,
        })
    }
}

impl Default for LifecycleMonitorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for LifecycleMonitorBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleMonitorBuilder")
            .field("synchronous", &self.synchronous)
            .finish_non_exhaustive()
    }
}
