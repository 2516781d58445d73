//! Shared helpers for unit and integration tests:
//!
//! - Consistent tracing-based logging initialization
//! - Phase/section macros for readable test output
//! - Assertion macros that log before asserting
//! - A hand-cranked executor for deterministic dispatch tests
//! - A reactor that records everything it sees
//!
//! # Example
//! ```
//! use settle::test_utils::init_test_logging;
//!
//! fn my_test() {
//!     init_test_logging();
//!     settle::test_phase!("my_test");
//!     // test code
//! }
//! ```

use std::collections::VecDeque;
use std::sync::Once;

use parking_lot::Mutex;

use crate::activity::handle::ActivityRef;
use crate::activity::monitor::LifecycleReactor;
use crate::activity::state::ActivityEventKind;
use crate::error::FailureCause;
use crate::exec::{Executor, SubmitHandle, WorkUnit};
use crate::types::ActivityId;

use tracing_subscriber::fmt::format::FmtSpan;

static INIT_LOGGING: Once = Once::new();

/// Initialize test logging with trace-level output.
///
/// Safe to call multiple times; only initializes once.
pub fn init_test_logging() {
    init_test_logging_with_level(tracing::Level::TRACE);
}

/// Initialize test logging with a custom level.
///
/// The first call wins; later calls are no-ops.
pub fn init_test_logging_with_level(level: tracing::Level) {
    INIT_LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(level)
            .with_test_writer()
            .with_file(true)
            .with_line_number(true)
            .with_target(true)
            .with_thread_ids(true)
            .with_span_events(FmtSpan::CLOSE)
            .with_ansi(false)
            .try_init();
    });
}

/// Log a test phase transition with a visual separator.
#[macro_export]
macro_rules! test_phase {
    ($name:expr) => {
        tracing::info!(phase = %$name, "========================================");
        tracing::info!(phase = %$name, "TEST PHASE: {}", $name);
        tracing::info!(phase = %$name, "========================================");
    };
}

/// Log a section within a test phase.
#[macro_export]
macro_rules! test_section {
    ($name:expr) => {
        tracing::debug!(section = %$name, "--- {} ---", $name);
    };
}

/// Log test completion with summary.
#[macro_export]
macro_rules! test_complete {
    ($name:expr) => {
        tracing::info!(test = %$name, "test completed successfully: {}", $name);
    };
    ($name:expr, $($key:ident = $value:expr),* $(,)?) => {
        tracing::info!(
            test = %$name,
            $($key = %$value,)*
            "test completed successfully: {}",
            $name
        );
    };
}

/// Log before assertions for context.
#[macro_export]
macro_rules! assert_with_log {
    ($cond:expr, $msg:expr, $expected:expr, $actual:expr) => {
        tracing::debug!(
            expected = ?$expected,
            actual = ?$actual,
            "Asserting: {}",
            $msg
        );
        assert!($cond, "{}: expected {:?}, got {:?}", $msg, $expected, $actual);
    };
}

/// Executor that queues units until a test cranks them by hand.
///
/// Nothing runs on submit; everything runs on the calling thread of
/// [`ManualExecutor::run_next`] or [`ManualExecutor::run_all`]. Units are
/// instrumented, so their submit handles settle normally once cranked.
#[derive(Default)]
pub struct ManualExecutor {
    queue: Mutex<VecDeque<WorkUnit>>,
}

impl ManualExecutor {
    /// Creates an empty executor.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of units waiting to be cranked.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }

    /// Run the oldest queued unit on this thread. False when idle.
    pub fn run_next(&self) -> bool {
        let unit = self.queue.lock().pop_front();
        match unit {
            Some(unit) => {
                unit();
                true
            }
            None => false,
        }
    }

    /// Run queued units until none remain, including units queued by the
    /// units themselves. Returns how many ran.
    pub fn run_all(&self) -> usize {
        let mut ran = 0;
        while self.run_next() {
            ran += 1;
        }
        ran
    }
}

impl Executor for ManualExecutor {
    fn submit(&self, unit: WorkUnit) -> Option<SubmitHandle> {
        let (unit, handle) = SubmitHandle::instrument(unit);
        self.queue.lock().push_back(unit);
        Some(handle)
    }
}

impl std::fmt::Debug for ManualExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManualExecutor")
            .field("pending", &self.pending())
            .finish()
    }
}

/// One reaction observed by a [`RecordingReactor`].
#[derive(Debug, Clone)]
pub struct RecordedReaction {
    /// Which lifecycle moment fired.
    pub kind: ActivityEventKind,
    /// The activity it was about.
    pub activity: ActivityId,
    /// The changed key, for attribute reactions.
    pub key: Option<String>,
    /// The rendered cause, for failure reactions.
    pub cause: Option<String>,
}

/// Reactor that records every reaction for later assertions.
#[derive(Debug, Default)]
pub struct RecordingReactor {
    log: Mutex<Vec<RecordedReaction>>,
}

impl RecordingReactor {
    fn record(&self, kind: ActivityEventKind, activity: &ActivityRef, key: Option<String>, cause: Option<String>) {
        self.log.lock().push(RecordedReaction {
            kind,
            activity: activity.id(),
            key,
            cause,
        });
    }

    /// Everything observed so far, in order.
    #[must_use]
    pub fn reactions(&self) -> Vec<RecordedReaction> {
        self.log.lock().clone()
    }

    /// Just the event kinds, in order.
    #[must_use]
    pub fn kinds(&self) -> Vec<ActivityEventKind> {
        self.log.lock().iter().map(|r| r.kind).collect()
    }

    /// The attribute keys observed, in order.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.log.lock().iter().filter_map(|r| r.key.clone()).collect()
    }

    /// The rendered failure causes observed, in order.
    #[must_use]
    pub fn causes(&self) -> Vec<String> {
        self.log.lock().iter().filter_map(|r| r.cause.clone()).collect()
    }
}

impl LifecycleReactor for RecordingReactor {
    fn entered(&self, activity: &ActivityRef) {
        self.record(ActivityEventKind::Entered, activity, None, None);
    }

    fn attribute_changed(&self, activity: &ActivityRef, key: &str) {
        self.record(
            ActivityEventKind::AttributeChanged,
            activity,
            Some(key.to_owned()),
            None,
        );
    }

    fn failed(&self, activity: &ActivityRef, cause: &FailureCause) {
        self.record(
            ActivityEventKind::Failed,
            activity,
            None,
            Some(cause.to_string()),
        );
    }

    fn finished(&self, activity: &ActivityRef) {
        self.record(ActivityEventKind::Finished, activity, None, None);
    }

    fn finally(&self, activity: &ActivityRef) {
        self.record(ActivityEventKind::Finally, activity, None, None);
    }
}
