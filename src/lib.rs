//! Settle: supervised single-assignment results with cancel-correct lifecycles.
//!
//! # Overview
//!
//! Settle is built around one rule: a result slot settles exactly once, and
//! cancellation is a first-class outcome rather than a silent drop. The crate
//! has two layers. The cell layer ([`Completable`], [`Promise`], [`Task`])
//! is the single-assignment machinery: a thread-safe slot that resolves to a
//! value, a failure, or a cancellation, with waiters, callbacks, and an undo
//! hook for payloads that lose the race. The activity layer ([`Activity`])
//! wraps a promise in a supervised lifecycle: parent/child trees with
//! cascading cancellation, validation-gated completion, attributes, a
//! notification channel, and an external lifecycle monitor.
//!
//! # Core Guarantees
//!
//! - **Single assignment**: a cell settles into exactly one of finished,
//!   failed, or cancelled; later reports are swallowed, never replayed
//! - **Cancel-wins**: a cancellation recorded before a computation's own
//!   report wins the race; the late payload is discarded through the undo hook
//! - **State-then-notify**: observable flags flip before any listener runs,
//!   and no lock is held while listeners run
//! - **Always-once finally**: every terminal activity runs its epilogue
//!   exactly once, on every terminal path
//! - **Explicit dependencies**: executors, monitors, and label tables are
//!   injected; the only process-wide default is the executor slot, with an
//!   explicit install/reset lifecycle
//!
//! # Module Structure
//!
//! - [`types`]: identifiers, cancellation reasons, settled outcomes
//! - [`error`](mod@error): failure causes and error types
//! - [`cell`]: the single-assignment cell, task wrapper, and promise
//! - [`exec`]: the executor seam, thread pool, and process-wide default
//! - [`notify`]: the keyed listener registry behind activity notifications
//! - [`label`]: label lookup for display names
//! - [`activity`]: the supervised lifecycle layer and its monitor

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::doc_markdown)]

pub mod activity;
pub mod cell;
pub mod error;
pub mod exec;
pub mod label;
pub mod notify;
pub mod types;

#[cfg(any(test, feature = "test-internals"))]
pub mod test_utils;

// Re-exports for convenient access to core types
pub use activity::{
    Activity, ActivityBuilder, ActivityEvent, ActivityEventKind, ActivityRef, ActivitySnapshot,
    ActivityState, AttrValue, LifecycleMonitor, LifecycleMonitorBuilder, LifecycleReactor,
    NoopReactor,
};
pub use cell::{CallbackId, Completable, Completer, Promise, Task, TaskContext};
pub use error::{CellError, FailureCause, InstallError, SettleError};
pub use exec::{
    CallerThread, Executor, SubmitHandle, ThreadPool, WorkUnit, default_executor,
    install_default_executor, reset_default_executor,
};
pub use label::{LabelLookup, NoLabels, StaticLabels};
pub use notify::{Notifier, SubscriptionId};
pub use types::{ActivityId, CancelKind, CancelReason, CellId, SettledKind, SettledOutcome};
