//! Error types for the completion and activity layers.
//!
//! The taxonomy follows the propagation policy of the state machines:
//!
//! - [`FailureCause`]: a cheap-to-clone wrapper for whatever a computation
//!   reported; stored once in the settled outcome and shared by reference.
//! - [`CellError`]: what the wait family surfaces — a wrapped cause, a
//!   cancellation signal, or a bounded-wait timeout. Never a mixed outcome.
//! - [`SettleError`]: the invalid-state fault for completing an
//!   already-computed cell. A fatal programming error, deliberately not
//!   swallowed at the cell layer (the Promise layer swallows by policy).
//! - [`InstallError`]: double-install of the process-wide default executor.

use crate::types::{CancelReason, CellId};
use core::fmt;
use std::any::Any;
use std::error::Error;
use std::sync::Arc;
use thiserror::Error as ThisError;

/// The cause a failed computation reported.
///
/// Wraps an arbitrary error behind an `Arc` so the settled outcome can be
/// cloned out to every waiter and callback without copying the error itself.
/// The wrapped error is exposed as this cause's `source`, so chain walks
/// (the cancellation-redirect check in particular) see it and everything
/// below it.
#[derive(Clone)]
pub struct FailureCause {
    inner: Arc<dyn Error + Send + Sync + 'static>,
}

impl FailureCause {
    /// Wraps an arbitrary error as a failure cause.
    pub fn new<E>(err: E) -> Self
    where
        E: Error + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(err),
        }
    }

    /// Creates a failure cause from a plain message.
    pub fn msg(message: impl Into<String>) -> Self {
        Self::new(MessageError {
            message: message.into(),
        })
    }

    /// Creates a failure cause from a caught panic payload.
    ///
    /// String-ish payloads keep their text; anything else is recorded as an
    /// opaque panic.
    #[must_use]
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "panic payload of unknown type".to_string()
        };
        Self::new(PanicCause { message })
    }

    /// Creates a failure cause that carries a cancellation signal.
    ///
    /// Failing an activity with such a cause is redirected to the cancel
    /// path; the embedded reason survives the redirect.
    #[must_use]
    pub fn cancellation(reason: CancelReason) -> Self {
        Self::new(CellError::Cancelled(reason))
    }

    /// Walks the source chain looking for an embedded cancellation signal.
    ///
    /// Returns the first [`CancelReason`] found, whether this cause *is* a
    /// cancellation error or merely wraps one somewhere down its chain.
    #[must_use]
    pub fn as_cancellation(&self) -> Option<&CancelReason> {
        let mut current: Option<&(dyn Error + 'static)> = Some(self.inner.as_ref());
        while let Some(err) = current {
            if let Some(CellError::Cancelled(reason)) = err.downcast_ref::<CellError>() {
                return Some(reason);
            }
            current = err.source();
        }
        None
    }

    /// Returns the panic message if this cause was captured from a panic.
    #[must_use]
    pub fn as_panic(&self) -> Option<&str> {
        self.inner
            .downcast_ref::<PanicCause>()
            .map(|p| p.message.as_str())
    }

    /// Borrows the wrapped error.
    #[must_use]
    pub fn as_error(&self) -> &(dyn Error + 'static) {
        self.inner.as_ref()
    }
}

impl fmt::Debug for FailureCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("FailureCause").field(&self.inner).finish()
    }
}

impl fmt::Display for FailureCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.inner)
    }
}

impl Error for FailureCause {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        // The wrapped error is itself a chain node: a cause sitting inside
        // another error's chain must stay visible to walks over that chain.
        Some(self.inner.as_ref())
    }
}

/// A failure cause built from a plain message.
#[derive(Debug)]
struct MessageError {
    message: String,
}

impl fmt::Display for MessageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl Error for MessageError {}

/// A failure cause captured from a panic payload.
#[derive(Debug)]
struct PanicCause {
    message: String,
}

impl fmt::Display for PanicCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "panic: {}", self.message)
    }
}

impl Error for PanicCause {}

/// What a waiter observes when a cell did not finish with a value.
#[derive(Debug, Clone, ThisError)]
pub enum CellError {
    /// The computation failed; the original cause is the error source.
    #[error("computation failed: {0}")]
    Failed(#[source] FailureCause),
    /// The cell was cancelled.
    #[error("cancelled ({0})")]
    Cancelled(CancelReason),
    /// A bounded wait expired before the cell settled.
    #[error("timed out waiting for completion")]
    WaitTimeout,
}

impl CellError {
    /// Returns true if this error is a cancellation signal.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }

    /// Returns true if this error wraps a computation failure.
    #[must_use]
    pub const fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    /// Returns true if this error is a wait timeout.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::WaitTimeout)
    }
}

/// The invalid-state fault from completing a cell twice.
#[derive(Debug, Clone, PartialEq, Eq, ThisError)]
pub enum SettleError {
    /// `set_result`/`set_failure` was called on an already-computed cell.
    #[error("{cell}: completion already recorded")]
    AlreadyComputed {
        /// The cell whose completion slot was already consumed.
        cell: CellId,
    },
}

/// Installing a process-wide default executor when one is already installed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ThisError)]
#[error("a process-wide default executor is already installed")]
pub struct InstallError;
