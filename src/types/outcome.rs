//! The observable settled outcome of a completion cell.
//!
//! A cell settles exactly once, into exactly one of three shapes:
//!
//! - `Finished(value)`: the computation produced a value and nobody discarded it
//! - `Failed(cause)`: the computation reported a failure
//! - `Cancelled(reason)`: cancellation won, and any late result was discarded
//!
//! The cancel-wins rule lives upstream in the cell state machine; by the time
//! an outcome is observable it is final and never reclassified.

use crate::error::{CellError, FailureCause};
use crate::types::CancelReason;
use core::fmt;
use serde::{Deserialize, Serialize};

/// The settled outcome of a completion cell.
///
/// Handed to completion callbacks by reference and stored behind an `Arc` so
/// repeated observation never clones the payload.
#[derive(Debug, Clone)]
pub enum SettledOutcome<T> {
    /// The computation completed with a value.
    Finished(T),
    /// The computation failed with the given cause.
    Failed(FailureCause),
    /// The cell was cancelled before a computation outcome could win.
    Cancelled(CancelReason),
}

impl<T> SettledOutcome<T> {
    /// Returns true if this outcome is `Finished`.
    #[must_use]
    pub const fn is_finished(&self) -> bool {
        matches!(self, Self::Finished(_))
    }

    /// Returns true if this outcome is `Failed`.
    #[must_use]
    pub const fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    /// Returns true if this outcome is `Cancelled`.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }

    /// Returns the finished value, if any.
    #[must_use]
    pub const fn value(&self) -> Option<&T> {
        match self {
            Self::Finished(value) => Some(value),
            _ => None,
        }
    }

    /// Returns the failure cause, if any.
    #[must_use]
    pub const fn cause(&self) -> Option<&FailureCause> {
        match self {
            Self::Failed(cause) => Some(cause),
            _ => None,
        }
    }

    /// Returns the cancellation reason, if any.
    #[must_use]
    pub const fn cancel_reason(&self) -> Option<&CancelReason> {
        match self {
            Self::Cancelled(reason) => Some(reason),
            _ => None,
        }
    }

    /// Classifies this outcome without its payload.
    #[must_use]
    pub const fn kind(&self) -> SettledKind {
        match self {
            Self::Finished(_) => SettledKind::Finished,
            Self::Failed(_) => SettledKind::Failed,
            Self::Cancelled(_) => SettledKind::Cancelled,
        }
    }

    /// Converts this outcome into a `Result`, consuming it.
    ///
    /// Failures and cancellations map onto the corresponding [`CellError`]
    /// variants.
    pub fn into_result(self) -> Result<T, CellError> {
        match self {
            Self::Finished(value) => Ok(value),
            Self::Failed(cause) => Err(CellError::Failed(cause)),
            Self::Cancelled(reason) => Err(CellError::Cancelled(reason)),
        }
    }
}

impl<T: Clone> SettledOutcome<T> {
    /// Converts this outcome into a `Result` by cloning the payload.
    ///
    /// This is what the wait family returns: every call observes the identical
    /// outcome, cloned out of the shared settled slot.
    pub fn to_result(&self) -> Result<T, CellError> {
        match self {
            Self::Finished(value) => Ok(value.clone()),
            Self::Failed(cause) => Err(CellError::Failed(cause.clone())),
            Self::Cancelled(reason) => Err(CellError::Cancelled(reason.clone())),
        }
    }
}

/// The payload-free classification of a settled outcome.
///
/// Used in snapshots and logs where the value itself does not serialize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettledKind {
    /// Completed with a value.
    Finished,
    /// Completed with a failure cause.
    Failed,
    /// Cancelled.
    Cancelled,
}

impl fmt::Display for SettledKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Finished => write!(f, "finished"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ==========================================================
    // Predicates and accessors
    // ==========================================================

    #[test]
    fn finished_predicates() {
        let outcome: SettledOutcome<u32> = SettledOutcome::Finished(7);
        assert!(outcome.is_finished());
        assert!(!outcome.is_failed());
        assert!(!outcome.is_cancelled());
        assert_eq!(outcome.value(), Some(&7));
        assert!(outcome.cause().is_none());
        assert!(outcome.cancel_reason().is_none());
        assert_eq!(outcome.kind(), SettledKind::Finished);
    }

    #[test]
    fn failed_predicates() {
        let outcome: SettledOutcome<u32> =
            SettledOutcome::Failed(FailureCause::msg("disk on fire"));
        assert!(outcome.is_failed());
        assert!(!outcome.is_finished());
        assert!(outcome.value().is_none());
        assert!(outcome.cause().is_some());
        assert_eq!(outcome.kind(), SettledKind::Failed);
    }

    #[test]
    fn cancelled_predicates() {
        let outcome: SettledOutcome<u32> =
            SettledOutcome::Cancelled(CancelReason::user("gave up"));
        assert!(outcome.is_cancelled());
        assert!(!outcome.is_finished());
        assert!(!outcome.is_failed());
        assert_eq!(
            outcome.cancel_reason().map(|r| r.kind()),
            Some(crate::types::CancelKind::User)
        );
        assert_eq!(outcome.kind(), SettledKind::Cancelled);
    }

    // ==========================================================
    // Result conversions
    // ==========================================================

    #[test]
    fn into_result_maps_variants() {
        let ok: SettledOutcome<u32> = SettledOutcome::Finished(3);
        assert_eq!(ok.into_result().expect("finished maps to Ok"), 3);

        let failed: SettledOutcome<u32> = SettledOutcome::Failed(FailureCause::msg("nope"));
        assert!(matches!(failed.into_result(), Err(CellError::Failed(_))));

        let cancelled: SettledOutcome<u32> =
            SettledOutcome::Cancelled(CancelReason::default());
        assert!(matches!(
            cancelled.into_result(),
            Err(CellError::Cancelled(_))
        ));
    }

    #[test]
    fn to_result_is_repeatable() {
        let outcome: SettledOutcome<String> = SettledOutcome::Finished("done".to_string());
        let first = outcome.to_result().expect("first read");
        let second = outcome.to_result().expect("second read");
        assert_eq!(first, second);
    }

    // ==========================================================
    // SettledKind serde
    // ==========================================================

    #[test]
    fn kind_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&SettledKind::Finished).expect("serialize"),
            "\"finished\""
        );
        assert_eq!(
            serde_json::to_string(&SettledKind::Cancelled).expect("serialize"),
            "\"cancelled\""
        );
        let back: SettledKind = serde_json::from_str("\"failed\"").expect("deserialize");
        assert_eq!(back, SettledKind::Failed);
    }

    #[test]
    fn kind_display_matches_serde() {
        assert_eq!(SettledKind::Finished.to_string(), "finished");
        assert_eq!(SettledKind::Failed.to_string(), "failed");
        assert_eq!(SettledKind::Cancelled.to_string(), "cancelled");
    }
}
