//! Lifecycle state and event vocabulary.

use core::fmt;
use serde::{Deserialize, Serialize};

/// Where an activity sits in its lifecycle.
///
/// `Ok`, `Cancelled`, and `Failed` are terminal; an activity reaches exactly
/// one of them, exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityState {
    /// Built but not yet entered.
    Created,
    /// Entered and running (or awaiting an interactive completion).
    Active,
    /// Finished with an accepted value.
    Ok,
    /// Cancelled, by a caller or a parent cascade.
    Cancelled,
    /// Failed with a recorded cause.
    Failed,
}

impl ActivityState {
    /// True for the three states an activity can never leave.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Ok | Self::Cancelled | Self::Failed)
    }
}

impl fmt::Display for ActivityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Active => write!(f, "active"),
            Self::Ok => write!(f, "ok"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// The five observable lifecycle moments.
///
/// Cancellation deliberately has no kind of its own: a cancelled activity
/// emits neither `Finished` nor `Failed`, only the unconditional `Finally`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityEventKind {
    /// The activity transitioned to active.
    Entered,
    /// An attribute was set or removed while active.
    AttributeChanged,
    /// The activity reached `Failed`.
    Failed,
    /// The activity reached `Ok`.
    Finished,
    /// Terminal epilogue, after any of the three terminal states.
    Finally,
}

impl fmt::Display for ActivityEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Entered => write!(f, "entered"),
            Self::AttributeChanged => write!(f, "attribute_changed"),
            Self::Failed => write!(f, "failed"),
            Self::Finished => write!(f, "finished"),
            Self::Finally => write!(f, "finally"),
        }
    }
}
