//! Type-erased activity handles and the event payload built around them.
//!
//! Parent/child edges and event payloads cannot name the activity's result
//! type, so they hold an [`ActivityRef`]: an `Arc` of the erased control
//! surface. Parents own strong refs to their children; children keep only a
//! weak ref back, so a forgotten subtree drops rather than leaking.

use std::fmt;
use std::sync::{Arc, Weak};

use serde::Serialize;

use crate::error::FailureCause;
use crate::types::{ActivityId, CancelKind, CancelReason};

use super::state::{ActivityEventKind, ActivityState};

/// Erased lifecycle surface. Implemented by the activity core for every
/// result type; everything tree-shaped or event-shaped goes through this.
pub(crate) trait ActivityControl: Send + Sync {
    fn id(&self) -> ActivityId;
    fn label(&self) -> &str;
    fn state(&self) -> ActivityState;
    fn cancel_with(&self, reason: CancelReason, interrupt: bool) -> bool;
    fn add_child(&self, child: ActivityRef) -> bool;
    fn remove_child(&self, id: ActivityId);
    fn snapshot(&self) -> ActivitySnapshot;
}

/// Shared, type-erased handle to an activity.
///
/// Cheap to clone; two refs compare equal when they point at the same
/// activity.
#[derive(Clone)]
pub struct ActivityRef {
    inner: Arc<dyn ActivityControl>,
}

impl ActivityRef {
    pub(crate) fn new(inner: Arc<dyn ActivityControl>) -> Self {
        Self { inner }
    }

    pub(crate) fn as_weak(&self) -> Weak<dyn ActivityControl> {
        Arc::downgrade(&self.inner)
    }

    /// Stable identifier of the referenced activity.
    #[must_use]
    pub fn id(&self) -> ActivityId {
        self.inner.id()
    }

    /// Label the activity was built with.
    #[must_use]
    pub fn label(&self) -> String {
        self.inner.label().to_owned()
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ActivityState {
        self.inner.state()
    }

    /// True once the activity reached any terminal state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.inner.state().is_terminal()
    }

    /// Cancel with the default user reason. See [`ActivityRef::cancel_with`].
    pub fn cancel(&self, interrupt: bool) -> bool {
        self.cancel_with(CancelReason::default(), interrupt)
    }

    /// Cancel the referenced activity. Returns false when it already
    /// terminated; the first terminal outcome always sticks.
    pub fn cancel_with(&self, reason: CancelReason, interrupt: bool) -> bool {
        self.inner.cancel_with(reason, interrupt)
    }

    /// Point-in-time view of the referenced subtree.
    #[must_use]
    pub fn snapshot(&self) -> ActivitySnapshot {
        self.inner.snapshot()
    }
}

impl PartialEq for ActivityRef {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id() == other.inner.id()
    }
}

impl Eq for ActivityRef {}

impl fmt::Debug for ActivityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActivityRef")
            .field("id", &self.inner.id())
            .field("label", &self.inner.label())
            .field("state", &self.inner.state())
            .finish()
    }
}

/// Payload delivered to lifecycle reactors and notification listeners.
#[derive(Debug, Clone)]
pub struct ActivityEvent {
    /// The activity the event is about.
    pub activity: ActivityRef,
    /// Which lifecycle moment fired.
    pub kind: ActivityEventKind,
    /// The key that changed, for [`ActivityEventKind::AttributeChanged`].
    pub attribute_key: Option<String>,
    /// The recorded cause, for [`ActivityEventKind::Failed`].
    pub cause: Option<FailureCause>,
}

impl ActivityEvent {
    pub(crate) fn lifecycle(kind: ActivityEventKind, activity: ActivityRef) -> Self {
        Self {
            activity,
            kind,
            attribute_key: None,
            cause: None,
        }
    }

    pub(crate) fn attribute_changed(activity: ActivityRef, key: String) -> Self {
        Self {
            activity,
            kind: ActivityEventKind::AttributeChanged,
            attribute_key: Some(key),
            cause: None,
        }
    }

    pub(crate) fn failed(activity: ActivityRef, cause: FailureCause) -> Self {
        Self {
            activity,
            kind: ActivityEventKind::Failed,
            attribute_key: None,
            cause: Some(cause),
        }
    }
}

/// Point-in-time diagnostic view of an activity and its children.
///
/// Serializes for log attachments and debug dumps; it is a copy, not a live
/// view.
#[derive(Debug, Clone, Serialize)]
pub struct ActivitySnapshot {
    /// Identifier of the activity.
    pub id: ActivityId,
    /// Its label.
    pub label: String,
    /// State at capture time.
    pub state: ActivityState,
    /// Attribute keys present at capture time.
    pub attribute_keys: Vec<String>,
    /// How it was cancelled, when `state` is cancelled.
    pub cancel_kind: Option<CancelKind>,
    /// Snapshots of the children, captured after the parent's own fields.
    pub children: Vec<ActivitySnapshot>,
}
