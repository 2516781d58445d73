//! Identifier types for cells and activities.
//!
//! These types provide process-unique, type-safe identifiers for the two core
//! entities: completion cells and activities. Identity is diagnostic only —
//! it names instances in logs, snapshots, and tree edges, and never affects
//! state-machine behavior.

use core::fmt;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

static CELL_COUNTER: AtomicU64 = AtomicU64::new(1);
static ACTIVITY_COUNTER: AtomicU64 = AtomicU64::new(1);

/// A unique identifier for a completion cell.
///
/// Every `Completable` (and therefore every `Promise` and `Task`) carries one.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CellId(u64);

impl CellId {
    /// Allocates the next process-unique cell identifier.
    #[must_use]
    pub fn fresh() -> Self {
        Self(CELL_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw numeric value.
    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Creates a default cell ID for unit tests that don't care about
    /// specific ID values.
    #[doc(hidden)]
    #[must_use]
    pub const fn testing_default() -> Self {
        Self(0)
    }
}

impl fmt::Debug for CellId {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CellId({})", self.0)
    }
}

impl fmt::Display for CellId {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "C{}", self.0)
    }
}

/// A unique identifier for an activity.
///
/// Used for parent/child tree edges, monitor events, and snapshots.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ActivityId(u64);

impl ActivityId {
    /// Allocates the next process-unique activity identifier.
    #[must_use]
    pub fn fresh() -> Self {
        Self(ACTIVITY_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw numeric value.
    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Creates a default activity ID for unit tests that don't care about
    /// specific ID values.
    #[doc(hidden)]
    #[must_use]
    pub const fn testing_default() -> Self {
        Self(0)
    }
}

impl fmt::Debug for ActivityId {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ActivityId({})", self.0)
    }
}

impl fmt::Display for ActivityId {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "A{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ---- CellId ----

    #[test]
    fn cell_id_fresh_is_unique() {
        let a = CellId::fresh();
        let b = CellId::fresh();
        assert_ne!(a, b);
        assert!(a.as_u64() < b.as_u64());
    }

    #[test]
    fn cell_id_display_compact() {
        let id = CellId::testing_default();
        assert_eq!(format!("{id}"), "C0");
        assert_eq!(format!("{id:?}"), "CellId(0)");
    }

    #[test]
    fn cell_id_serde_roundtrip() {
        let id = CellId::fresh();
        let json = serde_json::to_string(&id).expect("serialize");
        let back: CellId = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(id, back);
    }

    // ---- ActivityId ----

    #[test]
    fn activity_id_fresh_is_unique() {
        let a = ActivityId::fresh();
        let b = ActivityId::fresh();
        assert_ne!(a, b);
        assert!(a.as_u64() < b.as_u64());
    }

    #[test]
    fn activity_id_display_compact() {
        let id = ActivityId::testing_default();
        assert_eq!(format!("{id}"), "A0");
        assert_eq!(format!("{id:?}"), "ActivityId(0)");
    }

    #[test]
    fn activity_id_ordering_follows_allocation() {
        let first = ActivityId::fresh();
        let second = ActivityId::fresh();
        assert!(first < second);
    }

    #[test]
    fn activity_id_serde_roundtrip() {
        let id = ActivityId::fresh();
        let json = serde_json::to_string(&id).expect("serialize");
        let back: ActivityId = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(id, back);
    }
}
