//! Human-readable label resolution.
//!
//! Labels are cosmetic: every consumer falls back to the raw key when a
//! lookup has nothing better, so a missing or empty table can never affect
//! behavior.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Resolves label keys to display text.
pub trait LabelLookup: Send + Sync {
    /// The display text for `key`, if this lookup knows one.
    fn lookup(&self, key: &str) -> Option<String>;

    /// Resolution with the key itself as the fallback.
    fn display(&self, key: &str) -> String {
        self.lookup(key).unwrap_or_else(|| key.to_string())
    }
}

/// The lookup that knows nothing; every key displays as itself.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoLabels;

impl LabelLookup for NoLabels {
    fn lookup(&self, _key: &str) -> Option<String> {
        None
    }
}

/// A fixed key-to-text table.
///
/// Deterministic iteration order makes it serialize stably, so tables can
/// live in configuration files.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StaticLabels {
    entries: BTreeMap<String, String>,
}

impl StaticLabels {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an entry, builder style.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, text: impl Into<String>) -> Self {
        self.entries.insert(key.into(), text.into());
        self
    }

    /// Adds or replaces an entry.
    pub fn insert(&mut self, key: impl Into<String>, text: impl Into<String>) {
        self.entries.insert(key.into(), text.into());
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when the table holds nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl LabelLookup for StaticLabels {
    fn lookup(&self, key: &str) -> Option<String> {
        self.entries.get(key).cloned()
    }
}
