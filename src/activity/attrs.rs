//! Per-activity attribute storage.
//!
//! The bag lives as long as its activity is non-terminal. On the terminal
//! transition it is sealed and drained in one step; a sealed bag rejects
//! writes so late producers cannot resurrect state the lifecycle already
//! tore down.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Attribute value: one of the four primitive shapes an activity carries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    /// UTF-8 text.
    Str(String),
    /// Signed integer.
    Int(i64),
    /// Floating point.
    Float(f64),
    /// Boolean flag.
    Bool(bool),
}

impl AttrValue {
    /// Borrow the text payload, if this is a string.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// The integer payload, if this is an integer.
    #[must_use]
    pub const fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// The float payload, if this is a float.
    #[must_use]
    pub const fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(x) => Some(*x),
            _ => None,
        }
    }

    /// The boolean payload, if this is a bool.
    #[must_use]
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl fmt::Display for AttrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Str(s) => write!(f, "{s}"),
            Self::Int(n) => write!(f, "{n}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::Bool(b) => write!(f, "{b}"),
        }
    }
}

impl From<&str> for AttrValue {
    fn from(s: &str) -> Self {
        Self::Str(s.to_owned())
    }
}

impl From<String> for AttrValue {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

impl From<i64> for AttrValue {
    fn from(n: i64) -> Self {
        Self::Int(n)
    }
}

impl From<i32> for AttrValue {
    fn from(n: i32) -> Self {
        Self::Int(i64::from(n))
    }
}

impl From<f64> for AttrValue {
    fn from(x: f64) -> Self {
        Self::Float(x)
    }
}

impl From<bool> for AttrValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

/// Write attempted after the bag was sealed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct BagSealed;

#[derive(Default)]
struct BagInner {
    values: BTreeMap<String, AttrValue>,
    sealed: bool,
}

/// Keyed attribute storage with a one-way seal.
#[derive(Default)]
pub(crate) struct AttrBag {
    inner: Mutex<BagInner>,
}

impl AttrBag {
    pub(crate) const fn new() -> Self {
        Self {
            inner: Mutex::new(BagInner {
                values: BTreeMap::new(),
                sealed: false,
            }),
        }
    }

    /// Store `value` under `key`, returning the displaced value.
    pub(crate) fn set(&self, key: String, value: AttrValue) -> Result<Option<AttrValue>, BagSealed> {
        let mut inner = self.inner.lock();
        if inner.sealed {
            return Err(BagSealed);
        }
        Ok(inner.values.insert(key, value))
    }

    /// Cloned value under `key`, if present.
    pub(crate) fn get(&self, key: &str) -> Option<AttrValue> {
        self.inner.lock().values.get(key).cloned()
    }

    /// Remove `key`. A sealed bag is already empty, so this is then `None`.
    pub(crate) fn remove(&self, key: &str) -> Option<AttrValue> {
        self.inner.lock().values.remove(key)
    }

    /// Every key currently present, in sorted order.
    pub(crate) fn keys(&self) -> Vec<String> {
        self.inner.lock().values.keys().cloned().collect()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.inner.lock().values.len()
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.inner.lock().values.is_empty()
    }

    #[cfg(test)]
    pub(crate) fn is_sealed(&self) -> bool {
        self.inner.lock().sealed
    }

    /// Seal the bag and drop its contents. Values are dropped outside the
    /// lock; their destructors may run arbitrary code.
    pub(crate) fn seal_and_clear(&self) {
        let drained = {
            let mut inner = self.inner.lock();
            inner.sealed = true;
            std::mem::take(&mut inner.values)
        };
        drop(drained);
    }
}

impl fmt::Debug for AttrBag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("AttrBag")
            .field("len", &inner.values.len())
            .field("sealed", &inner.sealed)
            .finish()
    }
}
