//! Core vocabulary types.
//!
//! This module contains the fundamental types used throughout the crate:
//!
//! - [`id`]: Identifier types (`CellId`, `ActivityId`)
//! - [`cancel`]: Cancellation reason and kind types
//! - [`outcome`]: The three-valued settled outcome of a completion cell

pub mod cancel;
pub mod id;
pub mod outcome;

pub use cancel::{CancelKind, CancelReason};
pub use id::{ActivityId, CellId};
pub use outcome::{SettledKind, SettledOutcome};
