//! The completion layer: single-assignment cells and their wrappers.
//!
//! - [`Completable`]: the foundational settle-once state machine.
//! - [`Task`]: runs a body and feeds its outcome into a cell, with
//!   best-effort interrupt on cancel.
//! - [`Promise`]: a cell settled only from outside, with swallow-duplicates
//!   policy and a staged-outcome slot.

pub mod callbacks;
pub mod core;
pub mod promise;
pub mod task;

pub use callbacks::CallbackId;
pub use core::Completable;
pub use promise::Promise;
pub use task::{Completer, Task, TaskContext};
