//! Supervised activity lifecycles on top of completion cells.
//!
//! [`Activity`] adds parent/child supervision, attributes, a notification
//! channel, and external monitoring to a [`crate::cell::Promise`]. The
//! support types split across submodules:
//!
//! - [`state`]: the state and event vocabularies
//! - [`handle`]: type-erased refs, events, snapshots
//! - [`attrs`]: the sealed-on-termination attribute bag
//! - [`monitor`]: reactor dispatch with kill switch and sync mode
//! - [`core`]: the lifecycle engine and builder

pub mod attrs;
pub mod core;
pub mod handle;
pub mod monitor;
pub mod state;

pub use attrs::AttrValue;
pub use core::{Activity, ActivityBuilder};
pub use handle::{ActivityEvent, ActivityRef, ActivitySnapshot};
pub use monitor::{LifecycleMonitor, LifecycleMonitorBuilder, LifecycleReactor, NoopReactor};
pub use state::{ActivityEventKind, ActivityState};
