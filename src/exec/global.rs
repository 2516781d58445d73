//! The process-wide default executor.
//!
//! Executors are normally injected at construction; this slot exists for
//! call sites that cannot thread one through. Its lifecycle is explicit:
//! [`install_default_executor`] once at startup,
//! [`reset_default_executor`] at teardown (the caller shuts the returned
//! executor down). While nothing is installed, [`default_executor`] hands
//! out a shared [`CallerThread`].

use crate::error::InstallError;
use crate::exec::{CallerThread, Executor};
use parking_lot::RwLock;
use std::sync::{Arc, OnceLock};

static INSTALLED: RwLock<Option<Arc<dyn Executor>>> = RwLock::new(None);
static FALLBACK: OnceLock<Arc<dyn Executor>> = OnceLock::new();

/// Installs the process-wide default executor.
///
/// Fails if one is already installed; reset first to swap.
pub fn install_default_executor(executor: Arc<dyn Executor>) -> Result<(), InstallError> {
    let mut slot = INSTALLED.write();
    if slot.is_some() {
        return Err(InstallError);
    }
    *slot = Some(executor);
    drop(slot);
    tracing::info!("process-wide default executor installed");
    Ok(())
}

/// Clears the slot, returning the installed executor for teardown.
///
/// Call sites that resolved the default earlier keep whatever they got;
/// only future [`default_executor`] calls see the change.
pub fn reset_default_executor() -> Option<Arc<dyn Executor>> {
    let previous = INSTALLED.write().take();
    if previous.is_some() {
        tracing::info!("process-wide default executor reset");
    }
    previous
}

/// The installed default, or the shared caller-thread fallback.
#[must_use]
pub fn default_executor() -> Arc<dyn Executor> {
    if let Some(executor) = INSTALLED.read().as_ref() {
        return Arc::clone(executor);
    }
    Arc::clone(FALLBACK.get_or_init(|| Arc::new(CallerThread)))
}
