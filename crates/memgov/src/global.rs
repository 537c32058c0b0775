//! Process-wide orchestrator handle.
//!
//! Prefer passing the `Arc` from [`MemoryOrchestrator::builder`] explicitly.
//! This module exists for collaborators that cannot be handed one.

use crate::config::MemoryConfig;
use crate::error::MemoryError;
use crate::orchestrator::MemoryOrchestrator;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

static INSTANCE: Mutex<Option<Arc<MemoryOrchestrator>>> = Mutex::new(None);

fn slot() -> MutexGuard<'static, Option<Arc<MemoryOrchestrator>>> {
    INSTANCE.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Get the process-wide orchestrator, building and starting it on first use.
///
/// Later calls return the existing instance and ignore `config`. Destroying
/// the instance clears the slot so the next call builds a fresh one.
pub fn instance(config: &MemoryConfig) -> Result<Arc<MemoryOrchestrator>, MemoryError> {
    let mut slot = slot();
    if let Some(existing) = slot.as_ref() {
        debug!("Returning existing memory orchestrator");
        return Ok(existing.clone());
    }

    let orchestrator = MemoryOrchestrator::new(config)?;
    orchestrator.start()?;
    *slot = Some(orchestrator.clone());
    Ok(orchestrator)
}

/// The process-wide orchestrator, if one has been built
pub fn current() -> Option<Arc<MemoryOrchestrator>> {
    slot().clone()
}

/// Clear the slot if it holds `orchestrator`
pub(crate) fn release(orchestrator: &MemoryOrchestrator) {
    let mut slot = slot();
    if slot
        .as_ref()
        .is_some_and(|held| std::ptr::eq(Arc::as_ptr(held), orchestrator))
    {
        *slot = None;
        debug!("Released global memory orchestrator");
    }
}
