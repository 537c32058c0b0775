//! Reference Tracker
//!
//! Id-keyed bookkeeping for caller-owned objects. Only weak handles are
//! kept, so the tracker is never the reason an object stays alive.

use crate::config::ConfigGovernor;
use crate::error::MemoryError;
use crate::events::{EventBus, EventPayload};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Non-owning liveness check for a tracked object
pub trait Liveness: Send + Sync {
    fn is_alive(&self) -> bool;
}

impl<T: ?Sized + Send + Sync> Liveness for Weak<T> {
    fn is_alive(&self) -> bool {
        self.strong_count() > 0
    }
}

struct TrackedReference {
    handle: Box<dyn Liveness>,
    type_name: String,
    registered_at: Instant,
    ref_count: usize,
    estimated_size: u64,
}

/// Reference tracker statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReferenceStats {
    pub tracked: usize,
    pub alive: usize,
    pub total_estimated_size: u64,
    pub by_type: BTreeMap<String, usize>,
    pub oldest_age: Duration,
    pub cleaned_total: u64,
    pub leak_candidates_reported: u64,
}

#[derive(Default)]
struct TrackerState {
    references: HashMap<String, TrackedReference>,
    cleaned_total: u64,
    leak_candidates_reported: u64,
    destroyed: bool,
}

/// Tracks registered objects by id
pub struct ReferenceTracker {
    state: Mutex<TrackerState>,
    config: Arc<ConfigGovernor>,
    bus: Arc<EventBus>,
}

impl ReferenceTracker {
    pub fn new(config: Arc<ConfigGovernor>, bus: Arc<EventBus>) -> Self {
        Self {
            state: Mutex::new(TrackerState::default()),
            config,
            bus,
        }
    }

    fn lock(&self) -> MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register an object under `id`, estimating its size from its type.
    ///
    /// Returns `true` if an earlier registration under the same id was
    /// replaced.
    pub fn add_reference<T>(&self, obj: &Arc<T>, id: impl Into<String>) -> bool
    where
        T: ?Sized + Send + Sync + 'static,
    {
        let size = std::mem::size_of_val(&**obj) as u64;
        self.add_reference_sized(obj, id, size)
    }

    /// Register an object with an explicit size estimate
    pub fn add_reference_sized<T>(
        &self,
        obj: &Arc<T>,
        id: impl Into<String>,
        estimated_size: u64,
    ) -> bool
    where
        T: ?Sized + Send + Sync + 'static,
    {
        let id = id.into();
        let mut state = self.lock();
        if state.destroyed {
            warn!(id = %id, "Reference tracker destroyed, ignoring registration");
            return false;
        }

        let reference = TrackedReference {
            handle: Box::new(Arc::downgrade(obj)),
            type_name: short_type_name::<T>(),
            registered_at: Instant::now(),
            ref_count: 1,
            estimated_size,
        };

        let replaced = state.references.insert(id.clone(), reference).is_some();
        if replaced {
            warn!(id = %id, "Replaced existing reference registration");
        } else {
            debug!(id = %id, size = estimated_size, "Registered reference");
        }
        replaced
    }

    /// Drop the bookkeeping for `id`
    pub fn remove_reference(&self, id: &str) -> bool {
        let removed = self.lock().references.remove(id).is_some();
        if removed {
            debug!(id = %id, "Unregistered reference");
        }
        removed
    }

    /// Increment the reference count for `id`
    pub fn retain(&self, id: &str) -> Result<usize, MemoryError> {
        let mut state = self.lock();
        let reference = state
            .references
            .get_mut(id)
            .ok_or_else(|| MemoryError::ReferenceNotFound(id.to_string()))?;
        reference.ref_count += 1;
        Ok(reference.ref_count)
    }

    /// Decrement the reference count for `id`; the entry is dropped when
    /// the count reaches zero.
    pub fn release(&self, id: &str) -> Result<usize, MemoryError> {
        let mut state = self.lock();
        let reference = state
            .references
            .get_mut(id)
            .ok_or_else(|| MemoryError::ReferenceNotFound(id.to_string()))?;
        reference.ref_count = reference.ref_count.saturating_sub(1);
        let remaining = reference.ref_count;
        if remaining == 0 {
            state.references.remove(id);
            debug!(id = %id, "Reference count reached zero, unregistered");
        }
        Ok(remaining)
    }

    pub fn ref_count(&self, id: &str) -> Option<usize> {
        self.lock().references.get(id).map(|r| r.ref_count)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.lock().references.contains_key(id)
    }

    /// Drop entries whose object is no longer reachable.
    ///
    /// Returns the number of entries removed.
    pub fn cleanup(&self) -> usize {
        let mut state = self.lock();
        let before = state.references.len();
        state.references.retain(|_, r| r.handle.is_alive());
        let removed = before - state.references.len();
        state.cleaned_total += removed as u64;

        if removed > 0 {
            debug!(removed, "Reference cleanup dropped unreachable entries");
        }
        removed
    }

    /// Report entries older than the configured leak threshold that are
    /// still reachable
    pub fn detect_leaks(&self) -> Vec<String> {
        let threshold = self.config.config().leak_detection_threshold();
        self.detect_leaks_older_than(threshold)
    }

    /// Report reachable entries registered at least `threshold` ago and
    /// emit `LeakDetected` when any are found
    pub fn detect_leaks_older_than(&self, threshold: Duration) -> Vec<String> {
        let candidates = {
            let mut state = self.lock();
            let now = Instant::now();
            let mut candidates: Vec<String> = state
                .references
                .iter()
                .filter(|(_, r)| {
                    now.duration_since(r.registered_at) >= threshold && r.handle.is_alive()
                })
                .map(|(id, _)| id.clone())
                .collect();
            candidates.sort();
            state.leak_candidates_reported += candidates.len() as u64;
            candidates
        };

        if !candidates.is_empty() {
            warn!(
                count = candidates.len(),
                "Potential leaks: {} reference(s) alive longer than {:?}",
                candidates.len(),
                threshold
            );
            self.bus.emit(EventPayload::LeakDetected {
                candidate_ids: candidates.clone(),
            });
        }

        candidates
    }

    /// Estimated size of everything still reachable
    pub fn total_estimated_size(&self) -> u64 {
        self.lock()
            .references
            .values()
            .filter(|r| r.handle.is_alive())
            .map(|r| r.estimated_size)
            .sum()
    }

    pub fn stats(&self) -> ReferenceStats {
        let state = self.lock();
        let now = Instant::now();
        let mut stats = ReferenceStats {
            tracked: state.references.len(),
            cleaned_total: state.cleaned_total,
            leak_candidates_reported: state.leak_candidates_reported,
            ..ReferenceStats::default()
        };

        for reference in state.references.values() {
            if reference.handle.is_alive() {
                stats.alive += 1;
                stats.total_estimated_size += reference.estimated_size;
            }
            *stats.by_type.entry(reference.type_name.clone()).or_insert(0) += 1;
            stats.oldest_age = stats.oldest_age.max(now.duration_since(reference.registered_at));
        }
        stats
    }

    /// Clear all entries and refuse further registrations
    pub fn destroy(&self) {
        let mut state = self.lock();
        let dropped = state.references.len();
        state.references.clear();
        state.destroyed = true;
        info!(dropped, "Reference tracker destroyed");
    }
}

/// Type name without its module path
pub(crate) fn short_type_name<T: ?Sized>() -> String {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    let short = base.rsplit("::").next().unwrap_or(base);
    format!("{}{}", short, &full[base.len()..])
}
