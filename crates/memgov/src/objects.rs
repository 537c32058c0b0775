//! Object Lifetime Observation
//!
//! Groups weakly observed objects by logical type and counts how many of
//! them have gone away between collection passes.
//!
//! Callers may also embed a [`FinalizationToken`] in a tracked object.
//! Dropping the token posts the object id on a channel that is drained at
//! the next accounting pass. These signals are advisory: they may arrive
//! late or never, and accounting never waits for them.

use crate::tracker::{Liveness, ReferenceStats};
use crossbeam_channel::{unbounded, Receiver, Sender};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Idle time after which an empty group is dropped
pub const STALE_GROUP_AGE: Duration = Duration::from_secs(5 * 60);

static NEXT_OBJECT_ID: AtomicU64 = AtomicU64::new(1);

/// Identifier handed out by `track`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ObjectId(pub u64);

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "obj-{}", self.0)
    }
}

/// Drop signal for a tracked object
#[derive(Debug)]
pub struct FinalizationToken {
    id: ObjectId,
    tx: Sender<ObjectId>,
}

impl FinalizationToken {
    pub fn id(&self) -> ObjectId {
        self.id
    }
}

impl Drop for FinalizationToken {
    fn drop(&mut self) {
        // Receiver may already be gone after destroy
        let _ = self.tx.send(self.id);
    }
}

struct Observation {
    id: ObjectId,
    handle: Box<dyn Liveness>,
    size: u64,
}

struct TrackedObjectGroup {
    observations: Vec<Observation>,
    total_size: u64,
    last_seen: Instant,
    collected: u64,
    finalized: u64,
}

impl TrackedObjectGroup {
    fn new() -> Self {
        Self {
            observations: Vec::new(),
            total_size: 0,
            last_seen: Instant::now(),
            collected: 0,
            finalized: 0,
        }
    }

    fn count(&self) -> usize {
        self.observations.len()
    }
}

/// Per-type breakdown
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TypeCollectionStats {
    pub live: usize,
    pub collected: u64,
    pub total_size: u64,
    pub finalized: u64,
    /// Objects registered by id under this type name
    pub registered: usize,
}

/// Tracked/collected breakdown across all types
#[derive(Debug, Clone, Default, Serialize)]
pub struct ObjectCollectionStats {
    pub total_tracked: u64,
    pub live_objects: usize,
    pub total_collected: u64,
    pub finalization_signals: u64,
    pub registered_references: usize,
    pub by_type: BTreeMap<String, TypeCollectionStats>,
}

/// Result of one accounting sweep
#[derive(Debug, Clone, Default)]
pub struct AccountingOutcome {
    pub collected: u64,
    pub by_type: BTreeMap<String, u64>,
    pub bytes_released: u64,
    pub finalization_signals: u64,
}

#[derive(Default)]
struct CollectorState {
    groups: HashMap<String, TrackedObjectGroup>,
    owners: HashMap<ObjectId, String>,
    total_tracked: u64,
    total_collected: u64,
    finalization_signals: u64,
    destroyed: bool,
}

/// Weak lifetime observation grouped by type
pub struct ObjectCollector {
    state: Mutex<CollectorState>,
    finalize_tx: Sender<ObjectId>,
    finalize_rx: Receiver<ObjectId>,
}

impl ObjectCollector {
    pub fn new() -> Self {
        let (finalize_tx, finalize_rx) = unbounded();
        Self {
            state: Mutex::new(CollectorState::default()),
            finalize_tx,
            finalize_rx,
        }
    }

    fn lock(&self) -> MutexGuard<'_, CollectorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start observing `obj` under a logical type name
    pub fn track<T>(&self, obj: &Arc<T>, type_name: &str, estimated_size: u64) -> ObjectId
    where
        T: ?Sized + Send + Sync + 'static,
    {
        let id = ObjectId(NEXT_OBJECT_ID.fetch_add(1, Ordering::Relaxed));
        let mut state = self.lock();
        if state.destroyed {
            return id;
        }

        let group = state
            .groups
            .entry(type_name.to_string())
            .or_insert_with(TrackedObjectGroup::new);
        group.observations.push(Observation {
            id,
            handle: Box::new(Arc::downgrade(obj)),
            size: estimated_size,
        });
        group.total_size += estimated_size;
        group.last_seen = Instant::now();

        state.owners.insert(id, type_name.to_string());
        state.total_tracked += 1;
        trace!(id = %id, type_name, size = estimated_size, "Tracking object");
        id
    }

    /// Token whose drop reports `id` as finalized
    pub fn finalization_token(&self, id: ObjectId) -> FinalizationToken {
        FinalizationToken {
            id,
            tx: self.finalize_tx.clone(),
        }
    }

    /// Drop dead observations and count them per type
    pub fn account(&self) -> AccountingOutcome {
        let mut outcome = AccountingOutcome::default();
        let mut state = self.lock();

        // Drain advisory signals first
        let signals: Vec<ObjectId> = self.finalize_rx.try_iter().collect();
        for id in signals {
            let Some(type_name) = state.owners.get(&id).cloned() else {
                continue;
            };
            if let Some(group) = state.groups.get_mut(&type_name) {
                group.finalized += 1;
            }
            outcome.finalization_signals += 1;
        }
        state.finalization_signals += outcome.finalization_signals;

        let mut released_ids = Vec::new();
        for (type_name, group) in state.groups.iter_mut() {
            let before = group.count();
            let mut freed = 0;
            group.observations.retain(|o| {
                let alive = o.handle.is_alive();
                if !alive {
                    freed += o.size;
                    released_ids.push(o.id);
                }
                alive
            });

            let collected = (before - group.count()) as u64;
            if collected > 0 {
                group.total_size = group.total_size.saturating_sub(freed);
                group.collected += collected;
                outcome.by_type.insert(type_name.clone(), collected);
                outcome.collected += collected;
                outcome.bytes_released += freed;
            }
        }

        for id in released_ids {
            state.owners.remove(&id);
        }
        state.total_collected += outcome.collected;

        if outcome.collected > 0 {
            debug!(
                collected = outcome.collected,
                types = outcome.by_type.len(),
                "Object accounting found collected objects"
            );
        }
        outcome
    }

    /// Remove empty groups idle for longer than `max_idle`
    pub fn remove_stale_groups(&self, max_idle: Duration) -> usize {
        let mut state = self.lock();
        let before = state.groups.len();
        state
            .groups
            .retain(|_, g| g.count() > 0 || g.last_seen.elapsed() <= max_idle);
        before - state.groups.len()
    }

    /// Observations not yet swept
    pub fn tracked_count(&self) -> usize {
        self.lock().groups.values().map(TrackedObjectGroup::count).sum()
    }

    /// Estimated size of live tracked objects
    pub fn total_size(&self) -> u64 {
        self.lock()
            .groups
            .values()
            .flat_map(|g| g.observations.iter())
            .filter(|o| o.handle.is_alive())
            .map(|o| o.size)
            .sum()
    }

    /// Per-type breakdown, merged with id-registered references
    pub fn stats(&self, references: &ReferenceStats) -> ObjectCollectionStats {
        let state = self.lock();
        let mut stats = ObjectCollectionStats {
            total_tracked: state.total_tracked,
            total_collected: state.total_collected,
            finalization_signals: state.finalization_signals,
            registered_references: references.tracked,
            ..ObjectCollectionStats::default()
        };

        for (type_name, group) in &state.groups {
            let live = group
                .observations
                .iter()
                .filter(|o| o.handle.is_alive())
                .count();
            stats.live_objects += live;
            stats.by_type.insert(
                type_name.clone(),
                TypeCollectionStats {
                    live,
                    collected: group.collected,
                    total_size: group.total_size,
                    finalized: group.finalized,
                    registered: 0,
                },
            );
        }

        for (type_name, count) in &references.by_type {
            stats.by_type.entry(type_name.clone()).or_default().registered = *count;
        }
        stats
    }

    pub fn destroy(&self) {
        let mut state = self.lock();
        state.groups.clear();
        state.owners.clear();
        state.destroyed = true;
        let _ = self.finalize_rx.try_iter().count();
    }
}

impl Default for ObjectCollector {
    fn default() -> Self {
        Self::new()
    }
}
