//! Event Bus
//!
//! Typed publish/subscribe channel for governor notifications.
//!
//! Emission pipeline:
//! 1. Disabled bus: nothing happens
//! 2. Run every filter; any `false` drops the event entirely
//! 3. Assign the per-kind sequence number and a unique id, then append to
//!    the bounded history (oldest evicted first) in the same critical section
//! 4. Deliver synchronously to a snapshot of the kind's listeners
//!
//! Filter and listener panics are isolated. A listener panic is reported
//! as an `ErrorOccurred` event unless the event being delivered was itself
//! `ErrorOccurred`, in which case it is only logged.

use crate::config::{ConfigChanges, MemoryConfig};
use crate::error::panic_message;
use crate::pressure::PressureInfo;
use crate::stats::{unix_millis, CollectionResult, GcTrigger, PerformanceMetrics};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, error, warn};

/// Global event id counter
static NEXT_EVENT_ID: AtomicU64 = AtomicU64::new(1);

/// Event type tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum EventKind {
    Started,
    Stopped,
    ConfigUpdated,
    GcTriggered,
    GcCompleted,
    MemoryPressure,
    LeakDetected,
    ErrorOccurred,
    PoolCreated,
    PoolRemoved,
    CleanupCompleted,
    PerformanceSampled,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Event payloads, one variant per event kind
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum EventPayload {
    Started,
    Stopped,
    ConfigUpdated {
        new_config: MemoryConfig,
        changes: ConfigChanges,
    },
    GcTriggered {
        before_usage: u64,
        pressure: f64,
        trigger: GcTrigger,
    },
    GcCompleted(CollectionResult),
    MemoryPressure(PressureInfo),
    LeakDetected {
        candidate_ids: Vec<String>,
    },
    ErrorOccurred {
        operation: String,
        error: String,
        error_count: u64,
    },
    PoolCreated {
        name: String,
        capacity: usize,
    },
    PoolRemoved {
        name: String,
    },
    CleanupCompleted {
        references_removed: usize,
        groups_removed: usize,
        pool_items_evicted: usize,
    },
    PerformanceSampled(PerformanceMetrics),
}

impl EventPayload {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Started => EventKind::Started,
            Self::Stopped => EventKind::Stopped,
            Self::ConfigUpdated { .. } => EventKind::ConfigUpdated,
            Self::GcTriggered { .. } => EventKind::GcTriggered,
            Self::GcCompleted(_) => EventKind::GcCompleted,
            Self::MemoryPressure(_) => EventKind::MemoryPressure,
            Self::LeakDetected { .. } => EventKind::LeakDetected,
            Self::ErrorOccurred { .. } => EventKind::ErrorOccurred,
            Self::PoolCreated { .. } => EventKind::PoolCreated,
            Self::PoolRemoved { .. } => EventKind::PoolRemoved,
            Self::CleanupCompleted { .. } => EventKind::CleanupCompleted,
            Self::PerformanceSampled(_) => EventKind::PerformanceSampled,
        }
    }
}

/// Unique event identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct EventId(pub u64);

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "evt-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EventMetadata {
    pub event_id: EventId,
    /// Strictly increasing per event kind
    pub sequence: u64,
}

/// An emitted event. Immutable once built.
#[derive(Debug, Clone, Serialize)]
pub struct MemoryEvent {
    pub timestamp: u64,
    pub payload: EventPayload,
    pub metadata: EventMetadata,
}

impl MemoryEvent {
    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }
}

pub type Listener = Arc<dyn Fn(&MemoryEvent) + Send + Sync>;
pub type EventFilter = Arc<dyn Fn(&MemoryEvent) -> bool + Send + Sync>;

/// Handle returned by `on`/`once`, used to unsubscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Handle returned by `add_filter`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FilterId(u64);

/// Bus settings derived from the memory config
#[derive(Debug, Clone, Copy)]
pub struct EventBusConfig {
    pub max_history: usize,
    /// Log every accepted event at debug level
    pub log_events: bool,
}

impl From<&MemoryConfig> for EventBusConfig {
    fn from(config: &MemoryConfig) -> Self {
        Self {
            max_history: config.max_event_history,
            log_events: config.enable_event_logging,
        }
    }
}

/// Bus counters
#[derive(Debug, Clone, Default, Serialize)]
pub struct EventStats {
    pub total_emitted: u64,
    /// Dropped by a filter veto
    pub filtered: u64,
    pub listener_errors: u64,
    pub filter_errors: u64,
    pub history_len: usize,
    pub max_history: usize,
    pub emitted_by_kind: BTreeMap<EventKind, u64>,
    pub listeners_by_kind: BTreeMap<EventKind, usize>,
}

struct ListenerEntry {
    id: ListenerId,
    callback: Listener,
    once: bool,
}

struct BusState {
    enabled: bool,
    destroyed: bool,
    config: EventBusConfig,
    listeners: HashMap<EventKind, Vec<ListenerEntry>>,
    filters: Vec<(FilterId, EventFilter)>,
    history: VecDeque<MemoryEvent>,
    sequences: HashMap<EventKind, u64>,
    stats: EventStats,
}

/// Publish/subscribe bus with filters and bounded history
pub struct EventBus {
    state: Mutex<BusState>,
    next_handle: AtomicU64,
    errors: AtomicU64,
}

impl EventBus {
    pub fn new(config: EventBusConfig) -> Self {
        Self {
            state: Mutex::new(BusState {
                enabled: true,
                destroyed: false,
                config,
                listeners: HashMap::new(),
                filters: Vec::new(),
                history: VecDeque::with_capacity(config.max_history.min(1024)),
                sequences: HashMap::new(),
                stats: EventStats::default(),
            }),
            next_handle: AtomicU64::new(1),
            errors: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BusState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn next_handle(&self) -> u64 {
        self.next_handle.fetch_add(1, Ordering::Relaxed)
    }

    /// Subscribe to one event kind
    pub fn on<F>(&self, kind: EventKind, listener: F) -> ListenerId
    where
        F: Fn(&MemoryEvent) + Send + Sync + 'static,
    {
        self.add_listener(kind, Arc::new(listener))
    }

    /// Subscribe a shared listener. Registering the same `Arc` twice for a
    /// kind returns the existing id instead of adding a duplicate.
    pub fn add_listener(&self, kind: EventKind, listener: Listener) -> ListenerId {
        let mut state = self.lock();
        let entries = state.listeners.entry(kind).or_default();

        if let Some(existing) = entries
            .iter()
            .find(|e| !e.once && Arc::ptr_eq(&e.callback, &listener))
        {
            return existing.id;
        }

        let id = ListenerId(self.next_handle());
        entries.push(ListenerEntry {
            id,
            callback: listener,
            once: false,
        });
        id
    }

    /// Subscribe for a single delivery
    pub fn once<F>(&self, kind: EventKind, listener: F) -> ListenerId
    where
        F: Fn(&MemoryEvent) + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_handle());
        self.lock()
            .listeners
            .entry(kind)
            .or_default()
            .push(ListenerEntry {
                id,
                callback: Arc::new(listener),
                once: true,
            });
        id
    }

    /// Unsubscribe. Returns whether the listener was registered.
    pub fn off(&self, kind: EventKind, id: ListenerId) -> bool {
        let mut state = self.lock();
        let Some(entries) = state.listeners.get_mut(&kind) else {
            return false;
        };
        let before = entries.len();
        entries.retain(|e| e.id != id);
        before != entries.len()
    }

    /// Drop every listener for a kind, or all listeners
    pub fn remove_all_listeners(&self, kind: Option<EventKind>) {
        let mut state = self.lock();
        match kind {
            Some(kind) => {
                state.listeners.remove(&kind);
            }
            None => state.listeners.clear(),
        }
    }

    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.lock().listeners.get(&kind).map_or(0, Vec::len)
    }

    /// Register a filter. Returning `false` vetoes the event.
    pub fn add_filter<F>(&self, filter: F) -> FilterId
    where
        F: Fn(&MemoryEvent) -> bool + Send + Sync + 'static,
    {
        let id = FilterId(self.next_handle());
        self.lock().filters.push((id, Arc::new(filter)));
        id
    }

    pub fn remove_filter(&self, id: FilterId) -> bool {
        let mut state = self.lock();
        let before = state.filters.len();
        state.filters.retain(|(fid, _)| *fid != id);
        before != state.filters.len()
    }

    /// Emit an event. Returns it if it was accepted.
    ///
    /// Filters see the payload and timestamp with provisional metadata. The
    /// sequence number and id are assigned together with the history append,
    /// so history order always matches sequence order.
    pub fn emit(&self, payload: EventPayload) -> Option<MemoryEvent> {
        let kind = payload.kind();

        let filters: Vec<EventFilter> = {
            let state = self.lock();
            if !state.enabled {
                return None;
            }
            state.filters.iter().map(|(_, f)| f.clone()).collect()
        };

        let mut event = MemoryEvent {
            timestamp: unix_millis(),
            payload,
            metadata: EventMetadata {
                event_id: EventId(0),
                sequence: 0,
            },
        };

        if !self.passes_filters(&event, &filters) {
            let mut state = self.lock();
            state.stats.filtered += 1;
            debug!(kind = %kind, "Event dropped by filter");
            return None;
        }

        let listeners = {
            let mut state = self.lock();
            if !state.enabled {
                return None;
            }

            let sequence = state.sequences.entry(kind).or_insert(0);
            *sequence += 1;
            event.metadata = EventMetadata {
                event_id: EventId(NEXT_EVENT_ID.fetch_add(1, Ordering::Relaxed)),
                sequence: *sequence,
            };

            state.history.push_back(event.clone());
            while state.history.len() > state.config.max_history {
                state.history.pop_front();
            }

            state.stats.total_emitted += 1;
            *state.stats.emitted_by_kind.entry(kind).or_insert(0) += 1;

            if state.config.log_events {
                debug!(
                    kind = %kind,
                    sequence = event.metadata.sequence,
                    id = %event.metadata.event_id,
                    "Memory event"
                );
            }

            // Snapshot; once-listeners are removed before delivery
            match state.listeners.get_mut(&kind) {
                Some(entries) => {
                    let snapshot: Vec<Listener> =
                        entries.iter().map(|e| e.callback.clone()).collect();
                    entries.retain(|e| !e.once);
                    snapshot
                }
                None => Vec::new(),
            }
        };

        for listener in listeners {
            let result = panic::catch_unwind(AssertUnwindSafe(|| listener(&event)));
            if let Err(payload) = result {
                self.handle_listener_panic(kind, panic_message(payload));
            }
        }

        Some(event)
    }

    /// Run every filter. A panicking filter does not veto.
    fn passes_filters(&self, event: &MemoryEvent, filters: &[EventFilter]) -> bool {
        let mut accepted = true;
        for filter in filters {
            match panic::catch_unwind(AssertUnwindSafe(|| filter(event))) {
                Ok(true) => {}
                Ok(false) => accepted = false,
                Err(payload) => {
                    self.lock().stats.filter_errors += 1;
                    warn!(
                        kind = %event.kind(),
                        "Event filter panicked: {}",
                        panic_message(payload)
                    );
                }
            }
        }
        accepted
    }

    fn handle_listener_panic(&self, kind: EventKind, message: String) {
        self.lock().stats.listener_errors += 1;
        let error_count = self.record_error();

        if kind == EventKind::ErrorOccurred {
            error!("Listener failed while handling ErrorOccurred: {}", message);
            return;
        }

        warn!(kind = %kind, "Event listener panicked: {}", message);
        self.emit(EventPayload::ErrorOccurred {
            operation: format!("listener:{}", kind),
            error: message,
            error_count,
        });
    }

    /// Count one error and return the new total. Every `ErrorOccurred`
    /// carries this total, whether the error came from a listener or from
    /// an orchestrator operation.
    pub fn record_error(&self) -> u64 {
        self.errors.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Errors recorded so far, including listener panics
    pub fn error_count(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    /// Accepted events, oldest first, optionally narrowed to one kind and
    /// to the most recent `limit`
    pub fn history(&self, kind: Option<EventKind>, limit: Option<usize>) -> Vec<MemoryEvent> {
        let state = self.lock();
        let matching: Vec<&MemoryEvent> = state
            .history
            .iter()
            .filter(|e| kind.map_or(true, |k| e.kind() == k))
            .collect();
        let skip = limit.map_or(0, |limit| matching.len().saturating_sub(limit));
        matching.into_iter().skip(skip).cloned().collect()
    }

    pub fn clear_history(&self) {
        self.lock().history.clear();
    }

    pub fn stats(&self) -> EventStats {
        let state = self.lock();
        let mut stats = state.stats.clone();
        stats.history_len = state.history.len();
        stats.max_history = state.config.max_history;
        stats.listeners_by_kind = state
            .listeners
            .iter()
            .filter(|(_, entries)| !entries.is_empty())
            .map(|(kind, entries)| (*kind, entries.len()))
            .collect();
        stats
    }

    /// Apply new settings. Shrinking `max_history` evicts immediately.
    pub fn update_config(&self, config: EventBusConfig) {
        let mut state = self.lock();
        state.config = config;
        while state.history.len() > config.max_history {
            state.history.pop_front();
        }
    }

    pub fn set_enabled(&self, enabled: bool) {
        let mut state = self.lock();
        if state.destroyed {
            return;
        }
        state.enabled = enabled;
    }

    pub fn is_enabled(&self) -> bool {
        self.lock().enabled
    }

    /// Clear all state and disable further emission
    pub fn destroy(&self) {
        let mut state = self.lock();
        state.enabled = false;
        state.destroyed = true;
        state.listeners.clear();
        state.filters.clear();
        state.history.clear();
        state.sequences.clear();
        debug!("Event bus destroyed");
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(EventBusConfig::from(&MemoryConfig::default()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn bus(max_history: usize) -> EventBus {
        EventBus::new(EventBusConfig {
            max_history,
            log_events: true,
        })
    }

    fn leak(id: &str) -> EventPayload {
        EventPayload::LeakDetected {
            candidate_ids: vec![id.to_string()],
        }
    }

    fn leak_ids(events: &[MemoryEvent]) -> Vec<String> {
        events
            .iter()
            .filter_map(|e| match &e.payload {
                EventPayload::LeakDetected { candidate_ids } => candidate_ids.first().cloned(),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_history_keeps_last_n() {
        let bus = bus(3);
        for i in 1..=5 {
            bus.emit(leak(&i.to_string()));
        }

        let history = bus.history(None, None);
        assert_eq!(leak_ids(&history), vec!["3", "4", "5"]);
    }

    #[test]
    fn test_history_kind_and_limit() {
        let bus = bus(10);
        bus.emit(EventPayload::Started);
        bus.emit(leak("a"));
        bus.emit(leak("b"));
        bus.emit(EventPayload::Stopped);

        assert_eq!(bus.history(Some(EventKind::LeakDetected), None).len(), 2);
        assert_eq!(leak_ids(&bus.history(Some(EventKind::LeakDetected), Some(1))), vec!["b"]);
        assert_eq!(bus.history(None, Some(2)).len(), 2);
    }

    #[test]
    fn test_sequences_are_per_kind() {
        let bus = bus(10);
        let a = bus.emit(EventPayload::Started).unwrap();
        let b = bus.emit(leak("x")).unwrap();
        let c = bus.emit(EventPayload::Started).unwrap();

        assert_eq!(a.metadata.sequence, 1);
        assert_eq!(b.metadata.sequence, 1);
        assert_eq!(c.metadata.sequence, 2);
        assert_ne!(a.metadata.event_id, c.metadata.event_id);
    }

    #[test]
    fn test_history_order_matches_sequence_under_slow_filter() {
        let bus = Arc::new(bus(10));
        let stalled = Arc::new(AtomicUsize::new(0));
        let flag = stalled.clone();
        bus.add_filter(move |_| {
            if flag.fetch_add(1, Ordering::SeqCst) == 0 {
                std::thread::sleep(std::time::Duration::from_millis(200));
            }
            true
        });

        let slow = {
            let bus = bus.clone();
            std::thread::spawn(move || bus.emit(EventPayload::Started))
        };
        while stalled.load(Ordering::SeqCst) == 0 {
            std::thread::yield_now();
        }
        let fast = bus.emit(EventPayload::Started).unwrap();
        let slow = slow.join().unwrap().unwrap();

        assert_eq!(fast.metadata.sequence, 1);
        assert_eq!(slow.metadata.sequence, 2);
        let sequences: Vec<u64> = bus
            .history(Some(EventKind::Started), None)
            .iter()
            .map(|e| e.metadata.sequence)
            .collect();
        assert_eq!(sequences, vec![1, 2]);
    }

    #[test]
    fn test_vetoed_events_leave_no_sequence_gap() {
        let bus = bus(10);
        bus.add_filter(|e| match &e.payload {
            EventPayload::LeakDetected { candidate_ids } => candidate_ids[0] != "drop",
            _ => true,
        });

        bus.emit(leak("a"));
        assert!(bus.emit(leak("drop")).is_none());
        let b = bus.emit(leak("b")).unwrap();
        assert_eq!(b.metadata.sequence, 2);
    }

    #[test]
    fn test_listeners_in_registration_order() {
        let bus = bus(10);
        let order = Arc::new(Mutex::new(Vec::new()));

        for n in 0..3 {
            let order = order.clone();
            bus.on(EventKind::Started, move |_| order.lock().unwrap().push(n));
        }
        bus.emit(EventPayload::Started);

        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn test_same_listener_registered_once() {
        let bus = bus(10);
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let listener: Listener = Arc::new(move |_: &MemoryEvent| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let first = bus.add_listener(EventKind::Started, listener.clone());
        let second = bus.add_listener(EventKind::Started, listener);
        assert_eq!(first, second);

        bus.emit(EventPayload::Started);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        assert!(bus.off(EventKind::Started, first));
        bus.emit(EventPayload::Started);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_once_listener_fires_once() {
        let bus = bus(10);
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        bus.once(EventKind::Stopped, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        bus.emit(EventPayload::Stopped);
        bus.emit(EventPayload::Stopped);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(bus.listener_count(EventKind::Stopped), 0);
    }

    #[test]
    fn test_filter_veto_drops_event() {
        let bus = bus(10);
        let delivered = Arc::new(AtomicUsize::new(0));
        let counter = delivered.clone();
        bus.on(EventKind::LeakDetected, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        bus.add_filter(|e| e.kind() != EventKind::LeakDetected);

        assert!(bus.emit(leak("x")).is_none());
        assert!(bus.emit(EventPayload::Started).is_some());

        assert_eq!(delivered.load(Ordering::SeqCst), 0);
        assert_eq!(bus.history(None, None).len(), 1);
        assert_eq!(bus.stats().filtered, 1);
    }

    #[test]
    fn test_panicking_filter_does_not_veto() {
        let bus = bus(10);
        let ran = Arc::new(AtomicUsize::new(0));
        bus.add_filter(|_| panic!("bad filter"));
        let counter = ran.clone();
        bus.add_filter(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            true
        });

        assert!(bus.emit(EventPayload::Started).is_some());
        assert_eq!(ran.load(Ordering::SeqCst), 1);
        assert_eq!(bus.stats().filter_errors, 1);
    }

    #[test]
    fn test_listener_panic_reported_as_error_event() {
        let bus = bus(10);
        let after = Arc::new(AtomicUsize::new(0));
        bus.on(EventKind::Started, |_| panic!("listener failed"));
        let counter = after.clone();
        bus.on(EventKind::Started, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        bus.emit(EventPayload::Started);

        assert_eq!(after.load(Ordering::SeqCst), 1);
        let errors = bus.history(Some(EventKind::ErrorOccurred), None);
        assert_eq!(errors.len(), 1);
        match &errors[0].payload {
            EventPayload::ErrorOccurred { operation, error, .. } => {
                assert_eq!(operation, "listener:Started");
                assert_eq!(error, "listener failed");
            }
            other => panic!("unexpected payload: {:?}", other),
        }
    }

    #[test]
    fn test_error_count_is_shared_with_recorded_errors() {
        let bus = bus(10);
        assert_eq!(bus.record_error(), 1);
        bus.on(EventKind::Started, |_| panic!("listener failed"));

        bus.emit(EventPayload::Started);

        let errors = bus.history(Some(EventKind::ErrorOccurred), None);
        assert!(matches!(
            errors[0].payload,
            EventPayload::ErrorOccurred { error_count: 2, .. }
        ));
        assert_eq!(bus.error_count(), 2);
        assert_eq!(bus.stats().listener_errors, 1);
    }

    #[test]
    fn test_error_listener_panic_is_not_re_emitted() {
        let bus = bus(10);
        bus.on(EventKind::ErrorOccurred, |_| panic!("error handler failed"));

        bus.emit(EventPayload::ErrorOccurred {
            operation: "test".to_string(),
            error: "original".to_string(),
            error_count: 1,
        });

        assert_eq!(bus.history(Some(EventKind::ErrorOccurred), None).len(), 1);
        assert_eq!(bus.stats().listener_errors, 1);
    }

    #[test]
    fn test_update_config_shrinks_history() {
        let bus = bus(5);
        for i in 0..5 {
            bus.emit(leak(&i.to_string()));
        }
        bus.update_config(EventBusConfig {
            max_history: 2,
            log_events: false,
        });

        assert_eq!(leak_ids(&bus.history(None, None)), vec!["3", "4"]);
    }

    #[test]
    fn test_destroy_disables_bus() {
        let bus = bus(5);
        bus.on(EventKind::Started, |_| {});
        bus.emit(EventPayload::Started);
        bus.destroy();

        assert!(bus.emit(EventPayload::Started).is_none());
        assert!(bus.history(None, None).is_empty());
        assert_eq!(bus.listener_count(EventKind::Started), 0);

        bus.set_enabled(true);
        assert!(!bus.is_enabled());
    }

    #[test]
    fn test_event_serializes_with_type_tag() {
        let bus = bus(5);
        let event = bus.emit(leak("x")).unwrap();
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["payload"]["type"], "leakDetected");
        assert_eq!(json["payload"]["candidate_ids"][0], "x");
    }
}
