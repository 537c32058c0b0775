//! memgov: Adaptive Memory Governor
//!
//! Estimates live memory usage, classifies pressure, runs collection
//! passes, observes object lifetimes through weak handles, flags
//! long-lived references as leak candidates and offers typed object pools.
//! Everything observable goes through a filtered, bounded event stream.
//!
//! ```no_run
//! use memgov::{EventKind, MemoryConfig, MemoryOrchestrator};
//!
//! let governor = MemoryOrchestrator::builder()
//!     .patch(MemoryConfig::builder().max_memory(256 * 1024 * 1024))
//!     .build()?;
//! governor.on(EventKind::MemoryPressure, |event| println!("{:?}", event.payload));
//! governor.start()?;
//! # Ok::<(), memgov::MemoryError>(())
//! ```

mod config;
mod error;
mod events;
pub mod global;
mod monitor;
mod objects;
mod orchestrator;
mod pool;
mod pressure;
mod probe;
mod stats;
mod tracker;

pub use config::{
    ConfigChanges, ConfigError, ConfigGovernor, ConfigIssue, ConfigUpdate, FieldChange,
    MemoryConfig, MemoryConfigPatch, ValidationReport,
};
pub use error::MemoryError;
pub use events::{
    EventBus, EventBusConfig, EventFilter, EventId, EventKind, EventMetadata, EventPayload,
    EventStats, FilterId, Listener, ListenerId, MemoryEvent,
};
pub use monitor::{MonitorKind, MonitorSchedule, PERFORMANCE_INTERVAL};
pub use objects::{
    AccountingOutcome, FinalizationToken, ObjectCollectionStats, ObjectCollector, ObjectId,
    TypeCollectionStats, STALE_GROUP_AGE,
};
pub use orchestrator::{GovernorState, MemoryOrchestrator, MemoryOrchestratorBuilder};
pub use pool::{ManagedPool, ObjectPool, PoolConfig, PoolError, PoolStats, PoolStrategy, Pooled};
pub use pressure::{PressureInfo, PressureLevel};
pub use probe::{ProbeError, ProcessRssProbe, Reclaimer, UsageProbe, UsageSample, UsageSource};
pub use stats::{
    format_bytes, CollectionAccounting, CollectionRecord, CollectionResult, GcStats, GcTrigger,
    GovernorStats, PerformanceMetrics,
};
pub use tracker::{Liveness, ReferenceStats, ReferenceTracker};
