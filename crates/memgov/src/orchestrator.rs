//! Memory Orchestrator
//!
//! Owns the configuration governor, event bus, reference tracker, object
//! collector and pool registry, and drives the periodic monitors.
//!
//! Everything that fails inside a monitor tick, a pool operation or a
//! tracking call is counted and reported as `ErrorOccurred` instead of
//! being returned. Only configuration rejections and registry lookups are
//! surfaced to the caller.

use crate::config::{ConfigChanges, ConfigGovernor, MemoryConfig, MemoryConfigPatch};
use crate::error::{panic_message, MemoryError};
use crate::events::{
    EventBus, EventBusConfig, EventKind, EventPayload, FilterId, ListenerId, MemoryEvent,
};
use crate::global;
use crate::monitor::{
    MonitorHandle, MonitorKind, MonitorSchedule, MonitorTarget, PERFORMANCE_INTERVAL,
};
use crate::objects::{
    FinalizationToken, ObjectCollectionStats, ObjectCollector, ObjectId, STALE_GROUP_AGE,
};
use crate::pool::{ManagedPool, ObjectPool, PoolConfig};
use crate::pressure::{PressureInfo, PressureLevel};
use crate::probe::{ProcessRssProbe, Reclaimer, UsageProbe, UsageSample, UsageSource};
use crate::stats::{
    format_bytes, unix_millis, CollectionAccounting, CollectionRecord, CollectionResult, GcStats,
    GcTrigger, GovernorStats, PerformanceMetrics, ESTIMATED_OBJECT_SIZE,
};
use crate::tracker::ReferenceTracker;
use anyhow::Context;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Lifecycle and headline figures
#[derive(Debug, Clone, Serialize)]
pub struct GovernorState {
    pub running: bool,
    pub destroyed: bool,
    pub config: MemoryConfig,
    pub usage: UsageSample,
    pub pressure: PressureInfo,
    pub pools: Vec<String>,
    pub tracked_references: usize,
    pub tracked_objects: usize,
    pub gc_count: u64,
    pub last_gc_timestamp: Option<u64>,
    pub error_count: u64,
    pub uptime: Duration,
}

/// Builder for [`MemoryOrchestrator`]
pub struct MemoryOrchestratorBuilder {
    config: MemoryConfigPatch,
    usage_probe: Option<Box<dyn UsageProbe>>,
    reclaimer: Option<Box<dyn Reclaimer>>,
}

impl MemoryOrchestratorBuilder {
    fn new() -> Self {
        Self {
            config: MemoryConfigPatch::default(),
            usage_probe: Some(Box::new(ProcessRssProbe::new())),
            reclaimer: None,
        }
    }

    /// Start from a full configuration
    pub fn config(mut self, config: &MemoryConfig) -> Self {
        self.config = MemoryConfigPatch::from(config);
        self
    }

    /// Apply a partial configuration over the defaults
    pub fn patch(mut self, patch: MemoryConfigPatch) -> Self {
        self.config = patch;
        self
    }

    /// Replace the default RSS probe
    pub fn usage_probe(mut self, probe: impl UsageProbe + 'static) -> Self {
        self.usage_probe = Some(Box::new(probe));
        self
    }

    /// Estimate usage from tracked sizes only
    pub fn without_usage_probe(mut self) -> Self {
        self.usage_probe = None;
        self
    }

    /// Hook invoked during every collection pass
    pub fn reclaimer(mut self, reclaimer: impl Reclaimer + 'static) -> Self {
        self.reclaimer = Some(Box::new(reclaimer));
        self
    }

    /// Validate the configuration and construct a stopped orchestrator
    pub fn build(self) -> Result<Arc<MemoryOrchestrator>, MemoryError> {
        let config = self.config.build()?;
        let governor = Arc::new(ConfigGovernor::new(config.clone()));
        let bus = Arc::new(EventBus::new(EventBusConfig::from(&config)));
        let tracker = ReferenceTracker::new(governor.clone(), bus.clone());

        info!(
            max_memory = %format_bytes(config.max_memory),
            gc_threshold = config.gc_threshold,
            "Memory orchestrator created"
        );

        Ok(Arc::new_cyclic(|this| MemoryOrchestrator {
            this: this.clone(),
            config: governor,
            bus,
            tracker,
            objects: ObjectCollector::new(),
            pools: RwLock::new(BTreeMap::new()),
            gc: Mutex::new(GcState {
                stats: GcStats::default(),
                last_gc: Instant::now(),
            }),
            last_level: Mutex::new(None),
            monitor: Mutex::new(None),
            destroyed: AtomicBool::new(false),
            usage_probe: self.usage_probe,
            reclaimer: self.reclaimer,
            started_at: Instant::now(),
        }))
    }
}

struct GcState {
    stats: GcStats,
    last_gc: Instant,
}

/// Adaptive memory governor
pub struct MemoryOrchestrator {
    this: Weak<MemoryOrchestrator>,
    config: Arc<ConfigGovernor>,
    bus: Arc<EventBus>,
    tracker: ReferenceTracker,
    objects: ObjectCollector,
    pools: RwLock<BTreeMap<String, Arc<dyn ManagedPool>>>,
    gc: Mutex<GcState>,
    last_level: Mutex<Option<PressureLevel>>,
    monitor: Mutex<Option<MonitorHandle>>,
    destroyed: AtomicBool,
    usage_probe: Option<Box<dyn UsageProbe>>,
    reclaimer: Option<Box<dyn Reclaimer>>,
    started_at: Instant,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Config fields that feed `MonitorSchedule`
const SCHEDULE_FIELDS: [&str; 3] = [
    "gcIntervalMs",
    "autoCleanupIntervalMs",
    "enablePerformanceMonitoring",
];

fn affects_schedule(changes: &ConfigChanges) -> bool {
    SCHEDULE_FIELDS.iter().any(|field| changes.contains_key(*field))
}

impl MemoryOrchestrator {
    pub fn builder() -> MemoryOrchestratorBuilder {
        MemoryOrchestratorBuilder::new()
    }

    /// Build with a full configuration and the default RSS probe
    pub fn new(config: &MemoryConfig) -> Result<Arc<Self>, MemoryError> {
        Self::builder().config(config).build()
    }

    // ---- Lifecycle ----

    /// Start the monitors. No-op if already running.
    pub fn start(&self) -> Result<(), MemoryError> {
        if self.is_destroyed() {
            return Err(MemoryError::Destroyed);
        }

        {
            let mut monitor = lock(&self.monitor);
            if monitor.is_some() {
                return Ok(());
            }
            *monitor = Some(MonitorHandle::spawn(self.this.clone(), self.schedule())?);
        }

        info!("Memory orchestrator started");
        self.bus.emit(EventPayload::Started);
        Ok(())
    }

    /// Stop the monitors. No-op if not running.
    pub fn stop(&self) {
        let Some(handle) = lock(&self.monitor).take() else {
            return;
        };
        handle.stop();

        info!("Memory orchestrator stopped");
        self.bus.emit(EventPayload::Stopped);
    }

    pub fn restart(&self) -> Result<(), MemoryError> {
        self.stop();
        self.start()
    }

    pub fn is_running(&self) -> bool {
        lock(&self.monitor).is_some()
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    /// Stop, tear down every component and release the global handle.
    ///
    /// Every step runs even if an earlier one fails; failures are collected
    /// into [`MemoryError::Teardown`].
    pub fn destroy(&self) -> Result<(), MemoryError> {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.stop();

        let mut failures = Vec::new();
        let pools: Vec<Arc<dyn ManagedPool>> = std::mem::take(&mut *self.write_pools())
            .into_values()
            .collect();
        for pool in pools {
            let name = pool.name().to_string();
            match panic::catch_unwind(AssertUnwindSafe(|| pool.destroy())) {
                Ok(()) => {
                    self.bus.emit(EventPayload::PoolRemoved { name });
                }
                Err(payload) => failures.push(format!("pool {}: {}", name, panic_message(payload))),
            }
        }

        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| self.tracker.destroy())) {
            failures.push(format!("reference tracker: {}", panic_message(payload)));
        }
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| self.objects.destroy())) {
            failures.push(format!("object collector: {}", panic_message(payload)));
        }
        self.bus.destroy();
        global::release(self);

        if failures.is_empty() {
            info!("Memory orchestrator destroyed");
            Ok(())
        } else {
            warn!(failures = failures.len(), "Memory orchestrator destroyed with failures");
            Err(MemoryError::Teardown { failures })
        }
    }

    fn schedule(&self) -> MonitorSchedule {
        let config = self.config.config();
        MonitorSchedule {
            gc: config.gc_interval(),
            cleanup: config.auto_cleanup_interval(),
            performance: config
                .enable_performance_monitoring
                .then_some(PERFORMANCE_INTERVAL),
        }
    }

    fn reschedule(&self) {
        if let Some(handle) = lock(&self.monitor).as_ref() {
            handle.reschedule(self.schedule());
        }
    }

    // ---- Registration ----

    /// Register a caller-owned object under `id` without extending its
    /// lifetime. Returns `true` if an earlier registration was replaced.
    pub fn register_object<T>(&self, obj: &Arc<T>, id: impl Into<String>) -> bool
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.tracker.add_reference(obj, id)
    }

    pub fn register_object_sized<T>(
        &self,
        obj: &Arc<T>,
        id: impl Into<String>,
        estimated_size: u64,
    ) -> bool
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.tracker.add_reference_sized(obj, id, estimated_size)
    }

    pub fn unregister_object(&self, id: &str) -> bool {
        self.tracker.remove_reference(id)
    }

    /// Increment the reference count of a registered id
    pub fn add_reference(&self, id: &str) -> Result<usize, MemoryError> {
        self.tracker
            .retain(id)
            .inspect_err(|e| self.report_error("addReference", &e.to_string()))
    }

    /// Decrement the reference count; the registration is dropped at zero
    pub fn remove_reference(&self, id: &str) -> Result<usize, MemoryError> {
        self.tracker
            .release(id)
            .inspect_err(|e| self.report_error("removeReference", &e.to_string()))
    }

    // ---- Pools ----

    /// Register a new pool. Names are unique.
    pub fn create_pool<T: Send + 'static>(
        &self,
        config: PoolConfig<T>,
    ) -> Result<ObjectPool<T>, MemoryError> {
        if self.is_destroyed() {
            return Err(MemoryError::Destroyed);
        }
        let name = config.name.clone();
        if self.read_pools().contains_key(&name) {
            return Err(self.duplicate_pool(name));
        }

        // Factory may run for prefill, so build outside the registry lock
        let pool = ObjectPool::new(config);
        let capacity = pool.capacity();
        {
            let mut pools = self.write_pools();
            if pools.contains_key(&name) {
                drop(pools);
                pool.destroy();
                return Err(self.duplicate_pool(name));
            }
            pools.insert(name.clone(), Arc::new(pool.clone()));
        }

        self.bus.emit(EventPayload::PoolCreated { name, capacity });
        Ok(pool)
    }

    fn duplicate_pool(&self, name: String) -> MemoryError {
        let err = MemoryError::PoolExists(name);
        self.report_error("createPool", &err.to_string());
        err
    }

    /// Typed handle to a registered pool
    pub fn get_pool<T: Send + 'static>(&self, name: &str) -> Result<ObjectPool<T>, MemoryError> {
        let pools = self.read_pools();
        let pool = pools
            .get(name)
            .ok_or_else(|| MemoryError::PoolNotFound(name.to_string()))?;
        pool.as_any()
            .downcast_ref::<ObjectPool<T>>()
            .cloned()
            .ok_or_else(|| MemoryError::PoolTypeMismatch {
                name: name.to_string(),
                requested: std::any::type_name::<T>(),
            })
    }

    /// Unregister and destroy a pool
    pub fn remove_pool(&self, name: &str) -> Result<(), MemoryError> {
        let pool = self
            .write_pools()
            .remove(name)
            .ok_or_else(|| MemoryError::PoolNotFound(name.to_string()))?;

        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| pool.destroy())) {
            self.report_error("removePool", &panic_message(payload));
        }
        self.bus.emit(EventPayload::PoolRemoved {
            name: name.to_string(),
        });
        Ok(())
    }

    pub fn pool_names(&self) -> Vec<String> {
        self.read_pools().keys().cloned().collect()
    }

    fn read_pools(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<String, Arc<dyn ManagedPool>>> {
        self.pools.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_pools(
        &self,
    ) -> std::sync::RwLockWriteGuard<'_, BTreeMap<String, Arc<dyn ManagedPool>>> {
        self.pools.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn pool_snapshot(&self) -> Vec<Arc<dyn ManagedPool>> {
        self.read_pools().values().cloned().collect()
    }

    // ---- Policy ----

    pub fn get_config(&self) -> MemoryConfig {
        self.config.config()
    }

    /// Validate and apply a partial configuration.
    ///
    /// A rejected patch leaves the configuration unchanged and is also
    /// reported as `ErrorOccurred`.
    pub fn update_config(&self, patch: &MemoryConfigPatch) -> Result<MemoryConfig, MemoryError> {
        let update = match self.config.merge_and_apply(patch) {
            Ok(update) => update,
            Err(e) => {
                self.report_error("updateConfig", &e.to_string());
                return Err(e.into());
            }
        };

        if update.changes.is_empty() {
            return Ok(update.new_config);
        }

        self.bus.update_config(EventBusConfig::from(&update.new_config));
        if affects_schedule(&update.changes) {
            self.reschedule();
        }
        self.bus.emit(EventPayload::ConfigUpdated {
            new_config: update.new_config.clone(),
            changes: update.changes,
        });
        Ok(update.new_config)
    }

    /// Live update of the memory ceiling and GC threshold
    pub fn set_limits(
        &self,
        max_memory: u64,
        gc_threshold: f64,
    ) -> Result<MemoryConfig, MemoryError> {
        let patch = MemoryConfig::builder()
            .max_memory(i64::try_from(max_memory).unwrap_or(i64::MAX))
            .gc_threshold(gc_threshold);
        self.update_config(&patch)
    }

    // ---- Collection ----

    /// Run a collection pass now. Never fails; see `CollectionResult::success`.
    pub fn force_gc(&self) -> CollectionResult {
        if self.is_destroyed() {
            return CollectionResult::failed(GcTrigger::Manual, MemoryError::Destroyed.to_string());
        }
        self.run_collection(GcTrigger::Manual)
    }

    fn run_collection(&self, trigger: GcTrigger) -> CollectionResult {
        let started = Instant::now();
        let before = self.sample_usage();

        self.bus.emit(EventPayload::GcTriggered {
            before_usage: before.bytes,
            pressure: self.config.pressure(before.bytes),
            trigger,
        });

        let outcome =
            panic::catch_unwind(AssertUnwindSafe(|| self.collect(trigger, before, started)))
                .unwrap_or_else(|payload| Err(anyhow::anyhow!(panic_message(payload))));

        match outcome {
            Ok(result) => {
                {
                    let mut gc = lock(&self.gc);
                    gc.stats.record(&result);
                    gc.last_gc = Instant::now();
                }
                debug!(
                    trigger = ?trigger,
                    freed = result.freed_memory,
                    objects = result.objects_collected,
                    duration = ?result.gc_duration,
                    "Collection pass completed"
                );
                self.bus.emit(EventPayload::GcCompleted(result.clone()));
                result
            }
            Err(e) => {
                {
                    let mut gc = lock(&self.gc);
                    gc.stats.record_failure();
                    gc.last_gc = Instant::now();
                }
                let message = format!("{:#}", e);
                self.report_error("gc", &message);
                CollectionResult {
                    before_usage: before.bytes,
                    gc_duration: started.elapsed(),
                    ..CollectionResult::failed(trigger, message)
                }
            }
        }
    }

    fn collect(
        &self,
        trigger: GcTrigger,
        before: UsageSample,
        started: Instant,
    ) -> anyhow::Result<CollectionResult> {
        let references_cleaned = self.tracker.cleanup();

        if let Some(reclaimer) = &self.reclaimer {
            reclaimer.reclaim().context("Reclamation hook failed")?;
        }

        let after = self.sample_usage();
        let freed_memory = before.bytes.saturating_sub(after.bytes);
        let accounting = self.objects.account();

        let (objects_collected, method) = if accounting.collected == 0 && freed_memory > 0 {
            (freed_memory / ESTIMATED_OBJECT_SIZE, CollectionAccounting::Estimated)
        } else {
            (accounting.collected, CollectionAccounting::Observed)
        };

        Ok(CollectionResult {
            success: true,
            error: None,
            trigger,
            timestamp: unix_millis(),
            before_usage: before.bytes,
            after_usage: after.bytes,
            freed_memory,
            objects_collected,
            types_collected: accounting.by_type,
            accounting: method,
            references_cleaned,
            gc_duration: started.elapsed(),
        })
    }

    /// Current usage, from the probe when it answers, otherwise the sum of
    /// tracked sizes
    pub fn sample_usage(&self) -> UsageSample {
        if let Some(probe) = &self.usage_probe {
            match panic::catch_unwind(AssertUnwindSafe(|| probe.resident_bytes())) {
                Ok(Ok(bytes)) => {
                    return UsageSample {
                        bytes,
                        source: UsageSource::Runtime,
                    }
                }
                Ok(Err(e)) => debug!("Usage probe failed, using tracked estimate: {}", e),
                Err(payload) => debug!("Usage probe panicked: {}", panic_message(payload)),
            }
        }

        UsageSample {
            bytes: self.tracker.total_estimated_size() + self.objects.total_size(),
            source: UsageSource::TrackedEstimate,
        }
    }

    fn since_last_gc(&self) -> Duration {
        lock(&self.gc).last_gc.elapsed()
    }

    // ---- Monitor ticks ----

    fn pressure_tick(&self) {
        let usage = self.sample_usage();
        let info = self.config.pressure_info(usage.bytes, self.since_last_gc());

        let changed = {
            let mut last = lock(&self.last_level);
            let changed = *last != Some(info.level);
            *last = Some(info.level);
            changed
        };
        if changed {
            info!(
                level = %info.level,
                pressure = info.pressure,
                usage = %format_bytes(usage.bytes),
                "Memory pressure changed"
            );
            self.bus.emit(EventPayload::MemoryPressure(info.clone()));
        }
        if info.level >= PressureLevel::High {
            warn!(
                level = %info.level,
                usage = %format_bytes(usage.bytes),
                "{}",
                info.recommendation
            );
        }

        if info.should_trigger_gc {
            let trigger = if info.pressure >= self.config.config().gc_threshold {
                GcTrigger::Pressure
            } else {
                GcTrigger::Interval
            };
            self.run_collection(trigger);
        }
    }

    fn performance_tick(&self) {
        let metrics = self.get_performance_metrics();
        debug!(
            efficiency = metrics.memory_efficiency,
            gc_frequency = metrics.gc_frequency,
            "Performance sample"
        );
        self.bus.emit(EventPayload::PerformanceSampled(metrics));
    }

    fn cleanup_tick(&self) {
        let config = self.config.config();
        let references_removed = self.tracker.cleanup();

        if config.enable_leak_detection {
            self.tracker.detect_leaks();
        }

        let groups_removed = self.objects.remove_stale_groups(STALE_GROUP_AGE);
        let pool_items_evicted: usize = self
            .pool_snapshot()
            .iter()
            .map(|pool| pool.evict_idle(config.max_pool_age()))
            .sum();

        debug!(
            references_removed,
            groups_removed,
            pool_items_evicted,
            tracked_objects = self.objects.tracked_count(),
            "Cleanup pass"
        );
        self.bus.emit(EventPayload::CleanupCompleted {
            references_removed,
            groups_removed,
            pool_items_evicted,
        });
    }

    // ---- Snapshots ----

    pub fn get_stats(&self) -> GovernorStats {
        let usage = self.sample_usage();
        let references = self.tracker.stats();
        GovernorStats {
            usage,
            pressure: self.config.pressure_info(usage.bytes, self.since_last_gc()),
            max_memory: self.config.config().max_memory,
            gc: lock(&self.gc).stats.clone(),
            pools: self
                .pool_snapshot()
                .iter()
                .map(|pool| (pool.name().to_string(), pool.stats()))
                .collect(),
            objects: self.objects.stats(&references),
            references,
            events: self.bus.stats(),
            error_count: self.error_count(),
            uptime: self.started_at.elapsed(),
        }
    }

    pub fn get_performance_metrics(&self) -> PerformanceMetrics {
        let usage = self.sample_usage();
        let max_memory = self.config.config().max_memory;
        let gc = lock(&self.gc).stats.clone();

        let pool_hit_rates: BTreeMap<String, f64> = self
            .pool_snapshot()
            .iter()
            .map(|pool| (pool.name().to_string(), pool.stats().hit_rate))
            .collect();
        let average_pool_hit_rate = if pool_hit_rates.is_empty() {
            0.0
        } else {
            pool_hit_rates.values().sum::<f64>() / pool_hit_rates.len() as f64
        };

        let hours = self.started_at.elapsed().as_secs_f64() / 3600.0;
        let gc_frequency = if hours > 0.0 { gc.gc_count as f64 / hours } else { 0.0 };
        let memory_efficiency = if max_memory == 0 {
            0.0
        } else {
            (1.0 - usage.bytes as f64 / max_memory as f64).clamp(0.0, 1.0)
        };

        PerformanceMetrics {
            pool_hit_rates,
            average_pool_hit_rate,
            gc_frequency,
            memory_efficiency,
            average_gc_duration: gc.average_duration,
            timestamp: unix_millis(),
        }
    }

    pub fn get_state(&self) -> GovernorState {
        let usage = self.sample_usage();
        let (since_last_gc, gc_count, last_gc_timestamp) = {
            let gc = lock(&self.gc);
            (gc.last_gc.elapsed(), gc.stats.gc_count, gc.stats.last_gc_timestamp)
        };
        GovernorState {
            running: self.is_running(),
            destroyed: self.is_destroyed(),
            config: self.config.config(),
            usage,
            pressure: self.config.pressure_info(usage.bytes, since_last_gc),
            pools: self.pool_names(),
            tracked_references: self.tracker.stats().tracked,
            tracked_objects: self.objects.tracked_count(),
            gc_count,
            last_gc_timestamp,
            error_count: self.error_count(),
            uptime: self.started_at.elapsed(),
        }
    }

    /// Collection records, oldest first
    pub fn get_collection_history(&self) -> Vec<CollectionRecord> {
        lock(&self.gc).stats.history()
    }

    /// Human-readable summary
    pub fn get_memory_report(&self) -> String {
        let stats = self.get_stats();
        let mut report = String::new();

        let source = match stats.usage.source {
            UsageSource::Runtime => "runtime",
            UsageSource::TrackedEstimate => "tracked estimate",
        };
        let _ = writeln!(report, "=== Memory Report ===");
        let _ = writeln!(
            report,
            "Usage: {} / {} ({:.1}%, {})",
            format_bytes(stats.usage.bytes),
            format_bytes(stats.max_memory),
            stats.pressure.pressure * 100.0,
            source
        );
        let _ = writeln!(
            report,
            "Pressure: {} - {}",
            stats.pressure.level, stats.pressure.recommendation
        );
        let _ = writeln!(report, "{}", stats.gc.format());
        let _ = writeln!(
            report,
            "References: {} tracked, {} alive, {} estimated",
            stats.references.tracked,
            stats.references.alive,
            format_bytes(stats.references.total_estimated_size)
        );
        let _ = writeln!(
            report,
            "Objects: {} live, {} collected, {} finalization signals",
            stats.objects.live_objects,
            stats.objects.total_collected,
            stats.objects.finalization_signals
        );
        let _ = writeln!(report, "Pools: {}", stats.pools.len());
        for (name, pool) in &stats.pools {
            let _ = writeln!(
                report,
                "  {}: {} idle / {} capacity, {} in use, {:.1}% hit rate",
                name,
                pool.idle,
                pool.capacity,
                pool.in_use,
                pool.hit_rate * 100.0
            );
        }
        let _ = writeln!(
            report,
            "Events: {} emitted, {} in history",
            stats.events.total_emitted, stats.events.history_len
        );
        let _ = write!(report, "Errors: {}", stats.error_count);
        report
    }

    // ---- Tracking ----

    /// Weakly observe `obj` under a logical type name
    pub fn track_object<T>(&self, obj: &Arc<T>, type_name: &str, estimated_size: u64) -> ObjectId
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.objects.track(obj, type_name, estimated_size)
    }

    /// Drop signal to embed in a tracked object
    pub fn finalization_token(&self, id: ObjectId) -> FinalizationToken {
        self.objects.finalization_token(id)
    }

    pub fn get_object_collection_stats(&self) -> ObjectCollectionStats {
        self.objects.stats(&self.tracker.stats())
    }

    // ---- Events ----

    pub fn on<F>(&self, kind: EventKind, listener: F) -> ListenerId
    where
        F: Fn(&MemoryEvent) + Send + Sync + 'static,
    {
        self.bus.on(kind, listener)
    }

    pub fn once<F>(&self, kind: EventKind, listener: F) -> ListenerId
    where
        F: Fn(&MemoryEvent) + Send + Sync + 'static,
    {
        self.bus.once(kind, listener)
    }

    pub fn off(&self, kind: EventKind, id: ListenerId) -> bool {
        self.bus.off(kind, id)
    }

    /// Returning `false` from the filter drops the event
    pub fn add_event_filter<F>(&self, filter: F) -> FilterId
    where
        F: Fn(&MemoryEvent) -> bool + Send + Sync + 'static,
    {
        self.bus.add_filter(filter)
    }

    pub fn get_event_history(
        &self,
        kind: Option<EventKind>,
        limit: Option<usize>,
    ) -> Vec<MemoryEvent> {
        self.bus.history(kind, limit)
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    // ---- Errors ----

    /// Errors reported through the event bus, listener panics included
    pub fn error_count(&self) -> u64 {
        self.bus.error_count()
    }

    fn report_error(&self, operation: &str, error: &str) {
        let error_count = self.bus.record_error();
        warn!(operation, error_count, "Memory governor error: {}", error);
        self.bus.emit(EventPayload::ErrorOccurred {
            operation: operation.to_string(),
            error: error.to_string(),
            error_count,
        });
    }
}

impl MonitorTarget for MemoryOrchestrator {
    fn on_tick(&self, kind: MonitorKind) {
        match kind {
            MonitorKind::Pressure => self.pressure_tick(),
            MonitorKind::Performance => self.performance_tick(),
            MonitorKind::Cleanup => self.cleanup_tick(),
        }
    }

    fn on_tick_panic(&self, kind: MonitorKind, message: String) {
        self.report_error(&format!("monitor:{}", kind.as_str()), &message);
    }
}

impl Drop for MemoryOrchestrator {
    fn drop(&mut self) {
        if let Some(handle) = self
            .monitor
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.stop();
        }
    }
}
