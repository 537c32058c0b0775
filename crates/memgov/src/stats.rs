//! Memory statistics and collection records.

use crate::events::EventStats;
use crate::objects::ObjectCollectionStats;
use crate::pool::PoolStats;
use crate::pressure::PressureInfo;
use crate::probe::UsageSample;
use crate::tracker::ReferenceStats;
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Maximum number of collection records kept
pub const COLLECTION_HISTORY_LIMIT: usize = 100;

/// Average object size assumed when weak accounting finds nothing
pub const ESTIMATED_OBJECT_SIZE: u64 = 1024;

/// Milliseconds since the Unix epoch
pub(crate) fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Format memory size for display.
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// Why a collection pass ran
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GcTrigger {
    /// Pressure reached the GC threshold
    Pressure,
    /// GC interval elapsed since the last pass
    Interval,
    /// Explicit `force_gc` call
    Manual,
}

/// How `objects_collected` was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectionAccounting {
    /// Counted from weak observations that no longer upgrade
    Observed,
    /// Derived from freed bytes / average object size
    Estimated,
}

/// Outcome of one collection pass. Always produced, even on failure.
#[derive(Debug, Clone, Serialize)]
pub struct CollectionResult {
    pub success: bool,
    pub error: Option<String>,
    pub trigger: GcTrigger,
    pub timestamp: u64,
    pub before_usage: u64,
    pub after_usage: u64,
    pub freed_memory: u64,
    pub objects_collected: u64,
    pub types_collected: BTreeMap<String, u64>,
    pub accounting: CollectionAccounting,
    pub references_cleaned: usize,
    pub gc_duration: Duration,
}

impl CollectionResult {
    pub(crate) fn failed(trigger: GcTrigger, error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            trigger,
            timestamp: unix_millis(),
            before_usage: 0,
            after_usage: 0,
            freed_memory: 0,
            objects_collected: 0,
            types_collected: BTreeMap::new(),
            accounting: CollectionAccounting::Observed,
            references_cleaned: 0,
            gc_duration: Duration::ZERO,
        }
    }
}

/// One entry in the bounded collection history
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollectionRecord {
    pub timestamp: u64,
    pub objects_collected: u64,
    pub types_collected: usize,
    pub memory_freed: u64,
    pub gc_duration: Duration,
}

impl From<&CollectionResult> for CollectionRecord {
    fn from(result: &CollectionResult) -> Self {
        Self {
            timestamp: result.timestamp,
            objects_collected: result.objects_collected,
            types_collected: result.types_collected.len(),
            memory_freed: result.freed_memory,
            gc_duration: result.gc_duration,
        }
    }
}

/// Cumulative collection statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct GcStats {
    /// Completed passes
    pub gc_count: u64,
    /// Failed passes
    pub failed_count: u64,
    pub total_freed: u64,
    pub total_objects_collected: u64,
    /// Running average pass duration
    pub average_duration: Duration,
    pub max_duration: Duration,
    pub last_gc_timestamp: Option<u64>,
    pub pressure_triggered: u64,
    pub interval_triggered: u64,
    pub manual_triggered: u64,
    #[serde(skip)]
    history: VecDeque<CollectionRecord>,
}

impl GcStats {
    /// Fold a successful pass into the running totals
    pub(crate) fn record(&mut self, result: &CollectionResult) {
        self.gc_count += 1;
        self.total_freed += result.freed_memory;
        self.total_objects_collected += result.objects_collected;
        self.last_gc_timestamp = Some(result.timestamp);

        // Incremental mean; the divisor saturates instead of wrapping
        let n = u32::try_from(self.gc_count).unwrap_or(u32::MAX);
        self.average_duration = if result.gc_duration >= self.average_duration {
            self.average_duration + (result.gc_duration - self.average_duration) / n
        } else {
            self.average_duration - (self.average_duration - result.gc_duration) / n
        };
        if result.gc_duration > self.max_duration {
            self.max_duration = result.gc_duration;
        }

        match result.trigger {
            GcTrigger::Pressure => self.pressure_triggered += 1,
            GcTrigger::Interval => self.interval_triggered += 1,
            GcTrigger::Manual => self.manual_triggered += 1,
        }

        self.history.push_back(CollectionRecord::from(result));
        while self.history.len() > COLLECTION_HISTORY_LIMIT {
            self.history.pop_front();
        }
    }

    pub(crate) fn record_failure(&mut self) {
        self.failed_count += 1;
    }

    /// Collection records, oldest first
    pub fn history(&self) -> Vec<CollectionRecord> {
        self.history.iter().cloned().collect()
    }

    /// Format as human-readable string
    pub fn format(&self) -> String {
        format!(
            "GC: {} passes ({} failed), {:.2}ms avg, {} freed, {} objects collected",
            self.gc_count,
            self.failed_count,
            self.average_duration.as_secs_f64() * 1000.0,
            format_bytes(self.total_freed),
            self.total_objects_collected
        )
    }
}

/// Derived efficiency figures
#[derive(Debug, Clone, Default, Serialize)]
pub struct PerformanceMetrics {
    pub pool_hit_rates: BTreeMap<String, f64>,
    pub average_pool_hit_rate: f64,
    /// Collection passes per hour of uptime
    pub gc_frequency: f64,
    /// `1 - usage / max_memory`, clamped to [0, 1]
    pub memory_efficiency: f64,
    pub average_gc_duration: Duration,
    pub timestamp: u64,
}

/// Aggregate snapshot of the whole governor
#[derive(Debug, Clone, Serialize)]
pub struct GovernorStats {
    pub usage: UsageSample,
    pub pressure: PressureInfo,
    pub max_memory: u64,
    pub gc: GcStats,
    pub pools: BTreeMap<String, PoolStats>,
    pub references: ReferenceStats,
    pub objects: ObjectCollectionStats,
    pub events: EventStats,
    pub error_count: u64,
    pub uptime: Duration,
}
