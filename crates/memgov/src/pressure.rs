//! Memory Pressure Classification
//!
//! Pressure is the ratio of estimated usage to the configured maximum.
//!
//! Pressure Levels:
//! - Low: < 50% of max memory (normal operation)
//! - Medium: 50% up to the GC threshold (watch)
//! - High: GC threshold up to 95% (collect)
//! - Critical: >= 95% (collect now, may OOM soon)

use serde::{Deserialize, Serialize};
use std::fmt;

/// Ratio below which pressure is always `Low`
pub const LOW_PRESSURE_CEILING: f64 = 0.5;

/// Ratio at or above which pressure is always `Critical`
pub const CRITICAL_PRESSURE_FLOOR: f64 = 0.95;

/// Memory pressure levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PressureLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl PressureLevel {
    /// Classify a usage ratio against the configured GC threshold
    pub fn from_ratio(ratio: f64, gc_threshold: f64) -> Self {
        if ratio < LOW_PRESSURE_CEILING {
            Self::Low
        } else if ratio < gc_threshold {
            Self::Medium
        } else if ratio < CRITICAL_PRESSURE_FLOOR {
            Self::High
        } else {
            Self::Critical
        }
    }

    /// Get human-readable recommendation
    pub fn recommendation(&self) -> &'static str {
        match self {
            Self::Low => "Memory usage is healthy; no action needed",
            Self::Medium => "Memory usage is elevated; consider releasing idle pools",
            Self::High => "Memory usage is high; run a collection pass",
            Self::Critical => "Memory usage is critical; collect immediately and shed load",
        }
    }
}

impl fmt::Display for PressureLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "LOW"),
            Self::Medium => write!(f, "MEDIUM"),
            Self::High => write!(f, "HIGH"),
            Self::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// A fresh pressure reading. Never stored as state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PressureInfo {
    pub level: PressureLevel,
    /// Usage divided by max memory
    pub pressure: f64,
    pub should_trigger_gc: bool,
    pub recommendation: String,
}
