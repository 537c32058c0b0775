//! Memory Policy Configuration
//!
//! Holds the live [`MemoryConfig`], validates partial updates and derives
//! pressure readings and GC-trigger decisions from it.
//!
//! Updates are all-or-nothing: a patch with any hard error is rejected and
//! the previous configuration stays in place. Soft warnings never block.

use crate::pressure::{PressureInfo, PressureLevel};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{PoisonError, RwLock};
use std::time::Duration;
use tracing::{debug, info, warn};

const KB: u64 = 1024;
const MB: u64 = KB * 1024;

/// Smallest accepted GC / cleanup interval
pub const MIN_INTERVAL_MS: u64 = 1000;

/// Intervals below this are accepted but flagged
const SHORT_INTERVAL_MS: u64 = 5_000;

/// Intervals above this are accepted but flagged
const LONG_INTERVAL_MS: u64 = 3_600_000;

/// Complete memory policy. Always fully populated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MemoryConfig {
    /// Maximum memory budget in bytes
    pub max_memory: u64,
    /// Pressure ratio at which a collection pass is triggered (0.1 - 1.0)
    pub gc_threshold: f64,
    /// Pressure/GC monitor interval and time-based GC pacing (ms)
    pub gc_interval_ms: u64,
    /// Cleanup monitor interval (ms)
    pub auto_cleanup_interval_ms: u64,
    /// Idle pool items older than this are evicted (ms)
    pub max_pool_age_ms: u64,
    /// References alive longer than this are leak candidates (ms)
    pub leak_detection_threshold_ms: u64,
    /// Bounded event history size
    pub max_event_history: usize,
    pub enable_leak_detection: bool,
    pub enable_performance_monitoring: bool,
    pub enable_event_logging: bool,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_memory: 512 * MB,
            gc_threshold: 0.8,
            gc_interval_ms: 30_000,
            auto_cleanup_interval_ms: 60_000,
            max_pool_age_ms: 300_000,            // 5 minutes
            leak_detection_threshold_ms: 600_000, // 10 minutes
            max_event_history: 1000,
            enable_leak_detection: true,
            enable_performance_monitoring: true,
            enable_event_logging: false,
        }
    }
}

impl MemoryConfig {
    pub fn gc_interval(&self) -> Duration {
        Duration::from_millis(self.gc_interval_ms)
    }

    pub fn auto_cleanup_interval(&self) -> Duration {
        Duration::from_millis(self.auto_cleanup_interval_ms)
    }

    pub fn max_pool_age(&self) -> Duration {
        Duration::from_millis(self.max_pool_age_ms)
    }

    pub fn leak_detection_threshold(&self) -> Duration {
        Duration::from_millis(self.leak_detection_threshold_ms)
    }

    /// Start a patch that builds on the defaults
    pub fn builder() -> MemoryConfigPatch {
        MemoryConfigPatch::default()
    }

    /// Validate a complete configuration
    pub fn validate(&self) -> Result<ValidationReport, ConfigError> {
        let report = validate_patch(self, &MemoryConfigPatch::from(self));
        if report.is_valid {
            Ok(report)
        } else {
            Err(ConfigError::Invalid { errors: report.errors })
        }
    }

    /// Apply a patch over this configuration without validating it
    fn merged(&self, patch: &MemoryConfigPatch) -> Self {
        let to_u64 = |v: i64| v.max(0) as u64;
        Self {
            max_memory: patch.max_memory.map(to_u64).unwrap_or(self.max_memory),
            gc_threshold: patch.gc_threshold.unwrap_or(self.gc_threshold),
            gc_interval_ms: patch.gc_interval_ms.map(to_u64).unwrap_or(self.gc_interval_ms),
            auto_cleanup_interval_ms: patch
                .auto_cleanup_interval_ms
                .map(to_u64)
                .unwrap_or(self.auto_cleanup_interval_ms),
            max_pool_age_ms: patch.max_pool_age_ms.map(to_u64).unwrap_or(self.max_pool_age_ms),
            leak_detection_threshold_ms: patch
                .leak_detection_threshold_ms
                .map(to_u64)
                .unwrap_or(self.leak_detection_threshold_ms),
            max_event_history: patch
                .max_event_history
                .map(|v| v.max(0) as usize)
                .unwrap_or(self.max_event_history),
            enable_leak_detection: patch
                .enable_leak_detection
                .unwrap_or(self.enable_leak_detection),
            enable_performance_monitoring: patch
                .enable_performance_monitoring
                .unwrap_or(self.enable_performance_monitoring),
            enable_event_logging: patch
                .enable_event_logging
                .unwrap_or(self.enable_event_logging),
        }
    }
}

/// A partial configuration update.
///
/// Integer fields are signed so that negative input is reported by
/// validation instead of failing to parse.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct MemoryConfigPatch {
    pub max_memory: Option<i64>,
    pub gc_threshold: Option<f64>,
    pub gc_interval_ms: Option<i64>,
    pub auto_cleanup_interval_ms: Option<i64>,
    pub max_pool_age_ms: Option<i64>,
    pub leak_detection_threshold_ms: Option<i64>,
    pub max_event_history: Option<i64>,
    pub enable_leak_detection: Option<bool>,
    pub enable_performance_monitoring: Option<bool>,
    pub enable_event_logging: Option<bool>,
}

impl MemoryConfigPatch {
    /// Parse a patch from JSON. Unknown keys are rejected.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn max_memory(mut self, bytes: i64) -> Self {
        self.max_memory = Some(bytes);
        self
    }

    pub fn gc_threshold(mut self, threshold: f64) -> Self {
        self.gc_threshold = Some(threshold);
        self
    }

    pub fn gc_interval_ms(mut self, ms: i64) -> Self {
        self.gc_interval_ms = Some(ms);
        self
    }

    pub fn auto_cleanup_interval_ms(mut self, ms: i64) -> Self {
        self.auto_cleanup_interval_ms = Some(ms);
        self
    }

    pub fn max_pool_age_ms(mut self, ms: i64) -> Self {
        self.max_pool_age_ms = Some(ms);
        self
    }

    pub fn leak_detection_threshold_ms(mut self, ms: i64) -> Self {
        self.leak_detection_threshold_ms = Some(ms);
        self
    }

    pub fn max_event_history(mut self, count: i64) -> Self {
        self.max_event_history = Some(count);
        self
    }

    pub fn enable_leak_detection(mut self, enabled: bool) -> Self {
        self.enable_leak_detection = Some(enabled);
        self
    }

    pub fn enable_performance_monitoring(mut self, enabled: bool) -> Self {
        self.enable_performance_monitoring = Some(enabled);
        self
    }

    pub fn enable_event_logging(mut self, enabled: bool) -> Self {
        self.enable_event_logging = Some(enabled);
        self
    }

    /// Validate over the defaults and produce a complete configuration
    pub fn build(self) -> Result<MemoryConfig, ConfigError> {
        let base = MemoryConfig::default();
        let report = validate_patch(&base, &self);
        if !report.is_valid {
            return Err(ConfigError::Invalid { errors: report.errors });
        }
        Ok(base.merged(&self))
    }

    fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

impl From<&MemoryConfig> for MemoryConfigPatch {
    fn from(config: &MemoryConfig) -> Self {
        let to_i64 = |v: u64| i64::try_from(v).unwrap_or(i64::MAX);
        Self {
            max_memory: Some(to_i64(config.max_memory)),
            gc_threshold: Some(config.gc_threshold),
            gc_interval_ms: Some(to_i64(config.gc_interval_ms)),
            auto_cleanup_interval_ms: Some(to_i64(config.auto_cleanup_interval_ms)),
            max_pool_age_ms: Some(to_i64(config.max_pool_age_ms)),
            leak_detection_threshold_ms: Some(to_i64(config.leak_detection_threshold_ms)),
            max_event_history: Some(to_i64(config.max_event_history as u64)),
            enable_leak_detection: Some(config.enable_leak_detection),
            enable_performance_monitoring: Some(config.enable_performance_monitoring),
            enable_event_logging: Some(config.enable_event_logging),
        }
    }
}

/// One validation finding
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfigIssue {
    pub field: &'static str,
    pub message: String,
}

impl ConfigIssue {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Outcome of validating a patch
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ValidationReport {
    pub is_valid: bool,
    pub errors: Vec<ConfigIssue>,
    pub warnings: Vec<ConfigIssue>,
}

/// Configuration errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {}", join_issues(errors))]
    Invalid { errors: Vec<ConfigIssue> },

    #[error("Failed to parse configuration: {0}")]
    Parse(String),
}

fn join_issues(issues: &[ConfigIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// A single changed field: `{from, to}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldChange {
    pub from: Value,
    pub to: Value,
}

/// Structural diff keyed by field name
pub type ConfigChanges = BTreeMap<String, FieldChange>;

/// Result of a successful merge
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigUpdate {
    pub new_config: MemoryConfig,
    pub changes: ConfigChanges,
}

/// Range-check every field present in `patch`. The effective value of
/// untouched fields comes from `base`, so cross-field warnings see the
/// configuration that would result.
fn validate_patch(base: &MemoryConfig, patch: &MemoryConfigPatch) -> ValidationReport {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    if let Some(max_memory) = patch.max_memory {
        if max_memory <= 0 {
            errors.push(ConfigIssue::new("maxMemory", "must be greater than 0"));
        } else if (max_memory as u64) < 10 * MB {
            warnings.push(ConfigIssue::new(
                "maxMemory",
                "below 10MB; collection passes will run constantly",
            ));
        }
    }

    if let Some(threshold) = patch.gc_threshold {
        if !(0.1..=1.0).contains(&threshold) {
            errors.push(ConfigIssue::new("gcThreshold", "must be between 0.1 and 1.0"));
        } else if threshold < 0.3 {
            warnings.push(ConfigIssue::new(
                "gcThreshold",
                "below 0.3; collection will trigger under light load",
            ));
        } else if threshold > 0.95 {
            warnings.push(ConfigIssue::new(
                "gcThreshold",
                "above 0.95; collection may trigger too late",
            ));
        }
    }

    for (field, value) in [
        ("gcInterval", patch.gc_interval_ms),
        ("autoCleanupInterval", patch.auto_cleanup_interval_ms),
    ] {
        let Some(ms) = value else { continue };
        if ms < MIN_INTERVAL_MS as i64 {
            errors.push(ConfigIssue::new(field, "must be at least 1000ms"));
        } else if (ms as u64) < SHORT_INTERVAL_MS {
            warnings.push(ConfigIssue::new(field, "unusually short (< 5s)"));
        } else if (ms as u64) > LONG_INTERVAL_MS {
            warnings.push(ConfigIssue::new(field, "unusually long (> 1h)"));
        }
    }

    for (field, value) in [
        ("maxPoolAge", patch.max_pool_age_ms),
        ("leakDetectionThreshold", patch.leak_detection_threshold_ms),
        ("maxEventHistory", patch.max_event_history),
    ] {
        if matches!(value, Some(v) if v < 0) {
            errors.push(ConfigIssue::new(field, "must not be negative"));
        }
    }

    if matches!(patch.leak_detection_threshold_ms, Some(ms) if (0..60_000).contains(&ms)) {
        warnings.push(ConfigIssue::new(
            "leakDetectionThreshold",
            "below 60s; short-lived objects will be reported as leaks",
        ));
    }

    if matches!(patch.max_event_history, Some(count) if count > 10_000) {
        warnings.push(ConfigIssue::new(
            "maxEventHistory",
            "above 10000; event history will hold a lot of memory",
        ));
    }

    if errors.is_empty() {
        let effective = base.merged(patch);
        if effective.auto_cleanup_interval_ms < effective.gc_interval_ms {
            warnings.push(ConfigIssue::new(
                "autoCleanupInterval",
                "shorter than gcInterval; cleanup will outpace collection",
            ));
        }
    }

    ValidationReport {
        is_valid: errors.is_empty(),
        errors,
        warnings,
    }
}

/// Structural diff between two configurations
fn diff_configs(old: &MemoryConfig, new: &MemoryConfig) -> ConfigChanges {
    let (Ok(Value::Object(old)), Ok(Value::Object(new))) =
        (serde_json::to_value(old), serde_json::to_value(new))
    else {
        return ConfigChanges::new();
    };

    new.into_iter()
        .filter_map(|(field, to)| {
            let from = old.get(&field).cloned().unwrap_or(Value::Null);
            (from != to).then(|| (field, FieldChange { from, to }))
        })
        .collect()
}

/// Owner of the live memory policy
#[derive(Debug)]
pub struct ConfigGovernor {
    current: RwLock<MemoryConfig>,
}

impl ConfigGovernor {
    /// Create a governor around an already validated configuration
    pub fn new(config: MemoryConfig) -> Self {
        Self {
            current: RwLock::new(config),
        }
    }

    /// Snapshot of the current configuration
    pub fn config(&self) -> MemoryConfig {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Validate a patch against the current configuration.
    ///
    /// Every field is checked independently; errors accumulate.
    pub fn validate(&self, patch: &MemoryConfigPatch) -> ValidationReport {
        validate_patch(&self.config(), patch)
    }

    /// Validate, merge and apply a patch.
    ///
    /// On any hard error the configuration is left unchanged.
    pub fn merge_and_apply(&self, patch: &MemoryConfigPatch) -> Result<ConfigUpdate, ConfigError> {
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);

        let report = validate_patch(&current, patch);
        for warning in &report.warnings {
            warn!("Memory config warning: {}", warning);
        }
        if !report.is_valid {
            warn!(
                errors = report.errors.len(),
                "Rejected memory config update: {}",
                join_issues(&report.errors)
            );
            return Err(ConfigError::Invalid { errors: report.errors });
        }

        if patch.is_empty() {
            debug!("Empty memory config patch, nothing to apply");
        }

        let new_config = current.merged(patch);
        let changes = diff_configs(&current, &new_config);
        *current = new_config.clone();

        if !changes.is_empty() {
            info!(
                "Memory config updated: {}",
                changes.keys().cloned().collect::<Vec<_>>().join(", ")
            );
        }

        Ok(ConfigUpdate { new_config, changes })
    }

    /// Usage divided by the configured maximum
    pub fn pressure(&self, current_usage: u64) -> f64 {
        ratio(current_usage, self.config().max_memory)
    }

    /// Classify current usage
    pub fn pressure_level(&self, current_usage: u64) -> PressureLevel {
        let config = self.config();
        PressureLevel::from_ratio(ratio(current_usage, config.max_memory), config.gc_threshold)
    }

    /// Decide whether a collection pass is due.
    ///
    /// Pressure at or over the threshold and elapsed time at or over the GC
    /// interval are independent triggers.
    pub fn should_trigger_gc(&self, current_usage: u64, since_last_gc: Duration) -> bool {
        let config = self.config();
        ratio(current_usage, config.max_memory) >= config.gc_threshold
            || since_last_gc >= config.gc_interval()
    }

    /// Fresh pressure reading for the given usage
    pub fn pressure_info(&self, current_usage: u64, since_last_gc: Duration) -> PressureInfo {
        let config = self.config();
        let pressure = ratio(current_usage, config.max_memory);
        let level = PressureLevel::from_ratio(pressure, config.gc_threshold);
        PressureInfo {
            level,
            pressure,
            should_trigger_gc: pressure >= config.gc_threshold
                || since_last_gc >= config.gc_interval(),
            recommendation: level.recommendation().to_string(),
        }
    }
}

impl Default for ConfigGovernor {
    fn default() -> Self {
        Self::new(MemoryConfig::default())
    }
}

fn ratio(usage: u64, max: u64) -> f64 {
    if max == 0 {
        return f64::INFINITY;
    }
    usage as f64 / max as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn governor(max_memory: u64, gc_threshold: f64) -> ConfigGovernor {
        let config = MemoryConfig {
            max_memory,
            gc_threshold,
            ..MemoryConfig::default()
        };
        ConfigGovernor::new(config)
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = MemoryConfig::builder().build().unwrap();
        assert_eq!(config, MemoryConfig::default());
    }

    #[test]
    fn test_full_config_validation() {
        assert!(MemoryConfig::default().validate().is_ok());

        let config = MemoryConfig {
            gc_interval_ms: 500,
            ..MemoryConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_errors_accumulate() {
        let governor = ConfigGovernor::default();
        let patch = MemoryConfigPatch::default()
            .max_memory(0)
            .gc_threshold(1.5)
            .gc_interval_ms(10)
            .auto_cleanup_interval_ms(999);

        let report = governor.validate(&patch);
        assert!(!report.is_valid);
        let fields: Vec<_> = report.errors.iter().map(|e| e.field).collect();
        assert_eq!(
            fields,
            vec!["maxMemory", "gcThreshold", "gcInterval", "autoCleanupInterval"]
        );
    }

    #[test]
    fn test_warnings_do_not_block() {
        let governor = ConfigGovernor::default();
        let patch = MemoryConfigPatch::default()
            .max_memory(5 * MB as i64)
            .gc_threshold(0.2)
            .gc_interval_ms(60_000)
            .auto_cleanup_interval_ms(2_000);

        let report = governor.validate(&patch);
        assert!(report.is_valid);
        let fields: Vec<_> = report.warnings.iter().map(|w| w.field).collect();
        assert!(fields.contains(&"maxMemory"));
        assert!(fields.contains(&"gcThreshold"));
        assert!(fields.contains(&"autoCleanupInterval"));
    }

    #[test]
    fn test_invalid_update_leaves_config_unchanged() {
        let governor = ConfigGovernor::default();
        let before = governor.config();

        let result = governor.merge_and_apply(&MemoryConfigPatch::default().gc_threshold(1.5));
        assert!(matches!(result, Err(ConfigError::Invalid { .. })));
        assert_eq!(governor.config(), before);
    }

    #[test]
    fn test_merge_reports_structural_diff() {
        let governor = ConfigGovernor::default();
        let update = governor
            .merge_and_apply(
                &MemoryConfigPatch::default()
                    .gc_threshold(0.7)
                    .enable_event_logging(true),
            )
            .unwrap();

        assert_eq!(update.new_config.gc_threshold, 0.7);
        assert_eq!(update.changes.len(), 2);
        let change = &update.changes["gcThreshold"];
        assert_eq!(change.from, serde_json::json!(0.8));
        assert_eq!(change.to, serde_json::json!(0.7));
        assert!(update.changes.contains_key("enableEventLogging"));
        assert_eq!(governor.config().gc_threshold, 0.7);
    }

    #[test]
    fn test_unchanged_values_produce_no_diff() {
        let governor = ConfigGovernor::default();
        let update = governor
            .merge_and_apply(&MemoryConfigPatch::default().gc_threshold(0.8))
            .unwrap();
        assert!(update.changes.is_empty());
    }

    #[test]
    fn test_patch_from_json_rejects_unknown_fields() {
        let patch = MemoryConfigPatch::from_json(r#"{"maxMemory": 1048576, "gcThreshold": 0.5}"#)
            .unwrap();
        assert_eq!(patch.max_memory, Some(1_048_576));
        assert_eq!(patch.gc_threshold, Some(0.5));

        let err = MemoryConfigPatch::from_json(r#"{"maxMemroy": 1}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_negative_values_are_errors() {
        let report = ConfigGovernor::default().validate(
            &MemoryConfigPatch::default()
                .max_pool_age_ms(-1)
                .max_event_history(-5),
        );
        assert!(!report.is_valid);
        assert_eq!(report.errors.len(), 2);
    }

    #[test]
    fn test_scenario_high_pressure_triggers_gc() {
        let governor = governor(100 * MB, 0.8);
        let usage = 90 * MB;

        let info = governor.pressure_info(usage, Duration::ZERO);
        assert!((info.pressure - 0.9).abs() < 1e-9);
        assert_eq!(info.level, PressureLevel::High);
        assert!(info.should_trigger_gc);
    }

    #[test]
    fn test_time_based_trigger_under_low_pressure() {
        let governor = governor(100 * MB, 0.8);
        let interval = governor.config().gc_interval();

        assert!(!governor.should_trigger_gc(MB, interval / 2));
        assert!(governor.should_trigger_gc(MB, interval));
        assert!(governor.should_trigger_gc(80 * MB, Duration::ZERO));
    }

    #[test]
    fn test_config_serde_uses_camel_case() {
        let json = serde_json::to_value(MemoryConfig::default()).unwrap();
        assert!(json.get("maxMemory").is_some());
        assert!(json.get("gcIntervalMs").is_some());
    }
}
