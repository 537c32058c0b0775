//! Runtime usage sampling and reclamation hooks.
//!
//! The primary usage signal is the process RSS read through `sysinfo`.
//! When no probe is installed or it fails, the orchestrator falls back to
//! the size of everything it tracks, which is a lower-confidence estimate.

use serde::Serialize;
use std::sync::Mutex;
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};
use thiserror::Error;

/// Errors from usage sampling
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("Failed to get process info")]
    ProcessNotFound,

    #[error("Usage signal unavailable")]
    Unavailable,
}

/// Source of a usage reading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageSource {
    /// Reported by the runtime (process RSS)
    Runtime,
    /// Sum of tracked object sizes
    TrackedEstimate,
}

/// One usage reading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct UsageSample {
    pub bytes: u64,
    pub source: UsageSource,
}

/// Reports current memory usage in bytes
pub trait UsageProbe: Send + Sync {
    fn resident_bytes(&self) -> Result<u64, ProbeError>;
}

impl<F> UsageProbe for F
where
    F: Fn() -> Option<u64> + Send + Sync,
{
    fn resident_bytes(&self) -> Result<u64, ProbeError> {
        self().ok_or(ProbeError::Unavailable)
    }
}

/// Best-effort reclamation hook invoked during a collection pass
pub trait Reclaimer: Send + Sync {
    fn reclaim(&self) -> anyhow::Result<()>;
}

impl<F> Reclaimer for F
where
    F: Fn() -> anyhow::Result<()> + Send + Sync,
{
    fn reclaim(&self) -> anyhow::Result<()> {
        self()
    }
}

/// Reads the current process RSS
pub struct ProcessRssProbe {
    pid: Pid,
    system: Mutex<System>,
}

impl ProcessRssProbe {
    pub fn new() -> Self {
        Self {
            pid: Pid::from_u32(std::process::id()),
            system: Mutex::new(System::new()),
        }
    }

    /// Get RSS reading synchronously (for one-off checks)
    pub fn read_rss_sync() -> Result<u64, ProbeError> {
        Self::new().resident_bytes()
    }
}

impl Default for ProcessRssProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl UsageProbe for ProcessRssProbe {
    fn resident_bytes(&self) -> Result<u64, ProbeError> {
        let mut system = self
            .system
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[self.pid]),
            true,
            ProcessRefreshKind::nothing().with_memory(),
        );

        system
            .process(self.pid)
            .map(|p| p.memory())
            .ok_or(ProbeError::ProcessNotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_rss() {
        // This should succeed on any system
        let rss = ProcessRssProbe::read_rss_sync().unwrap();
        assert!(rss > 0);
    }

    #[test]
    fn test_closure_probe() {
        let probe = || Some(42u64);
        assert_eq!(probe.resident_bytes().unwrap(), 42);

        let missing = || None::<u64>;
        assert!(matches!(missing.resident_bytes(), Err(ProbeError::Unavailable)));
    }

    #[test]
    fn test_closure_reclaimer() {
        let ok = || -> anyhow::Result<()> { Ok(()) };
        assert!(ok.reclaim().is_ok());

        let failing = || -> anyhow::Result<()> { Err(anyhow::anyhow!("no hook")) };
        assert_eq!(failing.reclaim().unwrap_err().to_string(), "no hook");
    }
}
