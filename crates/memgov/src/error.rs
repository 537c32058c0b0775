//! Crate-level error type.

use crate::config::ConfigError;
use crate::pool::PoolError;
use crate::probe::ProbeError;
use thiserror::Error;

/// Errors surfaced by the memory orchestrator's public API.
///
/// Only configuration failures are expected to reach callers during normal
/// operation; everything raised inside monitors is recorded and reported
/// through `ErrorOccurred` events instead.
#[derive(Debug, Error)]
pub enum MemoryError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error(transparent)]
    Probe(#[from] ProbeError),

    #[error("Pool already registered: {0}")]
    PoolExists(String),

    #[error("Pool not found: {0}")]
    PoolNotFound(String),

    #[error("Pool {name} does not hold items of type {requested}")]
    PoolTypeMismatch { name: String, requested: &'static str },

    #[error("Reference not found: {0}")]
    ReferenceNotFound(String),

    #[error("Memory orchestrator has been destroyed")]
    Destroyed,

    #[error("Failed to spawn monitor thread: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("Teardown finished with {} failure(s): {}", failures.len(), failures.join("; "))]
    Teardown { failures: Vec<String> },
}

/// Extract a printable message from a caught panic payload.
pub(crate) fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panic_message_extraction() {
        let payload = std::panic::catch_unwind(|| panic!("boom")).unwrap_err();
        assert_eq!(panic_message(payload), "boom");

        let payload = std::panic::catch_unwind(|| panic!("{} {}", "formatted", 1)).unwrap_err();
        assert_eq!(panic_message(payload), "formatted 1");
    }

    #[test]
    fn test_teardown_display() {
        let err = MemoryError::Teardown {
            failures: vec!["pool a".to_string(), "pool b".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "Teardown finished with 2 failure(s): pool a; pool b"
        );
    }
}
