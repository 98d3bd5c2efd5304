//! Crate-wide error kinds (spec.md §7).
//!
//! Each component crate propagates these via `?`; `ald-runtime` wraps them
//! in `anyhow::Context` at the top level for operator-facing messages.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AldError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("PLC transport error: {0}")]
    PlcTransport(String),

    #[error("database transport error: {0}")]
    DbTransport(String),

    #[error("state conflict: {0}")]
    StateConflict(String),

    #[error("recipe fault: {0}")]
    RecipeFault(String),

    #[error("data integrity fault: {0}")]
    DataIntegrityFault(String),
}

impl AldError {
    /// Whether this error reflects a transient condition worth retrying
    /// (spec.md §4.1's retry/backoff categorization applies to transport
    /// errors only; everything else is treated as terminal for the
    /// operation that raised it).
    pub fn is_retryable(&self) -> bool {
        matches!(self, AldError::PlcTransport(_) | AldError::DbTransport(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_errors_are_retryable() {
        assert!(AldError::PlcTransport("timeout".into()).is_retryable());
        assert!(AldError::DbTransport("connection reset".into()).is_retryable());
    }

    #[test]
    fn logic_errors_are_not_retryable() {
        assert!(!AldError::Validation("bad value".into()).is_retryable());
        assert!(!AldError::StateConflict("already processing".into()).is_retryable());
        assert!(!AldError::DataIntegrityFault("orphan row".into()).is_retryable());
    }
}
