//! Crate-wide error type.
//!
//! Library functions return `Result<T, LifecycleError>`. Invariant violations
//! and "not found" conditions are surfaced through typed return values
//! (`KillResult`, `CanSpawn`) wherever the spec calls for that; `LifecycleError`
//! is reserved for the handful of cases the spec says must be an error
//! (disposed manager, malformed persisted rows).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    #[error("lifecycle manager has been disposed")]
    Disposed,

    #[error("operation cancelled: {0}")]
    Cancelled(String),

    #[error("storage error: {0}")]
    Store(String),

    #[error("malformed persisted row: {0}")]
    Corrupt(String),
}

pub type LifecycleResult<T> = Result<T, LifecycleError>;
