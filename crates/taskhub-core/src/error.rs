//! Error types, layered the way the `jobs::JobError` converts
//! into the crate-wide `Error` via `#[from]`: a storage-facing error, a
//! handler-facing error, and a top-level error that both convert into.

use thiserror::Error;

/// Errors returned by a [`crate::store::JobStore`] implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("task already exists: {0}")]
    DuplicateTask(String),

    #[error("task not found: {0}")]
    TaskNotFound(String),

    #[error("backend error: {0}")]
    Backend(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors surfaced by a user `Source::handle` implementation.
///
/// Carries the classification the scheduler needs (retryable /
/// rate-limited) so it is computed once at the point of failure rather
/// than re-derived later.
#[derive(Debug, Error, Clone)]
#[error("{message}")]
pub struct JobError {
    pub message: String,
}

impl JobError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn timeout(after_ms: u64) -> Self {
        Self::new(format!("job timed out after {}ms", after_ms))
    }

    pub fn cancelled() -> Self {
        Self::new("job cancelled")
    }
}

/// Crate-wide error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("task not found: {0}")]
    TaskNotFound(String),

    #[error(
        "merkle root mismatch resuming task {task_id}: expected {expected}, got {actual}"
    )]
    MerkleMismatch {
        task_id: String,
        expected: String,
        actual: String,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("task {task_id} failed: {reason}")]
    Fatal { task_id: String, reason: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    pub fn other(msg: impl Into<String>) -> Self {
        Error::Other(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_error_display() {
        let e = JobError::timeout(500);
        assert!(e.to_string().contains("500"));
    }

    #[test]
    fn store_error_converts_into_crate_error() {
        let store_err = StoreError::TaskNotFound("abc".into());
        let err: Error = store_err.into();
        matches!(err, Error::Store(_));
    }
}
