//! Store error types.

use thiserror::Error;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Ledger conflict: {0}")]
    LedgerConflict(String),

    #[error("Enqueue failed: {0}")]
    EnqueueFailed(String),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl StoreError {
    pub fn job_not_found(id: impl Into<String>) -> Self {
        Self::JobNotFound(id.into())
    }

    pub fn ledger_conflict(msg: impl Into<String>) -> Self {
        Self::LedgerConflict(msg.into())
    }

    pub fn enqueue_failed(msg: impl Into<String>) -> Self {
        Self::EnqueueFailed(msg.into())
    }

    /// Connection-level failures are worth retrying; data-level ones are not.
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Redis(e) => e.is_io_error() || e.is_timeout() || e.is_cluster_error(),
            _ => false,
        }
    }
}
