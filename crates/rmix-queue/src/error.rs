//! Queue error types.

use thiserror::Error;

pub type QueueResult<T> = Result<T, QueueError>;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Enqueue failed: {0}")]
    EnqueueFailed(String),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Job {job_id} is not owned by {worker}")]
    NotOwner { job_id: String, worker: String },

    #[error("Corrupt job record {job_id}: {reason}")]
    CorruptRecord { job_id: String, reason: String },

    #[error("Invalid job state: {0}")]
    Model(#[from] rmix_models::ModelError),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl QueueError {
    pub fn connection_failed(msg: impl Into<String>) -> Self {
        Self::ConnectionFailed(msg.into())
    }

    pub fn enqueue_failed(msg: impl Into<String>) -> Self {
        Self::EnqueueFailed(msg.into())
    }

    pub fn corrupt(job_id: impl ToString, reason: impl Into<String>) -> Self {
        Self::CorruptRecord {
            job_id: job_id.to_string(),
            reason: reason.into(),
        }
    }

    /// Transient store failures that are worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            QueueError::ConnectionFailed(_) => true,
            QueueError::Redis(e) => e.is_io_error() || e.is_timeout() || e.is_connection_dropped(),
            _ => false,
        }
    }
}
