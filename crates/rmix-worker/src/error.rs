//! Worker error types.

use thiserror::Error;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Validation failed: {0}")]
    Validation(#[from] rmix_models::ModelError),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Job failed: {0}")]
    JobFailed(String),

    #[error("{0}")]
    Pipeline(#[from] rmix_media::PipelineError),

    #[error("Media error: {0}")]
    Media(#[from] rmix_media::MediaError),

    #[error("Queue error: {0}")]
    Queue(#[from] rmix_queue::QueueError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    pub fn job_failed(msg: impl Into<String>) -> Self {
        Self::JobFailed(msg.into())
    }

    /// Check if error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            WorkerError::Pipeline(e) => e.is_retryable(),
            WorkerError::Media(e) => e.is_retryable(),
            WorkerError::Queue(e) => e.is_transient(),
            WorkerError::Io(_) => true,
            _ => false,
        }
    }
}
