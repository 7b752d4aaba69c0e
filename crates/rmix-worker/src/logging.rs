//! Structured job logging utilities.
//!
//! Provides consistent, structured logging for job processing with
//! tracing spans and contextual information.

use tracing::{error, info, warn, Span};
use rmix_models::RenderJob;

/// Job logger for structured logging with consistent formatting.
#[derive(Debug, Clone)]
pub struct JobLogger {
    job_id: String,
    batch_id: String,
    index: usize,
}

impl JobLogger {
    pub fn new(job: &RenderJob) -> Self {
        Self {
            job_id: job.job_id.to_string(),
            batch_id: job.batch_id.to_string(),
            index: job.index,
        }
    }

    /// Log the start of a job attempt.
    pub fn log_start(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            batch_id = %self.batch_id,
            index = self.index,
            "Job started: {}", message
        );
    }

    /// Log a progress update during job execution.
    pub fn log_progress(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            batch_id = %self.batch_id,
            "Job progress: {}", message
        );
    }

    /// Log a warning during job execution.
    pub fn log_warning(&self, message: &str) {
        warn!(
            job_id = %self.job_id,
            batch_id = %self.batch_id,
            "Job warning: {}", message
        );
    }

    /// Log an error during job execution.
    pub fn log_error(&self, message: &str) {
        error!(
            job_id = %self.job_id,
            batch_id = %self.batch_id,
            "Job error: {}", message
        );
    }

    /// Log the completion of a job.
    pub fn log_completion(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            batch_id = %self.batch_id,
            "Job completed: {}", message
        );
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn batch_id(&self) -> &str {
        &self.batch_id
    }

    /// Create a tracing span for this job.
    pub fn create_span(&self) -> Span {
        tracing::info_span!(
            "job",
            job_id = %self.job_id,
            batch_id = %self.batch_id,
            index = self.index
        )
    }
}
