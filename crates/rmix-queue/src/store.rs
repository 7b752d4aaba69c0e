//! The job record store interface shared by both backends.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rmix_models::{JobId, JobResult, JobSnapshot, RenderJob};
use tracing::info;
use uuid::Uuid;

use crate::error::QueueResult;
use crate::memory::MemoryJobStore;
use crate::redis_store::{RedisJobStore, RedisStoreConfig};

/// Which backend a store is running on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// Durable Redis Streams backend with automatic retry
    Redis,
    /// In-process map, lost on exit, no retry
    Memory,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Redis => "redis",
            BackendKind::Memory => "memory",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A job handed to one worker.
///
/// Only the owning worker may finish it; the store rejects updates carrying
/// a different owner.
#[derive(Debug, Clone)]
pub struct ClaimedJob {
    pub job: RenderJob,
    /// 1-based attempt number
    pub attempt: u32,
    pub worker: String,
    /// Backend delivery handle (stream entry id for Redis)
    pub(crate) receipt: Option<String>,
}

impl ClaimedJob {
    pub fn job_id(&self) -> &JobId {
        &self.job.job_id
    }
}

/// What happened to a job after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureDisposition {
    /// Scheduled for another attempt; the job stays active
    Retrying { attempt: u32, delay: Duration },
    /// The job is now failed
    Terminal,
}

/// Durable or in-process storage of job records.
///
/// Every update is atomic per job id, state only moves forward
/// (waiting -> active -> completed | failed) and progress never decreases.
#[async_trait]
pub trait JobStore: Send + Sync {
    fn backend(&self) -> BackendKind;

    /// Persist a new record in `waiting` with progress 0 and make it
    /// available to workers.
    async fn admit(&self, job: RenderJob) -> QueueResult<JobId>;

    /// Current snapshot, or `None` for unknown (or evicted) ids.
    async fn get(&self, id: &JobId) -> QueueResult<Option<JobSnapshot>>;

    /// Take the next available job, waiting up to `wait` for one.
    async fn claim_next(&self, worker: &str, wait: Duration) -> QueueResult<Option<ClaimedJob>>;

    /// Record a successful render.
    async fn complete(&self, claim: &ClaimedJob, result: JobResult) -> QueueResult<()>;

    /// Record a failed attempt. `retryable` failures may be scheduled again
    /// if the backend retries.
    async fn fail(&self, claim: &ClaimedJob, error: &str, retryable: bool) -> QueueResult<FailureDisposition>;

    /// Take over at most `limit` jobs whose worker stopped responding.
    ///
    /// Each returned job is already `active` under `worker`, so callers pass
    /// the number of free execution slots they hold.
    async fn reclaim_stale(&self, _worker: &str, _min_idle: Duration, _limit: usize) -> QueueResult<Vec<ClaimedJob>> {
        Ok(Vec::new())
    }
}

/// Open the store selected by configuration: Redis when configured,
/// otherwise the in-process backend.
pub async fn connect_store(redis: Option<RedisStoreConfig>) -> QueueResult<Arc<dyn JobStore>> {
    match redis {
        Some(config) => {
            let store = RedisJobStore::connect(config).await?;
            info!("Using Redis job store");
            Ok(Arc::new(store))
        }
        None => {
            info!("REDIS_URL not set, using in-process job store");
            Ok(Arc::new(MemoryJobStore::new()))
        }
    }
}

/// Unique consumer name for this worker process.
pub fn consumer_name(prefix: &str) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}-{}", prefix, &suffix[..8])
}
