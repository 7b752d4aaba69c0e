//! In-process job store.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use rmix_models::job::{PROGRESS_DISPATCHED, PROGRESS_DONE};
use rmix_models::{JobId, JobResult, JobSnapshot, JobState, RenderJob};
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use tracing::debug;

use crate::error::{QueueError, QueueResult};
use crate::store::{BackendKind, ClaimedJob, FailureDisposition, JobStore};

struct Record {
    snapshot: JobSnapshot,
    job: RenderJob,
    owner: Option<String>,
}

#[derive(Default)]
struct MemoryState {
    records: HashMap<JobId, Record>,
    waiting: VecDeque<JobId>,
}

/// Records live in a map for the lifetime of the process.
///
/// Jobs are handed out in admission order. There is no automatic retry: a
/// failed attempt is terminal.
#[derive(Default)]
pub struct MemoryJobStore {
    state: Mutex<MemoryState>,
    available: Notify,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a state/progress update directly.
    pub async fn advance(
        &self,
        id: &JobId,
        state: JobState,
        progress: u8,
        result: Option<JobResult>,
    ) -> QueueResult<JobSnapshot> {
        let mut guard = self.state.lock().await;
        let record = guard
            .records
            .get_mut(id)
            .ok_or_else(|| QueueError::JobNotFound(id.to_string()))?;
        record.snapshot.advance(state, progress, result)?;
        Ok(record.snapshot.clone())
    }

    /// Number of jobs not yet claimed.
    pub async fn waiting_len(&self) -> usize {
        self.state.lock().await.waiting.len()
    }

    async fn finish(&self, claim: &ClaimedJob, state: JobState, result: JobResult) -> QueueResult<()> {
        let mut guard = self.state.lock().await;
        let record = guard
            .records
            .get_mut(claim.job_id())
            .ok_or_else(|| QueueError::JobNotFound(claim.job_id().to_string()))?;

        if record.owner.as_deref() != Some(claim.worker.as_str()) {
            return Err(QueueError::NotOwner {
                job_id: claim.job_id().to_string(),
                worker: claim.worker.clone(),
            });
        }

        record.snapshot.advance(state, PROGRESS_DONE, Some(result))?;
        record.owner = None;
        Ok(())
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    fn backend(&self) -> BackendKind {
        BackendKind::Memory
    }

    async fn admit(&self, job: RenderJob) -> QueueResult<JobId> {
        let id = job.job_id.clone();
        {
            let mut guard = self.state.lock().await;
            if guard.records.contains_key(&id) {
                return Err(QueueError::enqueue_failed(format!("duplicate job id {id}")));
            }
            guard.records.insert(
                id.clone(),
                Record {
                    snapshot: JobSnapshot::waiting(id.clone()),
                    job,
                    owner: None,
                },
            );
            guard.waiting.push_back(id.clone());
        }
        self.available.notify_one();
        debug!(job_id = %id, "Admitted job");
        Ok(id)
    }

    async fn get(&self, id: &JobId) -> QueueResult<Option<JobSnapshot>> {
        let guard = self.state.lock().await;
        Ok(guard.records.get(id).map(|r| r.snapshot.clone()))
    }

    async fn claim_next(&self, worker: &str, wait: Duration) -> QueueResult<Option<ClaimedJob>> {
        let deadline = Instant::now() + wait;

        loop {
            let notified = self.available.notified();

            {
                let mut guard = self.state.lock().await;
                while let Some(id) = guard.waiting.pop_front() {
                    let Some(record) = guard.records.get_mut(&id) else {
                        continue;
                    };
                    record.snapshot.advance(JobState::Active, PROGRESS_DISPATCHED, None)?;
                    record.owner = Some(worker.to_string());

                    return Ok(Some(ClaimedJob {
                        job: record.job.clone(),
                        attempt: record.snapshot.attempts,
                        worker: worker.to_string(),
                        receipt: None,
                    }));
                }
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn complete(&self, claim: &ClaimedJob, result: JobResult) -> QueueResult<()> {
        self.finish(claim, JobState::Completed, result).await
    }

    async fn fail(&self, claim: &ClaimedJob, error: &str, _retryable: bool) -> QueueResult<FailureDisposition> {
        self.finish(claim, JobState::Failed, JobResult::failure(error)).await?;
        Ok(FailureDisposition::Terminal)
    }
}
