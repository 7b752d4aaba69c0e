//! Batch admission and result polling.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rmix_models::{
    BatchRequest, BatchSubmission, ClipId, ClipKind, Combination, JobId, JobSnapshot, OutputLayout,
    RenderJob, SkippedCombination,
};
use rmix_queue::JobStore;
use tracing::{info, warn};

use crate::catalog::ClipCatalog;
use crate::error::{WorkerError, WorkerResult};
use crate::metrics;

/// Turns batch requests into admitted render jobs.
pub struct BatchSubmitter {
    store: Arc<dyn JobStore>,
    catalog: Arc<dyn ClipCatalog>,
    layout: OutputLayout,
}

impl BatchSubmitter {
    pub fn new(store: Arc<dyn JobStore>, catalog: Arc<dyn ClipCatalog>, layout: OutputLayout) -> Self {
        Self {
            store,
            catalog,
            layout,
        }
    }

    /// Admit one job per valid combination.
    ///
    /// Malformed batch settings reject the whole request before any job
    /// exists. Combinations with missing clips, bad ids or an out-of-range
    /// hook, and those the store refuses to admit, are skipped and reported;
    /// the ids of every admitted job are always returned.
    pub async fn submit(&self, request: BatchRequest) -> WorkerResult<BatchSubmission> {
        request.check()?;

        let batch_id = request.batch_id.clone().unwrap_or_default();
        let mut jobs = Vec::new();
        let mut skipped = Vec::new();

        for (index, combination) in request.combinations.iter().enumerate() {
            let job = match self.build_job(&request, &batch_id, index, combination).await {
                Ok(job) => job,
                Err(reason) => {
                    warn!(batch_id = %batch_id, index, "Skipping combination: {}", reason);
                    skipped.push(SkippedCombination { index, reason });
                    continue;
                }
            };

            match self.store.admit(job).await {
                Ok(job_id) => jobs.push((index, job_id)),
                Err(e) => {
                    warn!(batch_id = %batch_id, index, "Failed to admit combination: {}", e);
                    skipped.push(SkippedCombination {
                        index,
                        reason: format!("admission failed: {e}"),
                    });
                }
            }
        }

        metrics::record_jobs_admitted(jobs.len());
        metrics::record_jobs_skipped(skipped.len());
        info!(
            batch_id = %batch_id,
            "Admitted {} jobs, skipped {}",
            jobs.len(),
            skipped.len()
        );

        Ok(BatchSubmission {
            batch_id,
            jobs,
            skipped,
        })
    }

    async fn build_job(
        &self,
        request: &BatchRequest,
        batch_id: &rmix_models::BatchId,
        index: usize,
        combination: &Combination,
    ) -> Result<RenderJob, String> {
        combination.check().map_err(|e| e.to_string())?;

        let hook = request.hooks.get(combination.hook_index).ok_or_else(|| {
            format!(
                "hook index {} out of range ({} hooks)",
                combination.hook_index,
                request.hooks.len()
            )
        })?;

        let reaction = self.lookup(ClipKind::Reaction, &combination.reaction_id).await?;
        let demo = self.lookup(ClipKind::Demo, &combination.demo_id).await?;
        let music = match &combination.music_id {
            Some(id) => Some(self.lookup(ClipKind::Music, id).await?),
            None => None,
        };

        Ok(RenderJob {
            job_id: JobId::new(),
            batch_id: batch_id.clone(),
            index,
            reaction,
            demo,
            music,
            hook: hook.clone(),
            reaction_trim: combination.reaction_trim,
            demo_trim: combination.demo_trim,
            text: request.text,
            audio: request.audio,
            output_path: self.layout.output_path(batch_id, index),
            output_url: self.layout.output_url(batch_id, index),
            created_at: Utc::now(),
        })
    }

    async fn lookup(&self, kind: ClipKind, id: &ClipId) -> Result<rmix_models::Clip, String> {
        self.catalog
            .resolve(kind, id)
            .await
            .ok_or_else(|| format!("{kind} clip '{id}' not found"))
    }
}

/// Poll until every job is terminal (or evicted) and return the last
/// snapshots in the order of `ids`.
pub async fn wait_for_terminal(
    store: &dyn JobStore,
    ids: &[JobId],
    poll: Duration,
) -> WorkerResult<Vec<JobSnapshot>> {
    loop {
        let mut snapshots = Vec::with_capacity(ids.len());
        for id in ids {
            let snapshot = store
                .get(id)
                .await?
                .ok_or_else(|| WorkerError::job_failed(format!("job {id} is no longer stored")))?;
            snapshots.push(snapshot);
        }

        if snapshots.iter().all(JobSnapshot::is_terminal) {
            return Ok(snapshots);
        }
        tokio::time::sleep(poll).await;
    }
}
