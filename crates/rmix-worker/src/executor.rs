//! Job executor.

use std::sync::Arc;
use std::time::{Duration, Instant};

use rmix_media::{CompositionPipeline, FfmpegRunner, FfprobeProbe};
use rmix_models::JobResult;
use rmix_queue::{consumer_name, ClaimedJob, FailureDisposition, JobStore, QueueError};
use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};
use tracing::{error, info, warn, Instrument};

use crate::config::WorkerConfig;
use crate::error::WorkerResult;
use crate::logging::JobLogger;
use crate::metrics;
use crate::retry::{retry_async, FailureTracker, RetryConfig};

/// Back-off after the store failed to hand out a job.
const CLAIM_ERROR_BACKOFF: Duration = Duration::from_secs(5);

/// Runs claimed jobs through the composition pipeline on a bounded pool.
///
/// At most `max_concurrent_jobs` jobs are active per executor: a slot is
/// reserved before a job is claimed and released once its outcome is stored.
pub struct JobExecutor {
    config: WorkerConfig,
    store: Arc<dyn JobStore>,
    pipeline: Arc<CompositionPipeline>,
    job_semaphore: Arc<Semaphore>,
    shutdown: watch::Sender<bool>,
    consumer_name: String,
}

impl JobExecutor {
    pub fn new(config: WorkerConfig, store: Arc<dyn JobStore>, pipeline: CompositionPipeline) -> Self {
        let job_semaphore = Arc::new(Semaphore::new(config.max_concurrent_jobs));
        let (shutdown, _) = watch::channel(false);

        Self {
            config,
            store,
            pipeline: Arc::new(pipeline),
            job_semaphore,
            shutdown,
            consumer_name: consumer_name("worker"),
        }
    }

    /// Executor backed by the real FFmpeg tools.
    pub fn with_ffmpeg(config: WorkerConfig, store: Arc<dyn JobStore>) -> Self {
        let runner = FfmpegRunner::new().with_timeout(config.stage_timeout);
        let probe = FfprobeProbe::new(config.ffprobe_bin.clone());
        let pipeline = CompositionPipeline::new(Arc::new(runner), Arc::new(probe), config.pipeline_config());
        Self::new(config, store, pipeline)
    }

    pub fn consumer_name(&self) -> &str {
        &self.consumer_name
    }

    /// Start the executor; returns after shutdown once in-flight jobs have
    /// drained or the drain timeout expired.
    pub async fn run(&self) -> WorkerResult<()> {
        info!(
            "Starting job executor '{}' with {} max concurrent jobs on {} store",
            self.consumer_name,
            self.config.max_concurrent_jobs,
            self.store.backend()
        );

        let mut shutdown_rx = self.shutdown.subscribe();
        let mut failures = FailureTracker::new(3);
        let mut reclaim_failures = FailureTracker::new(3);
        let mut next_reclaim = Instant::now() + self.config.claim_interval;

        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            let permit = tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                    continue;
                }
                permit = Arc::clone(&self.job_semaphore).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            if Instant::now() >= next_reclaim {
                next_reclaim = Instant::now() + self.config.claim_interval;
                let mut permits = vec![permit];
                permits.extend(reserve_free_slots(&self.job_semaphore));
                self.reclaim_stale_jobs(permits, &mut reclaim_failures).await;
                continue;
            }

            match self.store.claim_next(&self.consumer_name, self.config.poll_interval).await {
                Ok(Some(claim)) => {
                    failures.record_success();
                    self.spawn_job(claim, permit);
                }
                Ok(None) => failures.record_success(),
                Err(e) => {
                    drop(permit);
                    if failures.record_failure() {
                        error!("Error claiming jobs: {}", e);
                    }
                    tokio::select! {
                        _ = shutdown_rx.changed() => {}
                        _ = tokio::time::sleep(CLAIM_ERROR_BACKOFF) => {}
                    }
                }
            }
        }

        info!("Shutdown signal received, stopping executor");

        info!("Waiting for in-flight jobs to complete...");
        if tokio::time::timeout(self.config.shutdown_timeout, self.wait_for_jobs())
            .await
            .is_err()
        {
            warn!(
                "In-flight jobs did not finish within {:?}",
                self.config.shutdown_timeout
            );
        }

        info!("Job executor stopped");
        Ok(())
    }

    /// Signal shutdown.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    /// Number of jobs currently running.
    pub fn active_jobs(&self) -> usize {
        self.config.max_concurrent_jobs - self.job_semaphore.available_permits()
    }

    fn spawn_job(&self, claim: ClaimedJob, permit: OwnedSemaphorePermit) {
        let store = Arc::clone(&self.store);
        let pipeline = Arc::clone(&self.pipeline);
        tokio::spawn(async move {
            let _permit = permit;
            execute_job(store, pipeline, claim).await;
        });
    }

    /// Take over jobs abandoned by crashed workers, one per reserved slot.
    ///
    /// Reclaimed jobs are already active when the store returns them, so the
    /// slots are held before asking and only that many jobs are requested.
    async fn reclaim_stale_jobs(&self, permits: Vec<OwnedSemaphorePermit>, failures: &mut FailureTracker) {
        let claims = match self
            .store
            .reclaim_stale(&self.consumer_name, self.config.claim_min_idle, permits.len())
            .await
        {
            Ok(claims) => {
                failures.record_success();
                claims
            }
            Err(e) => {
                if failures.record_failure() {
                    warn!(
                        "Failed to reclaim stale jobs ({} in a row): {}",
                        failures.failure_count(),
                        e
                    );
                }
                return;
            }
        };

        if !claims.is_empty() {
            info!("Reclaimed {} stale jobs", claims.len());
        }
        if claims.len() > permits.len() {
            warn!(
                "Store returned {} stale jobs for {} free slots",
                claims.len(),
                permits.len()
            );
        }
        for (claim, permit) in claims.into_iter().zip(permits) {
            self.spawn_job(claim, permit);
        }
    }

    /// Wait for all in-flight jobs to complete.
    async fn wait_for_jobs(&self) {
        while self.active_jobs() > 0 {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }
}

/// Take every currently free slot without waiting.
fn reserve_free_slots(semaphore: &Arc<Semaphore>) -> Vec<OwnedSemaphorePermit> {
    let mut permits = Vec::new();
    while let Ok(permit) = Arc::clone(semaphore).try_acquire_owned() {
        permits.push(permit);
    }
    permits
}

/// Render one claimed job and store its outcome.
async fn execute_job(store: Arc<dyn JobStore>, pipeline: Arc<CompositionPipeline>, claim: ClaimedJob) {
    let logger = JobLogger::new(&claim.job);
    let span = logger.create_span();

    async move {
        logger.log_start(&format!("attempt {}", claim.attempt));
        let started = Instant::now();
        let retry = RetryConfig::new("store job outcome").with_max_retries(5);

        match pipeline.render(&claim.job).await {
            Ok(output) => {
                logger.log_progress("render finished, recording result");
                let result = JobResult::success(
                    output.output_path.to_string_lossy(),
                    output.url.clone(),
                );
                let stored = retry_async(&retry, QueueError::is_transient, || {
                    store.complete(&claim, result.clone())
                })
                .await;

                match stored {
                    Ok(()) => {
                        metrics::record_job_finished("completed", started.elapsed().as_secs_f64());
                        logger.log_completion(&format!(
                            "{} in {:.1?}",
                            output.output_path.display(),
                            output.elapsed
                        ));
                    }
                    Err((e, attempts)) => logger.log_error(&format!(
                        "Rendered but failed to record completion after {} attempts: {}",
                        attempts, e
                    )),
                }
            }
            Err(e) => {
                let message = e.to_string();
                let retryable = e.is_retryable();
                logger.log_error(&message);

                let stored = retry_async(&retry, QueueError::is_transient, || {
                    store.fail(&claim, &message, retryable)
                })
                .await;

                match stored {
                    Ok(FailureDisposition::Retrying { attempt, delay }) => {
                        metrics::record_job_retried();
                        logger.log_warning(&format!(
                            "attempt {} failed, retrying in {:?}",
                            attempt, delay
                        ));
                    }
                    Ok(FailureDisposition::Terminal) => {
                        metrics::record_job_finished("failed", started.elapsed().as_secs_f64());
                    }
                    Err((e, attempts)) => logger.log_error(&format!(
                        "Failed to record failure after {} attempts: {}",
                        attempts, e
                    )),
                }
            }
        }
    }
    .instrument(span)
    .await
}
