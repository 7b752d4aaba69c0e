//! Worker pool tests against the in-process store with a fake FFmpeg.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rmix_media::{
    CompositionPipeline, MediaError, MediaInfo, MediaProbe, MediaResult, PipelineConfig, Stage,
    StageInvocation, StageRunner,
};
use rmix_models::{BatchRequest, Combination, JobId, JobResult, JobSnapshot, JobState, RenderJob};
use rmix_queue::{BackendKind, ClaimedJob, FailureDisposition, JobStore, MemoryJobStore, QueueResult};
use rmix_worker::{wait_for_terminal, BatchSubmitter, FsClipCatalog, JobExecutor, WorkerConfig};
use tempfile::TempDir;

/// Writes every declared output after a short delay and tracks how many
/// stages run at once.
#[derive(Default)]
struct SlowRunner {
    delay: Duration,
    fail_stage: Option<Stage>,
    running: AtomicUsize,
    max_running: AtomicUsize,
    stages: Mutex<Vec<Stage>>,
}

impl SlowRunner {
    fn new(delay: Duration) -> Self {
        Self {
            delay,
            ..Default::default()
        }
    }

    fn failing(stage: Stage) -> Self {
        Self {
            fail_stage: Some(stage),
            ..Default::default()
        }
    }
}

#[async_trait]
impl StageRunner for SlowRunner {
    async fn run(&self, invocation: &StageInvocation) -> MediaResult<()> {
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(now, Ordering::SeqCst);
        self.stages.lock().unwrap().push(invocation.stage);

        tokio::time::sleep(self.delay).await;
        let outcome = if self.fail_stage == Some(invocation.stage) {
            Err(MediaError::stage_failed(invocation.stage, Some(1), "Invalid data found"))
        } else {
            std::fs::write(&invocation.output, b"frames").map_err(MediaError::from)
        };

        self.running.fetch_sub(1, Ordering::SeqCst);
        outcome
    }
}

struct StaticProbe;

#[async_trait]
impl MediaProbe for StaticProbe {
    async fn probe(&self, _path: &Path) -> MediaResult<MediaInfo> {
        Ok(MediaInfo {
            duration: Some(8.0),
            has_video: true,
            has_audio: true,
        })
    }
}

struct Harness {
    root: TempDir,
    store: Arc<MemoryJobStore>,
    executor: Arc<JobExecutor>,
    submitter: BatchSubmitter,
}

impl Harness {
    fn new(max_jobs: usize, runner: Arc<SlowRunner>) -> Self {
        let root = TempDir::new().unwrap();
        for (dir, name) in [("reactions", "r1.mp4"), ("demos", "d1.mp4"), ("music", "m1.mp3")] {
            std::fs::create_dir_all(root.path().join(dir)).unwrap();
            std::fs::write(root.path().join(dir).join(name), b"media").unwrap();
        }

        let config = WorkerConfig {
            max_concurrent_jobs: max_jobs,
            shutdown_timeout: Duration::from_secs(5),
            work_dir: root.path().join("work"),
            poll_interval: Duration::from_millis(20),
            upload_dir: root.path().to_path_buf(),
            output_dir: root.path().join("outputs"),
            ..WorkerConfig::default()
        };

        let pipeline = CompositionPipeline::new(
            runner,
            Arc::new(StaticProbe),
            PipelineConfig {
                work_dir: config.work_dir.clone(),
                ..PipelineConfig::default()
            },
        );

        let store = Arc::new(MemoryJobStore::new());
        let submitter = BatchSubmitter::new(
            store.clone(),
            Arc::new(FsClipCatalog::new(&config.upload_dir)),
            config.output_layout(),
        );
        let executor = Arc::new(JobExecutor::new(config, store.clone(), pipeline));

        Self {
            root,
            store,
            executor,
            submitter,
        }
    }

    fn output(&self, name: &str) -> PathBuf {
        self.root.path().join("outputs").join("b1").join(name)
    }

    async fn run_batch(&self, request: BatchRequest) -> (Vec<(usize, JobId)>, Vec<JobSnapshot>) {
        let submission = self.submitter.submit(request).await.unwrap();

        let executor = Arc::clone(&self.executor);
        let handle = tokio::spawn(async move { executor.run().await });

        let snapshots = tokio::time::timeout(
            Duration::from_secs(10),
            wait_for_terminal(self.store.as_ref(), &submission.job_ids(), Duration::from_millis(10)),
        )
        .await
        .expect("batch did not finish")
        .unwrap();

        self.executor.shutdown();
        handle.await.unwrap().unwrap();
        (submission.jobs, snapshots)
    }
}

fn batch(combinations: Vec<Combination>) -> BatchRequest {
    BatchRequest::new(combinations, vec!["Wait until you see this".into()])
        .with_batch_id(rmix_models::BatchId::parse("b1").unwrap())
}

#[tokio::test]
async fn test_single_slot_runs_jobs_one_at_a_time() {
    let runner = Arc::new(SlowRunner::new(Duration::from_millis(20)));
    let harness = Harness::new(1, runner.clone());

    let (jobs, snapshots) = harness
        .run_batch(batch(vec![Combination::new("r1.mp4", "d1.mp4", 0); 3]))
        .await;

    assert_eq!(jobs.len(), 3);
    assert!(snapshots.iter().all(|s| s.state == JobState::Completed));
    assert_eq!(runner.max_running.load(Ordering::SeqCst), 1);
    for i in 0..3 {
        assert!(harness.output(&format!("b1_{i}.mp4")).exists());
    }
}

#[tokio::test]
async fn test_pool_never_exceeds_its_size() {
    let runner = Arc::new(SlowRunner::new(Duration::from_millis(30)));
    let harness = Harness::new(2, runner.clone());

    let (_, snapshots) = harness
        .run_batch(batch(vec![Combination::new("r1.mp4", "d1.mp4", 0); 5]))
        .await;

    assert!(snapshots.iter().all(|s| s.state == JobState::Completed));
    assert!(runner.max_running.load(Ordering::SeqCst) <= 2);
    assert_eq!(harness.executor.active_jobs(), 0);
}

#[tokio::test]
async fn test_progress_never_decreases() {
    let runner = Arc::new(SlowRunner::new(Duration::from_millis(25)));
    let harness = Harness::new(1, runner);

    let submission = harness
        .submitter
        .submit(batch(vec![Combination::new("r1.mp4", "d1.mp4", 0).with_music("m1.mp3")]))
        .await
        .unwrap();
    let id = submission.job_ids()[0].clone();

    let executor = Arc::clone(&harness.executor);
    let handle = tokio::spawn(async move { executor.run().await });

    let mut seen = Vec::new();
    loop {
        let snap = harness.store.get(&id).await.unwrap().unwrap();
        seen.push(snap.progress);
        if snap.is_terminal() {
            assert_eq!(snap.state, JobState::Completed);
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    harness.executor.shutdown();
    handle.await.unwrap().unwrap();

    assert!(seen.windows(2).all(|w| w[0] <= w[1]), "progress went backwards: {seen:?}");
    assert_eq!(seen.last(), Some(&100));
}

#[tokio::test]
async fn test_missing_clip_is_skipped_and_rest_render() {
    let runner = Arc::new(SlowRunner::new(Duration::from_millis(5)));
    let harness = Harness::new(2, runner);

    let (jobs, snapshots) = harness
        .run_batch(batch(vec![
            Combination::new("r1.mp4", "d1.mp4", 0),
            Combination::new("r1.mp4", "gone.mp4", 0),
            Combination::new("r1.mp4", "d1.mp4", 0),
        ]))
        .await;

    let indices: Vec<usize> = jobs.iter().map(|(i, _)| *i).collect();
    assert_eq!(indices, vec![0, 2]);
    assert!(snapshots.iter().all(|s| s.state == JobState::Completed));
    assert!(harness.output("b1_0.mp4").exists());
    assert!(!harness.output("b1_1.mp4").exists());
    assert!(harness.output("b1_2.mp4").exists());
}

#[tokio::test]
async fn test_reaction_failure_fails_job_without_demo_stage() {
    let runner = Arc::new(SlowRunner::failing(Stage::Reaction));
    let harness = Harness::new(1, runner.clone());

    let (_, snapshots) = harness
        .run_batch(batch(vec![Combination::new("r1.mp4", "d1.mp4", 0)]))
        .await;

    let snap = &snapshots[0];
    assert_eq!(snap.state, JobState::Failed);
    assert_eq!(snap.progress, 100);
    let error = snap.result.as_ref().and_then(|r| r.error.clone()).unwrap();
    assert!(error.contains("reaction stage"), "unexpected error: {error}");

    assert_eq!(*runner.stages.lock().unwrap(), vec![Stage::Reaction]);
    assert!(!harness.output("b1_0.mp4").exists());
}

/// A store whose jobs only reach workers as stale deliveries, the way jobs
/// of a crashed worker come back under Redis.
struct StaleOnlyStore {
    inner: MemoryJobStore,
}

#[async_trait]
impl JobStore for StaleOnlyStore {
    fn backend(&self) -> BackendKind {
        self.inner.backend()
    }

    async fn admit(&self, job: RenderJob) -> QueueResult<JobId> {
        self.inner.admit(job).await
    }

    async fn get(&self, id: &JobId) -> QueueResult<Option<JobSnapshot>> {
        self.inner.get(id).await
    }

    async fn claim_next(&self, _worker: &str, wait: Duration) -> QueueResult<Option<ClaimedJob>> {
        tokio::time::sleep(wait).await;
        Ok(None)
    }

    async fn complete(&self, claim: &ClaimedJob, result: JobResult) -> QueueResult<()> {
        self.inner.complete(claim, result).await
    }

    async fn fail(&self, claim: &ClaimedJob, error: &str, retryable: bool) -> QueueResult<FailureDisposition> {
        self.inner.fail(claim, error, retryable).await
    }

    async fn reclaim_stale(&self, worker: &str, _min_idle: Duration, limit: usize) -> QueueResult<Vec<ClaimedJob>> {
        let mut claims = Vec::new();
        while claims.len() < limit {
            match self.inner.claim_next(worker, Duration::ZERO).await? {
                Some(claim) => claims.push(claim),
                None => break,
            }
        }
        Ok(claims)
    }
}

#[tokio::test]
async fn test_reclaimed_jobs_stay_within_pool_size() {
    let root = TempDir::new().unwrap();
    for (dir, name) in [("reactions", "r1.mp4"), ("demos", "d1.mp4")] {
        std::fs::create_dir_all(root.path().join(dir)).unwrap();
        std::fs::write(root.path().join(dir).join(name), b"media").unwrap();
    }

    let config = WorkerConfig {
        max_concurrent_jobs: 1,
        shutdown_timeout: Duration::from_secs(5),
        work_dir: root.path().join("work"),
        poll_interval: Duration::from_millis(10),
        claim_interval: Duration::from_millis(10),
        claim_min_idle: Duration::ZERO,
        upload_dir: root.path().to_path_buf(),
        output_dir: root.path().join("outputs"),
        ..WorkerConfig::default()
    };
    let pipeline = CompositionPipeline::new(
        Arc::new(SlowRunner::new(Duration::from_millis(15))),
        Arc::new(StaticProbe),
        PipelineConfig {
            work_dir: config.work_dir.clone(),
            ..PipelineConfig::default()
        },
    );

    let store = Arc::new(StaleOnlyStore {
        inner: MemoryJobStore::new(),
    });
    let submission = BatchSubmitter::new(
        store.clone(),
        Arc::new(FsClipCatalog::new(&config.upload_dir)),
        config.output_layout(),
    )
    .submit(batch(vec![Combination::new("r1.mp4", "d1.mp4", 0); 3]))
    .await
    .unwrap();
    let ids = submission.job_ids();

    let executor = Arc::new(JobExecutor::new(config, store.clone(), pipeline));
    let runner = Arc::clone(&executor);
    let handle = tokio::spawn(async move { runner.run().await });

    let mut max_active = 0;
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let mut active = 0;
        let mut terminal = 0;
        for id in &ids {
            let snap = store.get(id).await.unwrap().unwrap();
            match snap.state {
                JobState::Active => active += 1,
                s if s.is_terminal() => terminal += 1,
                _ => {}
            }
        }
        max_active = max_active.max(active);
        if terminal == ids.len() {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "reclaimed jobs did not finish");
        tokio::time::sleep(Duration::from_millis(2)).await;
    }

    executor.shutdown();
    handle.await.unwrap().unwrap();

    assert_eq!(max_active, 1);
    for id in &ids {
        assert_eq!(store.get(id).await.unwrap().unwrap().state, JobState::Completed);
    }
}
