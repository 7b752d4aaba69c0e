//! Redis store integration tests.

use std::time::Duration;

use chrono::Utc;
use redis::AsyncCommands;
use rmix_models::{AudioSettings, BatchId, Clip, ClipKind, JobId, JobResult, JobState, RenderJob, TextSettings};
use rmix_queue::{FailureDisposition, JobStore, RedisJobStore, RedisStoreConfig};

/// Config with keys private to one test run.
fn isolated_config() -> RedisStoreConfig {
    dotenvy::dotenv().ok();
    let mut config = RedisStoreConfig::from_env().expect("REDIS_URL must be set");
    let run = rmix_queue::consumer_name("test");
    config.stream_name = format!("{run}:jobs");
    config.consumer_group = format!("{run}:workers");
    config.key_prefix = run;
    config.backoff = Duration::from_millis(50);
    config
}

fn render_job(index: usize) -> RenderJob {
    RenderJob {
        job_id: JobId::new(),
        batch_id: BatchId::parse("itest").unwrap(),
        index,
        reaction: Clip::new("r.mp4", ClipKind::Reaction, "/u/reactions/r.mp4"),
        demo: Clip::new("d.mp4", ClipKind::Demo, "/u/demos/d.mp4"),
        music: None,
        hook: "hook".into(),
        reaction_trim: None,
        demo_trim: None,
        text: TextSettings::default(),
        audio: AudioSettings::default(),
        output_path: format!("/o/itest/itest_{index}.mp4").into(),
        output_url: format!("/outputs/itest/itest_{index}.mp4"),
        created_at: Utc::now(),
    }
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_admit_claim_complete() {
    let store = RedisJobStore::connect(isolated_config()).await.expect("connect");
    let id = store.admit(render_job(0)).await.expect("admit");

    let snap = store.get(&id).await.unwrap().unwrap();
    assert_eq!(snap.state, JobState::Waiting);
    assert_eq!(snap.progress, 0);

    let claim = store
        .claim_next("w1", Duration::from_secs(1))
        .await
        .unwrap()
        .expect("job should be delivered");
    assert_eq!(claim.job_id(), &id);
    assert_eq!(claim.attempt, 1);

    let snap = store.get(&id).await.unwrap().unwrap();
    assert_eq!(snap.state, JobState::Active);
    assert_eq!(snap.progress, 10);

    store
        .complete(&claim, JobResult::success("/o/itest/itest_0.mp4", "/outputs/itest/itest_0.mp4"))
        .await
        .unwrap();

    let snap = store.get(&id).await.unwrap().unwrap();
    assert_eq!(snap.state, JobState::Completed);
    assert_eq!(snap.progress, 100);
    assert!(snap.result.unwrap().success);
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_retry_then_terminal_failure() {
    let store = RedisJobStore::connect(isolated_config()).await.expect("connect");
    let id = store.admit(render_job(0)).await.unwrap();

    for attempt in 1..=3u32 {
        let claim = loop {
            if let Some(claim) = store.claim_next("w1", Duration::from_millis(200)).await.unwrap() {
                break claim;
            }
        };
        assert_eq!(claim.attempt, attempt);

        let disposition = store.fail(&claim, "demo stage failed", true).await.unwrap();
        let snap = store.get(&id).await.unwrap().unwrap();

        if attempt < 3 {
            assert!(matches!(disposition, FailureDisposition::Retrying { .. }));
            assert_eq!(snap.state, JobState::Active, "retries stay active");
        } else {
            assert_eq!(disposition, FailureDisposition::Terminal);
            assert_eq!(snap.state, JobState::Failed);
            assert_eq!(snap.progress, 100);
        }
    }
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_non_owner_cannot_finish() {
    let store = RedisJobStore::connect(isolated_config()).await.expect("connect");
    store.admit(render_job(0)).await.unwrap();

    let mut claim = store
        .claim_next("w1", Duration::from_secs(1))
        .await
        .unwrap()
        .unwrap();
    claim.worker = "w2".to_string();

    assert!(store.complete(&claim, JobResult::failure("x")).await.is_err());
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_reclaim_stale_delivery() {
    let store = RedisJobStore::connect(isolated_config()).await.expect("connect");
    let id = store.admit(render_job(0)).await.unwrap();

    let _lost = store
        .claim_next("crashed", Duration::from_secs(1))
        .await
        .unwrap()
        .unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;

    let none = store
        .reclaim_stale("rescuer", Duration::from_millis(100), 0)
        .await
        .unwrap();
    assert!(none.is_empty());

    let reclaimed = store
        .reclaim_stale("rescuer", Duration::from_millis(100), 4)
        .await
        .unwrap();
    assert_eq!(reclaimed.len(), 1);
    assert_eq!(reclaimed[0].job_id(), &id);
    assert_eq!(reclaimed[0].attempt, 2);
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_reclaim_respects_limit() {
    let store = RedisJobStore::connect(isolated_config()).await.expect("connect");
    for index in 0..3 {
        store.admit(render_job(index)).await.unwrap();
        store
            .claim_next("crashed", Duration::from_secs(1))
            .await
            .unwrap()
            .unwrap();
    }
    tokio::time::sleep(Duration::from_millis(150)).await;

    let first = store
        .reclaim_stale("rescuer", Duration::from_millis(100), 1)
        .await
        .unwrap();
    assert_eq!(first.len(), 1);

    let rest = store
        .reclaim_stale("rescuer", Duration::from_millis(100), 8)
        .await
        .unwrap();
    assert_eq!(rest.len(), 2);
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_retry_is_scheduled_with_the_failure() {
    let config = isolated_config();
    let client = redis::Client::open(config.redis_url.as_str()).unwrap();
    let store = RedisJobStore::connect(config.clone()).await.expect("connect");
    let id = store.admit(render_job(0)).await.unwrap();

    let claim = store
        .claim_next("w1", Duration::from_secs(1))
        .await
        .unwrap()
        .unwrap();
    let before = Utc::now().timestamp_millis();
    store.fail(&claim, "reaction stage failed", true).await.unwrap();

    let mut conn = client.get_multiplexed_async_connection().await.unwrap();
    let due: Option<f64> = conn.zscore(config.delayed_key(), id.as_str()).await.unwrap();
    let due = due.expect("retry should be on the delayed set");
    assert!(due as i64 >= before + 50);

    let pending: String = conn.hget(config.record_key(&id), "pending_retry").await.unwrap();
    assert_eq!(pending, "1");
}
