//! Durable job store on Redis Streams.
//!
//! Layout:
//! - `{stream}`: one entry per delivery, field `job_id`, read through a
//!   consumer group
//! - `{prefix}:job:{id}`: hash holding the record (state, progress,
//!   attempts, owner, result, payload, timestamps)
//! - `{prefix}:delayed`: sorted set of job ids waiting for a retry, scored
//!   by due time in milliseconds
//! - `{prefix}:index:{state}`: sorted sets of terminal ids for eviction
//!
//! Ownership and monotonic state changes are enforced by Lua scripts so
//! every update is atomic per job id.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::streams::{StreamClaimReply, StreamId, StreamPendingCountReply, StreamReadReply};
use redis::AsyncCommands;
use rmix_models::{JobId, JobResult, JobSnapshot, JobState, RenderJob};
use tracing::{debug, info, warn};

use crate::error::{QueueError, QueueResult};
use crate::store::{BackendKind, ClaimedJob, FailureDisposition, JobStore};

/// Stream entries promoted from the delayed set per claim.
const PROMOTE_BATCH: isize = 16;
/// Stale entries examined per reclaim pass.
const RECLAIM_BATCH: usize = 16;

const CLAIM_SCRIPT: &str = r#"
local state = redis.call('HGET', KEYS[1], 'state')
if not state then return -1 end
if ARGV[3] == 'fresh' then
  if state ~= 'waiting' and not (state == 'active' and redis.call('HGET', KEYS[1], 'pending_retry') == '1') then
    return 0
  end
elseif ARGV[3] == 'takeover' then
  if state ~= 'active' or redis.call('HGET', KEYS[1], 'pending_retry') == '1' then
    return 0
  end
else
  return 0
end
local progress = tonumber(redis.call('HGET', KEYS[1], 'progress') or '0')
if progress < tonumber(ARGV[4]) then progress = tonumber(ARGV[4]) end
local attempts = redis.call('HINCRBY', KEYS[1], 'attempts', 1)
redis.call('HSET', KEYS[1], 'state', 'active', 'owner', ARGV[1], 'progress', progress,
  'pending_retry', '0', 'updated_at', ARGV[2])
return attempts
"#;

const FINISH_SCRIPT: &str = r#"
local state = redis.call('HGET', KEYS[1], 'state')
if not state then return -1 end
if state ~= 'active' or redis.call('HGET', KEYS[1], 'owner') ~= ARGV[1] then
  return 0
end
if ARGV[2] == 'retry' then
  redis.call('HSET', KEYS[1], 'pending_retry', '1', 'owner', '', 'last_error', ARGV[3],
    'updated_at', ARGV[4])
  redis.call('ZADD', KEYS[2], ARGV[5], ARGV[6])
else
  redis.call('HSET', KEYS[1], 'state', ARGV[2], 'progress', 100, 'result', ARGV[3],
    'owner', '', 'pending_retry', '0', 'updated_at', ARGV[4])
end
return 1
"#;

/// How long and how many terminal records are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Retention {
    pub max_age: Duration,
    pub keep: usize,
}

impl Retention {
    pub const COMPLETED: Retention = Retention {
        max_age: Duration::from_secs(3600),
        keep: 100,
    };

    pub const FAILED: Retention = Retention {
        max_age: Duration::from_secs(24 * 3600),
        keep: 500,
    };
}

/// Redis store configuration.
#[derive(Debug, Clone)]
pub struct RedisStoreConfig {
    /// Redis URL
    pub redis_url: String,
    /// Stream name for deliveries
    pub stream_name: String,
    /// Consumer group name
    pub consumer_group: String,
    /// Prefix for record, delayed and index keys
    pub key_prefix: String,
    /// Attempts before a job is failed
    pub max_attempts: u32,
    /// Delay before the first retry; doubles per attempt
    pub backoff: Duration,
    pub completed_retention: Retention,
    pub failed_retention: Retention,
}

impl RedisStoreConfig {
    pub fn new(redis_url: impl Into<String>) -> Self {
        Self {
            redis_url: redis_url.into(),
            stream_name: "rmix:jobs".to_string(),
            consumer_group: "rmix:workers".to_string(),
            key_prefix: "rmix".to_string(),
            max_attempts: 3,
            backoff: Duration::from_millis(1000),
            completed_retention: Retention::COMPLETED,
            failed_retention: Retention::FAILED,
        }
    }

    /// Config from environment variables; `None` when `REDIS_URL` is unset.
    pub fn from_env() -> Option<Self> {
        let redis_url = std::env::var("REDIS_URL").ok().filter(|s| !s.trim().is_empty())?;
        let defaults = Self::new(redis_url);

        Some(Self {
            stream_name: std::env::var("QUEUE_STREAM").unwrap_or(defaults.stream_name.clone()),
            consumer_group: std::env::var("QUEUE_CONSUMER_GROUP")
                .unwrap_or(defaults.consumer_group.clone()),
            key_prefix: std::env::var("QUEUE_KEY_PREFIX").unwrap_or(defaults.key_prefix.clone()),
            max_attempts: std::env::var("QUEUE_MAX_ATTEMPTS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(defaults.max_attempts),
            backoff: std::env::var("QUEUE_BACKOFF_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.backoff),
            ..defaults
        })
    }

    pub fn record_key(&self, id: &JobId) -> String {
        format!("{}:job:{}", self.key_prefix, id)
    }

    pub fn delayed_key(&self) -> String {
        format!("{}:delayed", self.key_prefix)
    }

    pub fn index_key(&self, state: JobState) -> String {
        format!("{}:index:{}", self.key_prefix, state)
    }

    fn retention(&self, state: JobState) -> Retention {
        match state {
            JobState::Failed => self.failed_retention,
            _ => self.completed_retention,
        }
    }
}

/// Backoff before attempt `attempt + 1`: `base * 2^(attempt - 1)`.
pub fn retry_delay(base: Duration, attempt: u32) -> Duration {
    let exp = attempt.saturating_sub(1).min(16);
    base.saturating_mul(1u32 << exp)
}

/// Redis Streams job store.
pub struct RedisJobStore {
    client: redis::Client,
    config: RedisStoreConfig,
    claim_script: redis::Script,
    finish_script: redis::Script,
}

impl RedisJobStore {
    /// Connect and make sure the consumer group exists.
    pub async fn connect(config: RedisStoreConfig) -> QueueResult<Self> {
        let client = redis::Client::open(config.redis_url.as_str())
            .map_err(|e| QueueError::connection_failed(e.to_string()))?;
        let store = Self {
            client,
            config,
            claim_script: redis::Script::new(CLAIM_SCRIPT),
            finish_script: redis::Script::new(FINISH_SCRIPT),
        };
        store.init().await?;
        Ok(store)
    }

    pub fn config(&self) -> &RedisStoreConfig {
        &self.config
    }

    async fn conn(&self) -> QueueResult<redis::aio::MultiplexedConnection> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }

    async fn init(&self) -> QueueResult<()> {
        let mut conn = self.conn().await?;

        let result: Result<(), redis::RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match result {
            Ok(_) => info!("Created consumer group: {}", self.config.consumer_group),
            Err(e) if e.to_string().contains("BUSYGROUP") => {
                debug!("Consumer group already exists: {}", self.config.consumer_group);
            }
            Err(e) => return Err(QueueError::Redis(e)),
        }

        Ok(())
    }

    /// Move due retries from the delayed set back onto the stream.
    ///
    /// Only the caller whose ZREM succeeds re-adds the job, so concurrent
    /// workers never duplicate a delivery.
    async fn promote_due(&self, conn: &mut redis::aio::MultiplexedConnection) -> QueueResult<()> {
        let now = Utc::now().timestamp_millis();
        let delayed = self.config.delayed_key();

        let due: Vec<String> = conn
            .zrangebyscore_limit(&delayed, "-inf", now, 0, PROMOTE_BATCH)
            .await?;

        for id in due {
            let removed: i64 = conn.zrem(&delayed, &id).await?;
            if removed == 1 {
                self.push_delivery(conn, &id).await?;
                debug!(job_id = %id, "Promoted delayed retry");
            }
        }
        Ok(())
    }

    async fn push_delivery(&self, conn: &mut redis::aio::MultiplexedConnection, id: &str) -> QueueResult<String> {
        let entry: String = redis::cmd("XADD")
            .arg(&self.config.stream_name)
            .arg("*")
            .arg("job_id")
            .arg(id)
            .query_async(conn)
            .await?;
        Ok(entry)
    }

    async fn drop_delivery(&self, conn: &mut redis::aio::MultiplexedConnection, entry: &str) -> QueueResult<()> {
        redis::pipe()
            .cmd("XACK")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(entry)
            .ignore()
            .cmd("XDEL")
            .arg(&self.config.stream_name)
            .arg(entry)
            .ignore()
            .query_async::<()>(conn)
            .await?;
        Ok(())
    }

    /// Run the claim script for one delivery and load the payload.
    async fn take(
        &self,
        conn: &mut redis::aio::MultiplexedConnection,
        entry: &StreamId,
        worker: &str,
        mode: &str,
    ) -> QueueResult<Option<ClaimedJob>> {
        let Some(id) = entry.get::<String>("job_id") else {
            warn!("Stream entry {} has no job_id, dropping", entry.id);
            self.drop_delivery(conn, &entry.id).await?;
            return Ok(None);
        };
        let job_id = JobId::from_string(id);
        let key = self.config.record_key(&job_id);

        let attempts: i64 = self
            .claim_script
            .key(&key)
            .arg(worker)
            .arg(Utc::now().to_rfc3339())
            .arg(mode)
            .arg(rmix_models::job::PROGRESS_DISPATCHED)
            .invoke_async(conn)
            .await?;

        if attempts <= 0 {
            debug!(job_id = %job_id, "Delivery {} is stale ({}), dropping", entry.id, attempts);
            self.drop_delivery(conn, &entry.id).await?;
            return Ok(None);
        }

        let payload: Option<String> = conn.hget(&key, "payload").await?;
        let payload = payload.ok_or_else(|| QueueError::corrupt(&job_id, "missing payload"))?;
        let job: RenderJob = serde_json::from_str(&payload)?;

        Ok(Some(ClaimedJob {
            job,
            attempt: attempts as u32,
            worker: worker.to_string(),
            receipt: Some(entry.id.clone()),
        }))
    }

    /// Run the finish script; errors unless the caller still owns the job.
    ///
    /// A `retry` outcome also puts the job on the delayed set, due at
    /// `retry_at` (epoch millis), in the same script call.
    async fn finish(
        &self,
        conn: &mut redis::aio::MultiplexedConnection,
        claim: &ClaimedJob,
        outcome: &str,
        detail: &str,
        retry_at: Option<i64>,
    ) -> QueueResult<()> {
        let status: i64 = self
            .finish_script
            .key(self.config.record_key(claim.job_id()))
            .key(self.config.delayed_key())
            .arg(&claim.worker)
            .arg(outcome)
            .arg(detail)
            .arg(Utc::now().to_rfc3339())
            .arg(retry_at.unwrap_or(0))
            .arg(claim.job_id().as_str())
            .invoke_async(conn)
            .await?;

        match status {
            1 => Ok(()),
            0 => Err(QueueError::NotOwner {
                job_id: claim.job_id().to_string(),
                worker: claim.worker.clone(),
            }),
            _ => Err(QueueError::JobNotFound(claim.job_id().to_string())),
        }
    }

    /// Ack the delivery, set the record TTL and evict overflow.
    async fn settle(
        &self,
        conn: &mut redis::aio::MultiplexedConnection,
        claim: &ClaimedJob,
        state: JobState,
    ) -> QueueResult<()> {
        if let Some(entry) = &claim.receipt {
            self.drop_delivery(conn, entry).await?;
        }

        let retention = self.config.retention(state);
        let index = self.config.index_key(state);
        let now = Utc::now().timestamp_millis();
        let cutoff = now - retention.max_age.as_millis() as i64;

        redis::pipe()
            .expire(
                self.config.record_key(claim.job_id()),
                retention.max_age.as_secs() as i64,
            )
            .ignore()
            .zadd(&index, claim.job_id().as_str(), now)
            .ignore()
            .zrembyscore(&index, "-inf", cutoff)
            .ignore()
            .query_async::<()>(conn)
            .await?;

        let count: usize = conn.zcard(&index).await?;
        if count > retention.keep {
            let overflow: Vec<String> = conn
                .zrange(&index, 0, (count - retention.keep - 1) as isize)
                .await?;
            let mut pipe = redis::pipe();
            for id in &overflow {
                pipe.del(self.config.record_key(&JobId::from_string(id.clone())))
                    .ignore()
                    .zrem(&index, id)
                    .ignore();
            }
            pipe.query_async::<()>(conn).await?;
            debug!("Evicted {} {} records", overflow.len(), state);
        }
        Ok(())
    }
}

#[async_trait]
impl JobStore for RedisJobStore {
    fn backend(&self) -> BackendKind {
        BackendKind::Redis
    }

    async fn admit(&self, job: RenderJob) -> QueueResult<JobId> {
        let mut conn = self.conn().await?;
        let id = job.job_id.clone();
        let key = self.config.record_key(&id);
        let payload = serde_json::to_string(&job)?;
        let now = Utc::now().to_rfc3339();

        let created: bool = redis::cmd("HSETNX")
            .arg(&key)
            .arg("payload")
            .arg(&payload)
            .query_async(&mut conn)
            .await?;
        if !created {
            return Err(QueueError::enqueue_failed(format!("duplicate job id {id}")));
        }

        redis::pipe()
            .atomic()
            .hset_multiple(
                &key,
                &[
                    ("state", JobState::Waiting.as_str()),
                    ("progress", "0"),
                    ("attempts", "0"),
                    ("pending_retry", "0"),
                    ("owner", ""),
                    ("created_at", now.as_str()),
                    ("updated_at", now.as_str()),
                ],
            )
            .ignore()
            .cmd("XADD")
            .arg(&self.config.stream_name)
            .arg("*")
            .arg("job_id")
            .arg(id.as_str())
            .ignore()
            .query_async::<()>(&mut conn)
            .await?;

        debug!(job_id = %id, "Admitted job to {}", self.config.stream_name);
        Ok(id)
    }

    async fn get(&self, id: &JobId) -> QueueResult<Option<JobSnapshot>> {
        let mut conn = self.conn().await?;
        let fields: HashMap<String, String> = conn.hgetall(self.config.record_key(id)).await?;
        snapshot_from_fields(id, &fields)
    }

    async fn claim_next(&self, worker: &str, wait: Duration) -> QueueResult<Option<ClaimedJob>> {
        let mut conn = self.conn().await?;
        self.promote_due(&mut conn).await?;

        // BLOCK 0 would wait forever
        let block_ms = (wait.as_millis() as u64).max(1);
        let reply: Option<StreamReadReply> = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(&self.config.consumer_group)
            .arg(worker)
            .arg("COUNT")
            .arg(1)
            .arg("BLOCK")
            .arg(block_ms)
            .arg("STREAMS")
            .arg(&self.config.stream_name)
            .arg(">")
            .query_async(&mut conn)
            .await?;

        let Some(reply) = reply else {
            return Ok(None);
        };

        for key in reply.keys {
            for entry in key.ids {
                if let Some(claim) = self.take(&mut conn, &entry, worker, "fresh").await? {
                    return Ok(Some(claim));
                }
            }
        }
        Ok(None)
    }

    async fn complete(&self, claim: &ClaimedJob, result: JobResult) -> QueueResult<()> {
        let mut conn = self.conn().await?;
        let result = serde_json::to_string(&result)?;
        self.finish(&mut conn, claim, JobState::Completed.as_str(), &result, None)
            .await?;
        self.settle(&mut conn, claim, JobState::Completed).await
    }

    async fn fail(&self, claim: &ClaimedJob, error: &str, retryable: bool) -> QueueResult<FailureDisposition> {
        let mut conn = self.conn().await?;

        if retryable && claim.attempt < self.config.max_attempts {
            let delay = retry_delay(self.config.backoff, claim.attempt);
            let due = Utc::now().timestamp_millis() + delay.as_millis() as i64;
            self.finish(&mut conn, claim, "retry", error, Some(due)).await?;

            if let Some(entry) = &claim.receipt {
                self.drop_delivery(&mut conn, entry).await?;
            }

            return Ok(FailureDisposition::Retrying {
                attempt: claim.attempt,
                delay,
            });
        }

        let result = serde_json::to_string(&JobResult::failure(error))?;
        self.finish(&mut conn, claim, JobState::Failed.as_str(), &result, None)
            .await?;
        self.settle(&mut conn, claim, JobState::Failed).await?;
        Ok(FailureDisposition::Terminal)
    }

    async fn reclaim_stale(&self, worker: &str, min_idle: Duration, limit: usize) -> QueueResult<Vec<ClaimedJob>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.conn().await?;
        let min_idle_ms = min_idle.as_millis() as u64;

        let pending: StreamPendingCountReply = redis::cmd("XPENDING")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg("IDLE")
            .arg(min_idle_ms)
            .arg("-")
            .arg("+")
            .arg(RECLAIM_BATCH)
            .query_async(&mut conn)
            .await?;

        let ids: Vec<String> = pending
            .ids
            .into_iter()
            .filter(|p| p.consumer != worker)
            .map(|p| p.id)
            .take(limit)
            .collect();
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let claimed: StreamClaimReply = redis::cmd("XCLAIM")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(worker)
            .arg(min_idle_ms)
            .arg(&ids)
            .query_async(&mut conn)
            .await?;

        let mut jobs = Vec::new();
        for entry in claimed.ids {
            let Some(claim) = self.take(&mut conn, &entry, worker, "takeover").await? else {
                continue;
            };

            if claim.attempt > self.config.max_attempts {
                warn!(
                    job_id = %claim.job_id(),
                    "Abandoned job exceeded {} attempts, failing it",
                    self.config.max_attempts
                );
                let message = format!("worker lost after {} attempts", claim.attempt - 1);
                let result = serde_json::to_string(&JobResult::failure(message))?;
                self.finish(&mut conn, &claim, JobState::Failed.as_str(), &result, None)
                    .await?;
                self.settle(&mut conn, &claim, JobState::Failed).await?;
                continue;
            }

            info!(job_id = %claim.job_id(), "Reclaimed stale job (attempt {})", claim.attempt);
            jobs.push(claim);
        }
        Ok(jobs)
    }
}

/// Build a snapshot from a record hash; an empty hash means no record.
pub(crate) fn snapshot_from_fields(
    id: &JobId,
    fields: &HashMap<String, String>,
) -> QueueResult<Option<JobSnapshot>> {
    if fields.is_empty() {
        return Ok(None);
    }

    let field = |name: &str| {
        fields
            .get(name)
            .map(String::as_str)
            .ok_or_else(|| QueueError::corrupt(id, format!("missing field {name}")))
    };
    let number = |name: &str| -> QueueResult<u64> {
        field(name)?
            .parse()
            .map_err(|_| QueueError::corrupt(id, format!("bad {name}")))
    };
    let timestamp = |name: &str| -> QueueResult<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(field(name)?)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|_| QueueError::corrupt(id, format!("bad {name}")))
    };

    let state: JobState = field("state")?.parse()?;
    let result = match fields.get("result").filter(|s| !s.is_empty()) {
        Some(raw) => Some(serde_json::from_str::<JobResult>(raw)?),
        None => None,
    };

    Ok(Some(JobSnapshot {
        id: id.clone(),
        state,
        progress: number("progress")?.min(100) as u8,
        result,
        attempts: number("attempts")? as u32,
        created_at: timestamp("created_at")?,
        updated_at: timestamp("updated_at")?,
    }))
}
