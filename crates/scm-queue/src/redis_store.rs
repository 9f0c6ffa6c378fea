//! Redis-backed job store.
//!
//! Key scheme, per queue (`{prefix}:{queue}` = base):
//! - `{base}:job:{id}`  hash with the job record
//! - `{base}:lock:{id}` lock token of the worker holding the job (PX TTL)
//! - `{base}:wait`      list, LPUSH on enqueue, RPOPLPUSH into `active` on claim
//! - `{base}:active`    list of claimed ids
//! - `{base}:delayed`   zset scored by retry time
//! - `{base}:completed` zset scored by finish time
//! - `{base}:failed`    zset scored by finish time
//!
//! State transitions run as Lua scripts so each one is atomic on the server.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use redis::{AsyncCommands, Script};
use tracing::{debug, info};

use scm_models::{JobCounts, JobId, JobState, QueueName};

use crate::error::{QueueError, QueueResult};
use crate::job::Job;
use crate::policy::Retention;
use crate::store::{FailOutcome, JobStore, StalledReport, STALLED_REASON};

const RETAIN_FN: &str = r#"
local function retain(bucket, jobPrefix, cutoff, keep)
  local old = redis.call('ZRANGEBYSCORE', bucket, '-inf', '(' .. cutoff)
  for _, jid in ipairs(old) do redis.call('DEL', jobPrefix .. jid) end
  if #old > 0 then redis.call('ZREMRANGEBYSCORE', bucket, '-inf', '(' .. cutoff) end
  local total = redis.call('ZCARD', bucket)
  if total > keep then
    local extra = redis.call('ZRANGE', bucket, 0, total - keep - 1)
    for _, jid in ipairs(extra) do redis.call('DEL', jobPrefix .. jid) end
    redis.call('ZREMRANGEBYRANK', bucket, 0, total - keep - 1)
  end
end
"#;

// KEYS: job, wait. ARGV: id, field/value pairs
const ENQUEUE: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 1 then return 0 end
redis.call('HSET', KEYS[1], unpack(ARGV, 2))
redis.call('LPUSH', KEYS[2], ARGV[1])
return 1
"#;

// KEYS: wait, active. ARGV: jobPrefix, lockPrefix, token, ttlMs, now
const CLAIM: &str = r#"
while true do
  local id = redis.call('RPOPLPUSH', KEYS[1], KEYS[2])
  if not id then return false end
  local jobKey = ARGV[1] .. id
  if redis.call('EXISTS', jobKey) == 1 then
    redis.call('SET', ARGV[2] .. id, ARGV[3], 'PX', ARGV[4])
    redis.call('HSET', jobKey, 'state', 'active', 'processedOn', ARGV[5], 'token', ARGV[3])
    return redis.call('HGETALL', jobKey)
  end
  redis.call('LREM', KEYS[2], 0, id)
end
"#;

// KEYS: lock. ARGV: token, ttlMs
const EXTEND_LOCK: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
  redis.call('PEXPIRE', KEYS[1], ARGV[2])
  return 1
end
return 0
"#;

// KEYS: job, lock. ARGV: token, progress
const PROGRESS: &str = r#"
if redis.call('GET', KEYS[2]) ~= ARGV[1] then return -1 end
if redis.call('HGET', KEYS[1], 'state') ~= 'active' then return -1 end
redis.call('HSET', KEYS[1], 'progress', ARGV[2])
return 1
"#;

// KEYS: job, lock, active, completed. ARGV: token, id, result, now, cutoff, keep, jobPrefix
const COMPLETE: &str = r#"
if redis.call('HGET', KEYS[1], 'token') ~= ARGV[1] then return -1 end
if redis.call('HGET', KEYS[1], 'state') ~= 'active' then return -1 end
redis.call('LREM', KEYS[3], 0, ARGV[2])
redis.call('DEL', KEYS[2])
redis.call('HSET', KEYS[1], 'state', 'completed', 'result', ARGV[3], 'finishedOn', ARGV[4])
redis.call('HDEL', KEYS[1], 'token')
redis.call('ZADD', KEYS[4], ARGV[4], ARGV[2])
retain(KEYS[4], ARGV[7], ARGV[5], tonumber(ARGV[6]))
return 1
"#;

// KEYS: job, lock, active, delayed, failed. ARGV: token, id, reason, now, cutoff, keep, jobPrefix
const FAIL: &str = r#"
if redis.call('HGET', KEYS[1], 'token') ~= ARGV[1] then return {'lost', 0, 0} end
if redis.call('HGET', KEYS[1], 'state') ~= 'active' then return {'lost', 0, 0} end
redis.call('LREM', KEYS[3], 0, ARGV[2])
redis.call('DEL', KEYS[2])
redis.call('HDEL', KEYS[1], 'token')
local attempts = tonumber(redis.call('HINCRBY', KEYS[1], 'attemptsMade', 1))
local maxAttempts = tonumber(redis.call('HGET', KEYS[1], 'maxAttempts') or '1')
if attempts < maxAttempts then
  local backoff = tonumber(redis.call('HGET', KEYS[1], 'backoffMs') or '0')
  local delay = backoff * (2 ^ (attempts - 1))
  redis.call('HSET', KEYS[1], 'state', 'delayed', 'failedReason', ARGV[3])
  redis.call('ZADD', KEYS[4], tonumber(ARGV[4]) + delay, ARGV[2])
  return {'delayed', delay, attempts}
end
redis.call('HSET', KEYS[1], 'state', 'failed', 'failedReason', ARGV[3], 'finishedOn', ARGV[4])
redis.call('ZADD', KEYS[5], ARGV[4], ARGV[2])
retain(KEYS[5], ARGV[7], ARGV[5], tonumber(ARGV[6]))
return {'failed', 0, attempts}
"#;

// KEYS: delayed, wait. ARGV: now, jobPrefix
const PROMOTE: &str = r#"
local due = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1])
for _, id in ipairs(due) do
  redis.call('LPUSH', KEYS[2], id)
  redis.call('HSET', ARGV[2] .. id, 'state', 'waiting')
end
if #due > 0 then redis.call('ZREMRANGEBYSCORE', KEYS[1], '-inf', ARGV[1]) end
return #due
"#;

// KEYS: active, wait, delayed, failed. ARGV: jobPrefix, lockPrefix, now, maxStalled, cutoff, keep, reason
const STALLED: &str = r#"
local ids = redis.call('LRANGE', KEYS[1], 0, -1)
local now = tonumber(ARGV[3])
local requeued, retried, failed = 0, 0, 0
for _, id in ipairs(ids) do
  if redis.call('EXISTS', ARGV[2] .. id) == 0 then
    local jobKey = ARGV[1] .. id
    redis.call('LREM', KEYS[1], 0, id)
    redis.call('HDEL', jobKey, 'token')
    local stalled = tonumber(redis.call('HINCRBY', jobKey, 'stalledCount', 1))
    if stalled <= tonumber(ARGV[4]) then
      redis.call('HSET', jobKey, 'state', 'waiting')
      redis.call('RPUSH', KEYS[2], id)
      requeued = requeued + 1
    else
      local attempts = tonumber(redis.call('HINCRBY', jobKey, 'attemptsMade', 1))
      local maxAttempts = tonumber(redis.call('HGET', jobKey, 'maxAttempts') or '1')
      if attempts < maxAttempts then
        local backoff = tonumber(redis.call('HGET', jobKey, 'backoffMs') or '0')
        redis.call('HSET', jobKey, 'state', 'delayed', 'failedReason', ARGV[7])
        redis.call('ZADD', KEYS[3], now + backoff * (2 ^ (attempts - 1)), id)
        retried = retried + 1
      else
        redis.call('HSET', jobKey, 'state', 'failed', 'failedReason', ARGV[7], 'finishedOn', ARGV[3])
        redis.call('ZADD', KEYS[4], ARGV[3], id)
        failed = failed + 1
      end
    end
  end
end
if failed > 0 then retain(KEYS[4], ARGV[1], ARGV[5], tonumber(ARGV[6])) end
return {requeued, retried, failed}
"#;

// KEYS: wait, delayed. ARGV: jobPrefix
const DRAIN: &str = r#"
local waiting = redis.call('LRANGE', KEYS[1], 0, -1)
local delayed = redis.call('ZRANGE', KEYS[2], 0, -1)
for _, id in ipairs(waiting) do redis.call('DEL', ARGV[1] .. id) end
for _, id in ipairs(delayed) do redis.call('DEL', ARGV[1] .. id) end
redis.call('DEL', KEYS[1], KEYS[2])
return #waiting + #delayed
"#;

// KEYS: bucket. ARGV: cutoff, jobPrefix
const CLEAN: &str = r#"
local ids = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1])
for _, id in ipairs(ids) do redis.call('DEL', ARGV[2] .. id) end
if #ids > 0 then redis.call('ZREMRANGEBYSCORE', KEYS[1], '-inf', ARGV[1]) end
return #ids
"#;

/// Key names for one queue.
#[derive(Debug, Clone)]
struct Keys {
    base: String,
}

impl Keys {
    fn new(prefix: &str, queue: QueueName) -> Self {
        Self {
            base: format!("{}:{}", prefix, queue.as_str()),
        }
    }

    fn job(&self, id: &JobId) -> String {
        format!("{}:job:{}", self.base, id)
    }

    fn job_prefix(&self) -> String {
        format!("{}:job:", self.base)
    }

    fn lock(&self, id: &JobId) -> String {
        format!("{}:lock:{}", self.base, id)
    }

    fn lock_prefix(&self) -> String {
        format!("{}:lock:", self.base)
    }

    fn bucket(&self, name: &str) -> String {
        format!("{}:{}", self.base, name)
    }
}

struct Scripts {
    enqueue: Script,
    claim: Script,
    extend_lock: Script,
    progress: Script,
    complete: Script,
    fail: Script,
    promote: Script,
    stalled: Script,
    drain: Script,
    clean: Script,
}

impl Scripts {
    fn load() -> Self {
        let with_retain = |body: &str| Script::new(&format!("{}{}", RETAIN_FN, body));
        Self {
            enqueue: Script::new(ENQUEUE),
            claim: Script::new(CLAIM),
            extend_lock: Script::new(EXTEND_LOCK),
            progress: Script::new(PROGRESS),
            complete: with_retain(COMPLETE),
            fail: with_retain(FAIL),
            promote: Script::new(PROMOTE),
            stalled: with_retain(STALLED),
            drain: Script::new(DRAIN),
            clean: Script::new(CLEAN),
        }
    }
}

/// Upper bound on the initial connection, retries included.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const CONNECT_RETRIES: usize = 2;
const RESPONSE_TIMEOUT: Duration = Duration::from_secs(10);

/// Job store on a shared, auto-reconnecting Redis connection.
pub struct RedisStore {
    conn: ConnectionManager,
    prefix: String,
    scripts: Scripts,
}

impl RedisStore {
    /// Connect to Redis. Fails within [`CONNECT_TIMEOUT`] when the server is
    /// unreachable; later drops are retried by the connection manager.
    pub async fn connect(redis_url: &str, prefix: impl Into<String>) -> QueueResult<Self> {
        let client = redis::Client::open(redis_url)?;
        let config = ConnectionManagerConfig::new()
            .set_number_of_retries(CONNECT_RETRIES)
            .set_connection_timeout(CONNECT_TIMEOUT)
            .set_response_timeout(RESPONSE_TIMEOUT);

        let mut conn = tokio::time::timeout(
            CONNECT_TIMEOUT,
            ConnectionManager::new_with_config(client, config),
        )
        .await
        .map_err(|_| {
            QueueError::connection_failed(format!("no answer from Redis within {:?}", CONNECT_TIMEOUT))
        })?
        .map_err(|e| QueueError::connection_failed(e.to_string()))?;

        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map_err(|e| QueueError::connection_failed(e.to_string()))?;

        let prefix = prefix.into();
        info!("Connected to Redis queue store (prefix '{}')", prefix);

        Ok(Self {
            conn,
            prefix,
            scripts: Scripts::load(),
        })
    }

    fn keys(&self, queue: QueueName) -> Keys {
        Keys::new(&self.prefix, queue)
    }

    fn conn(&self) -> ConnectionManager {
        self.conn.clone()
    }
}

fn retention_cutoff(retention: &Retention, now: i64) -> i64 {
    now.saturating_sub(retention.age_ms())
}

fn bucket_name(state: JobState) -> &'static str {
    match state {
        JobState::Waiting => "wait",
        JobState::Delayed => "delayed",
        JobState::Active => "active",
        JobState::Completed => "completed",
        JobState::Failed => "failed",
    }
}

#[async_trait]
impl JobStore for RedisStore {
    async fn enqueue(&self, job: &Job) -> QueueResult<bool> {
        let keys = self.keys(job.queue);
        let fields = job.to_fields()?;
        let mut conn = self.conn();

        let mut invocation = self.scripts.enqueue.prepare_invoke();
        invocation
            .key(keys.job(&job.id))
            .key(keys.bucket("wait"))
            .arg(job.id.as_str());
        for (field, value) in &fields {
            invocation.arg(*field).arg(value);
        }
        let stored: i64 = invocation.invoke_async(&mut conn).await?;

        debug!(job_id = %job.id, queue = %job.queue, stored = stored == 1, "Stored job");
        Ok(stored == 1)
    }

    async fn claim(
        &self,
        queue: QueueName,
        token: &str,
        lock_ttl: Duration,
        now: i64,
    ) -> QueueResult<Option<Job>> {
        let keys = self.keys(queue);
        let mut conn = self.conn();

        let fields: Option<HashMap<String, String>> = self
            .scripts
            .claim
            .key(keys.bucket("wait"))
            .key(keys.bucket("active"))
            .arg(keys.job_prefix())
            .arg(keys.lock_prefix())
            .arg(token)
            .arg(lock_ttl.as_millis() as u64)
            .arg(now)
            .invoke_async(&mut conn)
            .await?;

        fields
            .filter(|f| !f.is_empty())
            .map(|f| Job::from_fields(queue, &f))
            .transpose()
    }

    async fn extend_lock(
        &self,
        queue: QueueName,
        id: &JobId,
        token: &str,
        lock_ttl: Duration,
        _now: i64,
    ) -> QueueResult<bool> {
        let keys = self.keys(queue);
        let mut conn = self.conn();

        let extended: i64 = self
            .scripts
            .extend_lock
            .key(keys.lock(id))
            .arg(token)
            .arg(lock_ttl.as_millis() as u64)
            .invoke_async(&mut conn)
            .await?;
        Ok(extended == 1)
    }

    async fn update_progress(
        &self,
        queue: QueueName,
        id: &JobId,
        token: &str,
        progress: u8,
    ) -> QueueResult<()> {
        let keys = self.keys(queue);
        let mut conn = self.conn();

        let updated: i64 = self
            .scripts
            .progress
            .key(keys.job(id))
            .key(keys.lock(id))
            .arg(token)
            .arg(u32::from(progress.min(100)))
            .invoke_async(&mut conn)
            .await?;
        if updated != 1 {
            return Err(QueueError::lock_lost(id.as_str()));
        }
        Ok(())
    }

    async fn complete(
        &self,
        queue: QueueName,
        id: &JobId,
        token: &str,
        result: &serde_json::Value,
        retention: &Retention,
        now: i64,
    ) -> QueueResult<()> {
        let keys = self.keys(queue);
        let mut conn = self.conn();

        let completed: i64 = self
            .scripts
            .complete
            .key(keys.job(id))
            .key(keys.lock(id))
            .key(keys.bucket("active"))
            .key(keys.bucket("completed"))
            .arg(token)
            .arg(id.as_str())
            .arg(serde_json::to_string(result)?)
            .arg(now)
            .arg(retention_cutoff(retention, now))
            .arg(retention.count)
            .arg(keys.job_prefix())
            .invoke_async(&mut conn)
            .await?;
        if completed != 1 {
            return Err(QueueError::lock_lost(id.as_str()));
        }
        Ok(())
    }

    async fn fail(
        &self,
        queue: QueueName,
        id: &JobId,
        token: &str,
        reason: &str,
        retention: &Retention,
        now: i64,
    ) -> QueueResult<FailOutcome> {
        let keys = self.keys(queue);
        let mut conn = self.conn();

        let (outcome, delay_ms, attempts_made): (String, i64, u32) = self
            .scripts
            .fail
            .key(keys.job(id))
            .key(keys.lock(id))
            .key(keys.bucket("active"))
            .key(keys.bucket("delayed"))
            .key(keys.bucket("failed"))
            .arg(token)
            .arg(id.as_str())
            .arg(reason)
            .arg(now)
            .arg(retention_cutoff(retention, now))
            .arg(retention.count)
            .arg(keys.job_prefix())
            .invoke_async(&mut conn)
            .await?;

        match outcome.as_str() {
            "delayed" => Ok(FailOutcome::Retrying {
                attempts_made,
                delay: Duration::from_millis(delay_ms.max(0) as u64),
            }),
            "failed" => Ok(FailOutcome::Failed { attempts_made }),
            _ => Err(QueueError::lock_lost(id.as_str())),
        }
    }

    async fn promote_delayed(&self, queue: QueueName, now: i64) -> QueueResult<u64> {
        let keys = self.keys(queue);
        let mut conn = self.conn();

        let promoted: u64 = self
            .scripts
            .promote
            .key(keys.bucket("delayed"))
            .key(keys.bucket("wait"))
            .arg(now)
            .arg(keys.job_prefix())
            .invoke_async(&mut conn)
            .await?;
        Ok(promoted)
    }

    async fn recover_stalled(
        &self,
        queue: QueueName,
        max_stalled: u32,
        retention: &Retention,
        now: i64,
    ) -> QueueResult<StalledReport> {
        let keys = self.keys(queue);
        let mut conn = self.conn();

        let (requeued, retried, failed): (u64, u64, u64) = self
            .scripts
            .stalled
            .key(keys.bucket("active"))
            .key(keys.bucket("wait"))
            .key(keys.bucket("delayed"))
            .key(keys.bucket("failed"))
            .arg(keys.job_prefix())
            .arg(keys.lock_prefix())
            .arg(now)
            .arg(max_stalled)
            .arg(retention_cutoff(retention, now))
            .arg(retention.count)
            .arg(STALLED_REASON)
            .invoke_async(&mut conn)
            .await?;
        Ok(StalledReport {
            requeued,
            retried,
            failed,
        })
    }

    async fn get(&self, queue: QueueName, id: &JobId) -> QueueResult<Option<Job>> {
        let keys = self.keys(queue);
        let mut conn = self.conn();

        let fields: HashMap<String, String> = conn.hgetall(keys.job(id)).await?;
        if fields.is_empty() {
            return Ok(None);
        }
        Job::from_fields(queue, &fields).map(Some)
    }

    async fn counts(&self, queue: QueueName) -> QueueResult<JobCounts> {
        let keys = self.keys(queue);
        let mut conn = self.conn();

        let (waiting, active, completed, failed, delayed): (u64, u64, u64, u64, u64) = redis::pipe()
            .llen(keys.bucket("wait"))
            .llen(keys.bucket("active"))
            .zcard(keys.bucket("completed"))
            .zcard(keys.bucket("failed"))
            .zcard(keys.bucket("delayed"))
            .query_async(&mut conn)
            .await?;

        Ok(JobCounts {
            waiting,
            active,
            completed,
            failed,
            delayed,
        })
    }

    async fn list(&self, queue: QueueName, state: JobState, limit: usize) -> QueueResult<Vec<Job>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let keys = self.keys(queue);
        let mut conn = self.conn();
        let bucket = keys.bucket(bucket_name(state));
        let stop = limit as isize - 1;

        let ids: Vec<String> = match state {
            JobState::Waiting | JobState::Active => conn.lrange(&bucket, 0, stop).await?,
            _ => conn.zrevrange(&bucket, 0, stop).await?,
        };
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut pipe = redis::pipe();
        for id in &ids {
            pipe.hgetall(keys.job(&JobId::from_string(id.as_str())));
        }
        let hashes: Vec<HashMap<String, String>> = pipe.query_async(&mut conn).await?;

        hashes
            .iter()
            .filter(|fields| !fields.is_empty())
            .map(|fields| Job::from_fields(queue, fields))
            .collect()
    }

    async fn drain(&self, queue: QueueName) -> QueueResult<u64> {
        let keys = self.keys(queue);
        let mut conn = self.conn();

        let removed: u64 = self
            .scripts
            .drain
            .key(keys.bucket("wait"))
            .key(keys.bucket("delayed"))
            .arg(keys.job_prefix())
            .invoke_async(&mut conn)
            .await?;
        Ok(removed)
    }

    async fn clean(&self, queue: QueueName, state: JobState, cutoff: i64) -> QueueResult<u64> {
        if !state.is_terminal() {
            return Err(QueueError::invalid_payload(format!(
                "cannot clean {} jobs; only completed or failed",
                state
            )));
        }
        let keys = self.keys(queue);
        let mut conn = self.conn();

        let removed: u64 = self
            .scripts
            .clean
            .key(keys.bucket(bucket_name(state)))
            .arg(cutoff)
            .arg(keys.job_prefix())
            .invoke_async(&mut conn)
            .await?;
        Ok(removed)
    }

    async fn ping(&self) -> QueueResult<()> {
        let mut conn = self.conn();
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scm_models::FtpTransferJob;

    const TTL: Duration = Duration::from_secs(30);

    /// Store under a throwaway prefix so runs never see each other's keys.
    async fn test_store() -> RedisStore {
        dotenvy::dotenv().ok();
        let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string());
        RedisStore::connect(&url, format!("scm-test-{}", uuid::Uuid::new_v4()))
            .await
            .expect("connect")
    }

    fn transfer_job(media: &str, attempts: u32, now: i64) -> Job {
        Job::from_payload(
            JobId::new(),
            &FtpTransferJob::new(media, format!("/vps/{}.wav", media), format!("{}.wav", media)),
            attempts,
            2000,
            now,
        )
        .unwrap()
    }

    /// Lock TTLs run on the server clock, so tests expire them by hand.
    async fn expire_lock(store: &RedisStore, queue: QueueName, id: &JobId) {
        let mut conn = store.conn();
        let _: () = conn.del(store.keys(queue).lock(id)).await.unwrap();
    }

    #[test]
    fn keys_are_namespaced_per_queue() {
        let keys = Keys::new("scm", QueueName::FtpTransfer);
        let id = JobId::from("abc");
        assert_eq!(keys.job(&id), "scm:ftp-transfer:job:abc");
        assert_eq!(keys.lock(&id), "scm:ftp-transfer:lock:abc");
        assert_eq!(keys.bucket("wait"), "scm:ftp-transfer:wait");
        assert!(keys.job(&id).starts_with(&keys.job_prefix()));
    }

    #[tokio::test]
    async fn unreachable_server_fails_within_connect_timeout() {
        let started = std::time::Instant::now();
        let result = tokio::time::timeout(
            CONNECT_TIMEOUT + Duration::from_secs(5),
            RedisStore::connect("redis://127.0.0.1:1", "scm"),
        )
        .await
        .expect("connect gave up in time");

        assert!(matches!(result, Err(QueueError::ConnectionFailed(_))));
        assert!(started.elapsed() <= CONNECT_TIMEOUT + Duration::from_secs(1));
    }

    #[tokio::test]
    #[ignore = "requires Redis"]
    async fn redis_claim_complete_cycle() {
        let store = test_store().await;
        let q = QueueName::FtpTransfer;

        let job = transfer_job("m1", 3, 1);
        assert!(store.enqueue(&job).await.unwrap());
        assert!(!store.enqueue(&job).await.unwrap());
        assert_eq!(store.counts(q).await.unwrap().waiting, 1);

        let claimed = store
            .claim(q, "t1", Duration::from_secs(30), 2)
            .await
            .unwrap()
            .expect("job claimed");
        assert_eq!(claimed.id, job.id);

        store.update_progress(q, &job.id, "t1", 50).await.unwrap();
        let outcome = store
            .fail(q, &job.id, "t1", "boom", &Retention::new(10, Duration::from_secs(60)), 3)
            .await
            .unwrap();
        assert_eq!(
            outcome,
            FailOutcome::Retrying {
                attempts_made: 1,
                delay: Duration::from_millis(2000)
            }
        );

        assert_eq!(store.promote_delayed(q, 2003).await.unwrap(), 1);
        store.claim(q, "t2", Duration::from_secs(30), 2004).await.unwrap().unwrap();
        store
            .complete(
                q,
                &job.id,
                "t2",
                &serde_json::json!({"ok": true}),
                &Retention::new(10, Duration::from_secs(60)),
                2005,
            )
            .await
            .unwrap();

        let stored = store.get(q, &job.id).await.unwrap().unwrap();
        assert_eq!(stored.state, JobState::Completed);
        assert_eq!(stored.progress, 50);
        assert_eq!(store.clean(q, JobState::Completed, i64::MAX).await.unwrap(), 1);
    }

    #[tokio::test]
    #[ignore = "requires Redis"]
    async fn redis_stalls_are_requeued_then_charged_as_attempts() {
        let store = test_store().await;
        let q = QueueName::FtpTransfer;
        let retention = Retention::new(10, Duration::from_secs(3600));
        let job = transfer_job("m1", 2, 0);
        store.enqueue(&job).await.unwrap();

        store.claim(q, "w1", TTL, 0).await.unwrap().unwrap();
        assert_eq!(
            store.recover_stalled(q, 1, &retention, 1_000).await.unwrap(),
            StalledReport::default()
        );
        expire_lock(&store, q, &job.id).await;
        let report = store.recover_stalled(q, 1, &retention, 31_000).await.unwrap();
        assert_eq!(report.requeued, 1);
        assert_eq!(store.get(q, &job.id).await.unwrap().unwrap().attempts_made, 0);

        store.claim(q, "w2", TTL, 40_000).await.unwrap().unwrap();
        expire_lock(&store, q, &job.id).await;
        let report = store.recover_stalled(q, 1, &retention, 80_000).await.unwrap();
        assert_eq!(report.retried, 1);
        let delayed = store.get(q, &job.id).await.unwrap().unwrap();
        assert_eq!(delayed.state, JobState::Delayed);
        assert_eq!(delayed.attempts_made, 1);
        assert_eq!(delayed.failed_reason.as_deref(), Some(STALLED_REASON));
        assert_eq!(store.promote_delayed(q, 81_999).await.unwrap(), 0);
        assert_eq!(store.promote_delayed(q, 82_000).await.unwrap(), 1);

        store.claim(q, "w3", TTL, 90_000).await.unwrap().unwrap();
        expire_lock(&store, q, &job.id).await;
        let report = store.recover_stalled(q, 1, &retention, 130_000).await.unwrap();
        assert_eq!(report.failed, 1);
        let failed = store.get(q, &job.id).await.unwrap().unwrap();
        assert_eq!(failed.state, JobState::Failed);
        assert_eq!(failed.attempts_made, 2);
        assert_eq!(store.counts(q).await.unwrap().failed, 1);
    }

    #[tokio::test]
    #[ignore = "requires Redis"]
    async fn redis_retention_keeps_newest_by_count_and_age() {
        let store = test_store().await;
        let q = QueueName::FtpTransfer;
        let retention = Retention::new(2, Duration::from_millis(1000));

        let mut ids = Vec::new();
        for (i, name) in ["a", "b", "c"].iter().enumerate() {
            let job = transfer_job(name, 1, i as i64);
            ids.push(job.id.clone());
            store.enqueue(&job).await.unwrap();
            let claimed = store.claim(q, "w", TTL, i as i64).await.unwrap().unwrap();
            store
                .complete(q, &claimed.id, "w", &serde_json::json!(i), &retention, i as i64)
                .await
                .unwrap();
        }
        assert_eq!(store.counts(q).await.unwrap().completed, 2);
        assert!(store.get(q, &ids[0]).await.unwrap().is_none());

        let job = transfer_job("d", 1, 5000);
        store.enqueue(&job).await.unwrap();
        let claimed = store.claim(q, "w", TTL, 5000).await.unwrap().unwrap();
        store
            .fail(q, &claimed.id, "w", "nope", &retention, 5000)
            .await
            .unwrap();
        let listed = store.list(q, JobState::Failed, 10).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].failed_reason.as_deref(), Some("nope"));

        let job = transfer_job("e", 1, 5000);
        store.enqueue(&job).await.unwrap();
        let claimed = store.claim(q, "w", TTL, 5000).await.unwrap().unwrap();
        store
            .complete(q, &claimed.id, "w", &serde_json::json!(4), &retention, 5000)
            .await
            .unwrap();
        let listed = store.list(q, JobState::Completed, 10).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, job.id);
        assert!(store.get(q, &ids[1]).await.unwrap().is_none());
    }

    #[tokio::test]
    #[ignore = "requires Redis"]
    async fn redis_promote_moves_only_due_jobs() {
        let store = test_store().await;
        let q = QueueName::FtpTransfer;
        let retention = Retention::new(10, Duration::from_secs(3600));

        for name in ["a", "b"] {
            store.enqueue(&transfer_job(name, 3, 0)).await.unwrap();
        }
        let first = store.claim(q, "w", TTL, 0).await.unwrap().unwrap();
        store.fail(q, &first.id, "w", "boom", &retention, 0).await.unwrap();
        let second = store.claim(q, "w", TTL, 1000).await.unwrap().unwrap();
        store.fail(q, &second.id, "w", "boom", &retention, 1000).await.unwrap();
        assert_eq!(store.counts(q).await.unwrap().delayed, 2);

        assert_eq!(store.promote_delayed(q, 2500).await.unwrap(), 1);
        let promoted = store.get(q, &first.id).await.unwrap().unwrap();
        assert_eq!(promoted.state, JobState::Waiting);
        assert_eq!(store.get(q, &second.id).await.unwrap().unwrap().state, JobState::Delayed);

        let counts = store.counts(q).await.unwrap();
        assert_eq!((counts.waiting, counts.delayed), (1, 1));
    }

    #[tokio::test]
    #[ignore = "requires Redis"]
    async fn redis_drain_and_clean_empty_buckets() {
        let store = test_store().await;
        let q = QueueName::FtpTransfer;
        let retention = Retention::new(10, Duration::from_secs(3600));

        let jobs: Vec<Job> = [("a", 2), ("b", 1), ("c", 2), ("d", 2)]
            .iter()
            .map(|(name, attempts)| transfer_job(name, *attempts, 0))
            .collect();
        for job in &jobs {
            store.enqueue(job).await.unwrap();
        }
        // One retrying, one permanently failed, two still waiting.
        let retrying = store.claim(q, "w", TTL, 0).await.unwrap().unwrap();
        store.fail(q, &retrying.id, "w", "boom", &retention, 0).await.unwrap();
        let doomed = store.claim(q, "w", TTL, 10).await.unwrap().unwrap();
        store.fail(q, &doomed.id, "w", "boom", &retention, 10).await.unwrap();

        assert_eq!(store.drain(q).await.unwrap(), 3);
        assert!(store.get(q, &retrying.id).await.unwrap().is_none());

        assert_eq!(store.clean(q, JobState::Failed, 9).await.unwrap(), 0);
        assert_eq!(store.clean(q, JobState::Failed, 10).await.unwrap(), 1);
        assert!(store.get(q, &doomed.id).await.unwrap().is_none());
        assert_eq!(store.counts(q).await.unwrap(), JobCounts::default());
        assert!(store.clean(q, JobState::Active, 0).await.is_err());
    }
}
