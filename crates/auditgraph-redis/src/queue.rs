//! Durable queue on Redis.
//!
//! Jobs live as JSON strings under `job:<id>`; their state is the structure
//! that holds the id (`wait`, `active`, `delayed` or `failed`). Every
//! conditional transition is a Lua script so it runs atomically on the
//! server.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use redis::{AsyncCommands, Script};
use tracing::{debug, warn};

use auditgraph_core::config::QueueConfig;
use auditgraph_core::queue::{
    EnqueueOutcome, EventQueue, FailOutcome, Job, NewJob, QueueCounts, QueueResult, RetryPolicy,
    STALLED_ERROR,
};

use crate::client::{init_pool, RedisError, RedisPool, RedisResult};
use crate::keys::QueueKeys;

/// KEYS: job, wait, failed. ARGV: id, job json.
const ENQUEUE: &str = r#"
if redis.call('SET', KEYS[1], ARGV[2], 'NX') then
  redis.call('RPUSH', KEYS[2], ARGV[1])
  return 1
end
if redis.call('ZREM', KEYS[3], ARGV[1]) == 1 then
  redis.call('SET', KEYS[1], ARGV[2])
  redis.call('RPUSH', KEYS[2], ARGV[1])
  return 1
end
return 0
"#;

/// KEYS: wait, active, delayed. ARGV: now ms, job key prefix.
const RESERVE: &str = r#"
local ready = redis.call('ZRANGEBYSCORE', KEYS[3], '-inf', ARGV[1])
for _, id in ipairs(ready) do
  redis.call('ZREM', KEYS[3], id)
  redis.call('RPUSH', KEYS[1], id)
end
while true do
  local id = redis.call('LPOP', KEYS[1])
  if not id then
    return false
  end
  local data = redis.call('GET', ARGV[2] .. id)
  if data then
    redis.call('ZADD', KEYS[2], ARGV[1], id)
    return data
  end
end
"#;

/// KEYS: active, wait, failed. ARGV: cutoff ms, job key prefix, max
/// attempts, now ms, last_error json, failed_at json.
///
/// Counts the stall as an attempt by rebuilding the fixed tail of the job
/// JSON (`attempts_made` onwards); `data` is copied untouched.
const RECOVER_STALLED: &str = r#"
local function find_last(s, needle)
  local found, from = nil, 1
  while true do
    local i = string.find(s, needle, from, true)
    if not i then
      return found
    end
    found, from = i, i + 1
  end
end
local stalled = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1])
local requeued, parked = 0, 0
for _, id in ipairs(stalled) do
  redis.call('ZREM', KEYS[1], id)
  local key = ARGV[2] .. id
  local data = redis.call('GET', key)
  if data then
    local at = find_last(data, ',"attempts_made":')
    local attempts, enqueued
    if at then
      local tail = string.sub(data, at)
      attempts = tonumber(string.match(tail, '"attempts_made":(%d+)'))
      enqueued = string.match(tail, '"enqueued_at":("[^"]*")')
    end
    if attempts and enqueued then
      attempts = attempts + 1
      local dead = attempts >= tonumber(ARGV[3])
      local failed_at = 'null'
      if dead then
        failed_at = ARGV[6]
      end
      redis.call('SET', key, string.sub(data, 1, at - 1)
        .. ',"attempts_made":' .. attempts
        .. ',"enqueued_at":' .. enqueued
        .. ',"last_error":' .. ARGV[5]
        .. ',"failed_at":' .. failed_at .. '}')
      if dead then
        redis.call('ZADD', KEYS[3], ARGV[4], id)
        parked = parked + 1
      else
        redis.call('LPUSH', KEYS[2], id)
        requeued = requeued + 1
      end
    else
      redis.call('LPUSH', KEYS[2], id)
      requeued = requeued + 1
    end
  end
end
return {requeued, parked}
"#;

/// KEYS: failed, wait, job. ARGV: id, reset job json.
const RETRY_FAILED: &str = r#"
if redis.call('ZREM', KEYS[1], ARGV[1]) == 0 then
  return 0
end
redis.call('SET', KEYS[3], ARGV[2])
redis.call('RPUSH', KEYS[2], ARGV[1])
return 1
"#;

/// KEYS: failed, job. ARGV: id.
const REMOVE_FAILED: &str = r#"
if redis.call('ZREM', KEYS[1], ARGV[1]) == 0 then
  return 0
end
redis.call('DEL', KEYS[2])
return 1
"#;

struct Scripts {
    enqueue: Script,
    reserve: Script,
    recover_stalled: Script,
    retry_failed: Script,
    remove_failed: Script,
}

impl Scripts {
    fn load() -> Self {
        Self {
            enqueue: Script::new(ENQUEUE),
            reserve: Script::new(RESERVE),
            recover_stalled: Script::new(RECOVER_STALLED),
            retry_failed: Script::new(RETRY_FAILED),
            remove_failed: Script::new(REMOVE_FAILED),
        }
    }
}

/// A named queue on a shared Redis connection.
pub struct RedisQueue {
    pool: RedisPool,
    keys: QueueKeys,
    policy: RetryPolicy,
    poll_interval: Duration,
    scripts: Scripts,
}

impl RedisQueue {
    pub fn new(pool: RedisPool, config: &QueueConfig) -> Self {
        Self {
            pool,
            keys: QueueKeys::new(&config.name),
            policy: config.retry_policy(),
            poll_interval: config.poll_interval(),
            scripts: Scripts::load(),
        }
    }

    /// Connect to `config.redis_url` and open the queue `config.name`.
    pub async fn connect(config: &QueueConfig) -> RedisResult<Self> {
        let pool = init_pool(&config.redis_url).await?;
        debug!(queue = %config.name, "Connected to Redis");
        Ok(Self::new(pool, config))
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    async fn try_reserve(&self) -> RedisResult<Option<Job>> {
        let mut conn = self.pool.clone();
        let data: Option<String> = self
            .scripts
            .reserve
            .key(self.keys.wait())
            .key(self.keys.active())
            .key(self.keys.delayed())
            .arg(Utc::now().timestamp_millis())
            .arg(self.keys.job_prefix())
            .invoke_async(&mut conn)
            .await?;
        match data {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn load_job(&self, job_id: &str) -> RedisResult<Option<Job>> {
        let mut conn = self.pool.clone();
        let json: Option<String> = conn.get(self.keys.job(job_id)).await?;
        match json {
            Some(j) => Ok(Some(serde_json::from_str(&j)?)),
            None => Ok(None),
        }
    }
}

fn millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

#[async_trait]
impl EventQueue for RedisQueue {
    async fn enqueue(&self, job: NewJob) -> QueueResult<EnqueueOutcome> {
        let job = Job::from_new(job);
        let json = serde_json::to_string(&job)?;
        let mut conn = self.pool.clone();
        let added: i64 = self
            .scripts
            .enqueue
            .key(self.keys.job(&job.id))
            .key(self.keys.wait())
            .key(self.keys.failed())
            .arg(&job.id)
            .arg(json)
            .invoke_async(&mut conn)
            .await
            .map_err(RedisError::from)?;
        Ok(if added == 1 {
            EnqueueOutcome::Enqueued
        } else {
            EnqueueOutcome::Duplicate
        })
    }

    async fn reserve(&self, wait: Duration) -> QueueResult<Option<Job>> {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            if let Some(job) = self.try_reserve().await? {
                return Ok(Some(job));
            }
            let now = tokio::time::Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(self.poll_interval.min(deadline - now)).await;
        }
    }

    async fn complete(&self, job: &Job) -> QueueResult<()> {
        let mut conn = self.pool.clone();
        let _: () = redis::pipe()
            .atomic()
            .zrem(self.keys.active(), &job.id)
            .ignore()
            .del(self.keys.job(&job.id))
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(RedisError::from)?;
        Ok(())
    }

    async fn fail(&self, job: &Job, error: &str) -> QueueResult<FailOutcome> {
        let attempts = job.attempts_made + 1;
        let outcome = self.policy.outcome(attempts);
        let now = Utc::now();

        let mut stored = job.clone();
        stored.attempts_made = attempts;
        stored.last_error = Some(error.to_string());

        let mut pipe = redis::pipe();
        pipe.atomic().zrem(self.keys.active(), &job.id).ignore();
        match outcome {
            FailOutcome::Retrying { delay, .. } => {
                let ready_at = now.timestamp_millis().saturating_add(millis(delay));
                pipe.set(self.keys.job(&job.id), serde_json::to_string(&stored)?)
                    .ignore()
                    .zadd(self.keys.delayed(), &job.id, ready_at)
                    .ignore();
            }
            FailOutcome::Dead { .. } => {
                stored.failed_at = Some(now);
                pipe.set(self.keys.job(&job.id), serde_json::to_string(&stored)?)
                    .ignore()
                    .zadd(self.keys.failed(), &job.id, now.timestamp_millis())
                    .ignore();
            }
        }

        let mut conn = self.pool.clone();
        let _: () = pipe.query_async(&mut conn).await.map_err(RedisError::from)?;
        Ok(outcome)
    }

    async fn recover_stalled(&self, visibility_timeout: Duration) -> QueueResult<usize> {
        let now = Utc::now();
        let cutoff = now
            .timestamp_millis()
            .saturating_sub(millis(visibility_timeout));
        let mut conn = self.pool.clone();
        let (requeued, parked): (usize, usize) = self
            .scripts
            .recover_stalled
            .key(self.keys.active())
            .key(self.keys.wait())
            .key(self.keys.failed())
            .arg(cutoff)
            .arg(self.keys.job_prefix())
            .arg(self.policy.max_attempts)
            .arg(now.timestamp_millis())
            .arg(serde_json::to_string(STALLED_ERROR)?)
            .arg(serde_json::to_string(&now)?)
            .invoke_async(&mut conn)
            .await
            .map_err(RedisError::from)?;
        if requeued > 0 {
            warn!(requeued, "Requeued stalled jobs");
        }
        if parked > 0 {
            warn!(parked, "Parked jobs that stalled on every attempt");
        }
        Ok(requeued + parked)
    }

    async fn counts(&self) -> QueueResult<QueueCounts> {
        let mut conn = self.pool.clone();
        let (waiting, active, delayed, failed): (usize, usize, usize, usize) = redis::pipe()
            .llen(self.keys.wait())
            .zcard(self.keys.active())
            .zcard(self.keys.delayed())
            .zcard(self.keys.failed())
            .query_async(&mut conn)
            .await
            .map_err(RedisError::from)?;
        Ok(QueueCounts {
            waiting,
            active,
            delayed,
            failed,
        })
    }

    async fn failed(&self, limit: usize) -> QueueResult<Vec<Job>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.pool.clone();
        let stop = isize::try_from(limit).unwrap_or(isize::MAX) - 1;
        let ids: Vec<String> = conn
            .zrange(self.keys.failed(), 0, stop)
            .await
            .map_err(RedisError::from)?;
        let mut jobs = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(job) = self.load_job(&id).await? {
                jobs.push(job);
            }
        }
        Ok(jobs)
    }

    async fn retry_failed(&self, job_id: &str) -> QueueResult<bool> {
        let Some(mut job) = self.load_job(job_id).await? else {
            return Ok(false);
        };
        job.attempts_made = 0;
        job.failed_at = None;

        let mut conn = self.pool.clone();
        let retried: i64 = self
            .scripts
            .retry_failed
            .key(self.keys.failed())
            .key(self.keys.wait())
            .key(self.keys.job(job_id))
            .arg(job_id)
            .arg(serde_json::to_string(&job)?)
            .invoke_async(&mut conn)
            .await
            .map_err(RedisError::from)?;
        Ok(retried == 1)
    }

    async fn remove_failed(&self, job_id: &str) -> QueueResult<bool> {
        let mut conn = self.pool.clone();
        let removed: i64 = self
            .scripts
            .remove_failed
            .key(self.keys.failed())
            .key(self.keys.job(job_id))
            .arg(job_id)
            .invoke_async(&mut conn)
            .await
            .map_err(RedisError::from)?;
        Ok(removed == 1)
    }
}
