//! Redis-backed adapter.
//!
//! Layout under the configured prefix:
//!
//! - `{prefix}:job:{id}`: the record as JSON;
//! - `{prefix}:queue:{name}`: sorted set of runnable ids scored by `run_at`;
//! - `{prefix}:queues`: every queue name ever scheduled on;
//! - `{prefix}:active`: sorted set of claimed ids scored by lock time;
//! - `{prefix}:failed`: ids of jobs that exhausted their attempts.
//!
//! Claims are optimistic: a worker `WATCH`es the job key, re-reads the
//! record and checks it is still runnable, then moves the id into the
//! active set inside `MULTI`/`EXEC`. Every state change rewrites the job
//! key, so a concurrent claim or report aborts the transaction.
//!
//! Records that no longer decode are moved from the runnable sets into
//! the failed set.

use super::{
    error_text, queue_matches, Adapter, ErrorOptions, FailureOptions, FindArgs, SchedulePayload,
    SuccessOptions,
};
use crate::clock::{Clock, SystemClock};
use crate::config::RedisConfig;
use crate::consts::DEFAULT_WORK_QUEUE;
use crate::error::{JobError, JobResult};
use crate::job::{JobId, JobRecord};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_redis::{Config, Connection, Pool, Runtime};
use redis::AsyncCommands;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Runnable ids read per queue on each `find`.
const FIND_BATCH: isize = 16;

/// Keys deleted per `SCAN` page in `clear`.
const SCAN_COUNT: usize = 500;

/// Create a Redis connection pool.
pub async fn create_pool(config: &RedisConfig) -> JobResult<Pool> {
    info!("Creating Redis connection pool for jobs...");

    let cfg = Config::from_url(&config.url);

    let pool = cfg
        .builder()
        .map_err(|e| JobError::Configuration(format!("Invalid Redis config: {}", e)))?
        .max_size(config.pool_size)
        .runtime(Runtime::Tokio1)
        .build()
        .map_err(|e| JobError::Configuration(format!("Failed to create pool: {}", e)))?;

    // Test connection
    let mut conn = pool.get().await?;
    redis::cmd("PING")
        .query_async::<String>(&mut *conn)
        .await?;

    info!("Redis connection pool created successfully");

    Ok(pool)
}

/// Redis key builder.
#[derive(Debug, Clone)]
pub struct RedisKeys {
    prefix: String,
}

impl RedisKeys {
    /// Create a new key builder with the given prefix.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Job record key.
    pub fn job(&self, job_id: &str) -> String {
        format!("{}:job:{}", self.prefix, job_id)
    }

    /// Runnable jobs of one queue (sorted set by run time).
    pub fn queue(&self, queue_name: &str) -> String {
        format!("{}:queue:{}", self.prefix, queue_name)
    }

    /// Set of known queue names.
    pub fn queues(&self) -> String {
        format!("{}:queues", self.prefix)
    }

    /// Claimed jobs (sorted set by lock time).
    pub fn active(&self) -> String {
        format!("{}:active", self.prefix)
    }

    /// Permanently failed jobs.
    pub fn failed(&self) -> String {
        format!("{}:failed", self.prefix)
    }

    /// Pattern matching every key of this prefix.
    pub fn all(&self) -> String {
        format!("{}:*", self.prefix)
    }
}

impl Default for RedisKeys {
    fn default() -> Self {
        Self::new("ember:jobs")
    }
}

/// Adapter storing jobs in Redis.
pub struct RedisAdapter {
    pool: Pool,
    keys: RedisKeys,
    clock: Arc<dyn Clock>,
}

impl RedisAdapter {
    /// Create an adapter on an existing pool.
    pub fn new(pool: Pool, config: &RedisConfig) -> Self {
        Self {
            pool,
            keys: RedisKeys::new(&config.key_prefix),
            clock: Arc::new(SystemClock),
        }
    }

    /// Connect using `config`.
    pub async fn connect(config: &RedisConfig) -> JobResult<Self> {
        let pool = create_pool(config).await?;
        Ok(Self::new(pool, config))
    }

    /// Read time from `clock` instead of the system clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Key builder in use.
    pub fn keys(&self) -> &RedisKeys {
        &self.keys
    }

    async fn conn(&self) -> JobResult<Connection> {
        Ok(self.pool.get().await?)
    }

    async fn load(&self, conn: &mut Connection, job_id: &str) -> JobResult<Option<JobRecord>> {
        let json: Option<String> = conn.get(self.keys.job(job_id)).await?;
        json.map(|j| JobRecord::from_json(&j)).transpose()
    }

    /// Load a record listed in `source`, moving it to the failed set if it
    /// does not decode.
    async fn load_listed(
        &self,
        conn: &mut Connection,
        job_id: &str,
        source: &str,
    ) -> JobResult<Option<JobRecord>> {
        match self.load(conn, job_id).await {
            Err(JobError::Serialization(e)) => {
                error!(job_id = %job_id, error = %e, "Undecodable job record, moving to failed set");
                let _: () = redis::pipe()
                    .zrem(source, job_id)
                    .ignore()
                    .sadd(self.keys.failed(), job_id)
                    .ignore()
                    .query_async(&mut **conn)
                    .await?;
                Ok(None)
            }
            other => other,
        }
    }

    async fn queue_names(&self, conn: &mut Connection, queues: &[String]) -> JobResult<Vec<String>> {
        if queues.is_empty() || queues.iter().any(|q| q == DEFAULT_WORK_QUEUE) {
            let mut names: Vec<String> = conn.smembers(self.keys.queues()).await?;
            names.sort();
            return Ok(names);
        }
        Ok(queues.to_vec())
    }

    async fn candidates(
        &self,
        conn: &mut Connection,
        args: FindArgs<'_>,
        now_ms: i64,
        cutoff_ms: i64,
    ) -> JobResult<Vec<JobRecord>> {
        let mut candidates = Vec::new();

        // Locks older than max_runtime belong to workers that died mid-job.
        let stale: Vec<String> = conn
            .zrangebyscore_limit(self.keys.active(), "-inf", format!("({cutoff_ms}"), 0, FIND_BATCH)
            .await?;
        for id in stale {
            if let Some(record) = self.load_listed(conn, &id, &self.keys.active()).await? {
                if record.failed_at.is_none() && queue_matches(args.queues, &record.queue) {
                    candidates.push(record);
                }
            }
        }

        for queue in self.queue_names(conn, args.queues).await? {
            let ids: Vec<String> = conn
                .zrangebyscore_limit(self.keys.queue(&queue), "-inf", now_ms, 0, FIND_BATCH)
                .await?;
            for id in ids {
                if let Some(record) = self.load_listed(conn, &id, &self.keys.queue(&queue)).await? {
                    if record.failed_at.is_none() {
                        candidates.push(record);
                    }
                }
            }
        }

        candidates.sort_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then_with(|| a.run_at.cmp(&b.run_at))
                .then_with(|| a.created_at.cmp(&b.created_at))
        });
        Ok(candidates)
    }

    /// Claim `job_id` if it is still runnable, atomically with respect to
    /// every other writer of the record.
    async fn try_claim(
        &self,
        conn: &mut Connection,
        job_id: &str,
        args: FindArgs<'_>,
        now: DateTime<Utc>,
        cutoff_ms: i64,
    ) -> JobResult<Option<JobRecord>> {
        let job_key = self.keys.job(job_id);
        redis::cmd("WATCH").arg(&job_key).query_async::<()>(&mut **conn).await?;

        let Some(mut record) = self.claimable(conn, job_id, args.queues, now, cutoff_ms).await? else {
            redis::cmd("UNWATCH").query_async::<()>(&mut **conn).await?;
            return Ok(None);
        };

        let source = if record.is_locked() {
            warn!(job_id = %job_id, locked_by = ?record.locked_by, "Recovering job with stale lock");
            self.keys.active()
        } else {
            self.keys.queue(&record.queue)
        };

        record.locked_at = Some(now);
        record.locked_by = Some(args.process_name.to_string());
        record.run_at = None;
        record.attempts += 1;
        record.updated_at = now;

        // EXEC replies nil when the watched record changed.
        let committed: Option<(i64,)> = redis::pipe()
            .atomic()
            .zrem(&source, job_id)
            .set(&job_key, record.to_json()?)
            .ignore()
            .zadd(self.keys.active(), job_id, now.timestamp_millis())
            .ignore()
            .query_async(&mut **conn)
            .await?;

        match committed {
            Some((1,)) => Ok(Some(record)),
            _ => Ok(None),
        }
    }

    /// Fresh copy of the record if it may be claimed right now.
    async fn claimable(
        &self,
        conn: &mut Connection,
        job_id: &str,
        queues: &[String],
        now: DateTime<Utc>,
        cutoff_ms: i64,
    ) -> JobResult<Option<JobRecord>> {
        let record = match self.load(conn, job_id).await? {
            Some(record) if record.failed_at.is_none() && queue_matches(queues, &record.queue) => record,
            _ => return Ok(None),
        };

        let runnable = if record.is_locked() {
            let locked: Option<f64> = conn.zscore(self.keys.active(), job_id).await?;
            locked.is_some_and(|score| (score as i64) < cutoff_ms)
        } else {
            let run_at: Option<f64> = conn.zscore(self.keys.queue(&record.queue), job_id).await?;
            run_at.is_some_and(|score| (score as i64) <= now.timestamp_millis())
        };

        Ok(runnable.then_some(record))
    }
}

#[async_trait]
impl Adapter for RedisAdapter {
    async fn schedule(&self, payload: SchedulePayload) -> JobResult<JobRecord> {
        let now = self.clock.now();
        let record = JobRecord {
            id: JobId::new(),
            name: payload.name,
            path: payload.path,
            args: payload.args,
            attempts: 0,
            cron: payload.cron,
            queue: payload.queue,
            priority: payload.priority,
            run_at: Some(payload.run_at),
            locked_at: None,
            locked_by: None,
            last_error: None,
            failed_at: None,
            created_at: now,
            updated_at: now,
        };

        let mut conn = self.conn().await?;
        let _: () = redis::pipe()
            .set(self.keys.job(record.id.as_str()), record.to_json()?)
            .ignore()
            .zadd(self.keys.queue(&record.queue), record.id.as_str(), payload.run_at.timestamp_millis())
            .ignore()
            .sadd(self.keys.queues(), &record.queue)
            .ignore()
            .query_async(&mut *conn)
            .await?;

        debug!(job_id = %record.id, queue = %record.queue, run_at = %payload.run_at, "Scheduled job");
        Ok(record)
    }

    async fn find(&self, args: FindArgs<'_>) -> JobResult<Option<JobRecord>> {
        let mut conn = self.conn().await?;
        let now = self.clock.now();
        let now_ms = now.timestamp_millis();
        let max_runtime_ms = i64::try_from(args.max_runtime.as_millis()).unwrap_or(i64::MAX);
        let cutoff_ms = now_ms.saturating_sub(max_runtime_ms);

        for candidate in self.candidates(&mut conn, args, now_ms, cutoff_ms).await? {
            let id = candidate.id.as_str();
            match self.try_claim(&mut conn, id, args, now, cutoff_ms).await? {
                Some(record) => {
                    debug!(job_id = %id, worker = %args.process_name, attempts = record.attempts, "Claimed job");
                    return Ok(Some(record));
                }
                // Another worker got there first.
                None => continue,
            }
        }

        Ok(None)
    }

    async fn success(&self, options: SuccessOptions<'_>) -> JobResult<()> {
        let mut conn = self.conn().await?;
        let job = options.job;
        let id = job.id.as_str();

        if let Some(run_at) = options.run_at {
            let mut record = job.clone();
            record.locked_at = None;
            record.locked_by = None;
            record.last_error = None;
            record.run_at = Some(run_at);
            record.updated_at = self.clock.now();

            let _: () = redis::pipe()
                .set(self.keys.job(id), record.to_json()?)
                .ignore()
                .zrem(self.keys.active(), id)
                .ignore()
                .zadd(self.keys.queue(&record.queue), id, run_at.timestamp_millis())
                .ignore()
                .query_async(&mut *conn)
                .await?;

            debug!(job_id = %id, run_at = %run_at, "Rescheduled recurring job");
            return Ok(());
        }

        if options.delete_job {
            let _: () = redis::pipe()
                .del(self.keys.job(id))
                .ignore()
                .zrem(self.keys.active(), id)
                .ignore()
                .zrem(self.keys.queue(&job.queue), id)
                .ignore()
                .query_async(&mut *conn)
                .await?;

            debug!(job_id = %id, "Deleted successful job");
            return Ok(());
        }

        let mut record = job.clone();
        record.locked_at = None;
        record.locked_by = None;
        record.last_error = None;
        record.run_at = None;
        record.updated_at = self.clock.now();

        let _: () = redis::pipe()
            .set(self.keys.job(id), record.to_json()?)
            .ignore()
            .zrem(self.keys.active(), id)
            .ignore()
            .query_async(&mut *conn)
            .await?;

        Ok(())
    }

    async fn error(&self, options: ErrorOptions<'_>) -> JobResult<()> {
        let mut conn = self.conn().await?;
        let id = options.job.id.as_str();

        let mut record = options.job.clone();
        record.locked_at = None;
        record.locked_by = None;
        record.run_at = Some(options.run_at);
        record.last_error = Some(error_text(options.error));
        record.updated_at = self.clock.now();

        let _: () = redis::pipe()
            .set(self.keys.job(id), record.to_json()?)
            .ignore()
            .zrem(self.keys.active(), id)
            .ignore()
            .zadd(self.keys.queue(&record.queue), id, options.run_at.timestamp_millis())
            .ignore()
            .query_async(&mut *conn)
            .await?;

        debug!(job_id = %id, retry_at = %options.run_at, "Scheduled job retry");
        Ok(())
    }

    async fn failure(&self, options: FailureOptions<'_>) -> JobResult<()> {
        let mut conn = self.conn().await?;
        let job = options.job;
        let id = job.id.as_str();

        if options.delete_job {
            let _: () = redis::pipe()
                .del(self.keys.job(id))
                .ignore()
                .zrem(self.keys.queue(&job.queue), id)
                .ignore()
                .zrem(self.keys.active(), id)
                .ignore()
                .query_async(&mut *conn)
                .await?;

            debug!(job_id = %id, "Deleted failed job");
            return Ok(());
        }

        // The stored copy carries the last error written by `error`.
        let mut record = match self.load(&mut conn, id).await {
            Ok(Some(record)) => record,
            Ok(None) | Err(JobError::Serialization(_)) => job.clone(),
            Err(e) => return Err(e),
        };
        let now = self.clock.now();
        record.failed_at = Some(now);
        record.run_at = None;
        record.locked_at = None;
        record.locked_by = None;
        record.updated_at = now;

        let _: () = redis::pipe()
            .set(self.keys.job(id), record.to_json()?)
            .ignore()
            .zrem(self.keys.queue(&job.queue), id)
            .ignore()
            .zrem(self.keys.active(), id)
            .ignore()
            .sadd(self.keys.failed(), id)
            .ignore()
            .query_async(&mut *conn)
            .await?;

        warn!(job_id = %id, attempts = record.attempts, "Marked job as failed");
        Ok(())
    }

    async fn clear(&self) -> JobResult<()> {
        let mut conn = self.conn().await?;
        let mut cursor: u64 = 0;
        let mut count = 0;

        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(self.keys.all())
                .arg("COUNT")
                .arg(SCAN_COUNT)
                .query_async(&mut *conn)
                .await?;

            if !keys.is_empty() {
                count += keys.len();
                let _: () = conn.del(&keys).await?;
            }

            if next == 0 {
                break;
            }
            cursor = next;
        }

        info!(count, "Cleared job keys");
        Ok(())
    }
}
