//! Storage adapters.
//!
//! An adapter is the persistence boundary of the job system. Schedulers
//! store new records through [`Adapter::schedule`], workers claim them with
//! [`Adapter::find`], and executors report each attempt through exactly one
//! of [`Adapter::success`] / [`Adapter::error`], plus [`Adapter::failure`]
//! once a job runs out of attempts.

mod memory;
mod redis;

pub use self::memory::MemoryAdapter;
pub use self::redis::{create_pool, RedisAdapter, RedisKeys};

use crate::consts::DEFAULT_WORK_QUEUE;
use crate::error::{JobError, JobResult};
use crate::job::JobRecord;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::time::Duration;

/// A new job to store.
#[derive(Debug, Clone, PartialEq)]
pub struct SchedulePayload {
    /// Job type name.
    pub name: String,
    /// Loader path.
    pub path: String,
    /// Positional arguments.
    pub args: Vec<Value>,
    /// Queue name.
    pub queue: String,
    /// Priority (lower = more urgent).
    pub priority: i32,
    /// First run time.
    pub run_at: DateTime<Utc>,
    /// Cron expression for recurring jobs.
    pub cron: Option<String>,
}

/// Arguments to [`Adapter::find`].
#[derive(Debug, Clone, Copy)]
pub struct FindArgs<'a> {
    /// Name recorded as the lock holder.
    pub process_name: &'a str,
    /// Locks older than this are considered abandoned.
    pub max_runtime: Duration,
    /// Queues to take work from; `"*"` matches all of them.
    pub queues: &'a [String],
}

/// Arguments to [`Adapter::success`].
#[derive(Debug, Clone, Copy)]
pub struct SuccessOptions<'a> {
    /// The job that ran.
    pub job: &'a JobRecord,
    /// Next trigger of a recurring job.
    pub run_at: Option<DateTime<Utc>>,
    /// Delete the job instead of keeping it as completed.
    pub delete_job: bool,
}

/// Arguments to [`Adapter::error`].
#[derive(Debug, Clone, Copy)]
pub struct ErrorOptions<'a> {
    /// The job that failed.
    pub job: &'a JobRecord,
    /// When to retry.
    pub run_at: DateTime<Utc>,
    /// What went wrong.
    pub error: &'a JobError,
}

/// Arguments to [`Adapter::failure`].
#[derive(Debug, Clone, Copy)]
pub struct FailureOptions<'a> {
    /// The job that exhausted its attempts.
    pub job: &'a JobRecord,
    /// Delete the job instead of keeping it as failed.
    pub delete_job: bool,
}

/// Persistence backend for job records.
#[async_trait]
pub trait Adapter: Send + Sync {
    /// Store a new job and return the stored record.
    async fn schedule(&self, payload: SchedulePayload) -> JobResult<JobRecord>;

    /// Claim the next runnable job, if any.
    ///
    /// The claimed record is locked by `process_name`, its `run_at` cleared
    /// and its `attempts` incremented.
    async fn find(&self, args: FindArgs<'_>) -> JobResult<Option<JobRecord>>;

    /// The job succeeded.
    ///
    /// With `run_at` the job is unlocked and rescheduled; otherwise it is
    /// deleted when `delete_job` is set and kept as completed when not.
    async fn success(&self, options: SuccessOptions<'_>) -> JobResult<()>;

    /// The job failed and should be retried at `run_at`. Never deletes.
    async fn error(&self, options: ErrorOptions<'_>) -> JobResult<()>;

    /// The job exhausted its attempts.
    async fn failure(&self, options: FailureOptions<'_>) -> JobResult<()>;

    /// Remove every job.
    async fn clear(&self) -> JobResult<()>;
}

/// Returns true if `queue` is selected by `queues`.
pub fn queue_matches(queues: &[String], queue: &str) -> bool {
    queues.is_empty() || queues.iter().any(|q| q == DEFAULT_WORK_QUEUE || q == queue)
}

/// Text stored as a record's `last_error`.
pub fn error_text(error: &JobError) -> String {
    error.report()
}
