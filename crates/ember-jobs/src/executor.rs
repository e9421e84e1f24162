//! Executes a single attempt of a single job.
//!
//! An [`Executor`] is built for one claimed [`JobRecord`], runs it once and
//! reports the outcome to the adapter:
//!
//! - success: `success` with the next cron trigger (if any);
//! - failure: `error` with a retry time from [`backoff_milliseconds`], and
//!   additionally `failure` once the job has used up its attempts.
//!
//! Errors from the job never escape [`Executor::perform`]. Adapter errors
//! do, so the caller can log them.
//!
//! [`backoff_milliseconds`]: crate::retry::backoff_milliseconds

use crate::adapter::{Adapter, ErrorOptions, FailureOptions, SuccessOptions};
use crate::clock::{Clock, SystemClock};
use crate::consts::{
    DEFAULT_DELETE_FAILED_JOBS, DEFAULT_DELETE_SUCCESSFUL_JOBS, DEFAULT_MAX_ATTEMPTS, LOG_PREFIX,
};
use crate::error::{JobError, JobResult};
use crate::job::JobRecord;
use crate::loader::{JobLoader, JobLocation, JobRegistry};
use crate::logger::{default_logger, JobLogger};
use crate::metrics::JobMetrics;
use crate::recurrence::next_run_at;
use crate::retry::retry_at;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Settings for one [`Executor`].
///
/// `adapter` and `job` are required; everything else falls back to the
/// crate defaults.
#[derive(Default, Clone)]
pub struct ExecutorOptions {
    /// Where the outcome is reported.
    pub adapter: Option<Arc<dyn Adapter>>,
    /// The claimed job.
    pub job: Option<JobRecord>,
    /// Resolves the job implementation. Defaults to an empty registry.
    pub loader: Option<Arc<dyn JobLoader>>,
    /// Log sink. Defaults to [`TracingLogger`](crate::logger::TracingLogger).
    pub logger: Option<Arc<dyn JobLogger>>,
    /// Attempts before the job is marked as failed.
    pub max_attempts: Option<u32>,
    /// Delete jobs that exhaust their attempts.
    pub delete_failed_jobs: Option<bool>,
    /// Delete non-recurring jobs after they succeed.
    pub delete_successful_jobs: Option<bool>,
    /// Time source. Defaults to the system clock.
    pub clock: Option<Arc<dyn Clock>>,
    /// Upper bound on a single attempt. Unbounded when unset.
    pub timeout: Option<Duration>,
}

impl ExecutorOptions {
    /// Empty options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the adapter.
    pub fn adapter(mut self, adapter: Arc<dyn Adapter>) -> Self {
        self.adapter = Some(adapter);
        self
    }

    /// Set the job.
    pub fn job(mut self, job: JobRecord) -> Self {
        self.job = Some(job);
        self
    }

    /// Set the loader.
    pub fn loader(mut self, loader: Arc<dyn JobLoader>) -> Self {
        self.loader = Some(loader);
        self
    }

    /// Set the logger.
    pub fn logger(mut self, logger: Arc<dyn JobLogger>) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Set the maximum number of attempts.
    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    /// Set whether exhausted jobs are deleted.
    pub fn delete_failed_jobs(mut self, delete: bool) -> Self {
        self.delete_failed_jobs = Some(delete);
        self
    }

    /// Set whether successful jobs are deleted.
    pub fn delete_successful_jobs(mut self, delete: bool) -> Self {
        self.delete_successful_jobs = Some(delete);
        self
    }

    /// Set the clock.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Set the per-attempt timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Runs one attempt of one job.
pub struct Executor {
    adapter: Arc<dyn Adapter>,
    job: JobRecord,
    loader: Arc<dyn JobLoader>,
    logger: Arc<dyn JobLogger>,
    max_attempts: u32,
    delete_failed_jobs: bool,
    delete_successful_jobs: bool,
    clock: Arc<dyn Clock>,
    timeout: Option<Duration>,
    job_identifier: String,
}

impl Executor {
    /// Build an executor, filling in defaults.
    pub fn new(options: ExecutorOptions) -> JobResult<Self> {
        let adapter = options.adapter.ok_or(JobError::AdapterRequired)?;
        let job = options.job.ok_or(JobError::JobRequired)?;
        let job_identifier = job.identifier();

        Ok(Self {
            adapter,
            job,
            loader: options
                .loader
                .unwrap_or_else(|| Arc::new(JobRegistry::new())),
            logger: options.logger.unwrap_or_else(default_logger),
            max_attempts: options.max_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS),
            delete_failed_jobs: options
                .delete_failed_jobs
                .unwrap_or(DEFAULT_DELETE_FAILED_JOBS),
            delete_successful_jobs: options
                .delete_successful_jobs
                .unwrap_or(DEFAULT_DELETE_SUCCESSFUL_JOBS),
            clock: options.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            timeout: options.timeout,
            job_identifier,
        })
    }

    /// The job being executed.
    pub fn job(&self) -> &JobRecord {
        &self.job
    }

    /// The adapter outcomes are reported to.
    pub fn adapter(&self) -> &Arc<dyn Adapter> {
        &self.adapter
    }

    /// The log sink.
    pub fn logger(&self) -> &Arc<dyn JobLogger> {
        &self.logger
    }

    /// `"{id} ({path}:{name})"`.
    pub fn job_identifier(&self) -> &str {
        &self.job_identifier
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn delete_failed_jobs(&self) -> bool {
        self.delete_failed_jobs
    }

    pub fn delete_successful_jobs(&self) -> bool {
        self.delete_successful_jobs
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Run the job once and report the outcome to the adapter.
    ///
    /// Returns `Err` only when the adapter itself fails.
    pub async fn perform(&self) -> JobResult<()> {
        self.logger
            .info(&format!("{LOG_PREFIX} Started job {}", self.job_identifier));
        JobMetrics::job_started(&self.job.queue, &self.job.name);

        let started = Instant::now();
        let outcome = match self.attempt().await {
            Ok(()) => next_run_at(self.job.cron.as_deref(), self.clock.now()),
            Err(e) => Err(e),
        };

        match outcome {
            Ok(run_at) => self.succeeded(run_at, started.elapsed()).await,
            Err(error) => self.errored(error, started.elapsed()).await,
        }
    }

    async fn attempt(&self) -> JobResult<()> {
        let implementation = self
            .loader
            .load_job(JobLocation {
                name: &self.job.name,
                path: &self.job.path,
            })
            .await?;

        let run = AssertUnwindSafe(implementation.perform(self.job.args.clone())).catch_unwind();
        let result = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, run)
                .await
                .map_err(|_| JobError::Timeout(limit))?,
            None => run.await,
        };

        result.unwrap_or_else(|panic| Err(JobError::Panicked(panic_message(panic.as_ref()))))
    }

    async fn succeeded(&self, run_at: Option<DateTime<Utc>>, elapsed: Duration) -> JobResult<()> {
        let delete_job = run_at.is_none() && self.delete_successful_jobs;

        self.adapter
            .success(SuccessOptions {
                job: &self.job,
                run_at,
                delete_job,
            })
            .await?;

        debug!(
            job_id = %self.job.id,
            next_run_at = ?run_at,
            delete_job,
            "Job completed"
        );
        JobMetrics::job_completed(&self.job.queue, &self.job.name, elapsed);
        if run_at.is_some() {
            JobMetrics::job_rescheduled(&self.job.queue, &self.job.name);
        }

        Ok(())
    }

    async fn errored(&self, error: JobError, elapsed: Duration) -> JobResult<()> {
        self.logger.error(&format!(
            "{LOG_PREFIX} Error in job {}: {}",
            self.job_identifier,
            error.report()
        ));

        self.adapter
            .error(ErrorOptions {
                job: &self.job,
                run_at: retry_at(self.clock.now(), self.job.attempts),
                error: &error,
            })
            .await?;
        JobMetrics::job_errored(&self.job.queue, &self.job.name, self.job.attempts, elapsed);

        if self.job.attempts >= self.max_attempts {
            self.logger.warn(&format!(
                "{LOG_PREFIX} Failed job {}: reached max attempts ({})",
                self.job_identifier, self.max_attempts
            ));

            self.adapter
                .failure(FailureOptions {
                    job: &self.job,
                    delete_job: self.delete_failed_jobs,
                })
                .await?;
            JobMetrics::job_failed(&self.job.queue, &self.job.name);
        }

        Ok(())
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
