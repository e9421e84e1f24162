//! Workers that claim jobs from an adapter and execute them.

use crate::adapter::{Adapter, FindArgs};
use crate::clock::{Clock, SystemClock};
use crate::consts::{
    DEFAULT_DELETE_FAILED_JOBS, DEFAULT_DELETE_SUCCESSFUL_JOBS, DEFAULT_MAX_ATTEMPTS,
    DEFAULT_MAX_RUNTIME, DEFAULT_SLEEP_DELAY, DEFAULT_WORK_QUEUE, LOG_PREFIX, PROCESS_NAME_PREFIX,
};
use crate::error::{JobError, JobResult};
use crate::executor::{Executor, ExecutorOptions};
use crate::job::JobRecord;
use crate::loader::JobLoader;
use crate::logger::{default_logger, JobLogger};
use crate::metrics::WorkerMetrics;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, Instrument};
use uuid::Uuid;

/// What a worker does when run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WorkerMode {
    /// Poll for work until stopped.
    #[default]
    Forever,
    /// Run every available job, then return.
    Workoff,
    /// Remove every job, then return.
    Clear,
}

/// Stop signal shared by one or more workers.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    /// A fresh, unsignalled handle.
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Ask every worker holding this handle to stop after its current job.
    pub fn stop(&self) {
        self.tx.send_replace(true);
    }

    /// Returns true once [`stop`](Self::stop) has been called.
    pub fn is_stopped(&self) -> bool {
        *self.tx.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

impl Default for ShutdownHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Worker settings.
#[derive(Clone)]
pub struct WorkerOptions {
    /// Where jobs are claimed from and reported to.
    pub adapter: Arc<dyn Adapter>,
    /// Resolves job implementations.
    pub loader: Arc<dyn JobLoader>,
    /// Log sink, shared with executors.
    pub logger: Arc<dyn JobLogger>,
    /// Time source, shared with executors.
    pub clock: Arc<dyn Clock>,
    /// Name recorded as the lock holder.
    pub process_name: String,
    /// Queues to work; `"*"` means all.
    pub queues: Vec<String>,
    /// Attempts before a job is marked as failed.
    pub max_attempts: u32,
    /// Locks older than this may be taken over.
    pub max_runtime: Duration,
    /// Sleep between polls when there is no work.
    pub sleep_delay: Duration,
    /// Delete non-recurring jobs after they succeed.
    pub delete_successful_jobs: bool,
    /// Delete jobs that exhaust their attempts.
    pub delete_failed_jobs: bool,
    /// Per-attempt timeout.
    pub timeout: Option<Duration>,
    /// What to do when run.
    pub mode: WorkerMode,
}

impl WorkerOptions {
    /// Options with every default filled in.
    pub fn new(adapter: Arc<dyn Adapter>, loader: Arc<dyn JobLoader>) -> Self {
        Self {
            adapter,
            loader,
            logger: default_logger(),
            clock: Arc::new(SystemClock),
            process_name: default_process_name(),
            queues: vec![DEFAULT_WORK_QUEUE.to_string()],
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            max_runtime: DEFAULT_MAX_RUNTIME,
            sleep_delay: DEFAULT_SLEEP_DELAY,
            delete_successful_jobs: DEFAULT_DELETE_SUCCESSFUL_JOBS,
            delete_failed_jobs: DEFAULT_DELETE_FAILED_JOBS,
            timeout: None,
            mode: WorkerMode::default(),
        }
    }

    /// Set the process name.
    pub fn process_name(mut self, name: impl Into<String>) -> Self {
        self.process_name = name.into();
        self
    }

    /// Set the queues to work.
    pub fn queues(mut self, queues: Vec<String>) -> Self {
        self.queues = queues;
        self
    }

    /// Set the mode.
    pub fn mode(mut self, mode: WorkerMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set the logger.
    pub fn logger(mut self, logger: Arc<dyn JobLogger>) -> Self {
        self.logger = logger;
        self
    }

    /// Set the clock.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Set the sleep between empty polls.
    pub fn sleep_delay(mut self, delay: Duration) -> Self {
        self.sleep_delay = delay;
        self
    }

    /// Set the stale lock threshold.
    pub fn max_runtime(mut self, max_runtime: Duration) -> Self {
        self.max_runtime = max_runtime;
        self
    }

    /// Set the maximum number of attempts.
    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Set whether successful jobs are deleted.
    pub fn delete_successful_jobs(mut self, delete: bool) -> Self {
        self.delete_successful_jobs = delete;
        self
    }

    /// Set whether exhausted jobs are deleted.
    pub fn delete_failed_jobs(mut self, delete: bool) -> Self {
        self.delete_failed_jobs = delete;
        self
    }

    /// Set the per-attempt timeout.
    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

fn default_process_name() -> String {
    let id = Uuid::new_v4().simple().to_string();
    format!("{}.{}", PROCESS_NAME_PREFIX, &id[..8])
}

/// Claims jobs and runs each through a fresh [`Executor`].
pub struct Worker {
    options: WorkerOptions,
    shutdown: ShutdownHandle,
    running: AtomicBool,
    jobs_processed: AtomicU64,
}

impl Worker {
    /// Create a worker with its own shutdown handle.
    pub fn new(options: WorkerOptions) -> Self {
        Self::with_shutdown(options, ShutdownHandle::new())
    }

    /// Create a worker stopped by `shutdown`.
    pub fn with_shutdown(options: WorkerOptions, shutdown: ShutdownHandle) -> Self {
        Self {
            options,
            shutdown,
            running: AtomicBool::new(false),
            jobs_processed: AtomicU64::new(0),
        }
    }

    /// The worker's settings.
    pub fn options(&self) -> &WorkerOptions {
        &self.options
    }

    /// Lock holder name.
    pub fn process_name(&self) -> &str {
        &self.options.process_name
    }

    /// Handle that stops this worker.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Stop after the current job.
    pub fn stop(&self) {
        self.shutdown.stop();
    }

    /// Check if the worker is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Jobs claimed and executed so far.
    pub fn jobs_processed(&self) -> u64 {
        self.jobs_processed.load(Ordering::Relaxed)
    }

    /// Run according to the configured mode.
    pub async fn run(&self) -> JobResult<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(JobError::Worker(format!(
                "worker {} is already running",
                self.options.process_name
            )));
        }

        WorkerMetrics::worker_started();
        let result = match self.options.mode {
            WorkerMode::Clear => self.clear().await,
            WorkerMode::Workoff => self.workoff().await,
            WorkerMode::Forever => {
                self.forever().await;
                Ok(())
            }
        };
        WorkerMetrics::worker_stopped();
        self.running.store(false, Ordering::SeqCst);

        result
    }

    async fn clear(&self) -> JobResult<()> {
        self.options.logger.info(&format!(
            "{LOG_PREFIX} Clearing all jobs ({})",
            self.options.process_name
        ));
        self.options.adapter.clear().await
    }

    async fn workoff(&self) -> JobResult<()> {
        self.options.logger.info(&format!(
            "{LOG_PREFIX} Working off all jobs on {} ({})",
            self.options.queues.join(", "),
            self.options.process_name
        ));

        while !self.shutdown.is_stopped() {
            if !self.work_one().await? {
                break;
            }
        }

        Ok(())
    }

    async fn forever(&self) {
        self.options.logger.info(&format!(
            "{LOG_PREFIX} Starting worker {} on {}",
            self.options.process_name,
            self.options.queues.join(", ")
        ));

        let mut shutdown = self.shutdown.subscribe();

        while !self.shutdown.is_stopped() {
            let found = match self.work_one().await {
                Ok(found) => found,
                Err(e) => {
                    self.options.logger.error(&format!(
                        "{LOG_PREFIX} Error finding job ({}): {}",
                        self.options.process_name,
                        e.report()
                    ));
                    false
                }
            };

            if found || self.shutdown.is_stopped() {
                continue;
            }

            tokio::select! {
                _ = tokio::time::sleep(self.options.sleep_delay) => {}
                _ = shutdown.changed() => {}
            }
        }

        self.options.logger.info(&format!(
            "{LOG_PREFIX} Stopped worker {} after {} jobs",
            self.options.process_name,
            self.jobs_processed()
        ));
    }

    /// Claim and execute one job. Returns false if there was nothing to do.
    async fn work_one(&self) -> JobResult<bool> {
        let job = self
            .options
            .adapter
            .find(FindArgs {
                process_name: &self.options.process_name,
                max_runtime: self.options.max_runtime,
                queues: &self.options.queues,
            })
            .await?;
        WorkerMetrics::poll(&self.options.process_name, job.is_some());

        let Some(job) = job else {
            return Ok(false);
        };

        debug!(
            job_id = %job.id,
            job_name = %job.name,
            worker = %self.options.process_name,
            attempts = job.attempts,
            "Processing job"
        );

        let executor = Executor::new(self.executor_options(job))?;
        if let Err(e) = executor.perform().await {
            self.options.logger.error(&format!(
                "{LOG_PREFIX} Error reporting job {}: {}",
                executor.job_identifier(),
                e.report()
            ));
        }
        self.jobs_processed.fetch_add(1, Ordering::Relaxed);

        Ok(true)
    }

    fn executor_options(&self, job: JobRecord) -> ExecutorOptions {
        let options = ExecutorOptions::new()
            .adapter(Arc::clone(&self.options.adapter))
            .job(job)
            .loader(Arc::clone(&self.options.loader))
            .logger(Arc::clone(&self.options.logger))
            .clock(Arc::clone(&self.options.clock))
            .max_attempts(self.options.max_attempts)
            .delete_successful_jobs(self.options.delete_successful_jobs)
            .delete_failed_jobs(self.options.delete_failed_jobs);

        match self.options.timeout {
            Some(timeout) => options.timeout(timeout),
            None => options,
        }
    }
}

/// A set of workers running as tokio tasks.
pub struct WorkerPool {
    shutdown: ShutdownHandle,
    tasks: Vec<(String, JoinHandle<JobResult<()>>)>,
}

impl WorkerPool {
    /// Spawn every worker. They should all share `shutdown`.
    pub fn spawn(workers: Vec<Worker>, shutdown: ShutdownHandle) -> Self {
        let tasks = workers
            .into_iter()
            .map(|worker| {
                let name = worker.process_name().to_string();
                let span = tracing::info_span!("worker", process_name = %name);
                let handle = tokio::spawn(async move { worker.run().await }.instrument(span));
                (name, handle)
            })
            .collect::<Vec<_>>();

        info!(workers = tasks.len(), "Started worker pool");

        Self { shutdown, tasks }
    }

    /// Number of workers.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Returns true if the pool has no workers.
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Names of the workers.
    pub fn process_names(&self) -> Vec<&str> {
        self.tasks.iter().map(|(name, _)| name.as_str()).collect()
    }

    /// Handle that stops every worker.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Ask every worker to stop after its current job.
    pub fn stop(&self) {
        info!(workers = self.tasks.len(), "Stopping worker pool...");
        self.shutdown.stop();
    }

    /// Wait for every worker to return. Reports the first failure.
    pub async fn join(self) -> JobResult<()> {
        let mut first_error = None;

        for (name, handle) in self.tasks {
            let result = match handle.await {
                Ok(result) => result,
                Err(e) => Err(JobError::Worker(format!("worker {} panicked: {}", name, e))),
            };

            if let Err(e) = result {
                tracing::error!(worker = %name, error = %e, "Worker exited with error");
                first_error.get_or_insert(e);
            }
        }

        info!("Worker pool stopped");
        first_error.map_or(Ok(()), Err)
    }

    /// [`stop`](Self::stop) then [`join`](Self::join).
    pub async fn shutdown(self) -> JobResult<()> {
        self.stop();
        self.join().await
    }
}
