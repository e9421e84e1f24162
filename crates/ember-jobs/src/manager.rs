//! Entry point wiring adapters, jobs, schedulers and workers together.

use crate::adapter::{Adapter, MemoryAdapter, RedisAdapter};
use crate::clock::{Clock, SystemClock};
use crate::config::{ExecutorConfig, JobsConfig, WorkerConfig, MEMORY_ADAPTER, REDIS_ADAPTER};
use crate::consts::PROCESS_NAME_PREFIX;
use crate::error::{JobError, JobResult};
use crate::job::{Job, JobDefinition};
use crate::loader::JobRegistry;
use crate::logger::{default_logger, JobLogger};
use crate::scheduler::Scheduler;
use crate::worker::{ShutdownHandle, Worker, WorkerMode, WorkerOptions, WorkerPool};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// Everything a [`JobManager`] is built from.
#[derive(Clone)]
pub struct JobManagerConfig {
    /// Adapters by name.
    pub adapters: HashMap<String, Arc<dyn Adapter>>,
    /// Queues jobs may be created on.
    pub queues: Vec<String>,
    /// Worker groups.
    pub workers: Vec<WorkerConfig>,
    /// Defaults for executors.
    pub executor: ExecutorConfig,
    /// Log sink. Defaults to [`TracingLogger`](crate::logger::TracingLogger).
    pub logger: Option<Arc<dyn JobLogger>>,
    /// Time source. Defaults to the system clock.
    pub clock: Option<Arc<dyn Clock>>,
}

impl JobManagerConfig {
    /// Config with no adapters or workers.
    pub fn new(queues: Vec<String>) -> Self {
        Self {
            adapters: HashMap::new(),
            queues,
            workers: Vec::new(),
            executor: ExecutorConfig::default(),
            logger: None,
            clock: None,
        }
    }

    /// Add an adapter under `name`.
    pub fn adapter(mut self, name: impl Into<String>, adapter: Arc<dyn Adapter>) -> Self {
        self.adapters.insert(name.into(), adapter);
        self
    }

    /// Add a worker group.
    pub fn worker(mut self, worker: WorkerConfig) -> Self {
        self.workers.push(worker);
        self
    }

    /// Set the logger.
    pub fn logger(mut self, logger: Arc<dyn JobLogger>) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Set the clock.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }
}

/// Which worker to build and how.
#[derive(Debug, Clone, Default)]
pub struct WorkerSpawn {
    /// Index into the manager's worker configs.
    pub index: usize,
    /// What the worker does.
    pub mode: WorkerMode,
    /// Lock holder name. Generated when unset.
    pub process_name: Option<String>,
}

/// Owns job definitions and builds schedulers and workers.
pub struct JobManager {
    adapters: HashMap<String, Arc<dyn Adapter>>,
    queues: Vec<String>,
    workers: Vec<WorkerConfig>,
    executor: ExecutorConfig,
    logger: Arc<dyn JobLogger>,
    clock: Arc<dyn Clock>,
    registry: Arc<JobRegistry>,
}

impl JobManager {
    /// Create a manager. At least one queue is required.
    pub fn new(config: JobManagerConfig) -> JobResult<Self> {
        if config.queues.is_empty() {
            return Err(JobError::QueuesRequired);
        }

        Ok(Self {
            adapters: config.adapters,
            queues: config.queues,
            workers: config.workers,
            executor: config.executor,
            logger: config.logger.unwrap_or_else(default_logger),
            clock: config.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            registry: Arc::new(JobRegistry::new()),
        })
    }

    /// Build a manager from loaded configuration.
    ///
    /// The memory adapter is always available; Redis is connected only when
    /// a worker group uses it.
    pub async fn from_config(config: &JobsConfig) -> JobResult<Self> {
        config.validate()?;

        let mut manager_config = JobManagerConfig::new(config.queues.clone())
            .adapter(MEMORY_ADAPTER, Arc::new(MemoryAdapter::new()));
        manager_config.workers = config.workers.clone();
        manager_config.executor = config.executor.clone();

        if config.uses_adapter(REDIS_ADAPTER) {
            let redis = RedisAdapter::connect(&config.redis).await?;
            manager_config = manager_config.adapter(REDIS_ADAPTER, Arc::new(redis));
        }

        Self::new(manager_config)
    }

    /// Declared queues.
    pub fn queues(&self) -> &[String] {
        &self.queues
    }

    /// The registry workers load jobs from.
    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    /// Look up an adapter by name.
    pub fn adapter(&self, name: &str) -> JobResult<Arc<dyn Adapter>> {
        self.adapters
            .get(name)
            .cloned()
            .ok_or_else(|| JobError::AdapterNotFound(name.to_string()))
    }

    /// Register a job definition. Its queue must be declared.
    pub fn create_job(&self, definition: JobDefinition) -> JobResult<JobDefinition> {
        if !self.queues.contains(&definition.queue) {
            return Err(JobError::QueueNotDefined {
                name: definition.name.clone(),
                queue: definition.queue.clone(),
            });
        }

        self.registry.register_definition(&definition);
        Ok(definition)
    }

    /// Register a typed job.
    pub fn register<J: Job>(&self, job: J) -> JobResult<JobDefinition> {
        self.create_job(JobDefinition::of(job))
    }

    /// A scheduler storing jobs with the named adapter.
    pub fn create_scheduler(&self, adapter_name: &str) -> JobResult<Scheduler> {
        Ok(Scheduler::new(self.adapter(adapter_name)?)
            .with_logger(Arc::clone(&self.logger))
            .with_clock(Arc::clone(&self.clock)))
    }

    /// A worker from the worker config at `spawn.index`.
    pub fn create_worker(&self, spawn: WorkerSpawn) -> JobResult<Worker> {
        self.build_worker(spawn, ShutdownHandle::new())
    }

    /// Start `count` forever-mode workers for every worker config.
    pub fn spawn_workers(&self) -> JobResult<WorkerPool> {
        let shutdown = ShutdownHandle::new();
        let mut workers = Vec::new();

        for (index, config) in self.workers.iter().enumerate() {
            for n in 0..config.count {
                let spawn = WorkerSpawn {
                    index,
                    mode: WorkerMode::Forever,
                    process_name: Some(format!("{PROCESS_NAME_PREFIX}.{index}.{n}")),
                };
                workers.push(self.build_worker(spawn, shutdown.clone())?);
            }
        }

        info!(
            worker_configs = self.workers.len(),
            workers = workers.len(),
            "Spawning workers"
        );

        Ok(WorkerPool::spawn(workers, shutdown))
    }

    fn build_worker(&self, spawn: WorkerSpawn, shutdown: ShutdownHandle) -> JobResult<Worker> {
        let config = self
            .workers
            .get(spawn.index)
            .ok_or(JobError::WorkerConfigIndexNotFound(spawn.index))?;
        let adapter = self.adapter(&config.adapter)?;

        let mut options = WorkerOptions::new(adapter, self.registry.clone())
            .logger(Arc::clone(&self.logger))
            .clock(Arc::clone(&self.clock))
            .queues(config.queues.clone())
            .mode(spawn.mode)
            .max_runtime(config.max_runtime())
            .sleep_delay(config.sleep_delay())
            .max_attempts(config.max_attempts.unwrap_or(self.executor.max_attempts))
            .delete_failed_jobs(
                config
                    .delete_failed_jobs
                    .unwrap_or(self.executor.delete_failed_jobs),
            )
            .delete_successful_jobs(
                config
                    .delete_successful_jobs
                    .unwrap_or(self.executor.delete_successful_jobs),
            )
            .timeout(
                config
                    .timeout_secs
                    .or(self.executor.timeout_secs)
                    .map(std::time::Duration::from_secs),
            );

        if let Some(name) = spawn.process_name {
            options = options.process_name(name);
        }

        Ok(Worker::with_shutdown(options, shutdown))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::FnJob;
    use crate::scheduler::ScheduleOptions;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct Ping;

    #[async_trait]
    impl Job for Ping {
        type Args = ();
        const NAME: &'static str = "ping";

        async fn perform(&self, _args: Self::Args) -> JobResult<()> {
            Ok(())
        }
    }

    fn manager() -> (JobManager, Arc<MemoryAdapter>) {
        let adapter = Arc::new(MemoryAdapter::new());
        let config = JobManagerConfig::new(vec!["default".into(), "mail".into()])
            .adapter("memory", adapter.clone())
            .worker(WorkerConfig {
                count: 2,
                ..WorkerConfig::default()
            })
            .worker(WorkerConfig {
                queues: vec!["mail".into()],
                max_attempts: Some(3),
                timeout_secs: Some(10),
                ..WorkerConfig::default()
            });
        (JobManager::new(config).unwrap(), adapter)
    }

    #[test]
    fn test_queues_required() {
        let result = JobManager::new(JobManagerConfig::new(vec![]));
        assert!(matches!(result, Err(JobError::QueuesRequired)));
    }

    #[test]
    fn test_create_job_checks_queue() {
        let (manager, _) = manager();
        let perform = Arc::new(FnJob::new(|_| Box::pin(async { Ok(()) })));

        let result = manager.create_job(JobDefinition::new("report", "reports", perform.clone()));
        match result {
            Err(JobError::QueueNotDefined { name, queue }) => {
                assert_eq!(name, "report");
                assert_eq!(queue, "reports");
            }
            other => panic!("Expected QueueNotDefined, got {other:?}"),
        }

        manager
            .create_job(JobDefinition::new("report", "mail", perform))
            .unwrap();
        assert!(manager.registry().contains("report"));
    }

    #[test]
    fn test_register_typed_job() {
        let (manager, _) = manager();
        let definition = manager.register(Ping).unwrap();
        assert_eq!(definition.queue, "default");
        assert!(manager.registry().contains("ping"));
    }

    #[test]
    fn test_unknown_adapter() {
        let (manager, _) = manager();
        assert!(matches!(
            manager.create_scheduler("redis"),
            Err(JobError::AdapterNotFound(name)) if name == "redis"
        ));
    }

    #[test]
    fn test_unknown_worker_index() {
        let (manager, _) = manager();
        let result = manager.create_worker(WorkerSpawn {
            index: 7,
            ..WorkerSpawn::default()
        });
        assert!(matches!(result, Err(JobError::WorkerConfigIndexNotFound(7))));
    }

    #[test]
    fn test_worker_takes_group_settings() {
        let (manager, _) = manager();
        let worker = manager
            .create_worker(WorkerSpawn {
                index: 1,
                mode: WorkerMode::Workoff,
                process_name: Some("mailer".into()),
            })
            .unwrap();

        let options = worker.options();
        assert_eq!(options.process_name, "mailer");
        assert_eq!(options.queues, vec!["mail".to_string()]);
        assert_eq!(options.max_attempts, 3);
        assert_eq!(options.timeout, Some(Duration::from_secs(10)));
        assert_eq!(options.mode, WorkerMode::Workoff);
    }

    #[tokio::test]
    async fn test_schedule_and_workoff() {
        let (manager, adapter) = manager();
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();
        let definition = manager
            .create_job(JobDefinition::new(
                "count",
                "default",
                Arc::new(FnJob::new(move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Box::pin(async { Ok(()) })
                })),
            ))
            .unwrap();

        let scheduler = manager.create_scheduler("memory").unwrap();
        scheduler
            .schedule(&definition, vec![], ScheduleOptions::now())
            .await
            .unwrap();
        assert_eq!(adapter.len(), 1);

        let worker = manager
            .create_worker(WorkerSpawn {
                index: 0,
                mode: WorkerMode::Workoff,
                process_name: None,
            })
            .unwrap();
        worker.run().await.unwrap();

        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(adapter.is_empty());
    }

    #[tokio::test]
    async fn test_spawn_workers_names_and_counts() {
        let (manager, _) = manager();
        let pool = manager.spawn_workers().unwrap();

        assert_eq!(
            pool.process_names(),
            vec![
                "ember-jobs-worker.0.0",
                "ember-jobs-worker.0.1",
                "ember-jobs-worker.1.0"
            ]
        );
        pool.shutdown().await.unwrap();
    }
}
