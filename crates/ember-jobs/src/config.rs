//! Job system configuration.
//!
//! Loaded in layers from a config directory:
//! 1. `default.toml`
//! 2. `{EMBER_JOBS_ENVIRONMENT}.toml` (defaults to `development`)
//! 3. `local.toml`
//! 4. Environment variables with the `EMBER_JOBS__` prefix, `__` separated
//!    (e.g. `EMBER_JOBS__REDIS__URL`)

use crate::consts::{
    DEFAULT_DELETE_FAILED_JOBS, DEFAULT_DELETE_SUCCESSFUL_JOBS, DEFAULT_MAX_ATTEMPTS,
    DEFAULT_MAX_RUNTIME, DEFAULT_QUEUE, DEFAULT_SLEEP_DELAY, DEFAULT_WORK_QUEUE,
};
use crate::error::{JobError, JobResult};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// Name of the in-process adapter.
pub const MEMORY_ADAPTER: &str = "memory";

/// Name of the Redis adapter.
pub const REDIS_ADAPTER: &str = "redis";

/// Configuration for the job system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobsConfig {
    /// Redis connection configuration.
    #[serde(default)]
    pub redis: RedisConfig,

    /// Queues jobs may be created on.
    #[serde(default = "default_queues")]
    pub queues: Vec<String>,

    /// Worker groups.
    #[serde(default = "default_workers")]
    pub workers: Vec<WorkerConfig>,

    /// Defaults for every executor.
    #[serde(default)]
    pub executor: ExecutorConfig,

    /// Logging setup.
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            redis: RedisConfig::default(),
            queues: default_queues(),
            workers: default_workers(),
            executor: ExecutorConfig::default(),
            telemetry: TelemetryConfig::default(),
        }
    }
}

fn default_queues() -> Vec<String> {
    vec![DEFAULT_QUEUE.to_string()]
}

fn default_workers() -> Vec<WorkerConfig> {
    vec![WorkerConfig::default()]
}

impl JobsConfig {
    /// Load configuration from `config_dir`.
    pub fn load(config_dir: impl AsRef<Path>) -> JobResult<Self> {
        // Load .env file if present
        if let Err(e) = dotenvy::dotenv() {
            debug!("No .env file found or error loading it: {}", e);
        }

        let config_dir = config_dir.as_ref();
        let environment = std::env::var("EMBER_JOBS_ENVIRONMENT")
            .unwrap_or_else(|_| "development".to_string());

        info!(environment = %environment, "Loading jobs configuration");

        let mut builder = Config::builder();

        for name in ["default".to_string(), environment, "local".to_string()] {
            let path = config_dir.join(format!("{name}.toml"));
            if path.exists() {
                debug!("Loading config from: {}", path.display());
                builder = builder.add_source(File::with_name(&path.to_string_lossy()).required(false));
            }
        }

        builder = builder.add_source(
            Environment::with_prefix("EMBER_JOBS")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config: JobsConfig = builder.build()?.try_deserialize()?;
        config.validate()?;

        Ok(config)
    }

    /// Check the configuration is usable.
    pub fn validate(&self) -> JobResult<()> {
        if self.queues.is_empty() {
            return Err(JobError::QueuesRequired);
        }

        for (index, worker) in self.workers.iter().enumerate() {
            if worker.count == 0 {
                return Err(JobError::Configuration(format!(
                    "worker config {index} has a count of 0"
                )));
            }
            if worker.adapter != MEMORY_ADAPTER && worker.adapter != REDIS_ADAPTER {
                return Err(JobError::AdapterNotFound(worker.adapter.clone()));
            }
        }

        Ok(())
    }

    /// Returns true if any worker group uses the named adapter.
    pub fn uses_adapter(&self, name: &str) -> bool {
        self.workers.iter().any(|w| w.adapter == name)
    }
}

/// Redis connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Redis URL.
    #[serde(default = "default_redis_url")]
    pub url: String,

    /// Connection pool size.
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    /// Key prefix for all job-related keys.
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            pool_size: default_pool_size(),
            key_prefix: default_key_prefix(),
        }
    }
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_pool_size() -> usize {
    10
}

fn default_key_prefix() -> String {
    "ember:jobs".to_string()
}

/// Defaults applied to every executor unless a worker group overrides them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Attempts before a job is marked as failed.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delete jobs that exhaust their attempts.
    #[serde(default = "default_delete_failed_jobs")]
    pub delete_failed_jobs: bool,

    /// Delete non-recurring jobs after they succeed.
    #[serde(default = "default_delete_successful_jobs")]
    pub delete_successful_jobs: bool,

    /// Per-attempt timeout in seconds. Unbounded when unset.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            delete_failed_jobs: default_delete_failed_jobs(),
            delete_successful_jobs: default_delete_successful_jobs(),
            timeout_secs: None,
        }
    }
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

fn default_delete_failed_jobs() -> bool {
    DEFAULT_DELETE_FAILED_JOBS
}

fn default_delete_successful_jobs() -> bool {
    DEFAULT_DELETE_SUCCESSFUL_JOBS
}

impl ExecutorConfig {
    /// Returns the timeout as Duration.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

/// One group of identically configured workers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Adapter name (`memory` or `redis`).
    #[serde(default = "default_adapter")]
    pub adapter: String,

    /// Queues to work; `"*"` means all.
    #[serde(default = "default_work_queues")]
    pub queues: Vec<String>,

    /// Number of workers to run.
    #[serde(default = "default_count")]
    pub count: usize,

    /// Overrides [`ExecutorConfig::max_attempts`].
    #[serde(default)]
    pub max_attempts: Option<u32>,

    /// Seconds a job may stay locked before another worker may claim it.
    #[serde(default = "default_max_runtime")]
    pub max_runtime_secs: u64,

    /// Seconds to sleep when there is no work.
    #[serde(default = "default_sleep_delay")]
    pub sleep_delay_secs: u64,

    /// Overrides [`ExecutorConfig::delete_failed_jobs`].
    #[serde(default)]
    pub delete_failed_jobs: Option<bool>,

    /// Overrides [`ExecutorConfig::delete_successful_jobs`].
    #[serde(default)]
    pub delete_successful_jobs: Option<bool>,

    /// Overrides [`ExecutorConfig::timeout_secs`].
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            adapter: default_adapter(),
            queues: default_work_queues(),
            count: default_count(),
            max_attempts: None,
            max_runtime_secs: default_max_runtime(),
            sleep_delay_secs: default_sleep_delay(),
            delete_failed_jobs: None,
            delete_successful_jobs: None,
            timeout_secs: None,
        }
    }
}

fn default_adapter() -> String {
    MEMORY_ADAPTER.to_string()
}

fn default_work_queues() -> Vec<String> {
    vec![DEFAULT_WORK_QUEUE.to_string()]
}

fn default_count() -> usize {
    1
}

fn default_max_runtime() -> u64 {
    DEFAULT_MAX_RUNTIME.as_secs()
}

fn default_sleep_delay() -> u64 {
    DEFAULT_SLEEP_DELAY.as_secs()
}

impl WorkerConfig {
    /// Returns max runtime as Duration.
    pub fn max_runtime(&self) -> Duration {
        Duration::from_secs(self.max_runtime_secs)
    }

    /// Returns sleep delay as Duration.
    pub fn sleep_delay(&self) -> Duration {
        Duration::from_secs(self.sleep_delay_secs)
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// `EnvFilter` directives, used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info,ember_jobs=debug".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = JobsConfig::default();
        assert_eq!(config.queues, vec!["default".to_string()]);
        assert_eq!(config.workers.len(), 1);
        assert_eq!(config.workers[0].adapter, "memory");
        assert_eq!(config.workers[0].queues, vec!["*".to_string()]);
        assert_eq!(config.workers[0].max_runtime(), DEFAULT_MAX_RUNTIME);
        assert_eq!(config.workers[0].sleep_delay(), DEFAULT_SLEEP_DELAY);
        assert_eq!(config.executor.max_attempts, 24);
        assert!(!config.executor.delete_failed_jobs);
        assert!(config.executor.delete_successful_jobs);
        assert_eq!(config.executor.timeout(), None);
        assert_eq!(config.redis.key_prefix, "ember:jobs");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_empty_queues() {
        let config = JobsConfig {
            queues: vec![],
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(JobError::QueuesRequired)));
    }

    #[test]
    fn test_validate_rejects_unknown_adapter() {
        let mut config = JobsConfig::default();
        config.workers[0].adapter = "postgres".to_string();
        assert!(matches!(config.validate(), Err(JobError::AdapterNotFound(name)) if name == "postgres"));
    }

    #[test]
    fn test_load_from_directory() {
        let dir = std::env::temp_dir().join(format!("ember-jobs-config-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let mut file = std::fs::File::create(dir.join("default.toml")).unwrap();
        writeln!(
            file,
            r#"
queues = ["default", "mail"]

[executor]
max_attempts = 5
timeout_secs = 30

[[workers]]
adapter = "memory"
queues = ["mail"]
count = 2
sleep_delay_secs = 1
"#
        )
        .unwrap();

        let config = JobsConfig::load(&dir).unwrap();
        assert_eq!(config.queues, vec!["default".to_string(), "mail".to_string()]);
        assert_eq!(config.executor.max_attempts, 5);
        assert_eq!(config.executor.timeout(), Some(Duration::from_secs(30)));
        assert_eq!(config.workers[0].count, 2);
        assert_eq!(config.workers[0].sleep_delay(), Duration::from_secs(1));
        assert!(config.uses_adapter("memory"));
        assert!(!config.uses_adapter("redis"));

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
