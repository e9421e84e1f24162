//! Job error types.

use thiserror::Error;

/// Result type for job operations.
pub type JobResult<T> = Result<T, JobError>;

/// Job-related errors.
#[derive(Debug, Error)]
pub enum JobError {
    /// An executor was built without an adapter.
    #[error("an adapter is required to execute a job")]
    AdapterRequired,

    /// An executor was built without a job record.
    #[error("a job is required to execute")]
    JobRequired,

    /// A scheduler or worker referenced an adapter the manager does not know.
    #[error("adapter not found: {0}")]
    AdapterNotFound(String),

    /// The job manager was configured without any queue.
    #[error("at least one queue must be configured")]
    QueuesRequired,

    /// A job definition names a queue the manager was not configured with.
    #[error("queue `{queue}` is not defined for job `{name}`")]
    QueueNotDefined { name: String, queue: String },

    /// No worker configuration at the requested index.
    #[error("no worker config found at index {0}")]
    WorkerConfigIndexNotFound(usize),

    /// No job registered under this name.
    #[error("job not found: {name}")]
    JobNotFound { name: String },

    /// A job with this name exists, but not at the requested path.
    #[error("job `{name}` is not exported from `{path}`")]
    JobExportNotFound { name: String, path: String },

    /// The stored arguments do not match what the job expects.
    #[error("invalid arguments for job `{name}`: {reason}")]
    InvalidArguments { name: String, reason: String },

    /// The job implementation returned an error.
    #[error("job execution failed: {0}")]
    PerformFailed(String),

    /// The job implementation panicked.
    #[error("job panicked: {0}")]
    Panicked(String),

    /// Job timed out.
    #[error("job timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// Cron expression could not be parsed.
    #[error("invalid cron expression `{expression}`: {reason}")]
    InvalidCron { expression: String, reason: String },

    /// The adapter refused or failed to store a new job.
    #[error("failed to schedule job `{name}`")]
    Scheduling {
        name: String,
        #[source]
        source: Box<JobError>,
    },

    /// Worker error.
    #[error("worker error: {0}")]
    Worker(String),

    /// Generic adapter failure.
    #[error("adapter error: {0}")]
    Adapter(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Redis error.
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Redis pool error.
    #[error("redis pool error: {0}")]
    Pool(#[from] deadpool_redis::PoolError),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl JobError {
    /// Creates a [`JobError::PerformFailed`] from anything displayable.
    pub fn perform(reason: impl std::fmt::Display) -> Self {
        JobError::PerformFailed(reason.to_string())
    }

    /// Returns true if this error comes from a misconfigured manager,
    /// scheduler, worker or executor rather than from running a job.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            JobError::AdapterRequired
                | JobError::JobRequired
                | JobError::AdapterNotFound(_)
                | JobError::QueuesRequired
                | JobError::QueueNotDefined { .. }
                | JobError::WorkerConfigIndexNotFound(_)
                | JobError::Configuration(_)
        )
    }

    /// Message followed by every error in the source chain, one per line.
    pub fn report(&self) -> String {
        let mut report = self.to_string();
        let mut source = std::error::Error::source(self);
        while let Some(cause) = source {
            report.push_str("\n  caused by: ");
            report.push_str(&cause.to_string());
            source = cause.source();
        }
        report
    }
}

impl From<config::ConfigError> for JobError {
    fn from(err: config::ConfigError) -> Self {
        JobError::Configuration(err.to_string())
    }
}
