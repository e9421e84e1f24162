//! Defaults shared by the executor, worker, scheduler and manager.

use std::time::Duration;

/// Attempts after which a failing job is marked as permanently failed.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 24;

/// How long a job may stay locked before another worker may claim it.
pub const DEFAULT_MAX_RUNTIME: Duration = Duration::from_secs(14_400);

/// How long a worker sleeps when it finds no work.
pub const DEFAULT_SLEEP_DELAY: Duration = Duration::from_secs(5);

/// Whether non-recurring jobs are deleted after they succeed.
pub const DEFAULT_DELETE_SUCCESSFUL_JOBS: bool = true;

/// Whether jobs are deleted once they exhaust their attempts.
pub const DEFAULT_DELETE_FAILED_JOBS: bool = false;

/// Job priority; lower numbers run first.
pub const DEFAULT_PRIORITY: i32 = 50;

/// Delay before a newly scheduled job becomes runnable.
pub const DEFAULT_WAIT: Duration = Duration::ZERO;

/// Queue used by typed jobs that do not pick one.
pub const DEFAULT_QUEUE: &str = "default";

/// Queue selector matching every queue.
pub const DEFAULT_WORK_QUEUE: &str = "*";

/// Prefix of generated worker process names.
pub const PROCESS_NAME_PREFIX: &str = "ember-jobs-worker";

/// Prefix of every executor and worker log line.
pub const LOG_PREFIX: &str = "[ember-jobs]";
