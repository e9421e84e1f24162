//! Ember Jobs - Background Job System
//!
//! Runs units of work outside the request cycle with:
//! - Pluggable storage adapters (in-memory and Redis)
//! - Typed job definitions resolved through a loader registry
//! - Retries with quartic backoff (`1000 * attempts^4` ms)
//! - Cron-based recurring jobs
//! - Stale lock recovery for jobs whose worker died
//! - Worker pools with graceful shutdown
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    Ember Jobs Architecture                       │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                                                                  │
//! │  JobManager ──► Scheduler ──► adapter.schedule                   │
//! │                                   │                              │
//! │                                   ▼                              │
//! │  ┌─────────────────────────────────────────────────────────┐    │
//! │  │               Adapter (memory / redis)                   │    │
//! │  └─────────────────────────────────────────────────────────┘    │
//! │                                   │ adapter.find                 │
//! │                                   ▼                              │
//! │  ┌─────────────────────────────────────────────────────────┐    │
//! │  │                     Worker Pool                          │    │
//! │  │  ┌──────────┐ ┌──────────┐ ┌──────────┐                  │    │
//! │  │  │ Worker 1 │ │ Worker 2 │ │ Worker N │                  │    │
//! │  │  └────┬─────┘ └────┬─────┘ └────┬─────┘                  │    │
//! │  │       └────────────┴────────────┘                        │    │
//! │  │                    │ one Executor per claimed job        │    │
//! │  │                    ▼                                     │    │
//! │  │   JobLoader ──► perform(args)                            │    │
//! │  │                    │                                     │    │
//! │  │       ┌────────────┼──────────────┐                      │    │
//! │  │       ▼            ▼              ▼                      │    │
//! │  │   success       error      error + failure               │    │
//! │  │ (delete/cron)  (retry)   (max attempts reached)          │    │
//! │  └─────────────────────────────────────────────────────────┘    │
//! │                                                                  │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use ember_jobs::prelude::*;
//!
//! struct SendWelcomeEmail;
//!
//! #[async_trait::async_trait]
//! impl Job for SendWelcomeEmail {
//!     type Args = (String,);
//!     const NAME: &'static str = "send_welcome_email";
//!     const QUEUE: &'static str = "mail";
//!
//!     async fn perform(&self, (to,): Self::Args) -> JobResult<()> {
//!         // Send email logic
//!         Ok(())
//!     }
//! }
//!
//! let manager = JobManager::new(
//!     JobManagerConfig::new(vec!["mail".into()])
//!         .adapter("memory", Arc::new(MemoryAdapter::new()))
//!         .worker(WorkerConfig::default()),
//! )?;
//! manager.register(SendWelcomeEmail)?;
//!
//! // Enqueue a job
//! manager
//!     .create_scheduler("memory")?
//!     .schedule_job::<SendWelcomeEmail>(&("user@example.com".into(),), ScheduleOptions::now())
//!     .await?;
//!
//! let pool = manager.spawn_workers()?;
//! ```

pub mod adapter;
pub mod clock;
pub mod config;
pub mod consts;
pub mod error;
pub mod executor;
pub mod job;
pub mod loader;
pub mod logger;
pub mod manager;
pub mod metrics;
pub mod recurrence;
pub mod retry;
pub mod scheduler;
pub mod telemetry;
pub mod worker;

pub use adapter::{
    Adapter, ErrorOptions, FailureOptions, FindArgs, MemoryAdapter, RedisAdapter, SchedulePayload,
    SuccessOptions,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ExecutorConfig, JobsConfig, RedisConfig, TelemetryConfig, WorkerConfig};
pub use error::{JobError, JobResult};
pub use executor::{Executor, ExecutorOptions};
pub use job::{FnJob, Job, JobDefinition, JobId, JobRecord, PerformJob};
pub use loader::{JobLoader, JobLocation, JobRegistry};
pub use logger::{default_logger, JobLogger, TracingLogger};
pub use manager::{JobManager, JobManagerConfig, WorkerSpawn};
pub use metrics::{register_metrics, JobMetrics, WorkerMetrics};
pub use recurrence::{next_run_at, Recurrence};
pub use retry::backoff_milliseconds;
pub use scheduler::{ScheduleOptions, Scheduler};
pub use telemetry::init_tracing;
pub use worker::{ShutdownHandle, Worker, WorkerMode, WorkerOptions, WorkerPool};

/// Re-export commonly used traits
pub mod prelude {
    pub use crate::adapter::{Adapter, MemoryAdapter};
    pub use crate::config::WorkerConfig;
    pub use crate::job::{Job, JobDefinition};
    pub use crate::manager::{JobManager, JobManagerConfig};
    pub use crate::scheduler::ScheduleOptions;
    pub use crate::{JobError, JobId, JobResult};
    pub use std::sync::Arc;
}
