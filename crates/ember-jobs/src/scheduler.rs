//! Enqueues jobs through an adapter.

use crate::adapter::{Adapter, SchedulePayload};
use crate::clock::{Clock, SystemClock};
use crate::consts::{DEFAULT_WAIT, LOG_PREFIX};
use crate::error::{JobError, JobResult};
use crate::job::{encode_args, Job, JobDefinition, JobRecord};
use crate::logger::{default_logger, JobLogger};
use crate::metrics::JobMetrics;
use crate::recurrence::next_run_at;
use chrono::{DateTime, TimeDelta, Utc};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// When a scheduled job should first run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScheduleOptions {
    /// Delay from now. Takes precedence over everything else when non-zero.
    pub wait: Duration,
    /// Absolute first run time.
    pub wait_until: Option<DateTime<Utc>>,
    /// Cron expression making the job recurring.
    pub cron: Option<String>,
}

impl ScheduleOptions {
    /// Run as soon as possible.
    pub fn now() -> Self {
        Self::default()
    }

    /// Run after `wait`.
    pub fn wait(wait: Duration) -> Self {
        Self {
            wait,
            ..Self::default()
        }
    }

    /// Run at `at`.
    pub fn wait_until(at: DateTime<Utc>) -> Self {
        Self {
            wait_until: Some(at),
            ..Self::default()
        }
    }

    /// Run on every trigger of `expression`.
    pub fn cron(expression: impl Into<String>) -> Self {
        Self {
            cron: Some(expression.into()),
            ..Self::default()
        }
    }
}

/// Stores new jobs with an adapter.
#[derive(Clone)]
pub struct Scheduler {
    adapter: Arc<dyn Adapter>,
    logger: Arc<dyn JobLogger>,
    clock: Arc<dyn Clock>,
}

impl Scheduler {
    /// Create a scheduler for `adapter`.
    pub fn new(adapter: Arc<dyn Adapter>) -> Self {
        Self {
            adapter,
            logger: default_logger(),
            clock: Arc::new(SystemClock),
        }
    }

    /// Log through `logger`.
    pub fn with_logger(mut self, logger: Arc<dyn JobLogger>) -> Self {
        self.logger = logger;
        self
    }

    /// Read time from `clock`.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// The adapter jobs are stored with.
    pub fn adapter(&self) -> &Arc<dyn Adapter> {
        &self.adapter
    }

    /// First run time for `options`.
    ///
    /// A non-zero `wait` wins, then `wait_until`, then the next cron
    /// trigger, then now.
    pub fn run_at(&self, options: &ScheduleOptions) -> JobResult<DateTime<Utc>> {
        let now = self.clock.now();

        if options.wait > DEFAULT_WAIT {
            let wait = TimeDelta::from_std(options.wait)
                .map_err(|e| JobError::Configuration(format!("wait out of range: {}", e)))?;
            return Ok(now + wait);
        }

        if let Some(at) = options.wait_until {
            return Ok(at);
        }

        Ok(next_run_at(options.cron.as_deref(), now)?.unwrap_or(now))
    }

    /// Store a job of `definition` with raw positional arguments.
    pub async fn schedule(
        &self,
        definition: &JobDefinition,
        args: Vec<Value>,
        options: ScheduleOptions,
    ) -> JobResult<JobRecord> {
        let payload = SchedulePayload {
            name: definition.name.clone(),
            path: definition.path.clone(),
            args,
            queue: definition.queue.clone(),
            priority: definition.priority,
            run_at: self.run_at(&options)?,
            cron: options.cron.filter(|c| !c.trim().is_empty()),
        };

        self.store(payload).await
    }

    /// Store a typed job.
    pub async fn schedule_job<J: Job>(
        &self,
        args: &J::Args,
        options: ScheduleOptions,
    ) -> JobResult<JobRecord> {
        let payload = SchedulePayload {
            name: J::NAME.to_string(),
            path: J::PATH.to_string(),
            args: encode_args(J::NAME, args)?,
            queue: J::QUEUE.to_string(),
            priority: J::PRIORITY,
            run_at: self.run_at(&options)?,
            cron: options.cron.filter(|c| !c.trim().is_empty()),
        };

        self.store(payload).await
    }

    async fn store(&self, payload: SchedulePayload) -> JobResult<JobRecord> {
        let name = payload.name.clone();
        let queue = payload.queue.clone();

        self.logger.debug(&format!(
            "{LOG_PREFIX} Scheduling job {} on queue {} at {}",
            name, queue, payload.run_at
        ));

        match self.adapter.schedule(payload).await {
            Ok(record) => {
                JobMetrics::job_scheduled(&queue, &name);
                Ok(record)
            }
            Err(e) => {
                self.logger.error(&format!(
                    "{LOG_PREFIX} Failed to schedule job {}: {}",
                    name,
                    e.report()
                ));
                Err(JobError::Scheduling {
                    name,
                    source: Box::new(e),
                })
            }
        }
    }
}
