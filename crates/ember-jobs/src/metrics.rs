//! Prometheus metrics for job monitoring.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use std::time::Duration;

/// Metric names for the job system.
pub mod names {
    /// Total jobs handed to an adapter by a scheduler.
    pub const JOBS_SCHEDULED_TOTAL: &str = "ember_jobs_scheduled_total";
    /// Total attempts started by executors.
    pub const JOBS_STARTED_TOTAL: &str = "ember_jobs_started_total";
    /// Total attempts that succeeded.
    pub const JOBS_COMPLETED_TOTAL: &str = "ember_jobs_completed_total";
    /// Total attempts that returned an error.
    pub const JOBS_ERRORED_TOTAL: &str = "ember_jobs_errored_total";
    /// Total jobs that exhausted their attempts.
    pub const JOBS_FAILED_TOTAL: &str = "ember_jobs_failed_total";
    /// Total recurring jobs rescheduled after success.
    pub const JOBS_RESCHEDULED_TOTAL: &str = "ember_jobs_rescheduled_total";

    /// Attempt duration in seconds.
    pub const JOB_DURATION_SECONDS: &str = "ember_jobs_duration_seconds";

    /// Worker polls of the adapter.
    pub const WORKER_POLLS_TOTAL: &str = "ember_jobs_worker_polls_total";
    /// Running workers.
    pub const WORKERS_ACTIVE: &str = "ember_jobs_workers_active";
}

/// Register all metric descriptions.
pub fn register_metrics() {
    describe_counter!(
        names::JOBS_SCHEDULED_TOTAL,
        "Total number of jobs scheduled"
    );
    describe_counter!(
        names::JOBS_STARTED_TOTAL,
        "Total number of job attempts started"
    );
    describe_counter!(
        names::JOBS_COMPLETED_TOTAL,
        "Total number of job attempts that succeeded"
    );
    describe_counter!(
        names::JOBS_ERRORED_TOTAL,
        "Total number of job attempts that failed and were scheduled for retry"
    );
    describe_counter!(
        names::JOBS_FAILED_TOTAL,
        "Total number of jobs that exhausted their attempts"
    );
    describe_counter!(
        names::JOBS_RESCHEDULED_TOTAL,
        "Total number of recurring jobs rescheduled"
    );

    describe_histogram!(
        names::JOB_DURATION_SECONDS,
        "Job attempt duration in seconds"
    );

    describe_counter!(
        names::WORKER_POLLS_TOTAL,
        "Total number of times workers asked the adapter for work"
    );
    describe_gauge!(
        names::WORKERS_ACTIVE,
        "Number of running workers"
    );
}

/// Job metrics recorder.
#[derive(Clone)]
pub struct JobMetrics;

impl JobMetrics {
    /// Record a job scheduled.
    pub fn job_scheduled(queue: &str, job_name: &str) {
        counter!(
            names::JOBS_SCHEDULED_TOTAL,
            "queue" => queue.to_string(),
            "job_name" => job_name.to_string()
        )
        .increment(1);
    }

    /// Record an attempt started.
    pub fn job_started(queue: &str, job_name: &str) {
        counter!(
            names::JOBS_STARTED_TOTAL,
            "queue" => queue.to_string(),
            "job_name" => job_name.to_string()
        )
        .increment(1);
    }

    /// Record an attempt that succeeded.
    pub fn job_completed(queue: &str, job_name: &str, duration: Duration) {
        counter!(
            names::JOBS_COMPLETED_TOTAL,
            "queue" => queue.to_string(),
            "job_name" => job_name.to_string()
        )
        .increment(1);

        histogram!(
            names::JOB_DURATION_SECONDS,
            "queue" => queue.to_string(),
            "job_name" => job_name.to_string(),
            "status" => "completed"
        )
        .record(duration.as_secs_f64());
    }

    /// Record an attempt that failed.
    pub fn job_errored(queue: &str, job_name: &str, attempt: u32, duration: Duration) {
        counter!(
            names::JOBS_ERRORED_TOTAL,
            "queue" => queue.to_string(),
            "job_name" => job_name.to_string(),
            "attempt" => attempt.to_string()
        )
        .increment(1);

        histogram!(
            names::JOB_DURATION_SECONDS,
            "queue" => queue.to_string(),
            "job_name" => job_name.to_string(),
            "status" => "errored"
        )
        .record(duration.as_secs_f64());
    }

    /// Record a job that exhausted its attempts.
    pub fn job_failed(queue: &str, job_name: &str) {
        counter!(
            names::JOBS_FAILED_TOTAL,
            "queue" => queue.to_string(),
            "job_name" => job_name.to_string()
        )
        .increment(1);
    }

    /// Record a recurring job rescheduled.
    pub fn job_rescheduled(queue: &str, job_name: &str) {
        counter!(
            names::JOBS_RESCHEDULED_TOTAL,
            "queue" => queue.to_string(),
            "job_name" => job_name.to_string()
        )
        .increment(1);
    }
}

/// Worker metrics recorder.
#[derive(Clone)]
pub struct WorkerMetrics;

impl WorkerMetrics {
    /// Record a poll and whether it found work.
    pub fn poll(process_name: &str, found: bool) {
        counter!(
            names::WORKER_POLLS_TOTAL,
            "process_name" => process_name.to_string(),
            "result" => if found { "found" } else { "empty" }
        )
        .increment(1);
    }

    /// A worker started.
    pub fn worker_started() {
        gauge!(names::WORKERS_ACTIVE).increment(1.0);
    }

    /// A worker stopped.
    pub fn worker_stopped() {
        gauge!(names::WORKERS_ACTIVE).decrement(1.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_metrics() {
        // Just verify registration doesn't panic
        register_metrics();
    }

    #[test]
    fn test_job_metrics() {
        JobMetrics::job_scheduled("default", "test_job");
        JobMetrics::job_started("default", "test_job");
        JobMetrics::job_completed("default", "test_job", Duration::from_secs(1));
        JobMetrics::job_errored("default", "test_job", 2, Duration::from_secs(5));
        JobMetrics::job_failed("default", "test_job");
        JobMetrics::job_rescheduled("default", "test_job");
    }

    #[test]
    fn test_worker_metrics() {
        WorkerMetrics::worker_started();
        WorkerMetrics::poll("worker.0.0", true);
        WorkerMetrics::poll("worker.0.0", false);
        WorkerMetrics::worker_stopped();
    }
}
