//! In-process adapter.

use super::{
    error_text, queue_matches, Adapter, ErrorOptions, FailureOptions, FindArgs, SchedulePayload,
    SuccessOptions,
};
use crate::clock::{Clock, SystemClock};
use crate::error::JobResult;
use crate::job::{JobId, JobRecord};
use async_trait::async_trait;
use chrono::TimeDelta;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Adapter keeping every record in memory.
///
/// Suited to tests and single-process deployments; records do not survive a
/// restart.
pub struct MemoryAdapter {
    jobs: Mutex<HashMap<JobId, JobRecord>>,
    clock: Arc<dyn Clock>,
}

impl Default for MemoryAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryAdapter {
    /// Create an empty adapter on the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create an empty adapter reading time from `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            jobs: Mutex::new(HashMap::new()),
            clock,
        }
    }

    /// Store a record as-is.
    pub fn insert(&self, record: JobRecord) {
        self.jobs.lock().insert(record.id.clone(), record);
    }

    /// Look up a record.
    pub fn get(&self, id: &JobId) -> Option<JobRecord> {
        self.jobs.lock().get(id).cloned()
    }

    /// Every stored record, oldest first.
    pub fn jobs(&self) -> Vec<JobRecord> {
        let mut jobs: Vec<JobRecord> = self.jobs.lock().values().cloned().collect();
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.as_str().cmp(b.id.as_str())));
        jobs
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.jobs.lock().len()
    }

    /// Returns true if no records are stored.
    pub fn is_empty(&self) -> bool {
        self.jobs.lock().is_empty()
    }

    fn update(&self, id: &JobId, change: impl FnOnce(&mut JobRecord)) {
        let now = self.clock.now();
        if let Some(record) = self.jobs.lock().get_mut(id) {
            change(record);
            record.updated_at = now;
        }
    }
}

#[async_trait]
impl Adapter for MemoryAdapter {
    async fn schedule(&self, payload: SchedulePayload) -> JobResult<JobRecord> {
        let now = self.clock.now();
        let record = JobRecord {
            id: JobId::new(),
            name: payload.name,
            path: payload.path,
            args: payload.args,
            attempts: 0,
            cron: payload.cron,
            queue: payload.queue,
            priority: payload.priority,
            run_at: Some(payload.run_at),
            locked_at: None,
            locked_by: None,
            last_error: None,
            failed_at: None,
            created_at: now,
            updated_at: now,
        };

        self.insert(record.clone());
        debug!(job_id = %record.id, queue = %record.queue, run_at = ?record.run_at, "Scheduled job");
        Ok(record)
    }

    async fn find(&self, args: FindArgs<'_>) -> JobResult<Option<JobRecord>> {
        let now = self.clock.now();
        let stale_before = TimeDelta::from_std(args.max_runtime)
            .ok()
            .and_then(|runtime| now.checked_sub_signed(runtime));

        let mut jobs = self.jobs.lock();

        let candidate = jobs
            .values()
            .filter(|job| job.failed_at.is_none())
            .filter(|job| queue_matches(args.queues, &job.queue))
            .filter(|job| match job.locked_at {
                // Stale lock from a worker that died mid-job.
                Some(locked_at) => stale_before.is_some_and(|cutoff| locked_at < cutoff),
                None => job.run_at.is_some_and(|run_at| run_at <= now),
            })
            .min_by(|a, b| {
                a.priority
                    .cmp(&b.priority)
                    .then_with(|| a.run_at.cmp(&b.run_at))
                    .then_with(|| a.created_at.cmp(&b.created_at))
            })
            .map(|job| job.id.clone());

        let Some(id) = candidate else {
            return Ok(None);
        };

        let Some(job) = jobs.get_mut(&id) else {
            return Ok(None);
        };
        job.locked_at = Some(now);
        job.locked_by = Some(args.process_name.to_string());
        job.run_at = None;
        job.attempts += 1;
        job.updated_at = now;

        debug!(job_id = %job.id, worker = %args.process_name, attempts = job.attempts, "Claimed job");
        Ok(Some(job.clone()))
    }

    async fn success(&self, options: SuccessOptions<'_>) -> JobResult<()> {
        let id = &options.job.id;

        if options.run_at.is_none() && options.delete_job {
            self.jobs.lock().remove(id);
            debug!(job_id = %id, "Deleted successful job");
            return Ok(());
        }

        self.update(id, |job| {
            job.locked_at = None;
            job.locked_by = None;
            job.last_error = None;
            job.run_at = options.run_at;
        });
        Ok(())
    }

    async fn error(&self, options: ErrorOptions<'_>) -> JobResult<()> {
        let last_error = error_text(options.error);
        self.update(&options.job.id, |job| {
            job.locked_at = None;
            job.locked_by = None;
            job.run_at = Some(options.run_at);
            job.last_error = Some(last_error);
        });
        Ok(())
    }

    async fn failure(&self, options: FailureOptions<'_>) -> JobResult<()> {
        let id = &options.job.id;

        if options.delete_job {
            self.jobs.lock().remove(id);
            debug!(job_id = %id, "Deleted failed job");
            return Ok(());
        }

        let now = self.clock.now();
        self.update(id, |job| {
            job.failed_at = Some(now);
            job.run_at = None;
        });
        Ok(())
    }

    async fn clear(&self) -> JobResult<()> {
        self.jobs.lock().clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::JobError;
    use chrono::{DateTime, TimeZone, Utc};
    use std::time::Duration;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 7, 7, 13, 50, 0).unwrap()
    }

    fn setup() -> (Arc<ManualClock>, MemoryAdapter) {
        let clock = Arc::new(ManualClock::new(start()));
        let adapter = MemoryAdapter::with_clock(clock.clone());
        (clock, adapter)
    }

    fn payload(name: &str, queue: &str, priority: i32, run_at: DateTime<Utc>) -> SchedulePayload {
        SchedulePayload {
            name: name.to_string(),
            path: name.to_string(),
            args: vec![],
            queue: queue.to_string(),
            priority,
            run_at,
            cron: None,
        }
    }

    fn all_queues() -> Vec<String> {
        vec!["*".to_string()]
    }

    fn find_args<'a>(queues: &'a [String]) -> FindArgs<'a> {
        FindArgs {
            process_name: "worker-1",
            max_runtime: Duration::from_secs(60),
            queues,
        }
    }

    #[tokio::test]
    async fn test_schedule_stores_record() {
        let (_, adapter) = setup();
        let record = adapter.schedule(payload("a", "default", 50, start())).await.unwrap();

        assert_eq!(adapter.len(), 1);
        assert_eq!(record.attempts, 0);
        assert_eq!(record.run_at, Some(start()));
        assert_eq!(adapter.get(&record.id), Some(record));
    }

    #[tokio::test]
    async fn test_find_locks_and_increments_attempts() {
        let (_, adapter) = setup();
        let record = adapter.schedule(payload("a", "default", 50, start())).await.unwrap();

        let queues = all_queues();
        let found = adapter.find(find_args(&queues)).await.unwrap().unwrap();
        assert_eq!(found.id, record.id);
        assert_eq!(found.attempts, 1);
        assert_eq!(found.locked_by.as_deref(), Some("worker-1"));
        assert_eq!(found.locked_at, Some(start()));
        assert!(found.run_at.is_none());

        // Locked jobs are not handed out twice.
        assert!(adapter.find(find_args(&queues)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_find_skips_future_jobs() {
        let (clock, adapter) = setup();
        adapter
            .schedule(payload("later", "default", 50, start() + TimeDelta::minutes(5)))
            .await
            .unwrap();

        let queues = all_queues();
        assert!(adapter.find(find_args(&queues)).await.unwrap().is_none());

        clock.advance(TimeDelta::minutes(5));
        assert!(adapter.find(find_args(&queues)).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_find_orders_by_priority_then_run_at() {
        let (_, adapter) = setup();
        let earlier = start() - TimeDelta::minutes(10);
        adapter.schedule(payload("low", "default", 90, earlier)).await.unwrap();
        adapter.schedule(payload("urgent_late", "default", 10, start())).await.unwrap();
        adapter.schedule(payload("urgent_early", "default", 10, earlier)).await.unwrap();

        let queues = all_queues();
        let order: Vec<String> = [
            adapter.find(find_args(&queues)).await.unwrap().unwrap().name,
            adapter.find(find_args(&queues)).await.unwrap().unwrap().name,
            adapter.find(find_args(&queues)).await.unwrap().unwrap().name,
        ]
        .into();
        assert_eq!(order, vec!["urgent_early", "urgent_late", "low"]);
    }

    #[tokio::test]
    async fn test_find_filters_queues() {
        let (_, adapter) = setup();
        adapter.schedule(payload("report", "reports", 50, start())).await.unwrap();

        let mail = vec!["mail".to_string()];
        assert!(adapter.find(find_args(&mail)).await.unwrap().is_none());

        let reports = vec!["reports".to_string()];
        assert!(adapter.find(find_args(&reports)).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_find_recovers_stale_lock() {
        let (clock, adapter) = setup();
        adapter.schedule(payload("a", "default", 50, start())).await.unwrap();

        let queues = all_queues();
        adapter.find(find_args(&queues)).await.unwrap().unwrap();

        clock.advance(TimeDelta::seconds(30));
        assert!(adapter.find(find_args(&queues)).await.unwrap().is_none());

        clock.advance(TimeDelta::seconds(31));
        let recovered = adapter.find(find_args(&queues)).await.unwrap().unwrap();
        assert_eq!(recovered.attempts, 2);
    }

    #[tokio::test]
    async fn test_success_deletes_or_keeps() {
        let (_, adapter) = setup();
        let queues = all_queues();

        adapter.schedule(payload("a", "default", 50, start())).await.unwrap();
        let job = adapter.find(find_args(&queues)).await.unwrap().unwrap();
        adapter
            .success(SuccessOptions { job: &job, run_at: None, delete_job: true })
            .await
            .unwrap();
        assert!(adapter.get(&job.id).is_none());

        adapter.schedule(payload("b", "default", 50, start())).await.unwrap();
        let job = adapter.find(find_args(&queues)).await.unwrap().unwrap();
        adapter
            .success(SuccessOptions { job: &job, run_at: None, delete_job: false })
            .await
            .unwrap();
        let kept = adapter.get(&job.id).unwrap();
        assert!(kept.locked_at.is_none());
        assert!(kept.run_at.is_none());

        // Completed jobs are not picked up again.
        assert!(adapter.find(find_args(&queues)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_success_reschedules_recurring_job() {
        let (_, adapter) = setup();
        let queues = all_queues();
        adapter.schedule(payload("a", "default", 50, start())).await.unwrap();
        let job = adapter.find(find_args(&queues)).await.unwrap().unwrap();

        let next = start() + TimeDelta::hours(1);
        adapter
            .success(SuccessOptions { job: &job, run_at: Some(next), delete_job: true })
            .await
            .unwrap();

        let stored = adapter.get(&job.id).unwrap();
        assert_eq!(stored.run_at, Some(next));
        assert!(stored.locked_by.is_none());
    }

    #[tokio::test]
    async fn test_error_records_and_reschedules() {
        let (_, adapter) = setup();
        let queues = all_queues();
        adapter.schedule(payload("a", "default", 50, start())).await.unwrap();
        let job = adapter.find(find_args(&queues)).await.unwrap().unwrap();

        let retry = start() + TimeDelta::seconds(1);
        let error = JobError::perform("smtp down");
        adapter
            .error(ErrorOptions { job: &job, run_at: retry, error: &error })
            .await
            .unwrap();

        let stored = adapter.get(&job.id).unwrap();
        assert_eq!(stored.run_at, Some(retry));
        assert!(stored.last_error.unwrap().contains("smtp down"));
        assert!(stored.locked_at.is_none());
    }

    #[tokio::test]
    async fn test_failure_marks_or_deletes() {
        let (_, adapter) = setup();
        let queues = all_queues();

        adapter.schedule(payload("a", "default", 50, start())).await.unwrap();
        let job = adapter.find(find_args(&queues)).await.unwrap().unwrap();
        adapter
            .failure(FailureOptions { job: &job, delete_job: false })
            .await
            .unwrap();
        assert_eq!(adapter.get(&job.id).unwrap().failed_at, Some(start()));
        assert!(adapter.find(find_args(&queues)).await.unwrap().is_none());

        adapter.schedule(payload("b", "default", 50, start())).await.unwrap();
        let job = adapter.find(find_args(&queues)).await.unwrap().unwrap();
        adapter
            .failure(FailureOptions { job: &job, delete_job: true })
            .await
            .unwrap();
        assert!(adapter.get(&job.id).is_none());
    }

    #[tokio::test]
    async fn test_clear() {
        let (_, adapter) = setup();
        adapter.schedule(payload("a", "default", 50, start())).await.unwrap();
        adapter.schedule(payload("b", "default", 50, start())).await.unwrap();

        adapter.clear().await.unwrap();
        assert!(adapter.is_empty());
    }
}
