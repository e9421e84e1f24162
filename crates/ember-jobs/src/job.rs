//! Job records, the `Job` trait and job definitions.

use crate::consts::{DEFAULT_PRIORITY, DEFAULT_QUEUE};
use crate::error::{JobError, JobResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Unique job identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(String);

impl JobId {
    /// Creates a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Creates a job ID from a string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Returns the job ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for JobId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A persisted unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    /// Job ID, assigned by the adapter.
    pub id: JobId,

    /// Job type name.
    pub name: String,

    /// Where the loader finds the implementation.
    pub path: String,

    /// Positional arguments for `perform`.
    #[serde(default)]
    pub args: Vec<Value>,

    /// Number of attempts made so far.
    #[serde(default)]
    pub attempts: u32,

    /// Cron expression for recurring jobs.
    #[serde(default)]
    pub cron: Option<String>,

    /// Queue name.
    pub queue: String,

    /// Priority (lower = more urgent).
    pub priority: i32,

    /// When the job should next run. `None` once claimed or completed.
    pub run_at: Option<DateTime<Utc>>,

    /// When a worker claimed the job.
    pub locked_at: Option<DateTime<Utc>>,

    /// Process name of the worker holding the lock.
    pub locked_by: Option<String>,

    /// Error from the last failed attempt.
    pub last_error: Option<String>,

    /// Set once the job has exhausted its attempts.
    pub failed_at: Option<DateTime<Utc>>,

    /// When the job was created.
    pub created_at: DateTime<Utc>,

    /// Last time an adapter changed the record.
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    /// Creates a record runnable immediately on the default queue.
    pub fn new(
        id: impl Into<JobId>,
        name: impl Into<String>,
        path: impl Into<String>,
        args: Vec<Value>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            name: name.into(),
            path: path.into(),
            args,
            attempts: 0,
            cron: None,
            queue: DEFAULT_QUEUE.to_string(),
            priority: DEFAULT_PRIORITY,
            run_at: Some(now),
            locked_at: None,
            locked_by: None,
            last_error: None,
            failed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Set the attempt count.
    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    /// Make the job recurring.
    pub fn with_cron(mut self, cron: impl Into<String>) -> Self {
        self.cron = Some(cron.into());
        self
    }

    /// Set the queue.
    pub fn with_queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = queue.into();
        self
    }

    /// Set the priority.
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Set the next run time.
    pub fn with_run_at(mut self, run_at: DateTime<Utc>) -> Self {
        self.run_at = Some(run_at);
        self
    }

    /// `"{id} ({path}:{name})"`, used in log lines.
    pub fn identifier(&self) -> String {
        format!("{} ({}:{})", self.id, self.path, self.name)
    }

    /// Returns true if the record carries a non-empty cron expression.
    pub fn is_recurring(&self) -> bool {
        self.cron.as_deref().is_some_and(|c| !c.trim().is_empty())
    }

    /// Returns true if a worker holds the lock.
    pub fn is_locked(&self) -> bool {
        self.locked_at.is_some()
    }

    /// Serialize to JSON.
    pub fn to_json(&self) -> JobResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Deserialize from JSON.
    pub fn from_json(json: &str) -> JobResult<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// A job implementation that takes its arguments as raw JSON values.
///
/// This is what a [`JobLoader`](crate::loader::JobLoader) hands to the
/// executor.
#[async_trait]
pub trait PerformJob: Send + Sync {
    /// Run the job with the record's positional arguments.
    async fn perform(&self, args: Vec<Value>) -> JobResult<()>;
}

/// Trait for defining typed jobs.
///
/// `Args` is deserialized from the record's positional arguments, so a
/// tuple maps one element per argument.
///
/// # Example
///
/// ```rust,ignore
/// use ember_jobs::{Job, JobResult};
///
/// struct SendWelcomeEmail;
///
/// #[async_trait::async_trait]
/// impl Job for SendWelcomeEmail {
///     type Args = (String, String);
///     const NAME: &'static str = "send_welcome_email";
///     const QUEUE: &'static str = "mail";
///
///     async fn perform(&self, (to, name): Self::Args) -> JobResult<()> {
///         println!("Welcome, {name} <{to}>");
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait Job: Send + Sync + 'static {
    /// Positional arguments.
    type Args: Serialize + DeserializeOwned + Send + 'static;

    /// Unique name for this job type.
    const NAME: &'static str;

    /// Loader path for this job type.
    const PATH: &'static str = Self::NAME;

    /// Queue name for this job type.
    const QUEUE: &'static str = DEFAULT_QUEUE;

    /// Priority (lower = more urgent).
    const PRIORITY: i32 = DEFAULT_PRIORITY;

    /// Execute the job.
    async fn perform(&self, args: Self::Args) -> JobResult<()>;
}

/// Type-erases a [`Job`] into a [`PerformJob`].
struct TypedJob<J: Job>(J);

#[async_trait]
impl<J: Job> PerformJob for TypedJob<J> {
    async fn perform(&self, args: Vec<Value>) -> JobResult<()> {
        let args = decode_args::<J::Args>(J::NAME, args)?;
        self.0.perform(args).await
    }
}

/// Wrap a typed job for the loader.
pub fn erase<J: Job>(job: J) -> Arc<dyn PerformJob> {
    Arc::new(TypedJob(job))
}

/// Job handler function type.
pub type JobHandler = Box<dyn Fn(Vec<Value>) -> BoxFuture<'static, JobResult<()>> + Send + Sync>;

/// A [`PerformJob`] backed by a closure.
pub struct FnJob {
    handler: JobHandler,
}

impl FnJob {
    /// Wrap a closure returning a boxed future.
    pub fn new(
        handler: impl Fn(Vec<Value>) -> BoxFuture<'static, JobResult<()>> + Send + Sync + 'static,
    ) -> Self {
        Self {
            handler: Box::new(handler),
        }
    }
}

#[async_trait]
impl PerformJob for FnJob {
    async fn perform(&self, args: Vec<Value>) -> JobResult<()> {
        (self.handler)(args).await
    }
}

/// Turn positional arguments into `T`.
///
/// Arguments are read as a JSON array. An empty list also deserializes into
/// `()`, and a single argument into a bare `T` (the shape [`encode_args`]
/// gives scalars and structs).
pub fn decode_args<T: DeserializeOwned>(name: &str, mut args: Vec<Value>) -> JobResult<T> {
    let err = match serde_json::from_value(Value::Array(args.clone())) {
        Ok(decoded) => return Ok(decoded),
        Err(e) => e,
    };

    let fallback = match args.len() {
        0 => Value::Null,
        1 => args.remove(0),
        _ => return Err(invalid_args(name, &err)),
    };
    serde_json::from_value(fallback).map_err(|_| invalid_args(name, &err))
}

/// Turn `args` into positional arguments.
pub fn encode_args<T: Serialize>(name: &str, args: &T) -> JobResult<Vec<Value>> {
    match serde_json::to_value(args).map_err(|e| invalid_args(name, &e))? {
        Value::Array(values) => Ok(values),
        Value::Null => Ok(Vec::new()),
        other => Ok(vec![other]),
    }
}

fn invalid_args(name: &str, err: &serde_json::Error) -> JobError {
    JobError::InvalidArguments {
        name: name.to_string(),
        reason: err.to_string(),
    }
}

/// A job known to the manager: where it lives, how it is queued and
/// how to run it.
#[derive(Clone)]
pub struct JobDefinition {
    /// Job type name.
    pub name: String,

    /// Loader path.
    pub path: String,

    /// Queue name.
    pub queue: String,

    /// Priority (lower = more urgent).
    pub priority: i32,

    perform: Arc<dyn PerformJob>,
}

impl fmt::Debug for JobDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobDefinition")
            .field("name", &self.name)
            .field("path", &self.path)
            .field("queue", &self.queue)
            .field("priority", &self.priority)
            .finish()
    }
}

impl JobDefinition {
    /// Create a definition on the given queue. The path defaults to the name.
    pub fn new(
        name: impl Into<String>,
        queue: impl Into<String>,
        perform: Arc<dyn PerformJob>,
    ) -> Self {
        let name = name.into();
        Self {
            path: name.clone(),
            name,
            queue: queue.into(),
            priority: DEFAULT_PRIORITY,
            perform,
        }
    }

    /// Definition for a typed job.
    pub fn of<J: Job>(job: J) -> Self {
        Self {
            name: J::NAME.to_string(),
            path: J::PATH.to_string(),
            queue: J::QUEUE.to_string(),
            priority: J::PRIORITY,
            perform: erase(job),
        }
    }

    /// Set the loader path.
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    /// Set the priority.
    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// The implementation.
    pub fn implementation(&self) -> Arc<dyn PerformJob> {
        Arc::clone(&self.perform)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Greet;

    #[async_trait]
    impl Job for Greet {
        type Args = (String, u32);
        const NAME: &'static str = "greet";
        const QUEUE: &'static str = "mail";

        async fn perform(&self, (name, times): Self::Args) -> JobResult<()> {
            if name.is_empty() || times == 0 {
                return Err(JobError::perform("nothing to do"));
            }
            Ok(())
        }
    }

    struct Tick;

    #[async_trait]
    impl Job for Tick {
        type Args = ();
        const NAME: &'static str = "tick";
        const PATH: &'static str = "jobs/tick";

        async fn perform(&self, _args: Self::Args) -> JobResult<()> {
            Ok(())
        }
    }

    #[test]
    fn test_job_id_generation() {
        let id1 = JobId::new();
        let id2 = JobId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_record_identifier() {
        let record = JobRecord::new("42", "send_email", "jobs/send_email", vec![]);
        assert_eq!(record.identifier(), "42 (jobs/send_email:send_email)");
    }

    #[test]
    fn test_record_defaults() {
        let record = JobRecord::new("1", "a", "a", vec![]);
        assert_eq!(record.attempts, 0);
        assert_eq!(record.queue, DEFAULT_QUEUE);
        assert_eq!(record.priority, DEFAULT_PRIORITY);
        assert!(record.run_at.is_some());
        assert!(!record.is_locked());
        assert!(!record.is_recurring());
    }

    #[test]
    fn test_record_recurring() {
        let record = JobRecord::new("1", "a", "a", vec![]).with_cron("0 10 * * *");
        assert!(record.is_recurring());

        let blank = JobRecord::new("1", "a", "a", vec![]).with_cron("  ");
        assert!(!blank.is_recurring());
    }

    #[test]
    fn test_record_json_roundtrip_keeps_args() {
        let record = JobRecord::new("7", "greet", "greet", vec![json!("ada"), json!(3)]);
        let restored = JobRecord::from_json(&record.to_json().unwrap()).unwrap();
        assert_eq!(record, restored);
    }

    #[test]
    fn test_decode_tuple_args() {
        let (name, times): (String, u32) =
            decode_args("greet", vec![json!("ada"), json!(3)]).unwrap();
        assert_eq!(name, "ada");
        assert_eq!(times, 3);
    }

    #[test]
    fn test_decode_unit_args() {
        let () = decode_args("tick", vec![]).unwrap();
    }

    #[test]
    fn test_decode_wrong_args() {
        let result: JobResult<(String, u32)> = decode_args("greet", vec![json!(1)]);
        match result {
            Err(JobError::InvalidArguments { name, .. }) => assert_eq!(name, "greet"),
            other => panic!("Expected InvalidArguments, got {other:?}"),
        }
    }

    #[test]
    fn test_encode_args() {
        assert_eq!(
            encode_args("greet", &("ada".to_string(), 3u32)).unwrap(),
            vec![json!("ada"), json!(3)]
        );
        assert!(encode_args("tick", &()).unwrap().is_empty());
        assert_eq!(encode_args("one", &5u8).unwrap(), vec![json!(5)]);
    }

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Invoice {
        number: u64,
        email: String,
    }

    #[test]
    fn test_scalar_args_roundtrip() {
        let encoded = encode_args("shout", &"hi".to_string()).unwrap();
        assert_eq!(encoded, vec![json!("hi")]);

        let decoded: String = decode_args("shout", encoded).unwrap();
        assert_eq!(decoded, "hi");

        let count: u64 = decode_args("count", encode_args("count", &42u64).unwrap()).unwrap();
        assert_eq!(count, 42);
    }

    #[test]
    fn test_struct_args_roundtrip() {
        let invoice = Invoice {
            number: 1001,
            email: "billing@example.com".into(),
        };
        let encoded = encode_args("invoice", &invoice).unwrap();
        assert_eq!(encoded.len(), 1);

        let decoded: Invoice = decode_args("invoice", encoded).unwrap();
        assert_eq!(decoded, invoice);
    }

    #[test]
    fn test_decode_too_many_args_for_scalar() {
        let result: JobResult<String> = decode_args("shout", vec![json!("a"), json!("b")]);
        assert!(matches!(result, Err(JobError::InvalidArguments { .. })));
    }

    struct Shout;

    #[async_trait]
    impl Job for Shout {
        type Args = String;
        const NAME: &'static str = "shout";

        async fn perform(&self, text: Self::Args) -> JobResult<()> {
            if text.is_empty() {
                return Err(JobError::perform("nothing to shout"));
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_typed_job_with_scalar_args() {
        let args = encode_args(Shout::NAME, &"hi".to_string()).unwrap();
        assert!(erase(Shout).perform(args).await.is_ok());
    }

    #[tokio::test]
    async fn test_typed_job_through_erasure() {
        let job = erase(Greet);
        assert!(job.perform(vec![json!("ada"), json!(2)]).await.is_ok());
        assert!(matches!(
            job.perform(vec![json!("ada"), json!(0)]).await,
            Err(JobError::PerformFailed(_))
        ));
        assert!(matches!(
            job.perform(vec![]).await,
            Err(JobError::InvalidArguments { .. })
        ));
    }

    #[tokio::test]
    async fn test_fn_job() {
        let job = FnJob::new(|args| {
            Box::pin(async move {
                if args.len() == 1 {
                    Ok(())
                } else {
                    Err(JobError::perform("expected one argument"))
                }
            })
        });
        assert!(job.perform(vec![json!(1)]).await.is_ok());
        assert!(job.perform(vec![]).await.is_err());
    }

    #[test]
    fn test_definition_of_typed_job() {
        let greet = JobDefinition::of(Greet);
        assert_eq!(greet.name, "greet");
        assert_eq!(greet.path, "greet");
        assert_eq!(greet.queue, "mail");
        assert_eq!(greet.priority, DEFAULT_PRIORITY);

        let tick = JobDefinition::of(Tick);
        assert_eq!(tick.path, "jobs/tick");
        assert_eq!(tick.queue, DEFAULT_QUEUE);
    }
}
