//! Resolving job implementations by name and path.

use crate::error::{JobError, JobResult};
use crate::job::{erase, Job, JobDefinition, PerformJob};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// Where a job implementation lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobLocation<'a> {
    /// Job type name.
    pub name: &'a str,
    /// Loader path.
    pub path: &'a str,
}

/// Resolves a job's implementation.
#[async_trait]
pub trait JobLoader: Send + Sync {
    /// Find the implementation for `location`.
    async fn load_job(&self, location: JobLocation<'_>) -> JobResult<Arc<dyn PerformJob>>;
}

struct RegisteredJob {
    path: String,
    perform: Arc<dyn PerformJob>,
}

/// In-process job loader populated at startup.
#[derive(Default)]
pub struct JobRegistry {
    jobs: RwLock<HashMap<String, RegisteredJob>>,
}

impl JobRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an implementation under `name` and `path`, replacing any
    /// previous job of the same name.
    pub fn register_at(&self, name: impl Into<String>, path: impl Into<String>, perform: Arc<dyn PerformJob>) {
        let name = name.into();
        let path = path.into();
        info!(job_name = %name, job_path = %path, "Registered job");
        self.jobs.write().insert(name, RegisteredJob { path, perform });
    }

    /// Register a typed job.
    pub fn register<J: Job>(&self, job: J) {
        self.register_at(J::NAME, J::PATH, erase(job));
    }

    /// Register a job definition.
    pub fn register_definition(&self, definition: &JobDefinition) {
        self.register_at(
            definition.name.clone(),
            definition.path.clone(),
            definition.implementation(),
        );
    }

    /// Returns true if a job of this name is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.jobs.read().contains_key(name)
    }

    /// Names of every registered job.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.jobs.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of registered jobs.
    pub fn len(&self) -> usize {
        self.jobs.read().len()
    }

    /// Returns true if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.jobs.read().is_empty()
    }

    fn resolve(&self, location: JobLocation<'_>) -> JobResult<Arc<dyn PerformJob>> {
        let jobs = self.jobs.read();
        let registered = jobs.get(location.name).ok_or_else(|| JobError::JobNotFound {
            name: location.name.to_string(),
        })?;

        if registered.path != location.path {
            return Err(JobError::JobExportNotFound {
                name: location.name.to_string(),
                path: location.path.to_string(),
            });
        }

        Ok(Arc::clone(&registered.perform))
    }
}

#[async_trait]
impl JobLoader for JobRegistry {
    async fn load_job(&self, location: JobLocation<'_>) -> JobResult<Arc<dyn PerformJob>> {
        self.resolve(location)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::FnJob;

    fn noop() -> Arc<dyn PerformJob> {
        Arc::new(FnJob::new(|_| Box::pin(async { Ok(()) })))
    }

    #[tokio::test]
    async fn test_load_registered_job() {
        let registry = JobRegistry::new();
        registry.register_at("cleanup", "jobs/cleanup", noop());

        let job = registry
            .load_job(JobLocation { name: "cleanup", path: "jobs/cleanup" })
            .await
            .unwrap();
        assert!(job.perform(vec![]).await.is_ok());
    }

    #[tokio::test]
    async fn test_load_unknown_name() {
        let registry = JobRegistry::new();
        let result = registry
            .load_job(JobLocation { name: "missing", path: "missing" })
            .await;
        match result {
            Err(JobError::JobNotFound { name }) => assert_eq!(name, "missing"),
            _ => panic!("Expected JobNotFound"),
        }
    }

    #[tokio::test]
    async fn test_load_wrong_path() {
        let registry = JobRegistry::new();
        registry.register_at("cleanup", "jobs/cleanup", noop());

        let result = registry
            .load_job(JobLocation { name: "cleanup", path: "jobs/other" })
            .await;
        assert!(matches!(result, Err(JobError::JobExportNotFound { .. })));
    }

    #[test]
    fn test_register_replaces_and_lists() {
        let registry = JobRegistry::new();
        assert!(registry.is_empty());

        registry.register_at("b", "b", noop());
        registry.register_at("a", "a", noop());
        registry.register_at("a", "jobs/a", noop());

        assert_eq!(registry.len(), 2);
        assert!(registry.contains("a"));
        assert_eq!(registry.names(), vec!["a".to_string(), "b".to_string()]);
    }
}
