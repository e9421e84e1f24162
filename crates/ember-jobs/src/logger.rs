//! Logger used by executors and workers.

use std::sync::{Arc, OnceLock};
use tracing::{debug, error, info, warn};

/// Sink for executor and worker log lines.
pub trait JobLogger: Send + Sync {
    /// Debug-level message.
    fn debug(&self, message: &str);

    /// Info-level message.
    fn info(&self, message: &str);

    /// Warning.
    fn warn(&self, message: &str);

    /// Error.
    fn error(&self, message: &str);
}

/// Forwards to `tracing` under the `ember_jobs` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogger;

impl JobLogger for TracingLogger {
    fn debug(&self, message: &str) {
        debug!(target: "ember_jobs", "{message}");
    }

    fn info(&self, message: &str) {
        info!(target: "ember_jobs", "{message}");
    }

    fn warn(&self, message: &str) {
        warn!(target: "ember_jobs", "{message}");
    }

    fn error(&self, message: &str) {
        error!(target: "ember_jobs", "{message}");
    }
}

/// The shared [`TracingLogger`] used when no logger is configured.
pub fn default_logger() -> Arc<dyn JobLogger> {
    static DEFAULT: OnceLock<Arc<dyn JobLogger>> = OnceLock::new();
    Arc::clone(DEFAULT.get_or_init(|| Arc::new(TracingLogger)))
}
