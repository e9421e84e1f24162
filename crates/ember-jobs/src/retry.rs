//! Retry backoff for failed jobs.

use chrono::{DateTime, TimeDelta, Utc};
use std::time::Duration;

/// Delay before the next retry of a job that has been attempted
/// `attempts` times: `1000 * attempts^4` milliseconds.
///
/// Grows quartically so the first failure retries almost immediately while
/// repeated failures back off hard. Saturates instead of overflowing.
pub fn backoff_milliseconds(attempts: u32) -> u64 {
    1000u64.saturating_mul(u64::from(attempts).saturating_pow(4))
}

/// [`backoff_milliseconds`] as a [`Duration`].
pub fn backoff_duration(attempts: u32) -> Duration {
    Duration::from_millis(backoff_milliseconds(attempts))
}

/// When the next retry should run, given the failure time.
pub fn retry_at(now: DateTime<Utc>, attempts: u32) -> DateTime<Utc> {
    let millis = i64::try_from(backoff_milliseconds(attempts)).unwrap_or(i64::MAX);
    TimeDelta::try_milliseconds(millis)
        .and_then(|delay| now.checked_add_signed(delay))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
