//! Retry backoff policy for failed jobs.
//!
//! The engine only exposes the schedule; it never re-enqueues failed
//! jobs itself. An external scheduler reads job state, filters for
//! failed jobs still under [`MAX_RETRIES`], waits out the delay since
//! the last attempt, increments the retry counter, and re-enqueues.

use std::time::Duration;

use chrono::{DateTime, Utc};

/// Maximum number of times a failed job may be retried.
pub const MAX_RETRIES: u32 = 10;

const BASE_DELAY_SECS: u64 = 10;

/// The delay before attempt `attempt + 1` may start.
///
/// Exponential: `10s * 2^attempt`, saturating rather than overflowing
/// for absurd attempt numbers.
#[must_use]
pub fn retry_delay(attempt: u32) -> Duration {
    let multiplier = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
    Duration::from_secs(BASE_DELAY_SECS.saturating_mul(multiplier))
}

/// Returns true if a job with this retry count may be attempted again.
#[must_use]
pub const fn can_retry(retry_count: u32) -> bool {
    retry_count < MAX_RETRIES
}

/// The earliest instant the next attempt may start, given when the last
/// attempt was made.
#[must_use]
pub fn next_attempt_at(last_attempt_at: DateTime<Utc>, retry_count: u32) -> DateTime<Utc> {
    let delay =
        chrono::Duration::from_std(retry_delay(retry_count)).unwrap_or(chrono::Duration::MAX);
    last_attempt_at + delay
}
