//! Fixed retry backoff schedule for webhook deliveries.
//!
//! Unlike an open-ended exponential curve, the schedule is a fixed table so
//! operators reading the audit trail can predict exactly when a row will be
//! retried: 1 minute, 5 minutes, 30 minutes, 2 hours, 24 hours.

use chrono::Duration;

use crate::types::Timestamp;

/// Retry delays indexed by completed attempt count (attempt 1 → 1 minute).
pub const RETRY_SCHEDULE_SECS: [i64; 5] = [60, 300, 1_800, 7_200, 86_400];

/// The delay to wait after the given failed attempt.
///
/// `attempt` is the 1-based number of attempts performed so far. Attempts
/// beyond the table reuse the final 24-hour step; an `attempt` of zero is
/// treated as one.
pub fn retry_delay(attempt: i16) -> Duration {
    let index = (attempt.max(1) as usize - 1).min(RETRY_SCHEDULE_SECS.len() - 1);
    Duration::seconds(RETRY_SCHEDULE_SECS[index])
}

/// Compute the next retry instant after a failed attempt.
pub fn next_retry_at(now: Timestamp, attempt: i16) -> Timestamp {
    now + retry_delay(attempt)
}
