//! Failure routing: archive or re-queue a job whose dispatch failed.

use chrono::{DateTime, Duration, Utc};
use relay_core::config::FailurePolicy;

use crate::{error::SchedulerError, types::ScheduledJob};

/// Upper bound on a single backoff step.
const MAX_BACKOFF_SECS: u64 = 7 * 24 * 3600;

/// How a claimed job leaves `in_progress`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Delivered,
    /// Terminal failure; archive with this message.
    Failed { error: String, attempts: u32 },
    /// Put back as `to_do`, due again at `at`.
    Retry { at: DateTime<Utc>, attempts: u32, error: String },
}

/// Decide what a failed dispatch of `job` turns into under `policy`.
///
/// `job.attempts` counts earlier failures; the failure being routed is
/// added here. Permanent errors are never retried.
pub fn route_failure(
    policy: &FailurePolicy,
    job: &ScheduledJob,
    error: &SchedulerError,
    now: DateTime<Utc>,
) -> Resolution {
    let attempts = job.attempts.saturating_add(1);
    let message = error.reason();

    match policy {
        FailurePolicy::Retry {
            max_attempts,
            backoff_secs,
        } if !error.is_permanent() && attempts < *max_attempts => Resolution::Retry {
            at: now + backoff(*backoff_secs, attempts),
            attempts,
            error: message,
        },
        _ => Resolution::Failed {
            error: message,
            attempts,
        },
    }
}

/// `base * 2^(attempts-1)`, capped.
fn backoff(base_secs: u64, attempts: u32) -> Duration {
    let factor = 1u64.checked_shl(attempts.saturating_sub(1)).unwrap_or(u64::MAX);
    let secs = base_secs.saturating_mul(factor).min(MAX_BACKOFF_SECS);
    // `secs` is capped well below i64::MAX.
    Duration::seconds(secs as i64)
}
