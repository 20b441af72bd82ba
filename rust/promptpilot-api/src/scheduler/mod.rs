//! Scheduling subsystem: due-prompt polling, per-owner quota, and the
//! execution pipeline that turns a due schedule into a generated result,
//! channel deliveries, one log entry, and a terminal status.

pub mod executor;
pub mod poller;

pub use executor::{CycleOutcome, PromptExecutor};
pub use poller::PromptPoller;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

/// Live-schedule quota for one owner. `used` counts pending and completed
/// schedules at the moment of the check; failed and cancelled ones do not
/// occupy a slot.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct QuotaStatus {
    pub used: u32,
    pub max: u32,
    pub remaining: u32,
}

impl QuotaStatus {
    #[must_use]
    pub fn new(used: u32, max: u32) -> Self {
        Self {
            used,
            max,
            remaining: max.saturating_sub(used),
        }
    }

    /// Whether a new schedule would exceed the quota.
    #[must_use]
    pub fn exhausted(&self) -> bool {
        self.used >= self.max
    }
}

/// Oldest `created_at` an execution log entry may have before it is
/// considered expired. Shared by the cycle purge and the log listing, so
/// expired rows are invisible even before the purge removes them.
#[must_use]
pub fn retention_cutoff(now: DateTime<Utc>, retention_days: u32) -> DateTime<Utc> {
    now - Duration::days(i64::from(retention_days))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quota_counts_down_to_zero() {
        let quota = QuotaStatus::new(7, 10);
        assert_eq!(quota.remaining, 3);
        assert!(!quota.exhausted());

        let full = QuotaStatus::new(10, 10);
        assert_eq!(full.remaining, 0);
        assert!(full.exhausted());
    }

    #[test]
    fn test_quota_never_underflows_when_over() {
        let over = QuotaStatus::new(12, 10);
        assert_eq!(over.remaining, 0);
        assert!(over.exhausted());
    }

    #[test]
    fn test_retention_cutoff_is_exactly_n_days_back() {
        let now = Utc::now();
        let cutoff = retention_cutoff(now, 2);
        assert_eq!(now - cutoff, Duration::days(2));
    }
}
