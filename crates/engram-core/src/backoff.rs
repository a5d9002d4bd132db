//! Retry Backoff
//!
//! Exponential backoff policy for failed oracle batches. Pure bookkeeping —
//! no clock, no sleeping — so eligibility decisions are fully testable.

use chrono::{DateTime, Duration, Utc};

use crate::config::OracleConfig;

/// Exponential backoff policy for one retryable unit of work
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    base_delay_ms: u64,
    max_delay_ms: u64,
    max_attempts: u32,
}

impl RetryPolicy {
    pub fn new(base_delay_ms: u64, max_delay_ms: u64, max_attempts: u32) -> Self {
        Self {
            base_delay_ms,
            max_delay_ms,
            max_attempts,
        }
    }

    pub fn from_config(config: &OracleConfig) -> Self {
        Self::new(
            config.retry_base_delay_ms,
            config.retry_max_delay_ms,
            config.retry_max_attempts,
        )
    }

    /// Delay before the given attempt (1-based), doubling per attempt and
    /// capped at the maximum.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(31);
        let ms = self
            .base_delay_ms
            .saturating_mul(1u64 << shift)
            .min(self.max_delay_ms);
        Duration::milliseconds(ms as i64)
    }

    /// Whether more attempts remain
    pub fn exhausted(&self, attempts: u32) -> bool {
        attempts >= self.max_attempts
    }
}

/// Retry state for a failed batch
#[derive(Debug, Clone)]
pub struct RetryState {
    pub attempts: u32,
    pub last_failed_at: Option<DateTime<Utc>>,
}

impl RetryState {
    pub fn new() -> Self {
        Self {
            attempts: 0,
            last_failed_at: None,
        }
    }

    /// Record a failure at `now`
    pub fn record_failure(&mut self, now: DateTime<Utc>) {
        self.attempts += 1;
        self.last_failed_at = Some(now);
    }

    /// Reset after a success
    pub fn record_success(&mut self) {
        self.attempts = 0;
        self.last_failed_at = None;
    }

    /// Whether a retry is due at `now` under the given policy
    pub fn is_due(&self, policy: &RetryPolicy, now: DateTime<Utc>) -> bool {
        if policy.exhausted(self.attempts) {
            return false;
        }
        match self.last_failed_at {
            None => true,
            Some(failed_at) => now - failed_at >= policy.delay_for_attempt(self.attempts),
        }
    }
}

impl Default for RetryState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_delay_doubles_and_caps() {
        let policy = RetryPolicy::new(1_000, 10_000, 8);
        assert_eq!(policy.delay_for_attempt(1), Duration::milliseconds(1_000));
        assert_eq!(policy.delay_for_attempt(2), Duration::milliseconds(2_000));
        assert_eq!(policy.delay_for_attempt(4), Duration::milliseconds(8_000));
        assert_eq!(policy.delay_for_attempt(5), Duration::milliseconds(10_000));
        // No overflow for absurd attempt counts
        assert_eq!(policy.delay_for_attempt(64), Duration::milliseconds(10_000));
    }

    #[test]
    fn test_retry_due_after_delay() {
        let policy = RetryPolicy::new(1_000, 10_000, 3);
        let t0 = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();

        let mut state = RetryState::new();
        assert!(state.is_due(&policy, t0));

        state.record_failure(t0);
        assert!(!state.is_due(&policy, t0 + Duration::milliseconds(500)));
        assert!(state.is_due(&policy, t0 + Duration::milliseconds(1_000)));
    }

    #[test]
    fn test_exhaustion_parks_the_batch() {
        let policy = RetryPolicy::new(1, 1, 2);
        let t0 = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();

        let mut state = RetryState::new();
        state.record_failure(t0);
        state.record_failure(t0);
        assert!(!state.is_due(&policy, t0 + Duration::days(1)));

        state.record_success();
        assert!(state.is_due(&policy, t0));
    }
}
