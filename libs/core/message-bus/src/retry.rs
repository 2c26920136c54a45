//! Retry policy: whether to retry a failed delivery and how long to wait.

use crate::error::FailureKind;
use core_config::messaging::MessagingConfig;
use std::time::Duration;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(2);
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(300);

/// Exponential backoff retry policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
        }
    }
}

impl RetryPolicy {
    /// `max_delay` is an upper bound on every delay, even one below `base_delay`.
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
        }
    }

    pub fn from_config(config: &MessagingConfig) -> Self {
        Self::new(
            config.max_attempts,
            Duration::from_secs(config.retry_base_seconds),
            Duration::from_secs(config.retry_cap_seconds),
        )
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    /// `attempt_count <= max_attempts` and the failure is transient.
    pub fn should_retry(&self, kind: FailureKind, attempt_count: u32) -> bool {
        attempt_count <= self.max_attempts && kind == FailureKind::Transient
    }

    /// `min(2^(attempt_count - 1) * base, cap)`. An attempt count of 0 is treated as 1.
    pub fn calculate_retry_delay(&self, attempt_count: u32) -> Duration {
        let exponent = attempt_count.max(1) - 1;
        let factor = 2u32.checked_pow(exponent).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts(), 3);
        assert_eq!(policy.base_delay(), Duration::from_secs(2));
        assert_eq!(policy.max_delay(), Duration::from_secs(300));
    }

    #[test]
    fn test_should_retry_transient_within_budget() {
        let policy = RetryPolicy::default();
        for attempt in 1..=3 {
            assert!(policy.should_retry(FailureKind::Transient, attempt));
        }
        assert!(!policy.should_retry(FailureKind::Transient, 4));
        assert!(!policy.should_retry(FailureKind::Transient, 100));
    }

    #[test]
    fn test_should_retry_permanent_never() {
        let policy = RetryPolicy::default();
        for attempt in 0..=5 {
            assert!(!policy.should_retry(FailureKind::Permanent, attempt));
        }
    }

    #[test]
    fn test_backoff_calculation() {
        // 2s, 4s, 8s, 16s, ... capped at 300s
        let policy = RetryPolicy::default();
        assert_eq!(policy.calculate_retry_delay(1), Duration::from_secs(2));
        assert_eq!(policy.calculate_retry_delay(2), Duration::from_secs(4));
        assert_eq!(policy.calculate_retry_delay(3), Duration::from_secs(8));
        assert_eq!(policy.calculate_retry_delay(8), Duration::from_secs(256));
        assert_eq!(policy.calculate_retry_delay(9), Duration::from_secs(300));
        assert_eq!(policy.calculate_retry_delay(0), Duration::from_secs(2));
    }

    #[test]
    fn test_backoff_never_exceeds_cap_and_is_monotonic() {
        let policy = RetryPolicy::default();
        let mut previous = Duration::ZERO;
        for attempt in 1..=200 {
            let delay = policy.calculate_retry_delay(attempt);
            assert!(delay <= policy.max_delay());
            assert!(delay >= previous);
            previous = delay;
        }
        assert_eq!(policy.calculate_retry_delay(u32::MAX), policy.max_delay());
    }

    #[test]
    fn test_cap_below_base_still_caps() {
        let policy = RetryPolicy::new(3, Duration::from_secs(10), Duration::from_secs(1));
        assert_eq!(policy.max_delay(), Duration::from_secs(1));
        assert_eq!(policy.calculate_retry_delay(1), Duration::from_secs(1));
        assert_eq!(policy.calculate_retry_delay(5), Duration::from_secs(1));
    }

    #[test]
    fn test_from_config() {
        let config = MessagingConfig {
            max_attempts: 5,
            retry_base_seconds: 1,
            retry_cap_seconds: 60,
            ..Default::default()
        };
        let policy = RetryPolicy::from_config(&config);
        assert_eq!(policy.max_attempts(), 5);
        assert_eq!(policy.calculate_retry_delay(7), Duration::from_secs(60));
    }
}
