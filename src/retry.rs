//! Randomized exponential backoff.
//!
//! After the n-th failed attempt the caller waits a duration drawn uniformly
//! from `[0, min(max_backoff, multiplier × 2^(n-1))]` ("full jitter").
//! With the defaults (multiplier 1 s, cap 40 s, 5 attempts) the ceilings are
//! 1 s, 2 s, 4 s, 8 s before the fifth and final attempt.

use rand::Rng;
use std::time::Duration;

/// How many times to try an operation and how long to wait in between.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub multiplier: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            multiplier: Duration::from_secs(1),
            max_backoff: Duration::from_secs(40),
        }
    }
}

impl RetryPolicy {
    /// A policy that retries immediately, used by tests and tight loops.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            multiplier: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }

    /// Whether another attempt is allowed after `failed_attempts` failures.
    pub fn should_retry(&self, failed_attempts: u32) -> bool {
        failed_attempts < self.max_attempts
    }

    /// Upper bound of the wait after `failed_attempts` failures (1-based).
    pub fn ceiling(&self, failed_attempts: u32) -> Duration {
        let exponent = failed_attempts.saturating_sub(1).min(30) as i32;
        let scaled = self.multiplier.as_secs_f64() * 2f64.powi(exponent);
        let capped = scaled.min(self.max_backoff.as_secs_f64());
        Duration::try_from_secs_f64(capped.max(0.0)).unwrap_or(self.max_backoff)
    }

    /// Jittered wait after `failed_attempts` failures.
    pub fn backoff(&self, failed_attempts: u32) -> Duration {
        let ceiling = self.ceiling(failed_attempts);
        if ceiling.is_zero() {
            return Duration::ZERO;
        }
        let fraction: f64 = rand::thread_rng().gen_range(0.0..=1.0);
        ceiling.mul_f64(fraction)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ceilings_double_then_cap() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.ceiling(1), Duration::from_secs(1));
        assert_eq!(policy.ceiling(2), Duration::from_secs(2));
        assert_eq!(policy.ceiling(4), Duration::from_secs(8));
        assert_eq!(policy.ceiling(6), Duration::from_secs(32));
        assert_eq!(policy.ceiling(7), Duration::from_secs(40));
        assert_eq!(policy.ceiling(64), Duration::from_secs(40));
    }

    #[test]
    fn huge_multiplier_is_capped_without_overflow() {
        let policy = RetryPolicy {
            max_attempts: 5,
            multiplier: Duration::MAX,
            max_backoff: Duration::from_secs(40),
        };
        assert_eq!(policy.ceiling(5), Duration::from_secs(40));
    }

    #[test]
    fn backoff_stays_within_ceiling() {
        let policy = RetryPolicy::default();
        for attempt in 1..=8 {
            for _ in 0..50 {
                assert!(policy.backoff(attempt) <= policy.ceiling(attempt));
            }
        }
    }

    #[test]
    fn five_attempts_allow_four_retries() {
        let policy = RetryPolicy::default();
        assert!(policy.should_retry(4));
        assert!(!policy.should_retry(5));
    }

    #[test]
    fn immediate_policy_never_waits() {
        let policy = RetryPolicy::immediate(3);
        assert_eq!(policy.backoff(2), Duration::ZERO);
    }
}
