//! Retry policy: bounded attempts with exponential backoff.

use std::time::Duration;

use super::FailOutcome;

/// Default attempt ceiling per job.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Default backoff for the first retry.
pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_millis(1000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_base: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff_base: DEFAULT_BACKOFF_BASE,
        }
    }
}

impl RetryPolicy {
    /// Delay before the next try once `attempts_made` attempts have failed.
    pub fn delay_for(&self, attempts_made: u32) -> Duration {
        let exponent = attempts_made.saturating_sub(1).min(16);
        self.backoff_base.saturating_mul(1u32 << exponent)
    }

    /// Outcome after `attempts_made` failed attempts.
    pub fn outcome(&self, attempts_made: u32) -> FailOutcome {
        if attempts_made >= self.max_attempts {
            FailOutcome::Dead {
                attempts: attempts_made,
            }
        } else {
            FailOutcome::Retrying {
                attempt: attempts_made,
                delay: self.delay_for(attempts_made),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_from_base() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(2), Duration::from_millis(2000));
        assert_eq!(policy.delay_for(3), Duration::from_millis(4000));
        assert_eq!(policy.delay_for(4), Duration::from_millis(8000));
    }

    #[test]
    fn test_fifth_failure_is_dead() {
        let policy = RetryPolicy::default();
        assert!(matches!(policy.outcome(4), FailOutcome::Retrying { attempt: 4, .. }));
        assert_eq!(policy.outcome(5), FailOutcome::Dead { attempts: 5 });
    }

    #[test]
    fn test_huge_attempt_counts_do_not_overflow() {
        let policy = RetryPolicy::default();
        assert!(policy.delay_for(u32::MAX) >= policy.delay_for(17));
    }
}
