//! Retry policy for external collaborator calls.

use std::time::Duration;

use swiftmart_core::DomainResult;

/// How the delay between attempts grows.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum BackoffStrategy {
    /// Same delay every attempt.
    Fixed,
    /// base * 2^(attempt - 1), capped at `max_delay`.
    #[default]
    Exponential,
    /// base * attempt, capped at `max_delay`.
    Linear,
}

/// Bounded retry with backoff. Only errors marked retryable
/// (`DomainError::is_retryable`) are retried; deterministic failures
/// surface immediately.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub strategy: BackoffStrategy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::exponential(3, Duration::from_millis(50), Duration::from_secs(2))
    }
}

impl RetryPolicy {
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            strategy: BackoffStrategy::Fixed,
        }
    }

    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay: delay,
            max_delay: delay,
            strategy: BackoffStrategy::Fixed,
        }
    }

    pub fn exponential(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
            strategy: BackoffStrategy::Exponential,
        }
    }

    /// Delay before the given retry attempt (1-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as u64;
        let ms = match self.strategy {
            BackoffStrategy::Fixed => base_ms,
            BackoffStrategy::Exponential => {
                base_ms.saturating_mul(1u64 << attempt.saturating_sub(1).min(32))
            }
            BackoffStrategy::Linear => base_ms.saturating_mul(u64::from(attempt)),
        };
        Duration::from_millis(ms).min(self.max_delay)
    }

    /// Run `op` until it succeeds, fails deterministically, or attempts run
    /// out. Sleeps between attempts.
    pub fn run<T>(
        &self,
        operation: &str,
        mut op: impl FnMut() -> DomainResult<T>,
    ) -> DomainResult<T> {
        let mut attempt = 1;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt < self.max_attempts => {
                    let delay = self.delay_for_attempt(attempt);
                    tracing::warn!(
                        operation,
                        attempt,
                        max_attempts = self.max_attempts,
                        ?delay,
                        %err,
                        "retryable failure, backing off"
                    );
                    std::thread::sleep(delay);
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use swiftmart_core::DomainError;

    #[test]
    fn exponential_delay_doubles_and_caps() {
        let policy =
            RetryPolicy::exponential(5, Duration::from_millis(100), Duration::from_millis(350));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(350));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_millis(350));
    }

    #[test]
    fn retries_dependency_failures_until_success() {
        let policy = RetryPolicy::fixed(3, Duration::ZERO);
        let mut calls = 0;
        let result = policy.run("test", || {
            calls += 1;
            if calls < 3 {
                Err(DomainError::dependency("gateway timeout"))
            } else {
                Ok(calls)
            }
        });
        assert_eq!(result.unwrap(), 3);
    }

    #[test]
    fn deterministic_failures_are_not_retried() {
        let policy = RetryPolicy::fixed(5, Duration::ZERO);
        let mut calls = 0;
        let result: DomainResult<()> = policy.run("test", || {
            calls += 1;
            Err(DomainError::validation("bad input"))
        });
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }

    #[test]
    fn attempts_run_out() {
        let policy = RetryPolicy::fixed(2, Duration::ZERO);
        let mut calls = 0;
        let result: DomainResult<()> = policy.run("test", || {
            calls += 1;
            Err(DomainError::dependency("still down"))
        });
        assert!(matches!(result, Err(DomainError::Dependency(_))));
        assert_eq!(calls, 2);
    }
}
