//! Retry / back-off policy.
//!
//! Grounded on the `jobs::retry::ExponentialBackoff::calculate_delay`
//! (`initial_delay × multiplier^(attempt-1)`, capped at `max_delay`), with
//! jitter deliberately dropped: the monotonicity bound
//! (`delay_k <= min(base * 2^(k-1), maxDelay)`) needs to be exact, not
//! probabilistic, so this is the same formula without the randomized
//! term (recorded as a deliberate deviation in DESIGN.md).
//!
//! Delays are never slept in-line; the scheduler persists them as a
//! Job's `scheduled_at`, so pause/resume/crash-restart
//! all honor the remaining back-off for free.

use crate::config::RetryConfig;

/// Delay before the job's `attempt`-th execution, given 1-indexed
/// `attempt` (the attempt count *after* the failure being retried).
///
/// `next_delay_ms(1,..)` is the delay before the second attempt.
pub fn next_delay_ms(attempt: u32, base_delay_ms: u64, max_delay_ms: u64) -> u64 {
    let exponent = attempt.saturating_sub(1).min(62);
    let multiplier = 1u64.checked_shl(exponent).unwrap_or(u64::MAX);
    base_delay_ms.saturating_mul(multiplier).min(max_delay_ms)
}

/// Whether a job should be retried, given its failure classification and
/// the Task's retry policy.
pub fn should_retry(retryable: bool, attempts_after_failure: u32, retry: &RetryConfig) -> bool {
    retryable && attempts_after_failure < retry.max_attempts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exponential_delays_cap_at_max() {
        // retry { maxAttempts: 4, baseDelayMs: 100, maxDelayMs: 500 }
        assert_eq!(next_delay_ms(1, 100, 500), 100);
        assert_eq!(next_delay_ms(2, 100, 500), 200);
        assert_eq!(next_delay_ms(3, 100, 500), 400);
        assert_eq!(next_delay_ms(4, 100, 500), 500); // would be 800, capped
    }

    #[test]
    fn monotonic_non_decreasing() {
        let mut prev = 0u64;
        for attempt in 1..=10u32 {
            let d = next_delay_ms(attempt, 50, 10_000);
            assert!(d >= prev);
            assert!(d <= 10_000);
            prev = d;
        }
    }

    #[test]
    fn terminal_when_retries_exhausted() {
        let retry = RetryConfig {
            max_attempts: 3,
            base_delay_ms: 10,
            max_delay_ms: 100,
        };
        assert!(should_retry(true, 2, &retry));
        assert!(!should_retry(true, 3, &retry));
        assert!(!should_retry(false, 1, &retry));
    }
}
