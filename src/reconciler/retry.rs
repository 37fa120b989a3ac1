//! Retry policy as data: a pure function from `(errorKind, attemptIndex, policy)` to
//! the next delay or exhaustion, rather than branches inlined into the reconciler.

use std::time::Duration;

use crate::types::{BackoffKind, FailureReason};

/// RBAC failures don't self-heal; cap them hard regardless of the experiment's own
/// `maxRetries`/backoff configuration.
const PERMISSION_DENIED_MAX_RETRIES: u32 = 1;
const PERMISSION_DENIED_DELAY: Duration = Duration::from_secs(30);
const MAX_EXPONENTIAL_DELAY: Duration = Duration::from_secs(600);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry { delay: Duration, next_retry_count: u32 },
    Exhausted,
}

pub fn decide_retry(
    reason: FailureReason,
    current_retry_count: u32,
    max_retries: u32,
    backoff: BackoffKind,
    base_delay: Duration,
) -> RetryDecision {
    if reason == FailureReason::PermissionDenied {
        if current_retry_count >= PERMISSION_DENIED_MAX_RETRIES {
            return RetryDecision::Exhausted;
        }
        return RetryDecision::Retry {
            delay: PERMISSION_DENIED_DELAY,
            next_retry_count: current_retry_count + 1,
        };
    }

    if current_retry_count > max_retries {
        return RetryDecision::Exhausted;
    }

    let delay = match backoff {
        BackoffKind::Fixed => base_delay,
        BackoffKind::Exponential => {
            let factor = 1u64.checked_shl(current_retry_count.min(63)).unwrap_or(u64::MAX);
            base_delay.checked_mul(factor as u32).unwrap_or(MAX_EXPONENTIAL_DELAY).min(MAX_EXPONENTIAL_DELAY)
        }
    };
    RetryDecision::Retry {
        delay,
        next_retry_count: current_retry_count + 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permission_denied_retries_once_then_exhausts() {
        let first = decide_retry(FailureReason::PermissionDenied, 0, 3, BackoffKind::Exponential, Duration::from_secs(30));
        assert_eq!(
            first,
            RetryDecision::Retry {
                delay: Duration::from_secs(30),
                next_retry_count: 1
            }
        );
        let second = decide_retry(FailureReason::PermissionDenied, 1, 3, BackoffKind::Exponential, Duration::from_secs(30));
        assert_eq!(second, RetryDecision::Exhausted);
    }

    #[test]
    fn retry_count_equal_to_max_retries_gets_one_more_attempt() {
        let d = decide_retry(FailureReason::ExecutionError, 3, 3, BackoffKind::Fixed, Duration::from_secs(10));
        assert!(matches!(d, RetryDecision::Retry { .. }));
    }

    #[test]
    fn retry_count_past_max_is_exhausted() {
        let d = decide_retry(FailureReason::ExecutionError, 4, 3, BackoffKind::Fixed, Duration::from_secs(10));
        assert_eq!(d, RetryDecision::Exhausted);
    }

    #[test]
    fn exponential_backoff_caps_at_ten_minutes() {
        let d = decide_retry(FailureReason::ExecutionError, 10, 20, BackoffKind::Exponential, Duration::from_secs(30));
        assert_eq!(
            d,
            RetryDecision::Retry {
                delay: MAX_EXPONENTIAL_DELAY,
                next_retry_count: 11
            }
        );
    }

    #[test]
    fn fixed_backoff_is_constant() {
        let d = decide_retry(FailureReason::ExecutionError, 2, 5, BackoffKind::Fixed, Duration::from_secs(45));
        assert_eq!(
            d,
            RetryDecision::Retry {
                delay: Duration::from_secs(45),
                next_retry_count: 3
            }
        );
    }

    #[test]
    fn validation_error_is_not_retried_by_caller_policy() {
        // Not special-cased here (spec: ValidationError is terminal, handled by the
        // reconciler never calling into retry for that reason) — documented, not enforced
        // by this pure function, whose contract is purely "given a reason, what delay".
        let d = decide_retry(FailureReason::ValidationError, 0, 3, BackoffKind::Fixed, Duration::from_secs(10));
        assert!(matches!(d, RetryDecision::Retry { .. }));
    }
}
