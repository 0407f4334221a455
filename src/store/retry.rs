//! Bounded-attempt retry with exponential backoff for store operations.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::sleep;
use tracing::warn;

use crate::config::RetryPolicy;

use super::error::StoreResult;

/// Run `attempt_fn` until it succeeds, fails with a non-retryable error, or
/// exhausts `policy.max_retries` additional attempts.
///
/// Only errors classified retryable by [`StoreError::is_retryable`] are
/// retried; a missing key or misconfiguration surfaces immediately. The
/// delay between attempts grows by `policy.multiplier` up to
/// `policy.max_delay`, with optional jitter to keep concurrent workers from
/// hammering the backend in lockstep.
///
/// [`StoreError::is_retryable`]: super::error::StoreError::is_retryable
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    operation: &str,
    mut attempt_fn: F,
) -> StoreResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = StoreResult<T>>,
{
    let mut delay = policy.initial_delay;
    let mut attempt: u32 = 0;

    loop {
        attempt += 1;
        match attempt_fn().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt <= policy.max_retries => {
                warn!(
                    operation,
                    attempt,
                    max_retries = policy.max_retries,
                    error = %err,
                    "transient store failure, retrying"
                );
                sleep(jittered(delay, policy.jitter)).await;
                delay = next_delay(delay, policy);
            }
            Err(err) => return Err(err),
        }
    }
}

fn next_delay(current: Duration, policy: &RetryPolicy) -> Duration {
    current
        .mul_f64(policy.multiplier.max(1.0))
        .min(policy.max_delay)
}

fn jittered(delay: Duration, jitter: bool) -> Duration {
    if jitter && !delay.is_zero() {
        delay.mul_f64(rand::rng().random_range(0.5..1.5))
    } else {
        delay
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::error::StoreError;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            multiplier: 2.0,
            jitter: false,
        }
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result = with_retry(&fast_policy(3), "flaky op", || {
            let call = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if call < 2 {
                    Err(StoreError::unavailable("connection reset"))
                } else {
                    Ok(call)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausts_attempts_and_surfaces_last_error() {
        let calls = AtomicU32::new(0);
        let result: StoreResult<()> = with_retry(&fast_policy(2), "dead backend", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(StoreError::unavailable("still down")) }
        })
        .await;

        assert!(matches!(result, Err(StoreError::Unavailable(_))));
        // one initial attempt plus two retries
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_error_short_circuits() {
        let calls = AtomicU32::new(0);
        let result: StoreResult<()> = with_retry(&fast_policy(5), "missing key", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(StoreError::not_found("raw/absent")) }
        })
        .await;

        assert!(matches!(result, Err(StoreError::NotFound(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn backoff_grows_and_caps_at_max_delay() {
        let policy = RetryPolicy {
            max_retries: 5,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(250),
            multiplier: 2.0,
            jitter: false,
        };
        let first = next_delay(policy.initial_delay, &policy);
        let second = next_delay(first, &policy);
        assert_eq!(first, Duration::from_millis(200));
        assert_eq!(second, Duration::from_millis(250));
    }
}
