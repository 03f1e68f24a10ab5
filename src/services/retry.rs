//! Backoff-with-abort executor shared by the phase service and the ranking engine.

use std::{fmt::Display, future::Future, time::Duration};

use rand::Rng;
use tokio::time::sleep;
use tracing::debug;

/// Markers identifying failures that will not go away by retrying.
const NON_TRANSIENT_MARKERS: &[&str] = &[
    "permission",
    "not found",
    "not-found",
    "invalid argument",
    "invalid-argument",
    "unauthenticated",
    "already exists",
    "already-exists",
];

/// Attempt budget and delay curve of a retried operation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, the first included.
    pub max_attempts: u32,
    /// Delay after the first failure.
    pub base_delay: Duration,
    /// Upper bound of any delay.
    pub max_delay: Duration,
    /// Growth factor between consecutive delays.
    pub backoff_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
            backoff_factor: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Delay slept after failed attempt `attempt` (1-based):
    /// `min(max_delay, base_delay * backoff_factor^(attempt - 1))`.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let scaled = self.base_delay.as_secs_f64() * self.backoff_factor.powi(exponent);
        if !scaled.is_finite() || scaled >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        Duration::from_secs_f64(scaled.max(0.0))
    }
}

/// Failure reported by one attempt of a retried operation.
#[derive(Debug)]
pub enum Failure<E> {
    /// Worth another attempt.
    Transient(E),
    /// Stop immediately and hand the error to the caller.
    Abort(E),
}

/// Whether the error message describes a permission, not-found,
/// invalid-argument, unauthenticated or already-exists failure.
pub fn is_non_transient(err: &impl Display) -> bool {
    let message = err.to_string().to_lowercase();
    NON_TRANSIENT_MARKERS
        .iter()
        .any(|marker| message.contains(marker))
}

/// Run `operation` until it succeeds, aborts, or exhausts the attempt budget.
///
/// Abort failures are returned as soon as they happen. Once the budget is
/// spent the last transient error is returned as-is.
pub async fn execute<T, E, F, Fut>(policy: &RetryPolicy, mut operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, Failure<E>>>,
    E: Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(Failure::Abort(err)) => return Err(err),
            Err(Failure::Transient(err)) => {
                if attempt >= max_attempts {
                    return Err(err);
                }
                let delay = policy.delay_after(attempt);
                debug!(attempt, max_attempts, delay_ms = delay.as_millis() as u64, error = %err, "attempt failed; retrying");
                sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

/// "Equal jitter": a delay drawn from `[backoff / 2, backoff]`.
pub(crate) fn jittered_backoff(rng: &mut impl Rng, backoff: Duration) -> Duration {
    let backoff_ms = backoff.as_millis() as u64;
    if backoff_ms <= 1 {
        return backoff;
    }

    let half_ms = backoff_ms / 2;
    let jitter_ms = rng.random_range(0..=half_ms);
    Duration::from_millis(half_ms.saturating_add(jitter_ms))
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    };

    use super::*;

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            backoff_factor: 2.0,
        }
    }

    #[test]
    fn delay_grows_geometrically_up_to_the_cap() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_after(1), Duration::from_secs(1));
        assert_eq!(policy.delay_after(2), Duration::from_secs(2));
        assert_eq!(policy.delay_after(3), Duration::from_secs(4));
        assert_eq!(policy.delay_after(4), Duration::from_secs(5));
        assert_eq!(policy.delay_after(60), Duration::from_secs(5));
    }

    #[test]
    fn classifier_recognises_non_transient_messages() {
        assert!(is_non_transient(&"storage permission denied: nope"));
        assert!(is_non_transient(&"question `q1` NOT FOUND"));
        assert!(is_non_transient(&"invalid-argument: bad doc"));
        assert!(is_non_transient(&"Unauthenticated"));
        assert!(is_non_transient(&"already exists"));
        assert!(!is_non_transient(&"storage unavailable: connection reset"));
        assert!(!is_non_transient(&"deadline exceeded"));
    }

    #[tokio::test]
    async fn transient_failures_are_retried_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result: Result<u32, String> = execute(&fast_policy(3), || {
            let counter = counter.clone();
            async move {
                let call = counter.fetch_add(1, Ordering::SeqCst) + 1;
                if call < 3 {
                    Err(Failure::Transient(format!("flaky {call}")))
                } else {
                    Ok(call)
                }
            }
        })
        .await;
        assert_eq!(result, Ok(3));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn abort_propagates_without_retrying() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result: Result<(), String> = execute(&fast_policy(5), || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(Failure::Abort("permission denied".to_string()))
            }
        })
        .await;
        assert_eq!(result, Err("permission denied".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhaustion_returns_the_last_error_unwrapped() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result: Result<(), String> = execute(&fast_policy(3), || {
            let counter = counter.clone();
            async move {
                let call = counter.fetch_add(1, Ordering::SeqCst) + 1;
                Err(Failure::Transient(format!("unavailable #{call}")))
            }
        })
        .await;
        assert_eq!(result, Err("unavailable #3".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn jitter_stays_within_half_to_full_backoff() {
        let mut rng = rand::rng();
        let backoff = Duration::from_millis(800);
        for _ in 0..100 {
            let delay = jittered_backoff(&mut rng, backoff);
            assert!(delay >= Duration::from_millis(400) && delay <= backoff);
        }
    }
}
