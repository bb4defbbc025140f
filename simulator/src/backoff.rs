use rand::{Rng, RngCore};
use stakebook_types::LedgerError;
use std::{future::Future, time::Duration};
use tracing::warn;

pub(crate) fn jittered_backoff(rng: &mut impl RngCore, backoff: Duration) -> Duration {
    let backoff_ms = backoff.as_millis() as u64;
    if backoff_ms <= 1 {
        return backoff;
    }

    // "Equal jitter": delay is in [backoff/2, backoff].
    let half_ms = backoff_ms / 2;
    let jitter_ms = rng.gen_range(0..=half_ms);
    Duration::from_millis(half_ms.saturating_add(jitter_ms))
}

/// Bounded exponential backoff for unattended callers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: usize,
    pub base: Duration,
}

impl RetryPolicy {
    pub fn new(attempts: usize, base: Duration) -> Self {
        Self { attempts, base }
    }

    /// Nominal delay before `attempt + 1`, doubling from `base`.
    fn backoff(&self, attempt: usize) -> Duration {
        let shift = attempt.saturating_sub(1).min(16) as u32;
        self.base.saturating_mul(1 << shift)
    }
}

/// Run `op` until it succeeds, fails with a non-retryable error, or the policy is
/// exhausted. `op` receives the attempt number, starting at 1.
pub(crate) async fn retry<T, F, Fut>(
    policy: &RetryPolicy,
    what: &'static str,
    mut op: F,
) -> Result<T, LedgerError>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<T, LedgerError>>,
{
    let attempts = policy.attempts.max(1);
    let mut attempt = 1;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < attempts => {
                let delay = jittered_backoff(&mut rand::thread_rng(), policy.backoff(attempt));
                warn!(what, attempt, ?delay, %err, "retrying");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};
    use stakebook_types::{InfrastructureError, StateError};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn jitter_stays_within_half_and_full() {
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..1_000 {
            let delay = jittered_backoff(&mut rng, Duration::from_millis(200));
            assert!(delay >= Duration::from_millis(100) && delay <= Duration::from_millis(200));
        }
        assert_eq!(
            jittered_backoff(&mut rng, Duration::from_millis(1)),
            Duration::from_millis(1)
        );
    }

    #[test]
    fn backoff_doubles() {
        let policy = RetryPolicy::new(5, Duration::from_millis(200));
        assert_eq!(policy.backoff(1), Duration::from_millis(200));
        assert_eq!(policy.backoff(2), Duration::from_millis(400));
        assert_eq!(policy.backoff(3), Duration::from_millis(800));
    }

    #[tokio::test(start_paused = true)]
    async fn retries_infrastructure_errors_until_success() {
        let calls = AtomicUsize::new(0);
        let policy = RetryPolicy::new(3, Duration::from_millis(200));
        let result = retry(&policy, "test", |attempt| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt < 3 {
                    Err(InfrastructureError::Unavailable("down".to_string()).into())
                } else {
                    Ok(attempt)
                }
            }
        })
        .await;
        assert_eq!(result, Ok(3));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_policy_is_exhausted() {
        let policy = RetryPolicy::new(2, Duration::from_millis(200));
        let result: Result<(), _> = retry(&policy, "test", |_| async {
            Err(InfrastructureError::Unavailable("down".to_string()).into())
        })
        .await;
        assert_eq!(result.unwrap_err().code(), "STORE_UNAVAILABLE");
    }

    #[tokio::test(start_paused = true)]
    async fn state_errors_are_not_retried() {
        let calls = AtomicUsize::new(0);
        let policy = RetryPolicy::new(3, Duration::from_millis(200));
        let result: Result<(), _> = retry(&policy, "test", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(StateError::RoundNotRunning.into()) }
        })
        .await;
        assert_eq!(result, Err(StateError::RoundNotRunning.into()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn overflow_is_not_retried() {
        let calls = AtomicUsize::new(0);
        let policy = RetryPolicy::new(3, Duration::from_millis(200));
        let result: Result<(), _> = retry(&policy, "test", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(InfrastructureError::Overflow.into()) }
        })
        .await;
        assert_eq!(result.unwrap_err().code(), "OVERFLOW");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
