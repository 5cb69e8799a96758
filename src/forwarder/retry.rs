use std::future::Future;
use std::time::Duration;

use rand::Rng;

use crate::error::AppResult;

/// Jitter factor applied to every computed backoff delay (see `spec.md`'s
/// open question on tunability): the delay is reduced by a random fraction
/// in `[0, RETRY_JITTER_FACTOR]`, never increased.
pub const RETRY_JITTER_FACTOR: f64 = 0.75;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_backoff: Duration::from_secs(5),
            max_backoff: Duration::from_secs(10),
            jitter: RETRY_JITTER_FACTOR,
        }
    }
}

impl RetryPolicy {
    fn backoff_for(&self, attempt: u32) -> Duration {
        let exp = self.base_backoff.saturating_mul(1u32 << attempt.min(16));
        let capped = exp.min(self.max_backoff);

        let jitter_fraction: f64 = rand::rng().random_range(0.0..=self.jitter);
        capped.mul_f64((1.0 - jitter_fraction).max(0.0))
    }

    /// Runs `f` until it succeeds, exhausts `max_retries`, or fails with an
    /// error the blacklist classifier marks unrecoverable. Unrecoverable
    /// errors (poison messages, decode failures) are returned immediately
    /// without consuming a retry attempt, matching the source's
    /// `retrier.BlacklistClassifier{streams.ErrUnrecoverable}` behavior.
    pub async fn run<F, Fut>(&self, mut f: F) -> AppResult<()>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = AppResult<()>>,
    {
        let mut attempt = 0u32;
        loop {
            match f().await {
                Ok(()) => return Ok(()),
                Err(err) if err.is_unrecoverable() => return Err(err),
                Err(err) => {
                    if attempt >= self.max_retries {
                        return Err(err);
                    }
                    let delay = self.backoff_for(attempt);
                    tracing::warn!(
                        attempt = attempt + 1,
                        max_retries = self.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "retrying forward job after transient failure"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn succeeds_without_retry_on_first_try() {
        let policy = RetryPolicy {
            max_retries: 3,
            base_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(5),
            jitter: 0.0,
        };

        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = calls.clone();

        let result = policy
            .run(|| {
                calls2.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            })
            .await;

        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_transient_errors_up_to_the_limit() {
        let policy = RetryPolicy {
            max_retries: 2,
            base_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(5),
            jitter: 0.0,
        };

        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = calls.clone();

        let result = policy
            .run(|| {
                calls2.fetch_add(1, Ordering::SeqCst);
                async { Err(AppError::Internal("transient".into())) }
            })
            .await;

        assert!(result.is_err());
        // initial attempt + max_retries retries
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn never_retries_unrecoverable_errors() {
        let policy = RetryPolicy {
            max_retries: 5,
            base_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(5),
            jitter: 0.0,
        };

        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = calls.clone();

        let result = policy
            .run(|| {
                calls2.fetch_add(1, Ordering::SeqCst);
                async { Err(AppError::Internal("poison".into()).unrecoverable()) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
