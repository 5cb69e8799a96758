use std::future::Future;

use crate::error::AppResult;

use super::retry::RetryPolicy;

/// Wraps a job handler with the retry policy, re-running it until it
/// succeeds, runs out of retries, or hits an unrecoverable error.
pub async fn with_retry<F, Fut>(policy: &RetryPolicy, handler: F) -> AppResult<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = AppResult<()>>,
{
    policy.run(handler).await
}

/// Logs a failed job once it's done retrying, then re-raises so the caller
/// (the bus) still observes the failure.
pub fn log_on_error(batch_id: &str, result: &AppResult<()>) {
    if let Err(err) = result {
        tracing::error!(batch_id = %batch_id, error = %err, "forward job failed");
    }
}
