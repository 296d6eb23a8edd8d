//! Bounded-retry combinator for flaky network calls.
//!
//! Wraps an async operation and re-invokes it until it succeeds or the
//! attempt budget is exhausted, at which point the last error propagates.
//! The pause between attempts is pluggable; the default is no pause.

use std::future::Future;
use std::time::Duration;

/// Pause policy applied between failed attempts.
#[derive(Debug, Clone, Copy, Default)]
pub enum Backoff {
    /// Retry immediately.
    #[default]
    None,
    /// Sleep a fixed duration before each retry.
    Fixed(Duration),
}

/// Invoke `op` up to `max_attempts` times, returning the first success or
/// the last error.
pub async fn retryable<T, F, Fut>(op: F, max_attempts: usize) -> anyhow::Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    retryable_with(op, max_attempts, Backoff::None).await
}

/// [`retryable`] with an explicit [`Backoff`] policy.
pub async fn retryable_with<T, F, Fut>(
    op: F,
    max_attempts: usize,
    backoff: Backoff,
) -> anyhow::Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    let mut attempts = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                attempts += 1;
                if attempts >= max_attempts.max(1) {
                    return Err(e);
                }
                if let Backoff::Fixed(pause) = backoff {
                    tokio::time::sleep(pause).await;
                }
            }
        }
    }
}
