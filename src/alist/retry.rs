use std::future::Future;
use std::time::Duration;

use crate::error::SyncResult;

/// Retry schedule applied to every remote listing call.
///
/// Attempt `n` (1-based) waits `delay * backoff^(n-1)` plus up to 10% jitter
/// before the next try. Only errors that report `is_retryable()` are retried.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
    pub backoff: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(3),
            backoff: 1.0,
        }
    }
}

impl RetryPolicy {
    /// A policy that tries exactly once.
    #[cfg(test)]
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            delay: Duration::ZERO,
            backoff: 1.0,
        }
    }

    /// Wait before retry number `attempt`, saturating at `Duration::MAX`.
    fn delay_for(&self, attempt: u32) -> Duration {
        let backoff = if self.backoff.is_finite() {
            self.backoff.max(1.0)
        } else {
            1.0
        };
        let factor = backoff.powi(attempt.saturating_sub(1) as i32);
        Duration::try_from_secs_f64(self.delay.as_secs_f64() * factor).unwrap_or(Duration::MAX)
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// attempts are used up.
    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> SyncResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = SyncResult<T>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    let wait = self.delay_for(attempt).saturating_add(jitter(self.delay));
                    tracing::warn!(
                        path = what,
                        attempt,
                        max_attempts,
                        error = %e,
                        "request failed, retrying in {wait:?}"
                    );
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn jitter(base: Duration) -> Duration {
    Duration::try_from_secs_f64(base.as_secs_f64() * rand::random::<f64>() * 0.1)
        .unwrap_or(Duration::ZERO)
}
