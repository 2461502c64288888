use crate::store::StoreResult;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::warn;

/// Bounded exponential backoff for transient store errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Delay before the next attempt, doubling up to `max_delay`
    pub fn next_delay(&self, current: Duration) -> Duration {
        (current * 2).min(self.max_delay)
    }

    /// Total time one call can spend sleeping between its attempts
    pub fn worst_case_backoff(&self) -> Duration {
        let mut total = Duration::ZERO;
        let mut delay = self.initial_delay;
        for _ in 1..self.max_attempts {
            total += delay;
            delay = self.next_delay(delay);
        }
        total
    }
}

/// Run `op`, retrying only [`StoreError::Unavailable`](crate::store::StoreError::Unavailable)
/// failures. Any other error, or the last transient one, is returned as-is.
pub async fn retry_transient<T, F, Fut>(policy: &RetryPolicy, label: &str, mut op: F) -> StoreResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = StoreResult<T>>,
{
    let mut delay = policy.initial_delay;
    let mut attempt = 1;

    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < policy.max_attempts => {
                warn!(
                    attempt,
                    error = %err,
                    "{} failed; retrying in {:?}", label, delay
                );
                sleep(delay).await;
                delay = policy.next_delay(delay);
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
