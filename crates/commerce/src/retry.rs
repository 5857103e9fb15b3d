//! Bounded backoff for transient store failures.
//!
//! Only transient failures (store unavailable, connection loss) are
//! retried; every other error propagates immediately. Delays grow
//! exponentially from the base with random jitter, capped at `max_delay`.

use std::time::Duration;

use rand::Rng;
use tracing::debug;

use crate::store::StoreError;

/// Bounded retry policy.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Delay before the given retry (0-based), with jitter.
    fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self
            .base_delay
            .saturating_mul(2_u32.saturating_pow(attempt))
            .min(self.max_delay);
        let jitter_ms = rand::rng().random_range(0..=exp.as_millis().max(1) / 2);
        exp + Duration::from_millis(u64::try_from(jitter_ms).unwrap_or(0))
    }
}

/// Run `op`, retrying transient store failures under `policy`.
///
/// # Errors
///
/// Returns the last error once attempts are exhausted, or the first
/// non-transient error immediately.
pub async fn with_backoff<T, F, Fut>(policy: RetryPolicy, mut op: F) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt + 1 < policy.max_attempts => {
                let delay = policy.delay_for(attempt);
                debug!(error = %err, attempt, delay_ms = delay.as_millis() as u64, "retrying transient store failure");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
