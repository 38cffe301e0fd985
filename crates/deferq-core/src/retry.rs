//! Retry policy: bounded backoff for broker operations.

use std::future::Future;
use std::time::Duration;

use rand::Rng;

use crate::error::DeferqError;

/// Bounded exponential backoff with jitter.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Delay before the first retry.
    pub base_delay: Duration,

    /// Backoff multiplier per attempt.
    pub multiplier: f64,

    /// Total attempts, the initial call included.
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(500),
            multiplier: 2.0,
            max_attempts: 4,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-indexed), with up to 25%
    /// added jitter so retrying workers do not stampede the broker in step.
    pub fn next_delay(&self, attempt: u32) -> Duration {
        let base = self.base_delay.as_secs_f64()
            * self.multiplier.powi(attempt.saturating_sub(1) as i32);
        let jitter = rand::thread_rng().gen_range(0.0..=0.25);
        Duration::from_secs_f64(base * (1.0 + jitter))
    }
}

/// Run `op` under `policy`.
///
/// [`DeferqError::RaceLoss`] is returned immediately: it means another actor
/// finalized the message, and retrying cannot change that. Every other error
/// is retried until the attempt budget runs out.
pub(crate) async fn retry<T, F, Fut>(
    policy: &RetryPolicy,
    op_name: &'static str,
    mut op: F,
) -> Result<T, DeferqError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, DeferqError>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_race_loss() => return Err(err),
            Err(err) => {
                attempt += 1;
                if attempt >= policy.max_attempts {
                    return Err(err);
                }
                let delay = policy.next_delay(attempt);
                tracing::warn!(
                    op = op_name,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "broker operation failed, backing off"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}
