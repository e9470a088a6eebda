//! Activity retry policy

use crate::activity::ActivityContext;
use crate::codec::ActivityError;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

/// Retry configuration for activity attempts
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first one
    pub max_attempts: u32,

    /// Delay before the first retry
    pub initial_delay: Duration,

    /// Upper bound for any single delay
    pub max_delay: Duration,

    /// Backoff multiplier
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no retries
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay after the given failed attempt (0-based)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = self.backoff_multiplier.powi(attempt as i32);
        let delay = self.initial_delay.as_secs_f64() * factor;
        Duration::from_secs_f64(delay.min(self.max_delay.as_secs_f64()))
    }
}

/// Run an activity under `policy`
///
/// Every attempt receives a context with the same run id and activity id,
/// so idempotency tokens stay stable across retries. Non-retryable errors
/// and cancellation end the loop early.
pub async fn run_activity<F, Fut, T>(
    ctx: ActivityContext,
    policy: &RetryPolicy,
    mut op: F,
) -> Result<T, ActivityError>
where
    F: FnMut(ActivityContext) -> Fut,
    Fut: Future<Output = Result<T, ActivityError>>,
{
    let mut ctx = ctx;
    loop {
        let err = match op(ctx.clone()).await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        if err.non_retryable || ctx.is_cancelled() || ctx.attempt() >= policy.max_attempts {
            return Err(err);
        }

        let delay = policy.delay_for_attempt(ctx.attempt() - 1);
        tracing::warn!(
            run_id = %ctx.run_id(),
            activity_id = %ctx.activity_id(),
            attempt = ctx.attempt(),
            "Activity failed, retrying in {:?}: {}",
            delay,
            err
        );

        tokio::select! {
            _ = sleep(delay) => {}
            _ = ctx.cancelled() => return Err(ActivityError::cancelled()),
        }
        ctx = ctx.next_attempt();
    }
}
