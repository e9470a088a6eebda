//! Long-running operation waiter
//!
//! Turns a provider's "is it done yet" check into an interruptible loop:
//! one check per poll, a heartbeat between polls, and a fixed sleep that
//! races against cancellation. There is no attempt cap; the enclosing
//! execution's timeout is the outer bound.

use crate::activity::ActivityContext;
use crate::codec::Failure;
use crate::provider::ProviderError;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;

/// Fixed interval between polls
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Why a wait ended without the resource reaching its target state
#[derive(Error, Debug)]
pub enum WaitError<E> {
    #[error("wait cancelled")]
    Cancelled,

    /// Fatal poll error, returned as the poll produced it
    #[error(transparent)]
    Poll(E),
}

impl<E: ProviderError + 'static> From<WaitError<E>> for Failure {
    fn from(err: WaitError<E>) -> Self {
        match err {
            WaitError::Cancelled => Failure::from(crate::activity::Cancelled),
            WaitError::Poll(e) => Failure::Provider(Box::new(e)),
        }
    }
}

enum PollOutcome<E> {
    Done,
    NotReady(E),
    Errored(E),
}

impl<E: ProviderError> PollOutcome<E> {
    fn classify(result: Result<(), E>) -> Self {
        match result {
            Ok(()) => PollOutcome::Done,
            Err(e) if e.is_not_ready() => PollOutcome::NotReady(e),
            Err(e) => PollOutcome::Errored(e),
        }
    }
}

/// Polls a provider check until it succeeds, fails, or is cancelled
#[derive(Debug, Clone, Copy)]
pub struct Waiter {
    interval: Duration,
}

impl Default for Waiter {
    fn default() -> Self {
        Self::new(DEFAULT_POLL_INTERVAL)
    }
}

impl Waiter {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Drive `poll` to completion
    ///
    /// `poll` must make exactly one check per call. A not-ready error is
    /// followed by a heartbeat and a sleep; any other error is returned
    /// immediately.
    pub async fn wait_until<F, Fut, E>(
        &self,
        ctx: &ActivityContext,
        mut poll: F,
    ) -> Result<(), WaitError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<(), E>>,
        E: ProviderError,
    {
        let mut attempt: u64 = 0;
        loop {
            attempt += 1;
            match PollOutcome::classify(poll().await) {
                PollOutcome::Done => {
                    tracing::debug!(
                        activity_id = %ctx.activity_id(),
                        attempt,
                        "Resource reached target state"
                    );
                    return Ok(());
                }
                PollOutcome::NotReady(e) => {
                    tracing::debug!(
                        activity_id = %ctx.activity_id(),
                        attempt,
                        "Resource not ready: {}",
                        e.message()
                    );
                }
                PollOutcome::Errored(e) => return Err(WaitError::Poll(e)),
            }

            ctx.heartbeat(Some(format!("poll attempt {}", attempt)))
                .map_err(|_| WaitError::Cancelled)?;

            tokio::select! {
                _ = sleep(self.interval) => {}
                _ = ctx.cancelled() => return Err(WaitError::Cancelled),
            }
        }
    }
}
