//! Activity execution context
//!
//! An [`ActivityContext`] identifies one unit of work inside one execution
//! and carries its liveness (heartbeat) and cancellation plumbing. Every
//! retry attempt of the same activity shares the run id and activity id.

use crate::codec::{ActivityError, Failure};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

/// The enclosing execution was cancelled
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("activity cancelled")]
pub struct Cancelled;

impl From<Cancelled> for ActivityError {
    fn from(_: Cancelled) -> Self {
        ActivityError::cancelled()
    }
}

impl From<Cancelled> for Failure {
    fn from(_: Cancelled) -> Self {
        Failure::Activity(ActivityError::cancelled())
    }
}

#[derive(Debug, Default)]
struct HeartbeatState {
    count: AtomicU64,
    last: Mutex<Option<(Instant, Option<String>)>>,
}

/// Identity and liveness plumbing for one activity attempt
#[derive(Debug, Clone)]
pub struct ActivityContext {
    run_id: String,
    activity_id: String,
    attempt: u32,
    heartbeats: Arc<HeartbeatState>,
    cancel: CancellationToken,
}

impl ActivityContext {
    pub fn new(
        run_id: impl Into<String>,
        activity_id: impl Into<String>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            activity_id: activity_id.into(),
            attempt: 1,
            heartbeats: Arc::new(HeartbeatState::default()),
            cancel,
        }
    }

    /// Context for the next retry of the same activity
    ///
    /// Identity and heartbeat history are kept; only the attempt changes.
    pub fn next_attempt(&self) -> Self {
        Self {
            attempt: self.attempt + 1,
            ..self.clone()
        }
    }

    /// Run id of the enclosing execution
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Id of this unit of work within the execution
    pub fn activity_id(&self) -> &str {
        &self.activity_id
    }

    /// 1-based attempt number
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Record proof of liveness; this is where cancellation is observed
    pub fn heartbeat(&self, details: Option<String>) -> Result<(), Cancelled> {
        self.heartbeats.count.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut last) = self.heartbeats.last.lock() {
            *last = Some((Instant::now(), details));
        }

        if self.cancel.is_cancelled() {
            tracing::debug!(
                run_id = %self.run_id,
                activity_id = %self.activity_id,
                "Cancellation observed at heartbeat"
            );
            return Err(Cancelled);
        }
        Ok(())
    }

    pub fn heartbeat_count(&self) -> u64 {
        self.heartbeats.count.load(Ordering::SeqCst)
    }

    /// Time and details of the most recent heartbeat
    pub fn last_heartbeat(&self) -> Option<(Instant, Option<String>)> {
        self.heartbeats.last.lock().ok().and_then(|last| last.clone())
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once the enclosing execution is cancelled
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }
}
