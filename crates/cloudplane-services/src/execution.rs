//! One durable reconciliation run
//!
//! An [`Execution`] owns the run id shared by every activity it schedules.
//! Activities are numbered in scheduling order, so each unit of work gets
//! its own id while its retries keep it.

use cloudplane_cloud::{ActivityContext, ActivityError, RetryPolicy, VoidFuture, run_activity};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub struct Execution {
    run_id: String,
    next_activity: AtomicU64,
    retry: RetryPolicy,
    cancel: CancellationToken,
}

impl Execution {
    pub fn new(retry: RetryPolicy, cancel: CancellationToken) -> Self {
        Self::with_run_id(Uuid::new_v4().to_string(), retry, cancel)
    }

    pub fn with_run_id(run_id: impl Into<String>, retry: RetryPolicy, cancel: CancellationToken) -> Self {
        Self {
            run_id: run_id.into(),
            next_activity: AtomicU64::new(1),
            retry,
            cancel,
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Schedule an activity whose only outcome is success or an error
    pub fn activity<'a, F, Fut>(&'a self, name: &str, op: F) -> VoidFuture<'a, ActivityError>
    where
        F: FnMut(ActivityContext) -> Fut + Send + 'a,
        Fut: Future<Output = Result<(), ActivityError>> + Send + 'a,
    {
        let activity_id = self.next_activity.fetch_add(1, Ordering::SeqCst).to_string();
        tracing::debug!(
            run_id = %self.run_id,
            activity_id = %activity_id,
            "Scheduling activity {}",
            name
        );

        let ctx = ActivityContext::new(self.run_id.clone(), activity_id, self.cancel.clone());
        VoidFuture::wrap(run_activity(ctx, &self.retry, op))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cloudplane_cloud::token_for;
    use std::sync::{Arc, Mutex};

    #[tokio::test]
    async fn test_activities_get_distinct_tokens() {
        let execution = Execution::with_run_id("run-7", RetryPolicy::no_retry(), CancellationToken::new());
        let tokens = Arc::new(Mutex::new(Vec::new()));

        for _ in 0..2 {
            let seen = tokens.clone();
            execution
                .activity("record-token", move |ctx| {
                    let seen = seen.clone();
                    async move {
                        let mut token = None;
                        token_for(&ctx, &mut token);
                        seen.lock().unwrap().push(token.unwrap());
                        Ok(())
                    }
                })
                .await
                .unwrap();
        }

        assert_eq!(*tokens.lock().unwrap(), vec!["run-7-1", "run-7-2"]);
    }

    #[tokio::test]
    async fn test_fresh_executions_have_distinct_run_ids() {
        let a = Execution::new(RetryPolicy::no_retry(), CancellationToken::new());
        let b = Execution::new(RetryPolicy::no_retry(), CancellationToken::new());
        assert_ne!(a.run_id(), b.run_id());
    }
}
