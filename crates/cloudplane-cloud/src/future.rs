//! Result adapter for units of work without a meaningful value

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

/// Awaitable that only reports whether the wrapped work failed
///
/// Orchestration code can treat every activity as "wait for completion,
/// check the error" regardless of what the activity returns.
pub struct VoidFuture<'a, E> {
    inner: BoxFuture<'a, Result<(), E>>,
}

impl<'a, E: 'a> VoidFuture<'a, E> {
    pub fn wrap<F, T>(fut: F) -> Self
    where
        F: Future<Output = Result<T, E>> + Send + 'a,
        T: 'a,
    {
        Self {
            inner: fut.map(|result| result.map(|_| ())).boxed(),
        }
    }

    /// Wait for the wrapped work and surface only its error
    pub async fn get(self) -> Result<(), E> {
        self.inner.await
    }
}

impl<E> Future for VoidFuture<'_, E> {
    type Output = Result<(), E>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.inner.as_mut().poll(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_discards_value() {
        let fut = VoidFuture::wrap(async { Ok::<_, String>(vec![1, 2, 3]) });
        assert_eq!(fut.get().await, Ok(()));
    }

    #[tokio::test]
    async fn test_surfaces_error() {
        let fut = VoidFuture::wrap(async { Err::<u8, _>("install failed".to_string()) });
        assert_eq!(fut.await, Err("install failed".to_string()));
    }

    #[test]
    fn test_pending_until_work_completes() {
        let (tx, rx) = tokio::sync::oneshot::channel::<u32>();
        let mut fut = tokio_test::task::spawn(VoidFuture::wrap(async move {
            rx.await.map_err(|_| "sender dropped")
        }));

        tokio_test::assert_pending!(fut.poll());
        tx.send(7).unwrap();
        assert!(fut.is_woken());
        tokio_test::assert_ready_ok!(fut.poll());
    }
}
