//! Hierarchical cancellation.
//!
//! The server owns a root scope, every streaming session takes a child of
//! it, and each correction call runs in a child of its session. Cancelling a
//! scope cancels everything below it and nothing above it.

use futures_util::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScopeError {
    #[error("operation cancelled")]
    Cancelled,

    #[error("operation timed out after {0:?}")]
    TimedOut(Duration),
}

struct ScopeInner {
    flag: watch::Sender<bool>,
    parent: Option<CancelScope>,
}

#[derive(Clone)]
pub struct CancelScope {
    inner: Arc<ScopeInner>,
}

impl Default for CancelScope {
    fn default() -> Self {
        Self::root()
    }
}

impl CancelScope {
    pub fn root() -> Self {
        Self::with_parent(None)
    }

    fn with_parent(parent: Option<CancelScope>) -> Self {
        let (flag, _) = watch::channel(false);
        Self {
            inner: Arc::new(ScopeInner { flag, parent }),
        }
    }

    /// A new scope that is cancelled whenever this one is.
    pub fn child(&self) -> Self {
        Self::with_parent(Some(self.clone()))
    }

    pub fn cancel(&self) {
        self.inner.flag.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.inner.flag.borrow()
            || self
                .inner
                .parent
                .as_ref()
                .map(CancelScope::is_cancelled)
                .unwrap_or(false)
    }

    /// Resolves once this scope or any ancestor is cancelled.
    pub fn cancelled(&self) -> BoxFuture<'static, ()> {
        let mut own = self.inner.flag.subscribe();
        let parent = self.inner.parent.clone();
        let keep_alive = Arc::clone(&self.inner);

        Box::pin(async move {
            let own_cancelled = async move {
                loop {
                    let done = *own.borrow_and_update();
                    if done || own.changed().await.is_err() {
                        return;
                    }
                }
            };
            match parent {
                Some(parent) => {
                    tokio::select! {
                        _ = own_cancelled => {}
                        _ = parent.cancelled() => {}
                    }
                }
                None => own_cancelled.await,
            }
            drop(keep_alive);
        })
    }

    /// Run `fut` unless the scope is cancelled or `limit` elapses first.
    pub async fn run<F, T>(&self, limit: Duration, fut: F) -> Result<T, ScopeError>
    where
        F: Future<Output = T>,
    {
        if self.is_cancelled() {
            return Err(ScopeError::Cancelled);
        }
        tokio::select! {
            _ = self.cancelled() => Err(ScopeError::Cancelled),
            result = tokio::time::timeout(limit, fut) => {
                result.map_err(|_| ScopeError::TimedOut(limit))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_parent_cancel_reaches_children() {
        let root = CancelScope::root();
        let session = root.child();
        let call = session.child();

        let waiter = tokio::spawn({
            let call = call.clone();
            async move { call.cancelled().await }
        });

        root.cancel();
        assert!(session.is_cancelled());
        assert!(call.is_cancelled());
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[test]
    fn test_child_cancel_stays_local() {
        let root = CancelScope::root();
        let a = root.child();
        let b = root.child();

        a.cancel();
        assert!(a.is_cancelled());
        assert!(!b.is_cancelled());
        assert!(!root.is_cancelled());
    }

    #[tokio::test]
    async fn test_run_completes() {
        let scope = CancelScope::root();
        let value = scope.run(Duration::from_secs(1), async { 42 }).await;
        assert_eq!(value, Ok(42));
    }

    #[tokio::test]
    async fn test_run_times_out() {
        let scope = CancelScope::root();
        let limit = Duration::from_millis(50);
        let result = scope
            .run(limit, tokio::time::sleep(Duration::from_secs(10)))
            .await;
        assert_eq!(result, Err(ScopeError::TimedOut(limit)));
    }

    #[tokio::test]
    async fn test_run_is_cut_short_by_cancel() {
        let root = CancelScope::root();
        let scope = root.child();

        let canceller = {
            let root = root.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                root.cancel();
            })
        };

        let result = scope
            .run(Duration::from_secs(30), tokio::time::sleep(Duration::from_secs(30)))
            .await;
        assert_eq!(result, Err(ScopeError::Cancelled));
        canceller.await.unwrap();

        // already-cancelled scopes refuse new work immediately
        let result = scope.run(Duration::from_secs(1), async { 1 }).await;
        assert_eq!(result, Err(ScopeError::Cancelled));
    }
}
