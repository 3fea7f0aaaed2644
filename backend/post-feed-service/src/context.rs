//! Request-scoped context: caller identity, operation id, deadline and
//! cancellation.
//!
//! Every store call made on behalf of a request goes through
//! [`RequestContext::guard`], which aborts the call with `Canceled` or
//! `DeadlineExceeded` instead of letting it finish silently.

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;
use uuid::Uuid;

use crate::domain::UserId;
use crate::error::{FeedError, FeedResult};

#[derive(Debug, Clone)]
pub struct RequestContext {
    viewer: Option<UserId>,
    operation_id: String,
    deadline: Option<Instant>,
    cancel: Option<watch::Receiver<bool>>,
}

/// Cancels every context cloned from the one it was created with.
#[derive(Debug)]
pub struct CancelHandle(watch::Sender<bool>);

impl CancelHandle {
    pub fn cancel(&self) {
        let _ = self.0.send(true);
    }
}

impl RequestContext {
    /// Context for an unauthenticated read; all viewer flags resolve to 0.
    pub fn anonymous() -> Self {
        Self {
            viewer: None,
            operation_id: Uuid::new_v4().to_string(),
            deadline: None,
            cancel: None,
        }
    }

    pub fn for_user(user_id: impl Into<UserId>) -> Self {
        let user_id = user_id.into();
        let mut ctx = Self::anonymous();
        if !user_id.is_empty() {
            ctx.viewer = Some(user_id);
        }
        ctx
    }

    pub fn with_operation_id(mut self, operation_id: impl Into<String>) -> Self {
        self.operation_id = operation_id.into();
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn cancellable(mut self) -> (Self, CancelHandle) {
        let (tx, rx) = watch::channel(false);
        self.cancel = Some(rx);
        (self, CancelHandle(tx))
    }

    pub fn viewer(&self) -> Option<&str> {
        self.viewer.as_deref()
    }

    /// Caller identity for operations that need one.
    pub fn require_viewer(&self) -> FeedResult<&str> {
        self.viewer().ok_or(FeedError::Unauthenticated)
    }

    pub fn operation_id(&self) -> &str {
        &self.operation_id
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().map(|rx| *rx.borrow()).unwrap_or(false)
    }

    /// Fail fast when the request is already dead.
    pub fn check(&self) -> FeedResult<()> {
        if self.is_cancelled() {
            return Err(FeedError::Canceled);
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(FeedError::DeadlineExceeded);
            }
        }
        Ok(())
    }

    /// Run a store call under this request's deadline and cancellation.
    pub async fn guard<T, F>(&self, fut: F) -> FeedResult<T>
    where
        F: Future<Output = FeedResult<T>>,
    {
        self.check()?;

        let cancelled = async {
            match self.cancel.clone() {
                Some(mut rx) => loop {
                    let is_set = *rx.borrow_and_update();
                    if is_set {
                        break;
                    }
                    if rx.changed().await.is_err() {
                        // handle dropped without cancelling
                        futures::future::pending::<()>().await;
                    }
                },
                None => futures::future::pending::<()>().await,
            }
        };

        let expired = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => futures::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = cancelled => Err(FeedError::Canceled),
            _ = expired => Err(FeedError::DeadlineExceeded),
            res = fut => res,
        }
    }
}
