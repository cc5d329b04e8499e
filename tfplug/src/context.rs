//! Request context carrying cancellation across async boundaries
//!
//! The gRPC service owns a root context that StopProvider cancels. Every RPC
//! receives a child, so long running work (for example retry loops) can
//! notice that Terraform asked the provider to stop.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;

#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

struct ContextInner {
    deadline: Option<Instant>,
    cancelled: watch::Receiver<bool>,
    cancel_tx: watch::Sender<bool>,
    parent: Option<Context>,
}

impl Context {
    pub fn new() -> Self {
        Self::build(None, None)
    }

    fn build(parent: Option<Context>, deadline: Option<Instant>) -> Self {
        let (cancel_tx, cancelled) = watch::channel(false);
        Self {
            inner: Arc::new(ContextInner {
                deadline,
                cancelled,
                cancel_tx,
                parent,
            }),
        }
    }

    /// A child that is cancelled whenever this context is
    pub fn child(&self) -> Self {
        Self::build(Some(self.clone()), self.inner.deadline)
    }

    /// A child that additionally expires after `timeout`
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let deadline = Instant::now() + timeout;
        let deadline = match self.inner.deadline {
            Some(parent) if parent < deadline => parent,
            _ => deadline,
        };
        Self::build(Some(self.clone()), Some(deadline))
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.inner.deadline
    }

    pub fn is_cancelled(&self) -> bool {
        if *self.inner.cancelled.borrow() {
            return true;
        }
        if matches!(self.inner.deadline, Some(deadline) if Instant::now() >= deadline) {
            return true;
        }
        self.inner
            .parent
            .as_ref()
            .is_some_and(Context::is_cancelled)
    }

    pub fn cancel(&self) {
        let _ = self.inner.cancel_tx.send(true);
    }

    /// Resolves once this context or an ancestor is cancelled
    pub async fn cancelled(&self) {
        let mut poll = tokio::time::interval(Duration::from_millis(50));
        while !self.is_cancelled() {
            poll.tick().await;
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}
