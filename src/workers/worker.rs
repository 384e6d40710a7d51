//! # Worker abstraction.
//!
//! A [`Worker`] is one long-running, cancelable unit of the pipeline. It
//! receives a [`WorkerContext`] carrying its cancellation token and, for
//! workers the supervisor waits on, a one-shot *ready* signal.
//!
//! Workers report how they ended through `Result<(), WorkerError>`:
//! - `Ok(())` → [`WorkerOutcome::Completed`]
//! - `Err(WorkerError::Canceled)` → [`WorkerOutcome::Interrupted`]
//! - any other error → [`WorkerOutcome::Failed`]
//!
//! # Example
//! ```
//! use async_trait::async_trait;
//! use feedvisor::{Worker, WorkerContext, WorkerError};
//!
//! struct Idle;
//!
//! #[async_trait]
//! impl Worker for Idle {
//!     fn name(&self) -> &str { "idle" }
//!
//!     async fn run(&self, mut ctx: WorkerContext) -> Result<(), WorkerError> {
//!         ctx.mark_ready();
//!         ctx.cancelled().await;
//!         Err(WorkerError::Canceled)
//!     }
//! }
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::error::WorkerError;

/// Shared handle to a worker.
pub type WorkerRef = Arc<dyn Worker>;

/// # Asynchronous, cancelable pipeline worker.
#[async_trait]
pub trait Worker: Send + Sync + 'static {
    /// Returns a stable, human-readable worker name.
    fn name(&self) -> &str;

    /// Runs the worker until it finishes, fails, or `ctx` is cancelled.
    ///
    /// Implementations must observe cancellation at every suspension point.
    async fn run(&self, ctx: WorkerContext) -> Result<(), WorkerError>;
}

/// Per-run context handed to a [`Worker`].
#[derive(Debug)]
pub struct WorkerContext {
    token: CancellationToken,
    ready: Option<oneshot::Sender<()>>,
}

impl WorkerContext {
    /// Creates a context without a ready signal.
    pub fn new(token: CancellationToken) -> Self {
        Self { token, ready: None }
    }

    /// Creates a context whose [`mark_ready`](Self::mark_ready) resolves `ready`.
    pub fn with_ready(token: CancellationToken, ready: oneshot::Sender<()>) -> Self {
        Self {
            token,
            ready: Some(ready),
        }
    }

    /// Returns the cancellation token.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Returns `true` once cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Completes when cancellation is requested.
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    /// Signals that startup finished. Only the first call has an effect.
    pub fn mark_ready(&mut self) {
        if let Some(tx) = self.ready.take() {
            let _ = tx.send(());
        }
    }
}

/// How a worker terminated.
#[derive(Clone, Debug, PartialEq)]
pub enum WorkerOutcome {
    /// Returned on its own.
    Completed,
    /// Stopped in answer to cancellation (or aborted after the grace period).
    Interrupted,
    /// Fatal error or panic.
    Failed(WorkerError),
}

impl WorkerOutcome {
    /// Classifies a worker's return value.
    pub fn from_result(res: Result<(), WorkerError>) -> Self {
        match res {
            Ok(()) => WorkerOutcome::Completed,
            Err(e) if e.is_interruption() => WorkerOutcome::Interrupted,
            Err(e) => WorkerOutcome::Failed(e),
        }
    }

    /// Short label used in `WorkerStopped` / `WorkerFailed` events.
    pub fn as_label(&self) -> &'static str {
        match self {
            WorkerOutcome::Completed => "completed",
            WorkerOutcome::Interrupted => "interrupted",
            WorkerOutcome::Failed(_) => "failed",
        }
    }
}

/// Outcome of one worker, as collected by the supervisor.
#[derive(Clone, Debug, PartialEq)]
pub struct WorkerReport {
    /// Worker name.
    pub name: String,
    /// How it ended.
    pub outcome: WorkerOutcome,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_classification() {
        assert_eq!(WorkerOutcome::from_result(Ok(())), WorkerOutcome::Completed);
        assert_eq!(
            WorkerOutcome::from_result(Err(WorkerError::Canceled)),
            WorkerOutcome::Interrupted
        );
        assert_eq!(
            WorkerOutcome::from_result(Err(WorkerError::fatal("x"))),
            WorkerOutcome::Failed(WorkerError::fatal("x"))
        );
    }

    #[tokio::test]
    async fn test_mark_ready_is_idempotent() {
        let (tx, rx) = oneshot::channel();
        let mut ctx = WorkerContext::with_ready(CancellationToken::new(), tx);
        ctx.mark_ready();
        ctx.mark_ready();
        assert!(rx.await.is_ok());
    }
}
