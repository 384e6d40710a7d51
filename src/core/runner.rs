//! # Run a single worker to completion.
//!
//! Executes one [`Worker`] with its own [`WorkerContext`], publishes lifecycle
//! events to the [`Bus`] and reports failures to the [`FailureAggregator`].
//!
//! ## Event flow
//!
//! ```text
//! Success:
//!   worker.run() → Ok(())            → publish WorkerStopped("completed")
//!
//! Cancellation:
//!   worker.run() → Err(Canceled)     → publish WorkerStopped("interrupted")
//!
//! Failure / panic:
//!   worker.run() → Err(Fatal|Panic)  → publish WorkerFailed
//!                                    → failures.record()
//!                                    → pipeline.cancel()   (sibling is asked to stop)
//! ```
//!
//! ## Rules
//! - Always publishes **exactly one** terminal event: `WorkerStopped` or `WorkerFailed`
//! - The failure is recorded **before** the pipeline token is cancelled, so the
//!   sibling's interruption can never be recorded ahead of the real cause
//! - Panics inside the worker are caught and reported as [`WorkerError::Panicked`]

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio_util::sync::CancellationToken;

use crate::core::FailureAggregator;
use crate::error::WorkerError;
use crate::events::{Bus, Event, EventKind};
use crate::subscribers::panic_message;
use crate::workers::{WorkerContext, WorkerOutcome, WorkerRef};

/// Runs `worker` once and classifies how it ended.
///
/// `pipeline` is the root token shared by all workers; it is cancelled on a
/// non-interruption failure.
pub(crate) async fn run_worker(
    worker: WorkerRef,
    ctx: WorkerContext,
    bus: Bus,
    failures: Arc<FailureAggregator>,
    pipeline: CancellationToken,
) -> WorkerOutcome {
    let name = worker.name().to_string();
    bus.publish(Event::new(EventKind::WorkerStarting).with_worker(name.as_str()));

    let res = match AssertUnwindSafe(worker.run(ctx)).catch_unwind().await {
        Ok(res) => res,
        Err(panic) => Err(WorkerError::Panicked {
            info: panic_message(panic.as_ref()),
        }),
    };

    let outcome = WorkerOutcome::from_result(res);
    match &outcome {
        WorkerOutcome::Completed | WorkerOutcome::Interrupted => {
            bus.publish(
                Event::new(EventKind::WorkerStopped)
                    .with_worker(name.as_str())
                    .with_reason(outcome.as_label()),
            );
        }
        WorkerOutcome::Failed(err) => {
            bus.publish(
                Event::new(EventKind::WorkerFailed)
                    .with_worker(name.as_str())
                    .with_reason(err.to_string()),
            );
            failures.record(name, err.clone());
            pipeline.cancel();
        }
    }
    outcome
}
