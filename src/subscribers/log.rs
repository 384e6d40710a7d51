//! # LogWriter : forwards pipeline events to `tracing`
//!
//! Maps every [`EventKind`] to one structured `tracing` record. Transient
//! errors (fetch, transform, delivery) are `warn`, fatal worker failures and
//! grace overruns are `error`, everything else is `info`/`debug`.
//!
//! ## Example output (fmt layer)
//! ```text
//! INFO feedvisor: worker starting worker="consumer"
//! INFO feedvisor: rule registered worker="consumer" rule="AirTemperature > 30"
//! INFO feedvisor: cycle completed worker="producer" cycle=1 submitted=2
//! WARN feedvisor: fetch failed worker="producer" cycle=2 err="transport error: ..."
//! INFO feedvisor: notification delivered worker="consumer" event_id="obs-17"
//! ```

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use crate::events::{Event, EventKind};
use crate::subscribers::Subscribe;

/// Event writer subscriber.
#[derive(Default)]
pub struct LogWriter;

impl LogWriter {
    /// Construct a new [`LogWriter`].
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Subscribe for LogWriter {
    async fn on_event(&self, e: &Event) {
        let worker = e.worker.as_deref().unwrap_or("-");
        let reason = e.reason.as_deref().unwrap_or("");
        match e.kind {
            EventKind::ShutdownRequested => info!(target: "feedvisor", "shutdown requested"),
            EventKind::RunDurationElapsed => info!(target: "feedvisor", "run duration elapsed"),
            EventKind::AllStoppedWithin => {
                info!(target: "feedvisor", "all workers stopped within grace")
            }
            EventKind::GraceExceeded => {
                error!(target: "feedvisor", aborted = reason, "grace exceeded")
            }
            EventKind::WorkerStarting => info!(target: "feedvisor", worker, "worker starting"),
            EventKind::WorkerStopped => {
                info!(target: "feedvisor", worker, outcome = reason, "worker stopped")
            }
            EventKind::WorkerFailed => {
                error!(target: "feedvisor", worker, err = reason, "worker failed")
            }
            EventKind::RuleRegistered => {
                info!(target: "feedvisor", worker, rule = reason, "rule registered")
            }
            EventKind::CycleCompleted => info!(
                target: "feedvisor",
                worker,
                cycle = e.cycle.unwrap_or_default(),
                submitted = e.count.unwrap_or_default(),
                window = ?e.window,
                "cycle completed"
            ),
            EventKind::FetchFailed => warn!(
                target: "feedvisor",
                worker,
                cycle = e.cycle.unwrap_or_default(),
                window = ?e.window,
                err = reason,
                "fetch failed"
            ),
            EventKind::TransformFailed => warn!(
                target: "feedvisor",
                worker,
                cycle = e.cycle.unwrap_or_default(),
                err = reason,
                "observation skipped"
            ),
            EventKind::NotificationDelivered => info!(
                target: "feedvisor",
                worker,
                event_id = e.event_id.as_deref().unwrap_or("-"),
                ack = reason,
                "notification delivered"
            ),
            EventKind::DeliveryFailed => warn!(
                target: "feedvisor",
                worker,
                event_id = e.event_id.as_deref().unwrap_or("-"),
                err = reason,
                "notification dropped"
            ),
            EventKind::SubscriberOverflow => {
                debug!(target: "feedvisor", subscriber = worker, reason, "subscriber overflow")
            }
            EventKind::SubscriberPanicked => {
                warn!(target: "feedvisor", subscriber = worker, info = reason, "subscriber panicked")
            }
        }
    }

    fn name(&self) -> &'static str {
        "log_writer"
    }
}
