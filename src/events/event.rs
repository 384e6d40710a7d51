//! # Runtime events emitted by the supervisor and the feeder workers.
//!
//! The [`EventKind`] enum classifies event types across four categories:
//! - **Supervision events**: run policy and shutdown (stop requested, duration elapsed, grace)
//! - **Worker lifecycle events**: starting, stopped, failed
//! - **Pipeline events**: rule registration, polling cycles, notification delivery
//! - **Subscriber events**: overflow and panics inside subscriber workers
//!
//! The [`Event`] struct carries additional metadata such as timestamps, worker name,
//! reasons, polling windows and event identifiers.
//!
//! ## Ordering guarantees
//! Each event has a globally unique sequence number (`seq`) that increases monotonically.
//! Use `seq` to restore the exact order when events are delivered out of order.
//!
//! ## Example
//! ```rust
//! use feedvisor::{Event, EventKind};
//!
//! let ev = Event::new(EventKind::FetchFailed)
//!     .with_worker("producer")
//!     .with_reason("connection refused")
//!     .with_cycle(3);
//!
//! assert_eq!(ev.kind, EventKind::FetchFailed);
//! assert_eq!(ev.worker.as_deref(), Some("producer"));
//! assert_eq!(ev.cycle, Some(3));
//! ```

use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::SystemTime;

use chrono::{DateTime, Utc};

use crate::core::TimeWindow;

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of runtime events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    // === Subscriber events ===
    /// Subscriber panicked during event processing.
    ///
    /// Sets: `worker` (subscriber name), `reason` (panic message).
    SubscriberPanicked,

    /// Subscriber dropped an event (queue full or worker closed).
    ///
    /// Sets: `worker` (subscriber name), `reason` ("full" / "closed").
    SubscriberOverflow,

    // === Supervision events ===
    /// External stop requested (signal or caller-provided future).
    ShutdownRequested,

    /// Bounded run reached its configured duration.
    RunDurationElapsed,

    /// All workers stopped within the configured grace period.
    AllStoppedWithin,

    /// Grace period exceeded; remaining workers were aborted.
    ///
    /// Sets: `reason` (names of aborted workers).
    GraceExceeded,

    // === Worker lifecycle events ===
    /// Worker task is starting.
    ///
    /// Sets: `worker`.
    WorkerStarting,

    /// Worker finished normally or was interrupted by cancellation.
    ///
    /// Sets: `worker`, `reason` ("completed" / "interrupted").
    WorkerStopped,

    /// Worker terminated with a fatal error or panic.
    ///
    /// Sets: `worker`, `reason`.
    WorkerFailed,

    // === Pipeline events ===
    /// Consumer registered its rule; the producer may start.
    ///
    /// Sets: `worker`, `reason` (rule description).
    RuleRegistered,

    /// Producer finished one polling cycle.
    ///
    /// Sets: `worker`, `cycle`, `window`, `count` (events submitted).
    CycleCompleted,

    /// Fetch failed for one cycle (transient).
    ///
    /// Sets: `worker`, `cycle`, `window`, `reason`.
    FetchFailed,

    /// A single observation could not be turned into an engine event (transient).
    ///
    /// Sets: `worker`, `cycle`, `reason`.
    TransformFailed,

    /// Notification for a matched event was accepted by the sink.
    ///
    /// Sets: `worker`, `event_id`, `reason` (sink acknowledgement).
    NotificationDelivered,

    /// Notification for a matched event could not be encoded or delivered (transient).
    ///
    /// Sets: `worker`, `event_id`, `reason`.
    DeliveryFailed,
}

/// Runtime event with optional metadata.
///
/// - `seq`: monotonic global sequence for ordering
/// - `at`: wall-clock timestamp (for logs)
/// - other optional fields are set depending on the [`EventKind`]
#[derive(Clone, Debug)]
pub struct Event {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Event classification.
    pub kind: EventKind,

    /// Name of the worker (or subscriber), if applicable.
    pub worker: Option<Arc<str>>,
    /// Human-readable reason (errors, acknowledgements, overflow details, ...).
    pub reason: Option<Arc<str>>,
    /// Polling cycle number (starting from 1).
    pub cycle: Option<u64>,
    /// Polling window of the cycle.
    pub window: Option<(DateTime<Utc>, DateTime<Utc>)>,
    /// Number of items (e.g. events submitted in a cycle).
    pub count: Option<u32>,
    /// Identifier of the matched event a notification refers to.
    pub event_id: Option<Arc<str>>,
}

impl Event {
    /// Creates a new event of the given kind with current timestamp and next sequence number.
    pub fn new(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            worker: None,
            reason: None,
            cycle: None,
            window: None,
            count: None,
            event_id: None,
        }
    }

    /// Attaches a worker name.
    #[inline]
    pub fn with_worker(mut self, worker: impl Into<Arc<str>>) -> Self {
        self.worker = Some(worker.into());
        self
    }

    /// Attaches a human-readable reason.
    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Attaches a polling cycle number.
    #[inline]
    pub fn with_cycle(mut self, cycle: u64) -> Self {
        self.cycle = Some(cycle);
        self
    }

    /// Attaches the bounds of a polling window.
    #[inline]
    pub fn with_window(mut self, window: &TimeWindow) -> Self {
        self.window = Some((window.begin(), window.end()));
        self
    }

    /// Attaches an item count (saturates at `u32::MAX`).
    #[inline]
    pub fn with_count(mut self, n: usize) -> Self {
        self.count = Some(u32::try_from(n).unwrap_or(u32::MAX));
        self
    }

    /// Attaches a matched-event identifier.
    #[inline]
    pub fn with_event_id(mut self, id: impl Into<Arc<str>>) -> Self {
        self.event_id = Some(id.into());
        self
    }

    /// Creates a subscriber overflow event.
    #[inline]
    pub fn subscriber_overflow(subscriber: &'static str, reason: &'static str) -> Self {
        Event::new(EventKind::SubscriberOverflow)
            .with_worker(subscriber)
            .with_reason(reason)
    }

    /// Creates a subscriber panic event.
    #[inline]
    pub fn subscriber_panicked(subscriber: &'static str, info: String) -> Self {
        Event::new(EventKind::SubscriberPanicked)
            .with_worker(subscriber)
            .with_reason(info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_is_monotonic() {
        let a = Event::new(EventKind::WorkerStarting);
        let b = Event::new(EventKind::WorkerStopped);
        assert!(b.seq > a.seq);
    }

    #[test]
    fn test_count_saturates() {
        let ev = Event::new(EventKind::CycleCompleted).with_count(usize::MAX);
        assert_eq!(ev.count, Some(u32::MAX));
    }
}
