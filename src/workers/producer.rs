//! # Producer: periodic fetch-and-submit.
//!
//! ```text
//! loop {
//!     cancelled?                        → Ok(())            (Completed)
//!     window = cursor.next_window(now)
//!     select! { fetch(window), cancelled → Err(Canceled) }  (cursor untouched)
//!       Ok(batch)  → submit each transformed observation
//!                    (undecodable or bad observation → TransformFailed, skipped)
//!       Err(e)     → FetchFailed
//!     cursor.advance(window)
//!     CycleCompleted
//!     select! { sleep(sampling), cancelled → Err(Canceled) }
//! }
//! ```
//!
//! A failed cycle never ends the loop.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::core::{now_millis, PollCursor, TimeWindow};
use crate::engine::{EventFilterEngine, SensorEvent};
use crate::error::WorkerError;
use crate::events::{Bus, Event, EventKind};
use crate::source::{ObservationBatch, SourceClient};
use crate::workers::{Worker, WorkerContext};

/// Polls a [`SourceClient`] and submits every observation to the engine.
pub struct ProducerWorker {
    source: Arc<dyn SourceClient>,
    engine: Arc<dyn EventFilterEngine>,
    sampling: Duration,
    bus: Bus,
}

impl ProducerWorker {
    /// Worker name used in events and reports.
    pub const NAME: &'static str = "producer";

    /// Creates a producer polling every `sampling`.
    pub fn new(
        source: Arc<dyn SourceClient>,
        engine: Arc<dyn EventFilterEngine>,
        sampling: Duration,
        bus: Bus,
    ) -> Self {
        Self {
            source,
            engine,
            sampling,
            bus,
        }
    }

    fn submit_batch(&self, cycle: u64, batch: ObservationBatch) -> usize {
        for e in &batch.rejected {
            self.publish_transform_failed(cycle, e.to_string());
        }
        let mut submitted = 0;
        for obs in batch.observations {
            match SensorEvent::try_from(obs) {
                Ok(event) => {
                    self.engine.submit(event);
                    submitted += 1;
                }
                Err(e) => self.publish_transform_failed(cycle, e.to_string()),
            }
        }
        submitted
    }

    fn publish_transform_failed(&self, cycle: u64, reason: String) {
        self.bus.publish(
            Event::new(EventKind::TransformFailed)
                .with_worker(Self::NAME)
                .with_cycle(cycle)
                .with_reason(reason),
        );
    }

    fn publish_fetch_failed(&self, cycle: u64, window: &TimeWindow, reason: String) {
        self.bus.publish(
            Event::new(EventKind::FetchFailed)
                .with_worker(Self::NAME)
                .with_cycle(cycle)
                .with_window(window)
                .with_reason(reason),
        );
    }
}

#[async_trait]
impl Worker for ProducerWorker {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn run(&self, ctx: WorkerContext) -> Result<(), WorkerError> {
        if self.sampling.is_zero() {
            return Err(WorkerError::fatal("sampling interval must be greater than zero"));
        }
        let mut cursor = PollCursor::starting_at(now_millis(), self.sampling)?;
        let mut cycle = 0u64;

        loop {
            if ctx.is_cancelled() {
                return Ok(());
            }
            cycle += 1;
            let window = cursor.next_window(now_millis());

            let fetched = tokio::select! {
                biased;
                _ = ctx.cancelled() => return Err(WorkerError::Canceled),
                res = self.source.fetch(&window) => res,
            };
            let submitted = match fetched {
                Ok(batch) => self.submit_batch(cycle, batch),
                Err(e) => {
                    self.publish_fetch_failed(cycle, &window, e.to_string());
                    0
                }
            };

            cursor.advance(&window);
            self.bus.publish(
                Event::new(EventKind::CycleCompleted)
                    .with_worker(Self::NAME)
                    .with_cycle(cycle)
                    .with_window(&window)
                    .with_count(submitted),
            );

            tokio::select! {
                biased;
                _ = ctx.cancelled() => return Err(WorkerError::Canceled),
                _ = tokio::time::sleep(self.sampling) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use tokio_util::sync::CancellationToken;

    use crate::engine::{FilterRule, MatchCallback, RuleId};
    use crate::error::{EngineError, SourceError};
    use crate::source::Observation;

    /// Records requested windows; fails the second fetch.
    struct FlakySource {
        windows: Mutex<Vec<TimeWindow>>,
    }

    #[async_trait]
    impl SourceClient for FlakySource {
        async fn fetch(&self, window: &TimeWindow) -> Result<ObservationBatch, SourceError> {
            let mut windows = self.windows.lock();
            windows.push(*window);
            if windows.len() == 2 {
                return Err(SourceError::Transport {
                    reason: "connection reset".into(),
                });
            }
            Ok(vec![observation(format!("o-{}", windows.len()), window)].into())
        }
    }

    fn observation(id: String, window: &TimeWindow) -> Observation {
        Observation {
            identifier: id,
            procedure: "urn:sensor:1".into(),
            observed_property: "AirTemperature".into(),
            feature_of_interest: "station-7".into(),
            phenomenon_time: window.end(),
            value: 1.0,
            uom: None,
        }
    }

    /// One good observation, one undecodable element and one with an empty procedure.
    struct MixedSource;

    #[async_trait]
    impl SourceClient for MixedSource {
        async fn fetch(&self, window: &TimeWindow) -> Result<ObservationBatch, SourceError> {
            let mut anonymous = observation("o-3".into(), window);
            anonymous.procedure.clear();
            Ok([
                Ok(observation("o-1".into(), window)),
                Err(SourceError::Format {
                    reason: "observation #1: result \"high\" is not numeric".into(),
                }),
                Ok(anonymous),
            ]
            .into_iter()
            .collect())
        }
    }

    #[derive(Default)]
    struct CountingEngine {
        submitted: Mutex<Vec<String>>,
    }

    impl EventFilterEngine for CountingEngine {
        fn parse_rule(&self, definition: &str) -> Result<FilterRule, EngineError> {
            FilterRule::from_json(definition)
        }

        fn register(&self, _rule: FilterRule, _cb: MatchCallback) -> Result<RuleId, EngineError> {
            Ok(RuleId(1))
        }

        fn unregister(&self, _id: RuleId) {}

        fn submit(&self, event: SensorEvent) {
            self.submitted.lock().push(event.id);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_fetch_keeps_cursor_advancing() {
        let source = Arc::new(FlakySource {
            windows: Mutex::new(Vec::new()),
        });
        let engine = Arc::new(CountingEngine::default());
        let producer = ProducerWorker::new(
            source.clone(),
            engine.clone(),
            Duration::from_secs(1),
            Bus::new(64),
        );
        let token = CancellationToken::new();
        let ctx = WorkerContext::new(token.clone());

        let handle = tokio::spawn(async move { producer.run(ctx).await });
        tokio::time::sleep(Duration::from_millis(3500)).await;
        token.cancel();
        assert_eq!(handle.await.expect("join"), Err(WorkerError::Canceled));

        let windows = source.windows.lock();
        assert_eq!(windows.len(), 4);
        for pair in windows.windows(2) {
            assert_eq!(pair[1].begin(), pair[0].end() - crate::core::epsilon());
        }
        assert_eq!(engine.submitted.lock().as_slice(), &["o-1", "o-3", "o-4"]);
    }

    #[tokio::test]
    async fn test_zero_sampling_interval_is_fatal() {
        let producer = ProducerWorker::new(
            Arc::new(FlakySource {
                windows: Mutex::new(Vec::new()),
            }),
            Arc::new(CountingEngine::default()),
            Duration::ZERO,
            Bus::new(8),
        );
        let res = producer.run(WorkerContext::new(CancellationToken::new())).await;
        assert!(matches!(res, Err(WorkerError::Fatal { .. })));
    }

    #[tokio::test]
    async fn test_cancelled_before_first_cycle_completes() {
        let producer = ProducerWorker::new(
            Arc::new(FlakySource {
                windows: Mutex::new(Vec::new()),
            }),
            Arc::new(CountingEngine::default()),
            Duration::from_secs(60),
            Bus::new(8),
        );
        let token = CancellationToken::new();
        token.cancel();
        assert_eq!(producer.run(WorkerContext::new(token)).await, Ok(()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_elements_are_reported_and_rest_submitted() {
        let engine = Arc::new(CountingEngine::default());
        let bus = Bus::new(64);
        let mut rx = bus.subscribe();
        let producer = ProducerWorker::new(
            Arc::new(MixedSource),
            engine.clone(),
            Duration::from_secs(60),
            bus,
        );
        let token = CancellationToken::new();
        let ctx = WorkerContext::new(token.clone());

        let handle = tokio::spawn(async move { producer.run(ctx).await });
        tokio::time::sleep(Duration::from_secs(1)).await;
        token.cancel();
        assert_eq!(handle.await.expect("join"), Err(WorkerError::Canceled));

        assert_eq!(engine.submitted.lock().as_slice(), &["o-1"]);
        let mut transform_failed = Vec::new();
        let mut submitted = None;
        while let Ok(ev) = rx.try_recv() {
            match ev.kind {
                EventKind::TransformFailed => transform_failed.push(ev.reason.clone()),
                EventKind::CycleCompleted => submitted = ev.count,
                _ => {}
            }
        }
        assert_eq!(transform_failed.len(), 2);
        assert_eq!(submitted, Some(1));
    }
}
