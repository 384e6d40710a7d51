//! # Consumer: rule registration and matched-event relay.
//!
//! ```text
//! startup:  parse_rule → register(rule, callback → queue)   (any error → Fatal)
//!           mark_ready                                      (producer may start)
//! loop:     select! { cancelled → break, queue.recv() → relay }
//! relay:    FeedSettings::build → encode_feed → sink.deliver
//!           (any error → DeliveryFailed, loop continues)
//! exit:     unregister(rule), pending events are dropped → Err(Canceled)
//!           queue closed without cancellation → Fatal
//! ```
//!
//! The callback runs on the engine's task and only pushes into an unbounded
//! channel, so it never blocks the engine.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::engine::{EventFilterEngine, MatchCallback, MatchedEvent};
use crate::error::WorkerError;
use crate::events::{Bus, Event, EventKind};
use crate::feed::{encode_feed, FeedSettings};
use crate::sink::{Ack, NotificationSink};
use crate::workers::{Worker, WorkerContext};

/// Registers one rule and relays its matches as RSS notifications.
pub struct ConsumerWorker {
    engine: Arc<dyn EventFilterEngine>,
    rule_definition: String,
    sink: Arc<dyn NotificationSink>,
    feed: FeedSettings,
    bus: Bus,
}

impl ConsumerWorker {
    /// Worker name used in events and reports.
    pub const NAME: &'static str = "consumer";

    /// Creates a consumer for `rule_definition`.
    pub fn new(
        engine: Arc<dyn EventFilterEngine>,
        rule_definition: impl Into<String>,
        sink: Arc<dyn NotificationSink>,
        feed: FeedSettings,
        bus: Bus,
    ) -> Self {
        Self {
            engine,
            rule_definition: rule_definition.into(),
            sink,
            feed,
            bus,
        }
    }

    async fn relay(&self, matched: MatchedEvent) {
        let event_id = matched.event.id.clone();
        match self.notify(&matched).await {
            Ok(ack) => self.bus.publish(
                Event::new(EventKind::NotificationDelivered)
                    .with_worker(Self::NAME)
                    .with_event_id(event_id)
                    .with_reason(format!("status {}", ack.status)),
            ),
            Err(reason) => self.bus.publish(
                Event::new(EventKind::DeliveryFailed)
                    .with_worker(Self::NAME)
                    .with_event_id(event_id)
                    .with_reason(reason),
            ),
        }
    }

    async fn notify(&self, matched: &MatchedEvent) -> Result<Ack, String> {
        let feed = self.feed.build(matched).map_err(|e| e.to_string())?;
        let payload = encode_feed(&feed).map_err(|e| e.to_string())?;
        self.sink.deliver(payload).await.map_err(|e| e.to_string())
    }
}

#[async_trait]
impl Worker for ConsumerWorker {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn run(&self, mut ctx: WorkerContext) -> Result<(), WorkerError> {
        let rule = self
            .engine
            .parse_rule(&self.rule_definition)
            .map_err(|e| WorkerError::fatal(e.to_string()))?;
        let description = rule.to_string();

        let (tx, mut rx) = mpsc::unbounded_channel::<MatchedEvent>();
        let callback: MatchCallback = Arc::new(move |m| {
            let _ = tx.send(m);
        });
        let rule_id = self
            .engine
            .register(rule, callback)
            .map_err(|e| WorkerError::fatal(e.to_string()))?;

        ctx.mark_ready();
        self.bus.publish(
            Event::new(EventKind::RuleRegistered)
                .with_worker(Self::NAME)
                .with_reason(description),
        );

        let closed = loop {
            tokio::select! {
                biased;
                _ = ctx.cancelled() => break false,
                next = rx.recv() => match next {
                    Some(matched) => self.relay(matched).await,
                    None => break true,
                },
            }
        };

        self.engine.unregister(rule_id);
        // The engine dropped every sender of the match queue.
        if closed && !ctx.is_cancelled() {
            return Err(WorkerError::fatal("engine closed the match queue"));
        }
        Err(WorkerError::Canceled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use chrono::{TimeZone, Utc};
    use parking_lot::Mutex;
    use tokio::sync::oneshot;
    use tokio_util::sync::CancellationToken;
    use url::Url;

    use crate::engine::{FilterRule, RuleId, SensorEvent, ThresholdEngine};
    use crate::error::{EngineError, SinkError};

    #[derive(Default)]
    struct RecordingSink {
        payloads: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl NotificationSink for RecordingSink {
        async fn deliver(&self, payload: String) -> Result<Ack, SinkError> {
            let mut payloads = self.payloads.lock();
            payloads.push(payload);
            if payloads.len() == 1 {
                return Err(SinkError::Transport {
                    reason: "503".into(),
                });
            }
            Ok(Ack {
                status: 200,
                body: String::new(),
            })
        }
    }

    fn event(id: &str, value: f64) -> SensorEvent {
        SensorEvent {
            id: id.into(),
            procedure: "urn:sensor:1".into(),
            observed_property: "AirTemperature".into(),
            feature_of_interest: "station-7".into(),
            phenomenon_time: Utc.timestamp_millis_opt(0).single().expect("epoch"),
            value,
            uom: None,
        }
    }

    fn consumer(engine: Arc<ThresholdEngine>, rule: &str, sink: Arc<RecordingSink>) -> ConsumerWorker {
        ConsumerWorker::new(
            engine,
            rule,
            sink,
            FeedSettings::new(Url::parse("http://rss.example.org/svc").expect("url")),
            Bus::new(64),
        )
    }

    #[tokio::test]
    async fn test_relays_matches_and_survives_delivery_failure() {
        let engine = Arc::new(ThresholdEngine::new());
        let sink = Arc::new(RecordingSink::default());
        let worker = consumer(engine.clone(), r#"{"overshoot": 30.0}"#, sink.clone());

        let token = CancellationToken::new();
        let (ready_tx, ready_rx) = oneshot::channel();
        let ctx = WorkerContext::with_ready(token.clone(), ready_tx);
        let handle = tokio::spawn(async move { worker.run(ctx).await });

        ready_rx.await.expect("ready");
        engine.submit(event("hot-1", 31.0));
        engine.submit(event("cold", 10.0));
        engine.submit(event("hot-2", 32.0));

        tokio::time::timeout(Duration::from_secs(2), async {
            while sink.payloads.lock().len() < 2 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("both matches relayed");

        token.cancel();
        assert_eq!(handle.await.expect("join"), Err(WorkerError::Canceled));
        assert_eq!(engine.rule_count(), 0);

        let payloads = sink.payloads.lock();
        assert!(payloads[0].contains("#alert=hot-1"));
        assert!(payloads[1].contains("#alert=hot-2"));
    }

    #[tokio::test]
    async fn test_invalid_rule_is_fatal_and_never_ready() {
        let engine = Arc::new(ThresholdEngine::new());
        let worker = consumer(engine, "{}", Arc::new(RecordingSink::default()));
        let (ready_tx, ready_rx) = oneshot::channel();

        let res = worker
            .run(WorkerContext::with_ready(CancellationToken::new(), ready_tx))
            .await;
        assert!(matches!(res, Err(WorkerError::Fatal { .. })));
        assert!(ready_rx.await.is_err());
    }

    /// Accepts the rule but drops its callback right away.
    #[derive(Default)]
    struct DroppingEngine {
        unregistered: Mutex<Vec<RuleId>>,
    }

    impl EventFilterEngine for DroppingEngine {
        fn parse_rule(&self, definition: &str) -> Result<FilterRule, EngineError> {
            FilterRule::from_json(definition)
        }

        fn register(&self, _rule: FilterRule, callback: MatchCallback) -> Result<RuleId, EngineError> {
            drop(callback);
            Ok(RuleId(7))
        }

        fn unregister(&self, id: RuleId) {
            self.unregistered.lock().push(id);
        }

        fn submit(&self, _event: SensorEvent) {}
    }

    #[tokio::test]
    async fn test_closed_match_queue_is_fatal() {
        let engine = Arc::new(DroppingEngine::default());
        let worker = ConsumerWorker::new(
            engine.clone(),
            r#"{"overshoot": 30.0}"#,
            Arc::new(RecordingSink::default()),
            FeedSettings::new(Url::parse("http://rss.example.org/svc").expect("url")),
            Bus::new(64),
        );
        let (ready_tx, ready_rx) = oneshot::channel();

        let res = tokio::time::timeout(
            Duration::from_secs(2),
            worker.run(WorkerContext::with_ready(CancellationToken::new(), ready_tx)),
        )
        .await
        .expect("consumer exits without cancellation");

        assert_eq!(res, Err(WorkerError::fatal("engine closed the match queue")));
        assert!(ready_rx.await.is_ok());
        assert_eq!(engine.unregistered.lock().as_slice(), &[RuleId(7)]);
    }
}
