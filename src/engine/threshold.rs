//! # In-process threshold engine.
//!
//! Submitted events go through an unbounded queue to a dispatcher task, which
//! evaluates them against the rules registered **at dispatch time** and calls
//! the matching callbacks. Callbacks run outside the rule lock, so a callback
//! may register or unregister rules.
//!
//! The dispatcher stops when the engine is dropped.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::engine::{
    EventFilterEngine, FilterRule, MatchCallback, MatchedEvent, RuleId, SensorEvent,
};
use crate::error::EngineError;
use crate::subscribers::panic_message;

struct Registered {
    id: RuleId,
    rule: FilterRule,
    callback: MatchCallback,
}

type Rules = Arc<RwLock<Vec<Registered>>>;

/// Threshold-crossing engine backed by a Tokio dispatcher task.
pub struct ThresholdEngine {
    rules: Rules,
    tx: mpsc::UnboundedSender<SensorEvent>,
    next_id: AtomicU64,
}

impl ThresholdEngine {
    /// Creates the engine and spawns its dispatcher.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new() -> Self {
        let rules: Rules = Arc::new(RwLock::new(Vec::new()));
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(dispatch(Arc::clone(&rules), rx));
        Self {
            rules,
            tx,
            next_id: AtomicU64::new(1),
        }
    }

    /// Returns the number of registered rules.
    pub fn rule_count(&self) -> usize {
        self.rules.read().len()
    }
}

async fn dispatch(rules: Rules, mut rx: mpsc::UnboundedReceiver<SensorEvent>) {
    while let Some(event) = rx.recv().await {
        let matched: Vec<(MatchCallback, MatchedEvent)> = rules
            .read()
            .iter()
            .filter_map(|r| {
                r.rule.evaluate(&event).map(|crossing| {
                    let m = MatchedEvent {
                        rule: r.id,
                        event: event.clone(),
                        crossing,
                        overshoot: r.rule.overshoot(),
                        undershoot: r.rule.undershoot(),
                    };
                    (Arc::clone(&r.callback), m)
                })
            })
            .collect();

        for (callback, m) in matched {
            let rule = m.rule;
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| callback(m))) {
                warn!(%rule, info = %panic_message(panic.as_ref()), "match callback panicked");
            }
        }
    }
}

impl EventFilterEngine for ThresholdEngine {
    fn parse_rule(&self, definition: &str) -> Result<FilterRule, EngineError> {
        FilterRule::from_json(definition)
    }

    fn register(&self, rule: FilterRule, callback: MatchCallback) -> Result<RuleId, EngineError> {
        let mut rules = self.rules.write();
        if rules.iter().any(|r| r.rule == rule) {
            return Err(EngineError::RuleConflict {
                rule: rule.to_string(),
            });
        }
        let id = RuleId(self.next_id.fetch_add(1, Ordering::Relaxed));
        debug!(%id, %rule, "rule registered");
        rules.push(Registered { id, rule, callback });
        Ok(id)
    }

    fn unregister(&self, id: RuleId) {
        self.rules.write().retain(|r| r.id != id);
    }

    fn submit(&self, event: SensorEvent) {
        if self.tx.send(event).is_err() {
            warn!("engine dispatcher stopped; event dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use chrono::{TimeZone, Utc};

    use crate::engine::Crossing;

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

    fn collector() -> (MatchCallback, mpsc::UnboundedReceiver<MatchedEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let cb: MatchCallback = Arc::new(move |m| {
            let _ = tx.send(m);
        });
        (cb, rx)
    }

    #[tokio::test]
    async fn test_only_matching_events_reach_callback() {
        let engine = ThresholdEngine::new();
        let rule = engine.parse_rule(r#"{"overshoot": 30.0}"#).expect("rule");
        let (cb, mut rx) = collector();
        let id = engine.register(rule, cb).expect("register");

        engine.submit(event("cold", 10.0));
        engine.submit(event("hot", 35.0));

        let m = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("in time")
            .expect("match");
        assert_eq!(m.event.id, "hot");
        assert_eq!(m.rule, id);
        assert_eq!(m.crossing, Crossing::Overshoot);
        assert_eq!(m.overshoot, Some(30.0));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_equal_rule_conflicts_until_unregistered() {
        let engine = ThresholdEngine::new();
        let def = r#"{"undershoot": 0.0}"#;
        let (cb, _rx) = collector();
        let id = engine
            .register(engine.parse_rule(def).expect("rule"), cb.clone())
            .expect("first registration");

        let err = engine
            .register(engine.parse_rule(def).expect("rule"), cb.clone())
            .expect_err("conflict");
        assert!(matches!(err, EngineError::RuleConflict { .. }));

        engine.unregister(id);
        assert_eq!(engine.rule_count(), 0);
        assert!(engine
            .register(engine.parse_rule(def).expect("rule"), cb)
            .is_ok());
    }
}
