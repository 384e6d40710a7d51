//! # Event-filtering engine interface.
//!
//! The engine accepts a rule definition, accepts submitted [`SensorEvent`]s,
//! and asynchronously invokes a [`MatchCallback`] for every event matching a
//! registered rule. Both workers receive the same engine handle
//! (`Arc<dyn EventFilterEngine>`).
//!
//! ```text
//! ProducerWorker ── submit(SensorEvent) ──► engine ── dispatcher task ──► callback(MatchedEvent)
//!                                                                             │
//!                                                     ConsumerWorker queue ◄──┘
//! ```
//!
//! The engine does **not** replay submissions to rules registered later; the
//! supervisor starts the producer only after the consumer registered its rule.

mod rule;
mod threshold;

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::error::{EngineError, SourceError};
use crate::source::Observation;

pub use rule::FilterRule;
pub use threshold::ThresholdEngine;

/// Callback invoked for every matched event.
///
/// Runs on the engine's own task; it must be fast and must not block.
pub type MatchCallback = Arc<dyn Fn(MatchedEvent) + Send + Sync>;

/// # Rule-based event-filtering engine.
pub trait EventFilterEngine: Send + Sync + 'static {
    /// Parses a rule definition.
    ///
    /// Fails with [`EngineError::RuleParse`] if the definition is invalid.
    fn parse_rule(&self, definition: &str) -> Result<FilterRule, EngineError>;

    /// Registers `rule`; `callback` receives every event it matches.
    ///
    /// Fails with [`EngineError::RuleConflict`] if an equal rule is already registered.
    fn register(&self, rule: FilterRule, callback: MatchCallback) -> Result<RuleId, EngineError>;

    /// Removes a rule. Unknown ids are ignored.
    fn unregister(&self, id: RuleId);

    /// Submits one event for matching (fire-and-forget).
    fn submit(&self, event: SensorEvent);
}

/// Handle of a registered rule.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RuleId(pub(crate) u64);

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rule-{}", self.0)
    }
}

/// The engine's representation of one observation.
#[derive(Clone, Debug, PartialEq)]
pub struct SensorEvent {
    /// Stable identifier of the observation.
    pub id: String,
    /// Procedure (sensor) that produced the value.
    pub procedure: String,
    /// Observed phenomenon.
    pub observed_property: String,
    /// Feature the observation is about.
    pub feature_of_interest: String,
    /// When the phenomenon was observed.
    pub phenomenon_time: DateTime<Utc>,
    /// Measured value.
    pub value: f64,
    /// Unit of measure, if reported.
    pub uom: Option<String>,
}

impl TryFrom<Observation> for SensorEvent {
    type Error = SourceError;

    fn try_from(obs: Observation) -> Result<Self, Self::Error> {
        let required = [
            ("identifier", &obs.identifier),
            ("procedure", &obs.procedure),
            ("observedProperty", &obs.observed_property),
            ("featureOfInterest", &obs.feature_of_interest),
        ];
        if let Some((field, _)) = required.iter().find(|(_, v)| v.trim().is_empty()) {
            return Err(SourceError::Format {
                reason: format!("observation {:?}: empty {field}", obs.identifier),
            });
        }
        if !obs.value.is_finite() {
            return Err(SourceError::Format {
                reason: format!("observation {:?}: non-finite value", obs.identifier),
            });
        }
        Ok(SensorEvent {
            id: obs.identifier,
            procedure: obs.procedure,
            observed_property: obs.observed_property,
            feature_of_interest: obs.feature_of_interest,
            phenomenon_time: obs.phenomenon_time,
            value: obs.value,
            uom: obs.uom,
        })
    }
}

/// Which bound an event crossed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Crossing {
    /// Value above the overshoot bound.
    Overshoot,
    /// Value below the undershoot bound.
    Undershoot,
}

impl Crossing {
    /// Lowercase label (`overshoot` / `undershoot`).
    pub fn as_str(&self) -> &'static str {
        match self {
            Crossing::Overshoot => "overshoot",
            Crossing::Undershoot => "undershoot",
        }
    }
}

/// An event that satisfied a registered rule.
#[derive(Clone, Debug, PartialEq)]
pub struct MatchedEvent {
    /// The rule that matched.
    pub rule: RuleId,
    /// The submitted event.
    pub event: SensorEvent,
    /// Which bound was crossed.
    pub crossing: Crossing,
    /// The rule's overshoot bound, if any.
    pub overshoot: Option<f64>,
    /// The rule's undershoot bound, if any.
    pub undershoot: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn obs(id: &str, value: f64) -> Observation {
        Observation {
            identifier: id.into(),
            procedure: "urn:sensor:1".into(),
            observed_property: "AirTemperature".into(),
            feature_of_interest: "station-7".into(),
            phenomenon_time: Utc.timestamp_millis_opt(0).single().expect("epoch"),
            value,
            uom: Some("degC".into()),
        }
    }

    #[test]
    fn test_transform_keeps_fields() {
        let ev = SensorEvent::try_from(obs("o-1", 21.5)).expect("valid");
        assert_eq!(ev.id, "o-1");
        assert_eq!(ev.value, 21.5);
        assert_eq!(ev.uom.as_deref(), Some("degC"));
    }

    #[test]
    fn test_transform_rejects_bad_observations() {
        assert!(matches!(
            SensorEvent::try_from(obs("", 1.0)),
            Err(SourceError::Format { .. })
        ));
        assert!(matches!(
            SensorEvent::try_from(obs("o-2", f64::NAN)),
            Err(SourceError::Format { .. })
        ));
    }
}
