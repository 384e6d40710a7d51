//! Threshold filter rules.
//!
//! A rule is a JSON document:
//!
//! ```json
//! { "observedProperty": "AirTemperature", "featureOfInterest": "station-7",
//!   "undershoot": 1.0, "overshoot": 30.0 }
//! ```
//!
//! Identity fields are optional equality filters. At least one bound is
//! required; an event matches when its value is strictly above `overshoot`
//! or strictly below `undershoot`.

use std::fmt;

use serde::Deserialize;

use crate::engine::{Crossing, SensorEvent};
use crate::error::EngineError;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct RuleDocument {
    observed_property: Option<String>,
    procedure: Option<String>,
    feature_of_interest: Option<String>,
    overshoot: Option<f64>,
    undershoot: Option<f64>,
}

/// A parsed, validated threshold rule.
#[derive(Clone, Debug, PartialEq)]
pub struct FilterRule {
    observed_property: Option<String>,
    procedure: Option<String>,
    feature_of_interest: Option<String>,
    overshoot: Option<f64>,
    undershoot: Option<f64>,
}

impl FilterRule {
    /// Parses and validates a JSON rule definition.
    pub fn from_json(definition: &str) -> Result<Self, EngineError> {
        let doc: RuleDocument =
            serde_json::from_str(definition).map_err(|e| EngineError::RuleParse {
                reason: e.to_string(),
            })?;
        let rule = FilterRule {
            observed_property: doc.observed_property,
            procedure: doc.procedure,
            feature_of_interest: doc.feature_of_interest,
            overshoot: doc.overshoot,
            undershoot: doc.undershoot,
        };
        rule.validate()?;
        Ok(rule)
    }

    fn validate(&self) -> Result<(), EngineError> {
        let invalid = |reason: &str| EngineError::RuleParse {
            reason: reason.to_string(),
        };
        match (self.undershoot, self.overshoot) {
            (None, None) => return Err(invalid("rule needs an overshoot or undershoot bound")),
            (Some(u), Some(o)) if u > o => {
                return Err(invalid("undershoot must not exceed overshoot"))
            }
            _ => {}
        }
        if self
            .undershoot
            .iter()
            .chain(self.overshoot.iter())
            .any(|b| !b.is_finite())
        {
            return Err(invalid("bounds must be finite"));
        }
        let filters = [
            &self.observed_property,
            &self.procedure,
            &self.feature_of_interest,
        ];
        if filters
            .iter()
            .any(|f| f.as_deref().is_some_and(|v| v.trim().is_empty()))
        {
            return Err(invalid("filter fields must not be empty"));
        }
        Ok(())
    }

    /// Upper bound, if any.
    pub fn overshoot(&self) -> Option<f64> {
        self.overshoot
    }

    /// Lower bound, if any.
    pub fn undershoot(&self) -> Option<f64> {
        self.undershoot
    }

    /// Returns the bound `event` crosses, or `None` if the rule does not match.
    pub fn evaluate(&self, event: &SensorEvent) -> Option<Crossing> {
        let same = |filter: &Option<String>, actual: &str| {
            filter.as_deref().map_or(true, |f| f == actual)
        };
        if !same(&self.observed_property, &event.observed_property)
            || !same(&self.procedure, &event.procedure)
            || !same(&self.feature_of_interest, &event.feature_of_interest)
        {
            return None;
        }
        match (self.overshoot, self.undershoot) {
            (Some(o), _) if event.value > o => Some(Crossing::Overshoot),
            (_, Some(u)) if event.value < u => Some(Crossing::Undershoot),
            _ => None,
        }
    }
}

impl fmt::Display for FilterRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if let Some(p) = &self.observed_property {
            parts.push(format!("observedProperty={p}"));
        }
        if let Some(p) = &self.procedure {
            parts.push(format!("procedure={p}"));
        }
        if let Some(p) = &self.feature_of_interest {
            parts.push(format!("featureOfInterest={p}"));
        }
        if let Some(u) = self.undershoot {
            parts.push(format!("value<{u}"));
        }
        if let Some(o) = self.overshoot {
            parts.push(format!("value>{o}"));
        }
        f.write_str(&parts.join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn event(property: &str, value: f64) -> SensorEvent {
        SensorEvent {
            id: "o-1".into(),
            procedure: "urn:sensor:1".into(),
            observed_property: property.into(),
            feature_of_interest: "station-7".into(),
            phenomenon_time: Utc.timestamp_millis_opt(0).single().expect("epoch"),
            value,
            uom: None,
        }
    }

    #[test]
    fn test_bounds_and_filters() {
        let rule = FilterRule::from_json(
            r#"{"observedProperty":"AirTemperature","undershoot":1.0,"overshoot":2.0}"#,
        )
        .expect("valid rule");

        assert_eq!(rule.evaluate(&event("AirTemperature", 3.0)), Some(Crossing::Overshoot));
        assert_eq!(rule.evaluate(&event("AirTemperature", 0.5)), Some(Crossing::Undershoot));
        assert_eq!(rule.evaluate(&event("AirTemperature", 2.0)), None);
        assert_eq!(rule.evaluate(&event("Humidity", 3.0)), None);
        assert_eq!(
            rule.to_string(),
            "observedProperty=AirTemperature value<1 value>2"
        );
    }

    #[test]
    fn test_invalid_definitions_are_rejected() {
        for def in [
            "not json",
            "{}",
            r#"{"overshoot": 1.0, "undershoot": 5.0}"#,
            r#"{"overshoot": 1.0, "unknown": true}"#,
            r#"{"overshoot": 1.0, "procedure": " "}"#,
        ] {
            assert!(
                matches!(FilterRule::from_json(def), Err(EngineError::RuleParse { .. })),
                "accepted {def}"
            );
        }
    }
}
