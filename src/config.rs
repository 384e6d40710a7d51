//! # Pipeline configuration.
//!
//! [`PipelineConfig`] is loaded from TOML and validated once; durations use
//! `humantime` notation (`"10m"`, `"30s"`, `"1500ms"`).
//!
//! ```toml
//! sampling_interval = "10m"
//! run_duration = "1h"          # omit (or "0s") to run until stopped
//! grace = "30s"
//!
//! [source]
//! request_template = "http://sos.example.org/service?service=SOS&version=2.0.0&request=GetObservation"
//! # or, for the POX binding:
//! # kind = "pox"
//! # endpoint = "http://sos.example.org/service/pox"
//! # request_path = "get-observation.xml"
//!
//! [rule]
//! definition = '{"observedProperty": "AirTemperature", "overshoot": 30.0}'
//!
//! [notification]
//! endpoint = "http://rss.example.org/rss-service"
//! ```
//!
//! # Example
//! ```
//! use std::time::Duration;
//! use feedvisor::{PipelineConfig, RunPolicy};
//!
//! let cfg = PipelineConfig::from_toml_str(r#"
//!     run_duration = "5s"
//!     [source]
//!     request_template = "http://sos.example.org/kvp?service=SOS"
//!     [rule]
//!     definition = '{"overshoot": 1.0}'
//!     [notification]
//!     endpoint = "http://rss.example.org/feed"
//! "#).unwrap();
//!
//! assert_eq!(cfg.sampling_interval, Duration::from_secs(600));
//! assert_eq!(cfg.run_policy(), RunPolicy::Bounded(Duration::from_secs(5)));
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tokio::time::Instant;
use url::Url;

use crate::error::ConfigError;
use crate::feed::{FeedSettings, DEFAULT_DESCRIPTION, DEFAULT_TITLE};

/// How long a pipeline runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunPolicy {
    /// Until externally stopped or a worker fails.
    Unbounded,
    /// For a fixed span, then both workers are cancelled.
    Bounded(Duration),
}

/// Longest accepted `run_duration`.
pub const MAX_RUN_DURATION: Duration = Duration::from_secs(100 * 365 * 86_400);

/// Deadline used when `start + d` is not representable.
const FAR_FUTURE: Duration = Duration::from_secs(30 * 365 * 86_400);

impl RunPolicy {
    /// Deadline for a run started at `start`, if bounded.
    ///
    /// Durations past the clock's range saturate to a far-future instant.
    pub fn deadline(&self, start: Instant) -> Option<Instant> {
        match self {
            RunPolicy::Unbounded => None,
            RunPolicy::Bounded(d) => Some(
                start
                    .checked_add(*d)
                    .unwrap_or_else(|| start + FAR_FUTURE),
            ),
        }
    }
}

/// Settings the [`Supervisor`](crate::Supervisor) needs.
#[derive(Clone, Debug)]
pub struct SupervisorConfig {
    /// Run policy.
    pub run: RunPolicy,
    /// Maximum time to wait for workers after cancellation before aborting them.
    pub grace: Duration,
    /// Capacity of the event bus channel.
    pub bus_capacity: usize,
}

impl Default for SupervisorConfig {
    /// - `run = Unbounded`
    /// - `grace = 30s`
    /// - `bus_capacity = 1024`
    fn default() -> Self {
        Self {
            run: RunPolicy::Unbounded,
            grace: default_grace(),
            bus_capacity: default_bus_capacity(),
        }
    }
}

/// `GetObservation` binding spoken by the source.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// HTTP GET on a KVP request template.
    #[default]
    Kvp,
    /// HTTP POST of an XML request template.
    Pox,
}

/// Observation source section.
///
/// `kind = "kvp"` (the default) needs `request_template`; `kind = "pox"`
/// needs `endpoint` and exactly one of `request` or `request_path`.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceConfig {
    /// Binding.
    #[serde(default)]
    pub kind: SourceKind,
    /// KVP `GetObservation` request template.
    #[serde(default)]
    pub request_template: Option<Url>,
    /// POX service endpoint.
    #[serde(default)]
    pub endpoint: Option<Url>,
    /// Inline XML `GetObservation` template.
    #[serde(default)]
    pub request: Option<String>,
    /// File containing the XML `GetObservation` template.
    #[serde(default)]
    pub request_path: Option<PathBuf>,
    /// HTTP timeout per fetch.
    #[serde(default = "default_http_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

/// Resolved source settings, ready to build a client from.
#[derive(Clone, Debug, PartialEq)]
pub enum SourceBinding {
    /// KVP request template.
    Kvp {
        /// Request template.
        template: Url,
    },
    /// POX endpoint and XML request template.
    Pox {
        /// Service endpoint.
        endpoint: Url,
        /// Request document.
        request: String,
    },
}

impl SourceConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        match self.kind {
            SourceKind::Kvp => required(&self.request_template, "source.request_template").map(drop),
            SourceKind::Pox => {
                required(&self.endpoint, "source.endpoint")?;
                match (&self.request, &self.request_path) {
                    (Some(_), Some(_)) => Err(ConfigError::Invalid {
                        field: "source",
                        reason: "set either `request` or `request_path`, not both".into(),
                    }),
                    (None, None) => Err(ConfigError::Invalid {
                        field: "source",
                        reason: "`kind = \"pox\"` needs `request` or `request_path`".into(),
                    }),
                    _ => Ok(()),
                }
            }
        }
    }

    /// Resolves the binding, reading `request_path` if configured.
    pub fn binding(&self) -> Result<SourceBinding, ConfigError> {
        self.validate()?;
        match self.kind {
            SourceKind::Kvp => Ok(SourceBinding::Kvp {
                template: required(&self.request_template, "source.request_template")?.clone(),
            }),
            SourceKind::Pox => {
                let endpoint = required(&self.endpoint, "source.endpoint")?.clone();
                let request = match (&self.request, &self.request_path) {
                    (Some(inline), _) => inline.clone(),
                    (None, Some(path)) => read_file(path)?,
                    (None, None) => return Err(ConfigError::Invalid {
                        field: "source",
                        reason: "`kind = \"pox\"` needs `request` or `request_path`".into(),
                    }),
                };
                Ok(SourceBinding::Pox { endpoint, request })
            }
        }
    }
}

fn required<'a, T>(value: &'a Option<T>, field: &'static str) -> Result<&'a T, ConfigError> {
    value.as_ref().ok_or_else(|| ConfigError::Invalid {
        field,
        reason: "is required".into(),
    })
}

fn read_file(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })
}

/// Filter rule section; exactly one of the fields must be set.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleConfig {
    /// Inline rule definition.
    pub definition: Option<String>,
    /// File containing the rule definition.
    pub path: Option<PathBuf>,
}

/// Notification sink section.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NotificationConfig {
    /// RSS service endpoint.
    pub endpoint: Url,
    /// HTTP timeout per delivery.
    #[serde(default = "default_http_timeout", with = "humantime_serde")]
    pub timeout: Duration,
    /// Channel title.
    #[serde(default = "default_feed_title")]
    pub feed_title: String,
    /// Channel description.
    #[serde(default = "default_feed_description")]
    pub feed_description: String,
}

/// Complete pipeline configuration.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfig {
    /// Observation source.
    pub source: SourceConfig,
    /// Filter rule.
    pub rule: RuleConfig,
    /// Notification sink.
    pub notification: NotificationConfig,
    /// Period between polling cycles.
    #[serde(default = "default_sampling_interval", with = "humantime_serde")]
    pub sampling_interval: Duration,
    /// Fixed run duration; absent or zero means unbounded.
    #[serde(default, with = "humantime_serde")]
    pub run_duration: Option<Duration>,
    /// Join grace period.
    #[serde(default = "default_grace", with = "humantime_serde")]
    pub grace: Duration,
    /// Capacity of the event bus channel.
    #[serde(default = "default_bus_capacity")]
    pub bus_capacity: usize,
}

fn default_http_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_sampling_interval() -> Duration {
    Duration::from_secs(600)
}

fn default_grace() -> Duration {
    Duration::from_secs(30)
}

fn default_bus_capacity() -> usize {
    1024
}

fn default_feed_title() -> String {
    DEFAULT_TITLE.to_string()
}

fn default_feed_description() -> String {
    DEFAULT_DESCRIPTION.to_string()
}

impl PipelineConfig {
    /// Parses and validates a TOML document.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let cfg: PipelineConfig = toml::from_str(s)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reads, parses and validates a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = read_file(path.as_ref())?;
        Self::from_toml_str(&text)
    }

    /// Checks cross-field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sampling_interval.is_zero() {
            return Err(ConfigError::Invalid {
                field: "sampling_interval",
                reason: "must be greater than zero".into(),
            });
        }
        if self.run_duration.is_some_and(|d| d > MAX_RUN_DURATION) {
            return Err(ConfigError::Invalid {
                field: "run_duration",
                reason: "must not exceed 100 years".into(),
            });
        }
        self.source.validate()?;
        match (&self.rule.definition, &self.rule.path) {
            (Some(_), Some(_)) => Err(ConfigError::Invalid {
                field: "rule",
                reason: "set either `definition` or `path`, not both".into(),
            }),
            (None, None) => Err(ConfigError::Invalid {
                field: "rule",
                reason: "one of `definition` or `path` is required".into(),
            }),
            (Some(def), None) if def.trim().is_empty() => Err(ConfigError::Invalid {
                field: "rule.definition",
                reason: "must not be empty".into(),
            }),
            _ => Ok(()),
        }
    }

    /// Returns the rule definition, reading `rule.path` if configured.
    pub fn rule_definition(&self) -> Result<String, ConfigError> {
        match (&self.rule.definition, &self.rule.path) {
            (Some(def), _) => Ok(def.clone()),
            (None, Some(path)) => read_file(path),
            (None, None) => Err(ConfigError::Invalid {
                field: "rule",
                reason: "one of `definition` or `path` is required".into(),
            }),
        }
    }

    /// Run policy derived from `run_duration`.
    pub fn run_policy(&self) -> RunPolicy {
        match self.run_duration {
            Some(d) if !d.is_zero() => RunPolicy::Bounded(d),
            _ => RunPolicy::Unbounded,
        }
    }

    /// Supervisor settings.
    pub fn supervisor(&self) -> SupervisorConfig {
        SupervisorConfig {
            run: self.run_policy(),
            grace: self.grace,
            bus_capacity: self.bus_capacity.max(1),
        }
    }

    /// Feed envelope for notifications.
    pub fn feed_settings(&self) -> FeedSettings {
        FeedSettings {
            endpoint: self.notification.endpoint.clone(),
            title: self.notification.feed_title.clone(),
            description: self.notification.feed_description.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = r#"
        [source]
        request_template = "http://sos.example.org/kvp?service=SOS"
        [notification]
        endpoint = "http://rss.example.org/feed"
    "#;

    fn with(extra_top: &str, rule: &str) -> String {
        format!("{extra_top}\n{BASE}\n[rule]\n{rule}\n")
    }

    #[test]
    fn test_defaults() {
        let cfg = PipelineConfig::from_toml_str(&with("", r#"definition = '{"overshoot": 1}'"#))
            .expect("valid");
        assert_eq!(cfg.sampling_interval, Duration::from_secs(600));
        assert_eq!(cfg.source.timeout, Duration::from_secs(30));
        assert_eq!(cfg.run_policy(), RunPolicy::Unbounded);
        assert_eq!(cfg.notification.feed_title, DEFAULT_TITLE);
        assert_eq!(cfg.supervisor().bus_capacity, 1024);
    }

    #[test]
    fn test_zero_run_duration_is_unbounded() {
        let cfg = PipelineConfig::from_toml_str(&with(
            r#"run_duration = "0s""#,
            r#"definition = '{"overshoot": 1}'"#,
        ))
        .expect("valid");
        assert_eq!(cfg.run_policy(), RunPolicy::Unbounded);
    }

    #[test]
    fn test_invalid_settings_are_rejected() {
        let zero = PipelineConfig::from_toml_str(&with(
            r#"sampling_interval = "0s""#,
            r#"definition = '{"overshoot": 1}'"#,
        ));
        assert!(matches!(
            zero,
            Err(ConfigError::Invalid {
                field: "sampling_interval",
                ..
            })
        ));

        let both = PipelineConfig::from_toml_str(&with(
            "",
            "definition = \"{}\"\npath = \"rule.json\"",
        ));
        assert!(matches!(both, Err(ConfigError::Invalid { field: "rule", .. })));

        let unknown = PipelineConfig::from_toml_str(&with("colour = 1", "definition = \"{}\""));
        assert!(matches!(unknown, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_source_binding_selection() {
        let kvp = PipelineConfig::from_toml_str(&with("", r#"definition = '{"overshoot": 1}'"#))
            .expect("valid");
        assert!(matches!(kvp.source.binding(), Ok(SourceBinding::Kvp { .. })));

        let pox_toml = r#"
            [source]
            kind = "pox"
            endpoint = "http://sos.example.org/service/pox"
            request = '<sos:GetObservation xmlns:sos="http://www.opengis.net/sos/2.0"/>'
            [notification]
            endpoint = "http://rss.example.org/feed"
            [rule]
            definition = '{"overshoot": 1}'
        "#;
        let pox = PipelineConfig::from_toml_str(pox_toml).expect("valid");
        match pox.source.binding().expect("binding") {
            SourceBinding::Pox { endpoint, request } => {
                assert_eq!(endpoint.as_str(), "http://sos.example.org/service/pox");
                assert!(request.starts_with("<sos:GetObservation"));
            }
            other => panic!("unexpected binding: {other:?}"),
        }

        let missing = PipelineConfig::from_toml_str(
            r#"
            [source]
            kind = "pox"
            endpoint = "http://sos.example.org/service/pox"
            [notification]
            endpoint = "http://rss.example.org/feed"
            [rule]
            definition = '{"overshoot": 1}'
        "#,
        );
        assert!(matches!(missing, Err(ConfigError::Invalid { field: "source", .. })));
    }

    #[test]
    fn test_missing_rule_file_is_read_error() {
        let cfg = PipelineConfig::from_toml_str(&with("", r#"path = "/nonexistent/rule.json""#))
            .expect("valid");
        assert!(matches!(cfg.rule_definition(), Err(ConfigError::Read { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_bounded_deadline() {
        let start = Instant::now();
        assert_eq!(
            RunPolicy::Bounded(Duration::from_secs(5)).deadline(start),
            Some(start + Duration::from_secs(5))
        );
        assert_eq!(RunPolicy::Unbounded.deadline(start), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_huge_run_duration_saturates_deadline() {
        let start = Instant::now();
        let deadline = RunPolicy::Bounded(Duration::from_secs(u64::MAX))
            .deadline(start)
            .expect("bounded");
        assert!(deadline >= start + FAR_FUTURE);
    }

    #[test]
    fn test_run_duration_past_limit_is_rejected() {
        let res = PipelineConfig::from_toml_str(&with(
            r#"run_duration = "500000000000y""#,
            r#"definition = '{"overshoot": 1}'"#,
        ));
        assert!(matches!(
            res,
            Err(ConfigError::Invalid {
                field: "run_duration",
                ..
            })
        ));
    }
}
