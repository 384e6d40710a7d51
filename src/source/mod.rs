//! # Observation source interface.
//!
//! A [`SourceClient`] returns every observation whose phenomenon time lies
//! strictly inside a [`TimeWindow`]. Two SOS 2.0 bindings are provided:
//!
//! - [`KvpSourceClient`]: HTTP GET on a KVP request template.
//! - [`PoxSourceClient`]: HTTP POST of an XML `GetObservation` template.
//!
//! A response is decoded observation by observation. An element that cannot
//! be interpreted lands in [`ObservationBatch::rejected`] and the rest of
//! the batch is kept.

mod kvp;
mod om;
mod pox;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::core::TimeWindow;
use crate::error::SourceError;

pub use kvp::KvpSourceClient;
pub use pox::PoxSourceClient;

/// One measurement as returned by the source.
#[derive(Clone, Debug, PartialEq)]
pub struct Observation {
    /// Stable identifier.
    pub identifier: String,
    /// Producing procedure (sensor).
    pub procedure: String,
    /// Observed phenomenon.
    pub observed_property: String,
    /// Feature the observation is about.
    pub feature_of_interest: String,
    /// When the phenomenon was observed.
    pub phenomenon_time: DateTime<Utc>,
    /// Measured value.
    pub value: f64,
    /// Unit of measure.
    pub uom: Option<String>,
}

/// Result of one fetch: decoded observations plus per-element failures.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ObservationBatch {
    /// Observations decoded from the response, in response order.
    pub observations: Vec<Observation>,
    /// One [`SourceError::Format`] per element that could not be decoded.
    pub rejected: Vec<SourceError>,
}

impl ObservationBatch {
    /// Adds one decoded element.
    pub fn push(&mut self, decoded: Result<Observation, SourceError>) {
        match decoded {
            Ok(obs) => self.observations.push(obs),
            Err(e) => self.rejected.push(e),
        }
    }

    /// Number of elements seen, decoded or not.
    pub fn len(&self) -> usize {
        self.observations.len() + self.rejected.len()
    }

    /// Returns `true` if the response carried no elements.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<Vec<Observation>> for ObservationBatch {
    fn from(observations: Vec<Observation>) -> Self {
        Self {
            observations,
            rejected: Vec::new(),
        }
    }
}

impl FromIterator<Result<Observation, SourceError>> for ObservationBatch {
    fn from_iter<I: IntoIterator<Item = Result<Observation, SourceError>>>(iter: I) -> Self {
        let mut batch = Self::default();
        for decoded in iter {
            batch.push(decoded);
        }
        batch
    }
}

/// # Source of observations.
#[async_trait]
pub trait SourceClient: Send + Sync + 'static {
    /// Fetches the observations inside `window` (both bounds exclusive).
    ///
    /// Fails with [`SourceError::Transport`] on network errors and with
    /// [`SourceError::Format`] when the response as a whole cannot be
    /// interpreted. Single undecodable observations are returned in
    /// [`ObservationBatch::rejected`].
    async fn fetch(&self, window: &TimeWindow) -> Result<ObservationBatch, SourceError>;
}

pub(crate) fn format_error(reason: impl Into<String>) -> SourceError {
    SourceError::Format {
        reason: reason.into(),
    }
}

/// Parses an ISO-8601 instant with offset.
pub(crate) fn parse_instant(raw: &str) -> Result<DateTime<Utc>, SourceError> {
    DateTime::parse_from_rfc3339(raw.trim())
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| format_error(format!("phenomenonTime {raw:?}: {e}")))
}

/// Identifier used when the source does not report one.
pub(crate) fn fallback_identifier(procedure: &str, time: DateTime<Utc>) -> String {
    format!("{procedure}/{}", time.timestamp_millis())
}
