//! SOS 2.0 KVP `GetObservation` client.
//!
//! The configured request template already carries `service`, `version`,
//! `request` and any offering/procedure filters. Each fetch appends
//!
//! ```text
//! namespaces=xmlns(om,http://www.opengis.net/om/2.0)
//! temporalFilter=om:phenomenonTime,<begin>/<end>
//! ```
//!
//! and decodes the JSON binding of the response (or O&M 2.0 XML, when the
//! service ignores the `Accept` header).

use std::time::Duration;

use async_trait::async_trait;
use chrono::SecondsFormat;
use reqwest::header::ACCEPT;
use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::core::TimeWindow;
use crate::error::SourceError;
use crate::source::om::decode_om_response;
use crate::source::{
    fallback_identifier, format_error, parse_instant, Observation, ObservationBatch, SourceClient,
};

const OM_NAMESPACE: &str = "xmlns(om,http://www.opengis.net/om/2.0)";

/// `GetObservation` over HTTP GET.
pub struct KvpSourceClient {
    client: reqwest::Client,
    template: Url,
}

impl KvpSourceClient {
    /// Creates a client whose requests time out after `timeout`.
    pub fn new(template: Url, timeout: Duration) -> Result<Self, SourceError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SourceError::Transport {
                reason: e.to_string(),
            })?;
        Ok(Self::with_client(client, template))
    }

    /// Creates a client on top of an existing `reqwest` client.
    pub fn with_client(client: reqwest::Client, template: Url) -> Self {
        Self { client, template }
    }

    /// Builds the request URL for `window`.
    pub fn request_url(&self, window: &TimeWindow) -> Url {
        let filter = format!(
            "om:phenomenonTime,{}/{}",
            window.begin().to_rfc3339_opts(SecondsFormat::Millis, true),
            window.end().to_rfc3339_opts(SecondsFormat::Millis, true),
        );
        let mut url = self.template.clone();
        url.query_pairs_mut()
            .append_pair("namespaces", OM_NAMESPACE)
            .append_pair("temporalFilter", &filter);
        url
    }
}

#[async_trait]
impl SourceClient for KvpSourceClient {
    async fn fetch(&self, window: &TimeWindow) -> Result<ObservationBatch, SourceError> {
        let url = self.request_url(window);
        debug!(%url, "requesting observations");

        let transport = |e: reqwest::Error| SourceError::Transport {
            reason: e.to_string(),
        };
        let response = self
            .client
            .get(url)
            .header(ACCEPT, "application/json, application/xml;q=0.9")
            .send()
            .await
            .map_err(transport)?;
        if !response.status().is_success() {
            return Err(SourceError::Transport {
                reason: format!("HTTP {}", response.status()),
            });
        }
        let body = response.text().await.map_err(transport)?;
        decode_observations(&body)
    }
}

#[derive(Deserialize)]
struct ResponseDocument {
    #[serde(default)]
    observations: Vec<serde_json::Value>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct JsonObservation {
    #[serde(default)]
    identifier: Option<Reference>,
    #[serde(default)]
    procedure: Option<Reference>,
    #[serde(default)]
    observable_property: Option<Reference>,
    #[serde(default)]
    feature_of_interest: Option<Reference>,
    phenomenon_time: JsonTime,
    #[serde(default)]
    result: Option<JsonResult>,
}

/// A reference is a plain string, a `{codespace, value}` code or a feature
/// carrying such an identifier.
#[derive(Deserialize)]
#[serde(untagged)]
enum Reference {
    Plain(String),
    Code { value: String },
    Feature { identifier: Box<Reference> },
}

impl Reference {
    fn into_string(self) -> String {
        match self {
            Reference::Plain(s) | Reference::Code { value: s } => s,
            Reference::Feature { identifier } => identifier.into_string(),
        }
    }
}

/// Instant, or a period whose end instant is used.
#[derive(Deserialize)]
#[serde(untagged)]
enum JsonTime {
    Instant(String),
    Period { end: String },
    Pair([String; 2]),
}

impl JsonTime {
    fn instant(&self) -> &str {
        match self {
            JsonTime::Instant(t) | JsonTime::Period { end: t } => t.as_str(),
            JsonTime::Pair([_, end]) => end.as_str(),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum JsonResult {
    Measure { uom: Option<String>, value: f64 },
    Plain(f64),
}

/// Decodes a `GetObservation` response in the JSON binding, or in O&M 2.0
/// XML when the service answers with XML.
///
/// Each element is decoded on its own; one that cannot be interpreted is
/// returned in [`ObservationBatch::rejected`]. Missing identity fields are
/// left empty for the producer to reject.
pub(crate) fn decode_observations(body: &str) -> Result<ObservationBatch, SourceError> {
    if body.trim_start().starts_with('<') {
        return decode_om_response(body);
    }
    let doc: ResponseDocument =
        serde_json::from_str(body).map_err(|e| format_error(e.to_string()))?;
    Ok(doc
        .observations
        .into_iter()
        .enumerate()
        .map(|(i, element)| {
            serde_json::from_value::<JsonObservation>(element)
                .map_err(|e| format_error(format!("observation #{i}: {e}")))
                .and_then(convert)
        })
        .collect())
}

fn convert(obs: JsonObservation) -> Result<Observation, SourceError> {
    let phenomenon_time = parse_instant(obs.phenomenon_time.instant())?;
    let text = |r: Option<Reference>| r.map(Reference::into_string).unwrap_or_default();
    let procedure = text(obs.procedure);
    let (value, uom) = match obs.result {
        Some(JsonResult::Measure { uom, value }) => (value, uom),
        Some(JsonResult::Plain(value)) => (value, None),
        None => (f64::NAN, None),
    };
    let identifier = match obs.identifier {
        Some(id) => id.into_string(),
        None => fallback_identifier(&procedure, phenomenon_time),
    };
    Ok(Observation {
        identifier,
        procedure,
        observed_property: text(obs.observable_property),
        feature_of_interest: text(obs.feature_of_interest),
        phenomenon_time,
        value,
        uom,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    use crate::core::PollCursor;

    #[test]
    fn test_request_url_appends_temporal_filter() {
        let template =
            Url::parse("http://sos.example.org/service?service=SOS&version=2.0.0&request=GetObservation")
                .expect("url");
        let client = KvpSourceClient::with_client(reqwest::Client::new(), template);

        let now = Utc.timestamp_millis_opt(1_400_000_001_000).single().expect("ts");
        let cursor = PollCursor::starting_at(now, Duration::from_secs(1)).expect("cursor");
        let url = client.request_url(&cursor.next_window(now));

        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert_eq!(pairs[0], ("service".into(), "SOS".into()));
        assert!(pairs.contains(&("namespaces".into(), OM_NAMESPACE.into())));
        assert!(pairs.contains(&(
            "temporalFilter".into(),
            "om:phenomenonTime,2014-05-13T16:53:19.999Z/2014-05-13T16:53:21.000Z".into()
        )));
    }

    #[test]
    fn test_decode_json_binding() {
        let body = r#"{"observations":[
            {"identifier":{"codespace":"http://www.opengis.net/def/nil/OGC/0/unknown","value":"o-1"},
             "procedure":"urn:sensor:1","observableProperty":"AirTemperature",
             "featureOfInterest":{"identifier":{"value":"station-7"}},
             "phenomenonTime":"2014-05-13T16:53:20.500Z",
             "result":{"uom":"degC","value":31.5}},
            {"procedure":"urn:sensor:1","observableProperty":"AirTemperature",
             "featureOfInterest":"station-7","phenomenonTime":"2014-05-13T16:53:20.000Z",
             "result":2.0}
        ]}"#;
        let batch = decode_observations(body).expect("decodes");
        let obs = &batch.observations;

        assert!(batch.rejected.is_empty());
        assert_eq!(obs.len(), 2);
        assert_eq!(obs[0].identifier, "o-1");
        assert_eq!(obs[0].feature_of_interest, "station-7");
        assert_eq!(obs[0].uom.as_deref(), Some("degC"));
        assert_eq!(obs[1].identifier, "urn:sensor:1/1400000000000");
        assert_eq!(obs[1].value, 2.0);
    }

    #[test]
    fn test_bad_element_does_not_discard_the_batch() {
        let body = r#"{"observations":[
            {"identifier":"o-1","procedure":"urn:sensor:1","observableProperty":"AirTemperature",
             "featureOfInterest":"station-7","phenomenonTime":"2014-05-13T16:53:20.000Z",
             "result":{"uom":"degC","value":31.5}},
            {"identifier":"o-2","procedure":"urn:sensor:1","observableProperty":"AirTemperature",
             "featureOfInterest":"station-7","phenomenonTime":{"instant":"nope"},
             "result":2.0},
            {"identifier":"o-3","procedure":"urn:sensor:1","observableProperty":"AirTemperature",
             "featureOfInterest":"station-7",
             "phenomenonTime":{"begin":"2014-05-13T16:50:00.000Z","end":"2014-05-13T16:53:21.000Z"},
             "result":"high"},
            {"identifier":"o-4","procedure":"urn:sensor:1","observableProperty":"AirTemperature",
             "featureOfInterest":"station-7",
             "phenomenonTime":{"begin":"2014-05-13T16:50:00.000Z","end":"2014-05-13T16:53:21.000Z"},
             "result":4.0}
        ]}"#;
        let batch = decode_observations(body).expect("response decodes");

        let ids: Vec<&str> = batch.observations.iter().map(|o| o.identifier.as_str()).collect();
        assert_eq!(ids, ["o-1", "o-4"]);
        assert_eq!(
            batch.observations[1].phenomenon_time.timestamp_millis(),
            1_400_000_001_000
        );
        assert_eq!(batch.rejected.len(), 2);
        assert!(batch.rejected[0].to_string().contains("observation #1"));
        assert!(batch.rejected[1].to_string().contains("observation #2"));
    }

    #[test]
    fn test_xml_body_uses_om_decoder() {
        assert!(matches!(
            decode_observations("<ows:ExceptionReport/>"),
            Err(SourceError::Format { .. })
        ));
        let batch = decode_observations(
            r#"<sos:GetObservationResponse xmlns:sos="http://www.opengis.net/sos/2.0"/>"#,
        )
        .expect("empty response");
        assert!(batch.is_empty());
    }

    #[test]
    fn test_undecodable_body_is_format_error() {
        assert!(matches!(
            decode_observations("not json"),
            Err(SourceError::Format { .. })
        ));
    }
}
