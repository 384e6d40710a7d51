//! SOS 2.0 POX `GetObservation` client.
//!
//! The configured XML request is used as a template. For every fetch its
//! temporal filters and response format are replaced:
//!
//! ```xml
//! <sos:temporalFilter>
//!   <fes:During>
//!     <fes:ValueReference>phenomenonTime</fes:ValueReference>
//!     <gml:TimePeriod gml:id="tp_1">
//!       <gml:beginPosition>begin</gml:beginPosition>
//!       <gml:endPosition>end</gml:endPosition>
//!     </gml:TimePeriod>
//!   </fes:During>
//! </sos:temporalFilter>
//! <sos:responseFormat>http://www.opengis.net/om/2.0</sos:responseFormat>
//! ```
//!
//! The document is POSTed to the service endpoint and the O&M 2.0 response
//! is decoded.

use std::time::Duration;

use async_trait::async_trait;
use chrono::SecondsFormat;
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use tracing::debug;
use url::Url;

use crate::core::TimeWindow;
use crate::error::SourceError;
use crate::source::om::decode_om_response;
use crate::source::{format_error, ObservationBatch, SourceClient};

const FES_NAMESPACE: &str = "http://www.opengis.net/fes/2.0";
const GML_NAMESPACE: &str = "http://www.opengis.net/gml/3.2";
const OM2_RESPONSE_FORMAT: &str = "http://www.opengis.net/om/2.0";

/// Root children that must follow the temporal filter.
const AFTER_TEMPORAL_FILTER: [&str; 2] = ["featureOfInterest", "spatialFilter"];

/// `GetObservation` over HTTP POST.
pub struct PoxSourceClient {
    client: reqwest::Client,
    endpoint: Url,
    template: String,
}

impl PoxSourceClient {
    /// Creates a client whose requests time out after `timeout`.
    ///
    /// Fails with [`SourceError::Format`] if `template` is not a
    /// `GetObservation` document.
    pub fn new(
        endpoint: Url,
        template: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, SourceError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SourceError::Transport {
                reason: e.to_string(),
            })?;
        Self::with_client(client, endpoint, template)
    }

    /// Creates a client on top of an existing `reqwest` client.
    pub fn with_client(
        client: reqwest::Client,
        endpoint: Url,
        template: impl Into<String>,
    ) -> Result<Self, SourceError> {
        let template = template.into();
        check_root(&template)?;
        Ok(Self {
            client,
            endpoint,
            template,
        })
    }

    /// Builds the request document for `window`.
    pub fn request_body(&self, window: &TimeWindow) -> Result<String, SourceError> {
        render(&self.template, window)
    }
}

#[async_trait]
impl SourceClient for PoxSourceClient {
    async fn fetch(&self, window: &TimeWindow) -> Result<ObservationBatch, SourceError> {
        let body = self.request_body(window)?;
        debug!(endpoint = %self.endpoint, begin = %window.begin(), end = %window.end(), "posting GetObservation");

        let transport = |e: reqwest::Error| SourceError::Transport {
            reason: e.to_string(),
        };
        let response = self
            .client
            .post(self.endpoint.clone())
            .header(CONTENT_TYPE, "application/xml")
            .header(ACCEPT, "application/xml")
            .body(body)
            .send()
            .await
            .map_err(transport)?;
        if !response.status().is_success() {
            return Err(SourceError::Transport {
                reason: format!("HTTP {}", response.status()),
            });
        }
        let text = response.text().await.map_err(transport)?;
        decode_om_response(&text)
    }
}

fn check_root(template: &str) -> Result<(), SourceError> {
    let mut reader = Reader::from_str(template);
    loop {
        match reader.read_event().map_err(xml_error)? {
            Event::Start(el) | Event::Empty(el) => {
                return if el.local_name().as_ref() == b"GetObservation" {
                    Ok(())
                } else {
                    Err(format_error(format!(
                        "request template root is {:?}, expected GetObservation",
                        String::from_utf8_lossy(el.name().as_ref())
                    )))
                };
            }
            Event::Eof => return Err(format_error("request template is empty")),
            _ => {}
        }
    }
}

/// Copies `template`, dropping its temporal filters and response format and
/// inserting the ones for `window`.
fn render(template: &str, window: &TimeWindow) -> Result<String, SourceError> {
    let mut reader = Reader::from_str(template);
    let mut out = RequestWriter {
        xml: Writer::new(Vec::new()),
        prefix: None,
        window,
    };
    let mut depth = 0usize;
    let mut skip_from: Option<usize> = None;
    let mut filter_written = false;

    loop {
        let event = reader.read_event().map_err(xml_error)?;
        match event {
            Event::Eof => break,
            Event::Start(el) => {
                depth += 1;
                if skip_from.is_some() {
                    continue;
                }
                if depth == 1 {
                    out.prefix = prefix_of(&el);
                } else if depth == 2 {
                    let name = el.local_name();
                    if is_replaced(name.as_ref()) {
                        skip_from = Some(depth);
                        continue;
                    }
                    if !filter_written && follows_filter(name.as_ref()) {
                        out.temporal_filter()?;
                        filter_written = true;
                    }
                }
                out.write(Event::Start(el))?;
            }
            Event::Empty(el) => {
                if skip_from.is_some() {
                    continue;
                }
                if depth == 0 {
                    // `<sos:GetObservation .../>`
                    out.prefix = prefix_of(&el);
                    let end = el.to_end().into_owned();
                    out.write(Event::Start(el))?;
                    out.temporal_filter()?;
                    out.response_format()?;
                    out.write(Event::End(end))?;
                    continue;
                }
                if depth == 1 {
                    let name = el.local_name();
                    if is_replaced(name.as_ref()) {
                        continue;
                    }
                    if !filter_written && follows_filter(name.as_ref()) {
                        out.temporal_filter()?;
                        filter_written = true;
                    }
                }
                out.write(Event::Empty(el))?;
            }
            Event::End(el) => {
                if let Some(from) = skip_from {
                    if depth == from {
                        skip_from = None;
                    }
                    depth -= 1;
                    continue;
                }
                if depth == 1 {
                    if !filter_written {
                        out.temporal_filter()?;
                        filter_written = true;
                    }
                    out.response_format()?;
                }
                depth = depth.saturating_sub(1);
                out.write(Event::End(el))?;
            }
            other => {
                if skip_from.is_none() {
                    out.write(other)?;
                }
            }
        }
    }

    String::from_utf8(out.xml.into_inner()).map_err(xml_error)
}

struct RequestWriter<'w> {
    xml: Writer<Vec<u8>>,
    prefix: Option<String>,
    window: &'w TimeWindow,
}

impl RequestWriter<'_> {
    fn write(&mut self, event: Event<'_>) -> Result<(), SourceError> {
        self.xml.write_event(event).map_err(xml_error)
    }

    /// Name of a SOS element, using the template root's prefix.
    fn sos(&self, local: &str) -> String {
        match &self.prefix {
            Some(p) => format!("{p}:{local}"),
            None => local.to_string(),
        }
    }

    fn text(&mut self, el: BytesStart<'_>, content: &str) -> Result<(), SourceError> {
        let end = el.to_end().into_owned();
        self.write(Event::Start(el))?;
        self.write(Event::Text(BytesText::new(content)))?;
        self.write(Event::End(end))
    }

    fn temporal_filter(&mut self) -> Result<(), SourceError> {
        let filter = self.sos("temporalFilter");
        let begin = self
            .window
            .begin()
            .to_rfc3339_opts(SecondsFormat::Millis, true);
        let end = self.window.end().to_rfc3339_opts(SecondsFormat::Millis, true);

        self.write(Event::Start(BytesStart::new(filter.as_str())))?;
        self.write(Event::Start(BytesStart::new("fes:During").with_attributes([
            ("xmlns:fes", FES_NAMESPACE),
            ("xmlns:gml", GML_NAMESPACE),
        ])))?;
        self.text(BytesStart::new("fes:ValueReference"), "phenomenonTime")?;
        self.write(Event::Start(
            BytesStart::new("gml:TimePeriod").with_attributes([("gml:id", "tp_1")]),
        ))?;
        self.text(BytesStart::new("gml:beginPosition"), &begin)?;
        self.text(BytesStart::new("gml:endPosition"), &end)?;
        self.write(Event::End(BytesEnd::new("gml:TimePeriod")))?;
        self.write(Event::End(BytesEnd::new("fes:During")))?;
        self.write(Event::End(BytesEnd::new(filter.as_str())))
    }

    fn response_format(&mut self) -> Result<(), SourceError> {
        let name = self.sos("responseFormat");
        self.text(BytesStart::new(name.as_str()), OM2_RESPONSE_FORMAT)
    }
}

fn is_replaced(local: &[u8]) -> bool {
    local == b"temporalFilter" || local == b"responseFormat"
}

fn follows_filter(local: &[u8]) -> bool {
    AFTER_TEMPORAL_FILTER.iter().any(|n| n.as_bytes() == local)
}

fn prefix_of(el: &BytesStart<'_>) -> Option<String> {
    el.name()
        .prefix()
        .map(|p| String::from_utf8_lossy(p.as_ref()).into_owned())
}

fn xml_error(e: impl std::fmt::Display) -> SourceError {
    format_error(format!("request template: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    use crate::core::PollCursor;

    const TEMPLATE: &str = r#"<sos:GetObservation xmlns:sos="http://www.opengis.net/sos/2.0" service="SOS" version="2.0.0"><sos:procedure>urn:sensor:1</sos:procedure><sos:offering>ws2500</sos:offering><sos:observedProperty>AirTemperature</sos:observedProperty><sos:temporalFilter><fes:TEquals xmlns:fes="http://www.opengis.net/fes/2.0"><fes:ValueReference>phenomenonTime</fes:ValueReference></fes:TEquals></sos:temporalFilter><sos:featureOfInterest>station-7</sos:featureOfInterest><sos:responseFormat>application/json</sos:responseFormat></sos:GetObservation>"#;

    fn window() -> TimeWindow {
        let now = Utc.timestamp_millis_opt(1_400_000_001_000).single().expect("ts");
        PollCursor::starting_at(now, Duration::from_secs(1))
            .expect("cursor")
            .next_window(now)
    }

    fn client(template: &str) -> Result<PoxSourceClient, SourceError> {
        PoxSourceClient::with_client(
            reqwest::Client::new(),
            Url::parse("http://sos.example.org/service/pox").expect("url"),
            template,
        )
    }

    #[test]
    fn test_request_body_carries_window_and_om2_format() {
        let body = client(TEMPLATE)
            .expect("valid template")
            .request_body(&window())
            .expect("renders");

        assert_eq!(body.matches("<sos:temporalFilter>").count(), 1);
        assert!(!body.contains("TEquals"));
        assert!(!body.contains("application/json"));
        assert!(body.contains("<fes:ValueReference>phenomenonTime</fes:ValueReference>"));
        assert!(body.contains("<gml:beginPosition>2014-05-13T16:53:19.999Z</gml:beginPosition>"));
        assert!(body.contains("<gml:endPosition>2014-05-13T16:53:21.000Z</gml:endPosition>"));
        assert!(body.ends_with(
            "<sos:responseFormat>http://www.opengis.net/om/2.0</sos:responseFormat></sos:GetObservation>"
        ));

        let filter = body.find("<sos:temporalFilter>").expect("filter");
        let observed = body.find("<sos:observedProperty>").expect("observedProperty");
        let feature = body.find("<sos:featureOfInterest>").expect("featureOfInterest");
        assert!(observed < filter && filter < feature);
    }

    #[test]
    fn test_empty_template_root_is_expanded() {
        let body = client(r#"<GetObservation service="SOS" version="2.0.0"/>"#)
            .expect("valid template")
            .request_body(&window())
            .expect("renders");
        assert!(body.starts_with(r#"<GetObservation service="SOS" version="2.0.0"><temporalFilter>"#));
        assert!(body.ends_with("</responseFormat></GetObservation>"));
    }

    #[test]
    fn test_template_must_be_get_observation() {
        assert!(matches!(
            client("<sos:DescribeSensor/>"),
            Err(SourceError::Format { .. })
        ));
        assert!(matches!(client(""), Err(SourceError::Format { .. })));
    }
}
