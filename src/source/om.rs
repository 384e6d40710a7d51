//! O&M 2.0 `GetObservationResponse` decoding.
//!
//! ```xml
//! <sos:GetObservationResponse>
//!   <sos:observationData>
//!     <om:OM_Observation gml:id="o_1">
//!       <gml:identifier>..</gml:identifier>
//!       <om:phenomenonTime>
//!         <gml:TimeInstant gml:id="t_1"><gml:timePosition>..</gml:timePosition></gml:TimeInstant>
//!       </om:phenomenonTime>
//!       <om:procedure xlink:href=".."/>
//!       <om:observedProperty xlink:href=".."/>
//!       <om:featureOfInterest xlink:href=".."/>
//!       <om:result uom="degC">31.5</om:result>
//!     </om:OM_Observation>
//!   </sos:observationData>
//! </sos:GetObservationResponse>
//! ```
//!
//! Elements are matched by local name, so any namespace prefix works. A
//! `gml:TimePeriod` phenomenon time uses its end position, and an
//! `xlink:href="#id"` time reference resolves against earlier time objects.

use std::collections::HashMap;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::error::SourceError;
use crate::source::{fallback_identifier, format_error, parse_instant, Observation, ObservationBatch};

const OBSERVATION: &str = "OM_Observation";

/// Decodes an XML `GetObservationResponse`.
///
/// An `ows:ExceptionReport` or any other root element is a format error for
/// the whole response.
pub(crate) fn decode_om_response(body: &str) -> Result<ObservationBatch, SourceError> {
    let mut reader = Reader::from_str(body);
    reader.config_mut().trim_text(true);

    let mut doc = Document::default();
    loop {
        let event = reader
            .read_event()
            .map_err(|e| format_error(format!("xml: {e}")))?;
        match event {
            Event::Start(el) => {
                doc.open(&el)?;
                doc.path.push(local_name(&el));
            }
            Event::Empty(el) => {
                doc.open(&el)?;
            }
            Event::Text(t) => {
                let text = t
                    .unescape()
                    .map_err(|e| format_error(format!("xml: {e}")))?;
                doc.text(text.trim());
            }
            Event::End(_) => doc.close(),
            Event::Eof => break,
            _ => {}
        }
    }
    doc.finish()
}

#[derive(Default)]
struct Document {
    path: Vec<String>,
    root: Option<Root>,
    exception: Vec<String>,
    times: HashMap<String, String>,
    time_id: Option<String>,
    current: Option<Draft>,
    batch: ObservationBatch,
}

#[derive(PartialEq)]
enum Root {
    Response,
    Exception,
}

impl Document {
    fn open(&mut self, el: &BytesStart<'_>) -> Result<(), SourceError> {
        let name = local_name(el);
        if self.root.is_none() {
            self.root = Some(match name.as_str() {
                "GetObservationResponse" => Root::Response,
                "ExceptionReport" => Root::Exception,
                other => return Err(format_error(format!("unexpected root element {other:?}"))),
            });
            return Ok(());
        }
        if name == "TimeInstant" || name == "TimePeriod" {
            self.time_id = attr(el, b"id");
        }
        if name == OBSERVATION {
            self.current = Some(Draft {
                gml_id: attr(el, b"id"),
                ..Draft::default()
            });
            return Ok(());
        }

        let at_top = self.ancestor(0) == Some(OBSERVATION);
        if let Some(draft) = self.current.as_mut().filter(|_| at_top) {
            let href = attr(el, b"href");
            match name.as_str() {
                "procedure" => draft.procedure = href.unwrap_or_default(),
                "observedProperty" => draft.observed_property = href.unwrap_or_default(),
                "featureOfInterest" => draft.feature_of_interest = href.unwrap_or_default(),
                "phenomenonTime" => {
                    draft.time_ref = href.map(|h| h.trim_start_matches('#').to_string());
                }
                "result" => draft.uom = attr(el, b"uom"),
                _ => {}
            }
        }
        Ok(())
    }

    fn text(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        let Some(tail) = self.path.last().map(String::as_str) else {
            return;
        };
        if self.root == Some(Root::Exception) {
            if tail == "ExceptionText" {
                self.exception.push(text.to_string());
            }
            return;
        }
        let is_position = matches!(tail, "timePosition" | "endPosition");
        if is_position {
            if let Some(id) = &self.time_id {
                self.times.insert(id.clone(), text.to_string());
            }
        }

        let at_top = self.ancestor(1) == Some(OBSERVATION);
        let in_phenomenon_time = self.within("phenomenonTime");
        let in_feature = self.within("featureOfInterest");
        let Some(draft) = self.current.as_mut() else {
            return;
        };
        match tail {
            "identifier" if at_top => draft.identifier = Some(text.to_string()),
            "identifier" if in_feature && draft.feature_of_interest.is_empty() => {
                draft.feature_of_interest = text.to_string();
            }
            "timePosition" | "endPosition" if in_phenomenon_time => {
                draft.time = Some(text.to_string());
            }
            "result" if at_top => draft.value = Some(text.to_string()),
            _ => {}
        }
    }

    fn close(&mut self) {
        match self.path.pop().as_deref() {
            Some(OBSERVATION) => {
                if let Some(draft) = self.current.take() {
                    let decoded = draft.finish(&self.times);
                    self.batch.push(decoded);
                }
            }
            Some("TimeInstant" | "TimePeriod") => self.time_id = None,
            _ => {}
        }
    }

    fn finish(self) -> Result<ObservationBatch, SourceError> {
        match self.root {
            Some(Root::Response) => Ok(self.batch),
            Some(Root::Exception) => Err(format_error(format!(
                "exception report: {}",
                self.exception.join("; ")
            ))),
            None => Err(format_error("empty response")),
        }
    }

    /// Local name `n` levels above the innermost open element.
    fn ancestor(&self, n: usize) -> Option<&str> {
        let idx = self.path.len().checked_sub(n + 1)?;
        self.path.get(idx).map(String::as_str)
    }

    fn within(&self, name: &str) -> bool {
        self.path
            .iter()
            .rev()
            .take_while(|n| n.as_str() != OBSERVATION)
            .any(|n| n == name)
    }
}

#[derive(Default)]
struct Draft {
    gml_id: Option<String>,
    identifier: Option<String>,
    procedure: String,
    observed_property: String,
    feature_of_interest: String,
    time: Option<String>,
    time_ref: Option<String>,
    value: Option<String>,
    uom: Option<String>,
}

impl Draft {
    fn finish(self, times: &HashMap<String, String>) -> Result<Observation, SourceError> {
        let label = self
            .identifier
            .clone()
            .or_else(|| self.gml_id.clone())
            .unwrap_or_default();
        let raw_time = self
            .time
            .or_else(|| self.time_ref.and_then(|r| times.get(&r).cloned()))
            .ok_or_else(|| format_error(format!("observation {label:?}: missing phenomenonTime")))?;
        let phenomenon_time = parse_instant(&raw_time)?;
        let raw_value = self
            .value
            .ok_or_else(|| format_error(format!("observation {label:?}: missing result")))?;
        let value = raw_value.parse::<f64>().map_err(|_| {
            format_error(format!("observation {label:?}: result {raw_value:?} is not numeric"))
        })?;
        let identifier = self
            .identifier
            .unwrap_or_else(|| fallback_identifier(&self.procedure, phenomenon_time));
        Ok(Observation {
            identifier,
            procedure: self.procedure,
            observed_property: self.observed_property,
            feature_of_interest: self.feature_of_interest,
            phenomenon_time,
            value,
            uom: self.uom,
        })
    }
}

fn local_name(el: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(el.local_name().as_ref()).into_owned()
}

fn attr(el: &BytesStart<'_>, local: &[u8]) -> Option<String> {
    el.attributes()
        .flatten()
        .find(|a| a.key.local_name().as_ref() == local)
        .and_then(|a| a.unescape_value().ok().map(|v| v.into_owned()))
}
