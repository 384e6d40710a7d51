//! RSS 2.0 encoding with the `sc` sensor-alert extension.
//!
//! ```xml
//! <rss version="2.0" xmlns:sc="http://iddss-sensor.cdmps.org.au:8080/rssschemas/">
//!   <channel>
//!     <title>..</title><link>..</link><description>..</description><pubDate>..</pubDate>
//!     <item>
//!       <title/><link/><category/><description/><pubDate/><guid/>
//!       <sc:procedure_id/><sc:observedProperty/><sc:featureOfInterest/>
//!       <sc:undershoot/><sc:overshoot/><sc:observation_value/>
//!     </item>
//!   </channel>
//! </rss>
//! ```
//!
//! Absent bounds are omitted. No XML declaration is written.

use std::fmt::Display;

use chrono::{DateTime, Utc};
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;

use crate::error::EncodeError;
use crate::feed::{FeedItem, RssFeed};

/// Namespace of the `sc` extension elements.
pub const SC_NAMESPACE: &str = "http://iddss-sensor.cdmps.org.au:8080/rssschemas/";

const PUB_DATE_FORMAT: &str = "%a, %d %b %Y %H:%M:%S GMT";

/// Serializes `feed` as an indented RSS document.
pub fn encode_feed(feed: &RssFeed) -> Result<String, EncodeError> {
    let mut w = FeedWriter {
        xml: Writer::new_with_indent(Vec::new(), b' ', 2),
    };
    w.start(
        BytesStart::new("rss").with_attributes([("version", "2.0"), ("xmlns:sc", SC_NAMESPACE)]),
    )?;
    w.start(BytesStart::new("channel"))?;
    w.text("title", &feed.title)?;
    w.text("link", feed.link.as_str())?;
    w.text("description", &feed.description)?;
    w.text("pubDate", &pub_date(&feed.date))?;
    for item in &feed.items {
        w.item(item)?;
    }
    w.end("channel")?;
    w.end("rss")?;

    String::from_utf8(w.xml.into_inner()).map_err(xml_error)
}

struct FeedWriter {
    xml: Writer<Vec<u8>>,
}

impl FeedWriter {
    fn start(&mut self, el: BytesStart<'_>) -> Result<(), EncodeError> {
        self.xml.write_event(Event::Start(el)).map_err(xml_error)
    }

    fn end(&mut self, name: &str) -> Result<(), EncodeError> {
        self.xml
            .write_event(Event::End(BytesEnd::new(name)))
            .map_err(xml_error)
    }

    fn text(&mut self, name: &str, content: &str) -> Result<(), EncodeError> {
        self.start(BytesStart::new(name))?;
        self.xml
            .write_event(Event::Text(BytesText::new(content)))
            .map_err(xml_error)?;
        self.end(name)
    }

    fn item(&mut self, item: &FeedItem) -> Result<(), EncodeError> {
        self.start(BytesStart::new("item"))?;
        self.text("title", &item.title)?;
        self.text("link", item.link.as_str())?;
        self.text("category", &item.category)?;
        self.text("description", &item.description)?;
        self.text("pubDate", &pub_date(&item.date))?;
        self.text("guid", &item.guid)?;
        self.text("sc:procedure_id", &item.procedure)?;
        self.text("sc:observedProperty", &item.observed_property)?;
        self.text("sc:featureOfInterest", &item.feature_of_interest)?;
        if let Some(u) = item.undershoot {
            self.text("sc:undershoot", &format_number(u))?;
        }
        if let Some(o) = item.overshoot {
            self.text("sc:overshoot", &format_number(o))?;
        }
        self.text("sc:observation_value", &format_number(item.value))?;
        self.end("item")
    }
}

fn xml_error(e: impl Display) -> EncodeError {
    EncodeError::Xml {
        reason: e.to_string(),
    }
}

fn pub_date(date: &DateTime<Utc>) -> String {
    date.format(PUB_DATE_FORMAT).to_string()
}

/// Formats `v` in US style: grouping separators, at most 3 fraction digits.
///
/// ```
/// use feedvisor::feed::format_number;
///
/// assert_eq!(format_number(4.0), "4");
/// assert_eq!(format_number(1234.5678), "1,234.568");
/// assert_eq!(format_number(-0.5), "-0.5");
/// ```
pub fn format_number(v: f64) -> String {
    if !v.is_finite() {
        return v.to_string();
    }
    let fixed = format!("{:.3}", v.abs());
    let (int, frac) = fixed.split_once('.').unwrap_or((fixed.as_str(), ""));
    let frac = frac.trim_end_matches('0');

    let mut grouped = String::with_capacity(int.len() + int.len() / 3);
    for (i, c) in int.chars().enumerate() {
        if i > 0 && (int.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }

    let negative = v < 0.0 && !(int.trim_start_matches('0').is_empty() && frac.is_empty());
    let sign = if negative { "-" } else { "" };
    if frac.is_empty() {
        format!("{sign}{grouped}")
    } else {
        format!("{sign}{grouped}.{frac}")
    }
}
