//! # RSS notifications.
//!
//! [`FeedSettings::build`] turns a [`MatchedEvent`] into a one-item
//! [`RssFeed`]; [`encode_feed`] serializes it.
//!
//! ## Example
//! ```rust
//! use feedvisor::feed::FeedSettings;
//! use url::Url;
//!
//! let settings = FeedSettings::new(Url::parse("http://rss.example.org/service").unwrap());
//! assert_eq!(
//!     settings.guid("obs-17").unwrap().as_str(),
//!     "http://rss.example.org/service/rss/#alert=obs-17"
//! );
//! ```

mod encoder;

use chrono::{DateTime, Utc};
use url::Url;

use crate::engine::{Crossing, MatchedEvent};
use crate::error::EncodeError;

pub use encoder::{encode_feed, format_number, SC_NAMESPACE};

/// Default channel title.
pub const DEFAULT_TITLE: &str = "SOS-Event feeder";
/// Default channel description.
pub const DEFAULT_DESCRIPTION: &str = "SOS-Event feeder - alert updates";

/// A feed document (`<rss><channel>`).
#[derive(Clone, Debug, PartialEq)]
pub struct RssFeed {
    /// Channel title.
    pub title: String,
    /// Channel link.
    pub link: Url,
    /// Channel description.
    pub description: String,
    /// Channel publish date.
    pub date: DateTime<Utc>,
    /// Channel items.
    pub items: Vec<FeedItem>,
}

/// One alert item.
#[derive(Clone, Debug, PartialEq)]
pub struct FeedItem {
    /// Item title.
    pub title: String,
    /// Item link.
    pub link: Url,
    /// `overshoot` or `undershoot`.
    pub category: String,
    /// Human-readable summary.
    pub description: String,
    /// Publish date (the observation time).
    pub date: DateTime<Utc>,
    /// Stable identifier.
    pub guid: String,
    /// Producing procedure.
    pub procedure: String,
    /// Observed phenomenon.
    pub observed_property: String,
    /// Observed feature.
    pub feature_of_interest: String,
    /// Lower bound of the rule.
    pub undershoot: Option<f64>,
    /// Upper bound of the rule.
    pub overshoot: Option<f64>,
    /// Observed value.
    pub value: f64,
}

/// Feed envelope shared by every notification.
#[derive(Clone, Debug, PartialEq)]
pub struct FeedSettings {
    /// Notification endpoint; feed link and GUID base.
    pub endpoint: Url,
    /// Channel title.
    pub title: String,
    /// Channel description.
    pub description: String,
}

impl FeedSettings {
    /// Settings with the default title and description.
    pub fn new(endpoint: Url) -> Self {
        Self {
            endpoint,
            title: DEFAULT_TITLE.to_string(),
            description: DEFAULT_DESCRIPTION.to_string(),
        }
    }

    /// Returns `<endpoint>/rss/#alert=<id>`.
    pub fn guid(&self, id: &str) -> Result<Url, EncodeError> {
        let link = format!(
            "{}/rss/#alert={id}",
            self.endpoint.as_str().trim_end_matches('/')
        );
        Url::parse(&link).map_err(|e| EncodeError::InvalidLink {
            link,
            reason: e.to_string(),
        })
    }

    /// Builds the notification for `matched`.
    pub fn build(&self, matched: &MatchedEvent) -> Result<RssFeed, EncodeError> {
        let ev = &matched.event;
        let guid = self.guid(&ev.id)?;
        let category = matched.crossing.as_str();
        let unit = ev.uom.as_deref().map(|u| format!(" {u}")).unwrap_or_default();
        let bound = match matched.crossing {
            Crossing::Overshoot => matched.overshoot,
            Crossing::Undershoot => matched.undershoot,
        };
        let bound = bound.map(|b| format!(" (bound {})", format_number(b))).unwrap_or_default();

        let item = FeedItem {
            title: format!("{} {category} at {}", ev.observed_property, ev.feature_of_interest),
            link: guid.clone(),
            category: category.to_string(),
            description: format!(
                "{} measured {} = {}{unit}{bound}",
                ev.procedure,
                ev.observed_property,
                format_number(ev.value),
            ),
            date: ev.phenomenon_time,
            guid: guid.to_string(),
            procedure: ev.procedure.clone(),
            observed_property: ev.observed_property.clone(),
            feature_of_interest: ev.feature_of_interest.clone(),
            undershoot: matched.undershoot,
            overshoot: matched.overshoot,
            value: ev.value,
        };
        Ok(RssFeed {
            title: self.title.clone(),
            link: self.endpoint.clone(),
            description: self.description.clone(),
            date: ev.phenomenon_time,
            items: vec![item],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    use crate::engine::{RuleId, SensorEvent};

    #[test]
    fn test_build_single_item_feed() {
        let settings = FeedSettings::new(Url::parse("http://rss.example.org/svc/").expect("url"));
        let matched = MatchedEvent {
            rule: RuleId(1),
            event: SensorEvent {
                id: "obs-17".into(),
                procedure: "urn:sensor:1".into(),
                observed_property: "AirTemperature".into(),
                feature_of_interest: "station-7".into(),
                phenomenon_time: Utc.timestamp_millis_opt(0).single().expect("epoch"),
                value: 31.25,
                uom: Some("degC".into()),
            },
            crossing: Crossing::Overshoot,
            overshoot: Some(30.0),
            undershoot: None,
        };

        let feed = settings.build(&matched).expect("feed");
        assert_eq!(feed.title, DEFAULT_TITLE);
        assert_eq!(feed.items.len(), 1);
        let item = &feed.items[0];
        assert_eq!(item.guid, "http://rss.example.org/svc/rss/#alert=obs-17");
        assert_eq!(item.category, "overshoot");
        assert_eq!(item.title, "AirTemperature overshoot at station-7");
        assert_eq!(
            item.description,
            "urn:sensor:1 measured AirTemperature = 31.25 degC (bound 30)"
        );
    }
}
