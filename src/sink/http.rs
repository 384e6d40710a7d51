use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use tracing::debug;
use url::Url;

use crate::error::SinkError;
use crate::sink::{Ack, NotificationSink};

/// Delivers RSS documents via HTTP POST to `<endpoint>/InsertRSS`.
pub struct HttpSink {
    client: reqwest::Client,
    url: Url,
}

impl HttpSink {
    /// Creates a sink whose requests time out after `timeout`.
    pub fn new(endpoint: &Url, timeout: Duration) -> Result<Self, SinkError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SinkError::Transport {
                reason: e.to_string(),
            })?;
        Ok(Self::with_client(client, endpoint))
    }

    /// Creates a sink on top of an existing `reqwest` client.
    pub fn with_client(client: reqwest::Client, endpoint: &Url) -> Self {
        Self {
            client,
            url: insert_url(endpoint),
        }
    }

    /// Returns the URL payloads are posted to.
    pub fn url(&self) -> &Url {
        &self.url
    }
}

/// `<endpoint path>/InsertRSS`, with query and fragment dropped.
fn insert_url(endpoint: &Url) -> Url {
    let mut url = endpoint.clone();
    url.set_query(None);
    url.set_fragment(None);
    let path = format!("{}/InsertRSS", url.path().trim_end_matches('/'));
    url.set_path(&path);
    url
}

#[async_trait]
impl NotificationSink for HttpSink {
    async fn deliver(&self, payload: String) -> Result<Ack, SinkError> {
        let transport = |e: reqwest::Error| SinkError::Transport {
            reason: e.to_string(),
        };
        let response = self
            .client
            .post(self.url.clone())
            .header(CONTENT_TYPE, "application/xml")
            .body(payload)
            .send()
            .await
            .map_err(transport)?;

        let status = response.status();
        let body = response.text().await.map_err(transport)?;
        if !status.is_success() {
            return Err(SinkError::Transport {
                reason: format!("HTTP {status}"),
            });
        }
        debug!(url = %self.url, %status, "notification accepted");
        Ok(Ack {
            status: status.as_u16(),
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_url_drops_query() {
        let endpoint = Url::parse("http://rss.example.org/rss-service/?token=x").expect("url");
        assert_eq!(
            insert_url(&endpoint).as_str(),
            "http://rss.example.org/rss-service/InsertRSS"
        );

        let bare = Url::parse("http://rss.example.org").expect("url");
        assert_eq!(insert_url(&bare).as_str(), "http://rss.example.org/InsertRSS");
    }
}
