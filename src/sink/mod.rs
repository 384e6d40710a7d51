//! # Notification sink interface.
//!
//! A [`NotificationSink`] accepts one encoded feed document per call.
//! [`HttpSink`] POSTs it to an RSS service's `InsertRSS` operation.

mod http;

use async_trait::async_trait;

use crate::error::SinkError;

pub use http::HttpSink;

/// Acknowledgement returned by a sink.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Ack {
    /// Status code reported by the receiver.
    pub status: u16,
    /// Response body, possibly empty.
    pub body: String,
}

/// # Receiver of encoded notifications.
#[async_trait]
pub trait NotificationSink: Send + Sync + 'static {
    /// Delivers one payload.
    ///
    /// Fails with [`SinkError::Transport`] if the payload was not accepted.
    async fn deliver(&self, payload: String) -> Result<Ack, SinkError>;
}
