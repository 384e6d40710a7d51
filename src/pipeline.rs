//! # Pipeline entry point.
//!
//! [`Pipeline`] wires a [`PipelineConfig`] to concrete collaborators and runs
//! the supervised producer/consumer pair. On success it returns the
//! notification endpoint that was used.
//!
//! ```text
//! PipelineConfig ──► Pipeline::from_config(cfg, engine)
//!                       ├─ KvpSourceClient (kind = "kvp", source.request_template)
//!                       │  or PoxSourceClient (kind = "pox", source.endpoint + request)
//!                       ├─ HttpSink         (notification.endpoint)
//!                       └─ run*() ──► Supervisor::run_until(producer, consumer, stop)
//! ```

use std::future::{pending, Future};
use std::sync::Arc;

use tracing::warn;
use url::Url;

use crate::config::{PipelineConfig, SourceBinding};
use crate::core::{wait_for_shutdown_signal, Supervisor};
use crate::engine::EventFilterEngine;
use crate::error::{PipelineError, SourceError};
use crate::sink::{HttpSink, NotificationSink};
use crate::source::{KvpSourceClient, PoxSourceClient, SourceClient};
use crate::subscribers::Subscribe;
use crate::workers::{ConsumerWorker, ProducerWorker};

/// A configured, ready-to-run feeder pipeline.
pub struct Pipeline {
    cfg: PipelineConfig,
    engine: Arc<dyn EventFilterEngine>,
    source: Arc<dyn SourceClient>,
    sink: Arc<dyn NotificationSink>,
    subscribers: Vec<Arc<dyn Subscribe>>,
}

impl Pipeline {
    /// Builds the HTTP source and sink described by `cfg`.
    pub fn from_config(
        cfg: PipelineConfig,
        engine: Arc<dyn EventFilterEngine>,
    ) -> Result<Self, PipelineError> {
        let client_error = |e: SourceError| PipelineError::Client {
            reason: e.to_string(),
        };
        let timeout = cfg.source.timeout;
        let source: Arc<dyn SourceClient> = match cfg.source.binding()? {
            SourceBinding::Kvp { template } => {
                Arc::new(KvpSourceClient::new(template, timeout).map_err(client_error)?)
            }
            SourceBinding::Pox { endpoint, request } => Arc::new(
                PoxSourceClient::new(endpoint, request, timeout).map_err(client_error)?,
            ),
        };
        let sink = HttpSink::new(&cfg.notification.endpoint, cfg.notification.timeout).map_err(
            |e| PipelineError::Client {
                reason: e.to_string(),
            },
        )?;
        Ok(Self::with_clients(cfg, engine, source, Arc::new(sink)))
    }

    /// Uses the given source and sink instead of the HTTP clients.
    pub fn with_clients(
        cfg: PipelineConfig,
        engine: Arc<dyn EventFilterEngine>,
        source: Arc<dyn SourceClient>,
        sink: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            cfg,
            engine,
            source,
            sink,
            subscribers: Vec::new(),
        }
    }

    /// Adds event subscribers.
    #[must_use]
    pub fn with_subscribers(mut self, subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        self.subscribers.extend(subscribers);
        self
    }

    /// Runs according to the configured run policy.
    pub async fn run(self) -> Result<Url, PipelineError> {
        self.run_until(pending()).await
    }

    /// Runs until the run policy ends it or `stop` completes.
    pub async fn run_until<F>(self, stop: F) -> Result<Url, PipelineError>
    where
        F: Future<Output = ()>,
    {
        self.cfg.validate()?;
        let rule_definition = self.cfg.rule_definition()?;
        let endpoint = self.cfg.notification.endpoint.clone();

        let supervisor = Supervisor::new(self.cfg.supervisor(), self.subscribers);
        let bus = supervisor.bus().clone();
        let producer = ProducerWorker::new(
            self.source,
            Arc::clone(&self.engine),
            self.cfg.sampling_interval,
            bus.clone(),
        );
        let consumer = ConsumerWorker::new(
            self.engine,
            rule_definition,
            self.sink,
            self.cfg.feed_settings(),
            bus,
        );

        supervisor
            .run_until(Arc::new(producer), Arc::new(consumer), stop)
            .await?;
        Ok(endpoint)
    }

    /// Runs until the run policy ends it or the process receives a termination signal.
    pub async fn run_until_signal(self) -> Result<Url, PipelineError> {
        self.run_until(async {
            if let Err(e) = wait_for_shutdown_signal().await {
                warn!(err = %e, "signal handlers unavailable; waiting for run policy");
                pending::<()>().await;
            }
        })
        .await
    }
}
