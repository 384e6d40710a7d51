//! # feedvisor
//!
//! **Feedvisor** polls a Sensor Observation Service on a schedule, feeds the
//! observations into a rule-based event-filtering engine, and relays every
//! matched event as an RSS notification.
//!
//! The heart of the crate is a supervised two-worker pipeline: a producer
//! (periodic fetch-and-submit) and a consumer (rule registration and
//! matched-event relay), started, gated, cancelled and joined by a
//! [`Supervisor`].
//!
//! ## Architecture
//! ### Overview
//! ```text
//!  ┌──────────────┐        submit(SensorEvent)        ┌────────────────────┐
//!  │ProducerWorker│ ─────────────────────────────────►│ EventFilterEngine  │
//!  │ PollCursor   │                                   │ (dispatcher task)  │
//!  └──────┬───────┘                                   └─────────┬──────────┘
//!         │ fetch(TimeWindow)                                   │ callback(MatchedEvent)
//!         ▼                                                     ▼
//!  ┌──────────────┐                                   ┌────────────────────┐
//!  │ SourceClient │                                   │  ConsumerWorker    │
//!  │ (KVP / POX)  │                                   │  mpsc queue        │
//!  └──────────────┘                                   └─────────┬──────────┘
//!                                                               │ deliver(RSS)
//!                                                               ▼
//!                                                     ┌────────────────────┐
//!                                                     │ NotificationSink   │
//!                                                     └────────────────────┘
//!
//! ┌───────────────────────────────────────────────────────────────────┐
//! │  Supervisor                                                       │
//! │  - root CancellationToken (child token per worker)                │
//! │  - FailureAggregator (first failure wins)                         │
//! │  - RunPolicy (Bounded / Unbounded) + join grace                   │
//! │  - Bus ──► listener ──► SubscriberSet ──► LogWriter, custom, ...  │
//! └───────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ### Lifecycle
//! ```text
//! spawn consumer ──► parse + register rule ──► mark_ready
//!                                                 │
//!                                  spawn producer ◄┘
//! loop (producer) {
//!   ├─► window = cursor.next_window(now)
//!   ├─► fetch (cancellable)  ─ Err ─► FetchFailed, continue
//!   ├─► submit observations  ─ bad ─► TransformFailed, skip
//!   ├─► cursor.advance(window), CycleCompleted
//!   └─► sleep(sampling_interval) (cancellable)
//! }
//!
//! exit conditions:
//!   - Bounded run duration elapsed         ─► RunDurationElapsed
//!   - external stop (signal / future)      ─► ShutdownRequested
//!   - fatal failure in either worker       ─► sibling cancelled
//!
//! shutdown: cancel root ─► join both within grace ─► abort stragglers
//! ```
//!
//! ## Features
//! | Area              | Description                                                      | Key types / traits                         |
//! |-------------------|------------------------------------------------------------------|--------------------------------------------|
//! | **Supervision**   | Gate, run policy, failure propagation, grace-bounded join.       | [`Supervisor`], [`RunPolicy`]              |
//! | **Workers**       | Cancellable units run by the supervisor.                         | [`Worker`], [`ProducerWorker`], [`ConsumerWorker`] |
//! | **Collaborators** | Source, engine and sink seams with HTTP / in-process impls.      | [`SourceClient`], [`EventFilterEngine`], [`NotificationSink`] |
//! | **Subscriber API**| Hook into pipeline events (logging, metrics, custom subscribers).| [`Subscribe`], [`LogWriter`]               |
//! | **Errors**        | Typed errors for the pipeline, workers and collaborators.        | [`PipelineError`], [`WorkerError`]         |
//! | **Configuration** | TOML configuration with humantime durations.                     | [`PipelineConfig`], [`SupervisorConfig`]   |
//!
//! ## Example
//! ```rust,no_run
//! use std::sync::Arc;
//! use feedvisor::{LogWriter, Pipeline, PipelineConfig, Subscribe, ThresholdEngine};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let cfg = PipelineConfig::from_file("feedvisor.toml")?;
//!     let engine = Arc::new(ThresholdEngine::new());
//!     let subs: Vec<Arc<dyn Subscribe>> = vec![Arc::new(LogWriter::new())];
//!
//!     let endpoint = Pipeline::from_config(cfg, engine)?
//!         .with_subscribers(subs)
//!         .run_until_signal()
//!         .await?;
//!     println!("notifications were sent to {endpoint}");
//!     Ok(())
//! }
//! ```

mod config;
mod core;
mod error;
mod events;
mod pipeline;
mod subscribers;
mod workers;

pub mod engine;
pub mod feed;
pub mod sink;
pub mod source;

// ---- Public re-exports ----

pub use config::{
    NotificationConfig, PipelineConfig, RuleConfig, RunPolicy, SourceBinding, SourceConfig,
    SourceKind, SupervisorConfig, MAX_RUN_DURATION,
};
pub use crate::core::{
    epsilon, now_millis, wait_for_shutdown_signal, FailureAggregator, FailureRecord,
    PipelineReport, PollCursor, Supervisor, TimeWindow,
};
pub use engine::{EventFilterEngine, MatchedEvent, SensorEvent, ThresholdEngine};
pub use error::{
    ConfigError, EncodeError, EngineError, PipelineError, SinkError, SourceError, WorkerError,
};
pub use events::{Bus, Event, EventKind};
pub use pipeline::Pipeline;
pub use sink::NotificationSink;
pub use source::SourceClient;
pub use subscribers::{LogWriter, Subscribe, SubscriberSet};
pub use workers::{
    ConsumerWorker, ProducerWorker, Worker, WorkerContext, WorkerOutcome, WorkerRef, WorkerReport,
};
