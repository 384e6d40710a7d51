//! # Pipeline workers.
//!
//! - [`Worker`]: the trait the supervisor runs.
//! - [`ProducerWorker`]: polls the source and submits events to the engine.
//! - [`ConsumerWorker`]: registers the rule and relays matched events to the sink.

mod consumer;
mod producer;
mod worker;

pub use consumer::ConsumerWorker;
pub use producer::ProducerWorker;
pub use worker::{Worker, WorkerContext, WorkerOutcome, WorkerRef, WorkerReport};
