//! Error types used by the feeder pipeline, its workers and collaborators.
//!
//! Runtime-level errors:
//! - [`PipelineError`]: the single result a pipeline run reports.
//! - [`WorkerError`]: why a worker stopped (fatal, cancelled, panicked).
//! - [`ConfigError`]: configuration could not be read or is invalid.
//!
//! Collaborator errors:
//! - [`SourceError`]: observation source (`fetch`, transform).
//! - [`EngineError`]: rule parsing / registration.
//! - [`SinkError`]: notification delivery.
//! - [`EncodeError`]: RSS payload encoding.
//!
//! All types provide `as_label` (stable snake_case label for logs/metrics).

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// # Errors reported by a pipeline run.
///
/// A run reports **one** of these at most; transient per-cycle errors never
/// reach this type (they are only visible on the event bus / in logs).
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum PipelineError {
    /// The first fatal failure observed in either worker.
    #[error("worker {worker:?} failed: {error}")]
    WorkerFailed {
        /// Name of the worker that failed first.
        worker: String,
        /// The recorded cause.
        error: WorkerError,
    },

    /// Join grace period was exceeded; the listed workers had to be aborted.
    #[error("join grace {grace:?} exceeded; aborted: {stuck:?}")]
    GraceExceeded {
        /// The configured grace duration.
        grace: Duration,
        /// Names of workers that did not stop in time.
        stuck: Vec<String>,
    },

    /// Configuration could not be loaded or validated.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A collaborator client (HTTP source / sink) could not be built.
    #[error("client setup failed: {reason}")]
    Client {
        /// The underlying error message.
        reason: String,
    },
}

impl PipelineError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use feedvisor::PipelineError;
    /// use std::time::Duration;
    ///
    /// let err = PipelineError::GraceExceeded { grace: Duration::from_secs(5), stuck: vec![] };
    /// assert_eq!(err.as_label(), "pipeline_grace_exceeded");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            PipelineError::WorkerFailed { .. } => "pipeline_worker_failed",
            PipelineError::GraceExceeded { .. } => "pipeline_grace_exceeded",
            PipelineError::Config(_) => "pipeline_config",
            PipelineError::Client { .. } => "pipeline_client",
        }
    }
}

/// # Why a worker stopped with an error.
///
/// Only [`WorkerError::Fatal`] and [`WorkerError::Panicked`] are failures;
/// [`WorkerError::Canceled`] is the graceful answer to a cancellation request.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq)]
pub enum WorkerError {
    /// Non-recoverable error (startup failure, invalid configuration, ...).
    #[error("fatal error: {reason}")]
    Fatal {
        /// The underlying error message.
        reason: String,
    },

    /// Worker stopped because its cancellation token fired.
    #[error("context cancelled")]
    Canceled,

    /// Worker panicked; the panic payload is kept as text.
    #[error("worker panicked: {info}")]
    Panicked {
        /// Panic message, if it could be extracted.
        info: String,
    },
}

impl WorkerError {
    /// Shorthand for [`WorkerError::Fatal`].
    pub fn fatal(reason: impl Into<String>) -> Self {
        WorkerError::Fatal {
            reason: reason.into(),
        }
    }

    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            WorkerError::Fatal { .. } => "worker_fatal",
            WorkerError::Canceled => "worker_canceled",
            WorkerError::Panicked { .. } => "worker_panicked",
        }
    }

    /// Indicates whether this is a benign interruption rather than a failure.
    ///
    /// # Example
    /// ```
    /// use feedvisor::WorkerError;
    ///
    /// assert!(WorkerError::Canceled.is_interruption());
    /// assert!(!WorkerError::fatal("rule rejected").is_interruption());
    /// ```
    pub fn is_interruption(&self) -> bool {
        matches!(self, WorkerError::Canceled)
    }
}

/// # Errors produced by an observation source.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SourceError {
    /// Network failure or non-success status.
    #[error("transport error: {reason}")]
    Transport {
        /// The underlying error message.
        reason: String,
    },

    /// Response (or a single observation) could not be interpreted.
    #[error("format error: {reason}")]
    Format {
        /// The underlying error message.
        reason: String,
    },
}

impl SourceError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            SourceError::Transport { .. } => "source_transport",
            SourceError::Format { .. } => "source_format",
        }
    }
}

/// # Errors produced by the event-filtering engine.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    /// Rule definition is not valid.
    #[error("invalid rule definition: {reason}")]
    RuleParse {
        /// What is wrong with the definition.
        reason: String,
    },

    /// An equivalent filter is already registered.
    #[error("equivalent rule already registered: {rule}")]
    RuleConflict {
        /// Human-readable form of the conflicting rule.
        rule: String,
    },
}

impl EngineError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            EngineError::RuleParse { .. } => "engine_rule_parse",
            EngineError::RuleConflict { .. } => "engine_rule_conflict",
        }
    }
}

/// # Errors produced by a notification sink.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SinkError {
    /// Delivery failed (network error or non-success status).
    #[error("transport error: {reason}")]
    Transport {
        /// The underlying error message.
        reason: String,
    },
}

impl SinkError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            SinkError::Transport { .. } => "sink_transport",
        }
    }
}

/// # Errors produced while building or encoding an RSS payload.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EncodeError {
    /// XML writer failed.
    #[error("xml encoding failed: {reason}")]
    Xml {
        /// The underlying error message.
        reason: String,
    },

    /// Feed/item link or GUID could not be formed.
    #[error("invalid link {link:?}: {reason}")]
    InvalidLink {
        /// The link that was attempted.
        link: String,
        /// Why it was rejected.
        reason: String,
    },
}

impl EncodeError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            EncodeError::Xml { .. } => "encode_xml",
            EncodeError::InvalidLink { .. } => "encode_invalid_link",
        }
    }
}

/// # Errors produced while loading configuration.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A file could not be read.
    #[error("cannot read {path:?}: {source}")]
    Read {
        /// The file that was attempted.
        path: PathBuf,
        /// The I/O error.
        #[source]
        source: std::io::Error,
    },

    /// TOML could not be deserialized.
    #[error("cannot parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// A field has an unacceptable value.
    #[error("invalid `{field}`: {reason}")]
    Invalid {
        /// Field path (e.g. `sampling_interval`).
        field: &'static str,
        /// Why it was rejected.
        reason: String,
    },
}

impl ConfigError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            ConfigError::Read { .. } => "config_read",
            ConfigError::Parse(_) => "config_parse",
            ConfigError::Invalid { .. } => "config_invalid",
        }
    }
}
