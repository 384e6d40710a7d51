//! Runtime core: orchestration and lifecycle.
//!
//! This module contains the supervised two-worker runtime. The public API is
//! [`Supervisor`] plus the shared primitives the workers build on.
//!
//! Internal modules:
//! - [`runner`]: executes one worker, catches panics, records failures;
//! - [`supervisor`]: gates the producer on the consumer, applies the run policy, joins with grace;
//! - [`window`]: polling windows and the producer's cursor;
//! - [`failures`]: first-wins failure aggregation;
//! - [`shutdown`]: cross-platform shutdown signal handling.

mod failures;
mod runner;
mod shutdown;
mod supervisor;
mod window;

pub use failures::{FailureAggregator, FailureRecord};
pub use shutdown::wait_for_shutdown_signal;
pub use supervisor::{PipelineReport, Supervisor};
pub use window::{epsilon, now_millis, PollCursor, TimeWindow};
