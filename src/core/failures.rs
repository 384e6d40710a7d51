//! # First-wins failure aggregation.
//!
//! [`FailureAggregator`] is the single append point both workers report to.
//! Appends are serialized by a mutex, so even when both workers fail at the
//! same instant exactly one record is first; that record is the pipeline's
//! reported cause. Later records are kept for inspection only.

use parking_lot::Mutex;

use crate::error::WorkerError;

/// One recorded worker failure.
#[derive(Clone, Debug, PartialEq)]
pub struct FailureRecord {
    /// Worker that reported the failure.
    pub worker: String,
    /// The failure itself.
    pub error: WorkerError,
}

/// Thread-safe, append-only collection of worker failures.
#[derive(Debug, Default)]
pub struct FailureAggregator {
    records: Mutex<Vec<FailureRecord>>,
}

impl FailureAggregator {
    /// Creates an empty aggregator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a failure; returns `true` if it is the first one.
    pub fn record(&self, worker: impl Into<String>, error: WorkerError) -> bool {
        let mut records = self.records.lock();
        records.push(FailureRecord {
            worker: worker.into(),
            error,
        });
        records.len() == 1
    }

    /// Returns the canonical (first) failure, if any.
    pub fn first(&self) -> Option<FailureRecord> {
        self.records.lock().first().cloned()
    }

    /// Returns the first failure that is not an interruption.
    ///
    /// Only the first record is ever canonical; if it is an interruption the
    /// run is reported as stopped, not failed.
    pub fn cause(&self) -> Option<FailureRecord> {
        self.first().filter(|r| !r.error.is_interruption())
    }

    /// Returns every recorded failure in append order.
    pub fn snapshot(&self) -> Vec<FailureRecord> {
        self.records.lock().clone()
    }

    /// Returns the number of recorded failures.
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// Returns `true` if nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_first_failure_wins() {
        let agg = FailureAggregator::new();
        assert!(agg.record("producer", WorkerError::fatal("first")));
        assert!(!agg.record("consumer", WorkerError::fatal("second")));

        let cause = agg.cause().expect("cause");
        assert_eq!(cause.worker, "producer");
        assert_eq!(cause.error, WorkerError::fatal("first"));
        assert_eq!(agg.len(), 2);
    }

    #[test]
    fn test_interruption_first_is_not_a_cause() {
        let agg = FailureAggregator::new();
        agg.record("consumer", WorkerError::Canceled);
        agg.record("producer", WorkerError::fatal("late"));
        assert!(agg.cause().is_none());
        assert_eq!(agg.first().map(|r| r.error), Some(WorkerError::Canceled));
    }

    #[test]
    fn test_concurrent_records_have_exactly_one_winner() {
        let agg = Arc::new(FailureAggregator::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let agg = Arc::clone(&agg);
                std::thread::spawn(move || agg.record(format!("w{i}"), WorkerError::fatal("x")))
            })
            .collect();
        let winners = handles
            .into_iter()
            .map(|h| h.join().expect("thread"))
            .filter(|first| *first)
            .count();
        assert_eq!(winners, 1);
        assert_eq!(agg.len(), 8);
    }
}
