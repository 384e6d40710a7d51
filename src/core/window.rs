//! # Polling windows and the producer's cursor.
//!
//! The source filters observations with exclusive bounds on both ends
//! (a `during` temporal filter). To request every timestamp exactly once, each
//! window starts 1 ms before the previous window's end:
//!
//! ```text
//! cursor.last = t0
//!   W1 = (t0 - 1ms, t1)      covers [t0, t1 - 1ms]
//!   W2 = (t1 - 1ms, t2)      covers [t1, t2 - 1ms]
//!   W3 = (t2 - 1ms, t3)      covers [t2, t3 - 1ms]
//! ```
//!
//! All instants are truncated to millisecond precision.

use std::time::Duration;

use chrono::{DateTime, SubsecRound, TimeDelta, Utc};

use crate::error::WorkerError;

/// Smallest time unit the source distinguishes (1 ms).
pub fn epsilon() -> TimeDelta {
    TimeDelta::milliseconds(1)
}

/// Returns the current wall-clock time truncated to milliseconds.
pub fn now_millis() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

/// Interval used to request one batch of observations.
///
/// Both bounds are exclusive (see [`TimeWindow::contains`]).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimeWindow {
    begin: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl TimeWindow {
    /// Exclusive lower bound.
    pub fn begin(&self) -> DateTime<Utc> {
        self.begin
    }

    /// Exclusive upper bound.
    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    /// Returns `true` if `t` lies strictly between the bounds.
    pub fn contains(&self, t: DateTime<Utc>) -> bool {
        self.begin < t && t < self.end
    }
}

/// Producer-owned cursor remembering where the previous window ended.
#[derive(Clone, Debug)]
pub struct PollCursor {
    last_window_end: DateTime<Utc>,
}

impl PollCursor {
    /// Creates a cursor whose first window spans `sampling` back from `now`.
    ///
    /// Fails if `sampling` cannot be represented as a calendar duration.
    pub fn starting_at(now: DateTime<Utc>, sampling: Duration) -> Result<Self, WorkerError> {
        let span = TimeDelta::from_std(sampling)
            .map_err(|e| WorkerError::fatal(format!("sampling interval {sampling:?}: {e}")))?;
        let last_window_end = now
            .trunc_subsecs(3)
            .checked_sub_signed(span)
            .ok_or_else(|| WorkerError::fatal(format!("sampling interval {sampling:?} too large")))?;
        Ok(Self { last_window_end })
    }

    /// Returns the end of the most recent window.
    pub fn last_window_end(&self) -> DateTime<Utc> {
        self.last_window_end
    }

    /// Computes the window for a cycle observed at `now`.
    ///
    /// `end` never moves behind the cursor, even if the wall clock does.
    pub fn next_window(&self, now: DateTime<Utc>) -> TimeWindow {
        let end = now.trunc_subsecs(3).max(self.last_window_end);
        TimeWindow {
            begin: self.last_window_end - epsilon(),
            end,
        }
    }

    /// Moves the cursor to the end of `window`.
    pub fn advance(&mut self, window: &TimeWindow) {
        self.last_window_end = window.end;
    }
}
