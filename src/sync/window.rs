//! Historical backfill window planning.

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};

/// One bounded, inclusive date range requested from a provider during
/// historical backfill. Consumed once per fetch call; never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl SyncWindow {
    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days()
    }
}

/// Lazy sequence of [`SyncWindow`]s walking newest-first from `today` back
/// to the effective lookback start.
///
/// The effective start is `max(lookback_start, absolute_cap)`; when the cap
/// wins, the truncation is reported via [`WindowPlan::truncated`] rather
/// than silently applied. Every produced window satisfies
/// `end - start <= max_window_days`.
///
/// Being an iterator, a long backfill can be interrupted between chunks
/// without the whole plan ever having been materialized.
#[derive(Debug, Clone)]
pub struct WindowPlan {
    cursor: Option<NaiveDate>,
    floor: NaiveDate,
    max_window_days: i64,
    truncated: bool,
}

impl WindowPlan {
    pub fn new(
        today: NaiveDate,
        lookback_start: NaiveDate,
        max_window_days: u32,
        absolute_cap: NaiveDate,
    ) -> Self {
        let floor = lookback_start.max(absolute_cap);
        Self {
            cursor: (floor <= today).then_some(today),
            floor,
            max_window_days: i64::from(max_window_days.max(1)),
            truncated: absolute_cap > lookback_start,
        }
    }

    /// The date the plan actually walks back to.
    pub fn effective_start(&self) -> NaiveDate {
        self.floor
    }

    /// True when the configured absolute cap shortened the requested
    /// lookback.
    pub fn truncated(&self) -> bool {
        self.truncated
    }
}

impl Iterator for WindowPlan {
    type Item = SyncWindow;

    fn next(&mut self) -> Option<SyncWindow> {
        let end = self.cursor?;
        let start = self.floor.max(end - Duration::days(self.max_window_days));
        self.cursor = (start > self.floor).then(|| start - Duration::days(1));
        Some(SyncWindow { start, end })
    }
}
