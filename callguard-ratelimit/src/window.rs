//! Sliding window of admission timestamps.

use callguard_core::clock::{saturating_add, to_chrono, to_std};
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::time::Duration;

/// Ordered admission times (oldest first) for one logical caller.
///
/// At every evaluation all retained timestamps satisfy
/// `now - timestamp < window`, and the length never exceeds `limit`
/// outside of [`try_admit`](Self::try_admit).
#[derive(Debug, Clone, PartialEq)]
pub struct RateWindow {
    limit: u32,
    window: Duration,
    timestamps: VecDeque<DateTime<Utc>>,
}

impl RateWindow {
    /// Create an empty window.
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit,
            window,
            timestamps: VecDeque::new(),
        }
    }

    /// Create a window hydrated from persisted timestamps.
    ///
    /// Timestamps are sorted; if more than `limit` were persisted only the
    /// newest `limit` are kept.
    pub fn hydrate(limit: u32, window: Duration, mut timestamps: Vec<DateTime<Utc>>) -> Self {
        timestamps.sort();
        let excess = timestamps.len().saturating_sub(limit as usize);
        Self {
            limit,
            window,
            timestamps: timestamps.into_iter().skip(excess).collect(),
        }
    }

    /// Max admissions per window.
    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// Window length.
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Number of retained timestamps.
    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    /// Check if no timestamps are retained.
    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    /// Retained timestamps, oldest first.
    pub fn timestamps(&self) -> Vec<DateTime<Utc>> {
        self.timestamps.iter().copied().collect()
    }

    /// Drop every timestamp with `now - timestamp >= window`.
    ///
    /// Returns the number of timestamps removed.
    pub fn prune(&mut self, now: DateTime<Utc>) -> usize {
        let window = to_chrono(self.window);
        let before = self.timestamps.len();
        while let Some(oldest) = self.timestamps.front() {
            if now.signed_duration_since(*oldest) >= window {
                self.timestamps.pop_front();
            } else {
                break;
            }
        }
        before - self.timestamps.len()
    }

    /// Prune, then admit by appending `now` if the count is below the limit.
    pub fn try_admit(&mut self, now: DateTime<Utc>) -> bool {
        self.prune(now);
        if self.timestamps.len() < self.limit as usize {
            self.timestamps.push_back(now);
            true
        } else {
            false
        }
    }

    /// Undo the most recent admission.
    pub(crate) fn revert_last(&mut self) {
        self.timestamps.pop_back();
    }

    /// Admissions left at `now`.
    pub fn remaining(&mut self, now: DateTime<Utc>) -> u32 {
        self.prune(now);
        self.limit.saturating_sub(self.timestamps.len() as u32)
    }

    /// Time until the oldest timestamp leaves the window, or `None` when
    /// there is room now. A zero limit never frees up and also yields `None`.
    pub fn wait_time(&mut self, now: DateTime<Utc>) -> Option<Duration> {
        self.prune(now);
        if self.limit == 0 || self.timestamps.len() < self.limit as usize {
            return None;
        }
        let oldest = *self.timestamps.front()?;
        let frees_at = saturating_add(oldest, self.window);
        Some(to_std(frees_at.signed_duration_since(now)))
    }

    /// Remove every timestamp.
    pub fn clear(&mut self) {
        self.timestamps.clear();
    }
}
