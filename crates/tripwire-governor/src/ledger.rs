//! Fixed-window budget ledgers.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use tripwire_core::clock::elapsed_between;

/// One budget window: requests and cost accumulated since `window_start`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetLedger {
    pub window_start: DateTime<Utc>,
    pub window: Duration,
    pub request_count: u64,
    pub cumulative_cost: f64,
    pub rejected_count: u64,
}

impl BudgetLedger {
    pub fn new(window: Duration, now: DateTime<Utc>) -> Self {
        Self {
            window_start: now,
            window,
            request_count: 0,
            cumulative_cost: 0.0,
            rejected_count: 0,
        }
    }

    /// Start a fresh window if the current one has ended. Returns true if it rolled.
    pub fn roll(&mut self, now: DateTime<Utc>) -> bool {
        if elapsed_between(self.window_start, now) >= self.window {
            self.window_start = now;
            self.request_count = 0;
            self.cumulative_cost = 0.0;
            self.rejected_count = 0;
            true
        } else {
            false
        }
    }

    /// Seconds until this window rolls over.
    pub fn resets_in(&self, now: DateTime<Utc>) -> Duration {
        self.window
            .saturating_sub(elapsed_between(self.window_start, now))
    }
}

/// A read-only copy of both ledgers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetSnapshot {
    pub request_count: u64,
    pub max_requests: u64,
    pub requests_reset_in_secs: u64,
    pub cumulative_cost: f64,
    pub max_cost: f64,
    pub cost_reset_in_secs: u64,
    pub rejected_requests: u64,
}

impl BudgetSnapshot {
    /// Fraction of the tighter budget already used, in `0.0..=1.0`.
    pub fn utilization(&self) -> f64 {
        let requests = if self.max_requests == 0 {
            1.0
        } else {
            self.request_count as f64 / self.max_requests as f64
        };
        let cost = if self.max_cost <= 0.0 {
            1.0
        } else {
            self.cumulative_cost / self.max_cost
        };
        requests.max(cost).min(1.0)
    }
}
