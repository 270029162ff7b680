//! Health snapshot types produced by the self-heal supervisor.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// Every check passed.
    Healthy,
    /// At least 75% of checks passed.
    Degraded,
    /// Fewer than 75% of checks passed.
    Unhealthy,
}

impl HealthStatus {
    /// Roll individual check outcomes up into an overall status.
    ///
    /// No checks at all counts as healthy.
    pub fn from_counts(passed: usize, total: usize) -> Self {
        if passed == total {
            Self::Healthy
        } else if passed * 4 >= total * 3 {
            Self::Degraded
        } else {
            Self::Unhealthy
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Unhealthy => "unhealthy",
        }
    }
}

/// Outcome of one health check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    pub name: String,
    pub passed: bool,
    /// The measured value, when the check is numeric.
    pub observed: Option<f64>,
    pub threshold: Option<f64>,
    pub detail: String,
}

impl CheckResult {
    pub fn pass(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            passed: true,
            observed: None,
            threshold: None,
            detail: detail.into(),
        }
    }

    pub fn fail(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            passed: false,
            observed: None,
            threshold: None,
            detail: detail.into(),
        }
    }

    pub fn measured(mut self, observed: f64, threshold: f64) -> Self {
        self.observed = Some(observed);
        self.threshold = Some(threshold);
        self
    }
}

/// The rolled-up result of one health tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthSnapshot {
    pub status: HealthStatus,
    /// Names of the checks that failed on this tick.
    pub failed_checks: Vec<String>,
    pub checks: Vec<CheckResult>,
    /// Consecutive unhealthy ticks up to and including this one.
    pub consecutive_unhealthy: u32,
    pub timestamp: DateTime<Utc>,
}

impl HealthSnapshot {
    /// The snapshot reported before the first tick has run.
    pub fn initial(timestamp: DateTime<Utc>) -> Self {
        Self {
            status: HealthStatus::Healthy,
            failed_checks: Vec::new(),
            checks: Vec::new(),
            consecutive_unhealthy: 0,
            timestamp,
        }
    }
}
