//! Circuit breaker state as seen from outside a breaker.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The three breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitStatus {
    /// Calls pass through; failures are counted.
    Closed,
    /// Calls are rejected without being attempted.
    Open,
    /// A bounded number of trial calls probe whether the dependency recovered.
    HalfOpen,
}

impl CircuitStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }

    /// Numeric encoding used for gauges: closed=0, half_open=1, open=2.
    pub fn as_gauge(&self) -> f64 {
        match self {
            Self::Closed => 0.0,
            Self::HalfOpen => 1.0,
            Self::Open => 2.0,
        }
    }
}

/// A point-in-time copy of one dependency's breaker state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitState {
    pub dependency: String,
    pub status: CircuitStatus,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    /// When the breaker last opened. `None` if it never has.
    pub opened_at: Option<DateTime<Utc>>,
    /// Seconds until an open breaker admits a trial call. Zero otherwise.
    pub retry_after_secs: u64,
}
