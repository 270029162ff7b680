//! Error taxonomy for the tripwire guard.
//!
//! All fallible operations return `TripwireResult<T>`. Every variant carries
//! a stable reason code (`code()`) for machines and a `Display` message for
//! operators. `is_transient()` separates what a caller may retry with
//! backoff from what must never be retried.

use thiserror::Error;

use crate::signal::HaltReport;

/// The unified error type for the tripwire guard.
#[derive(Debug, Error)]
pub enum TripwireError {
    /// The request could not be fingerprinted or has an invalid shape.
    #[error("malformed action: {reason}")]
    MalformedAction { reason: String },

    /// The dependency's circuit breaker is open; no call was attempted.
    #[error("dependency '{dependency}' unavailable (circuit open, retry in {retry_after_secs}s)")]
    DependencyUnavailable {
        dependency: String,
        retry_after_secs: u64,
    },

    /// The request-rate or cost budget for the current window is exhausted.
    #[error("{budget} budget exceeded: {observed} of {limit} used in current window")]
    BudgetExceeded {
        budget: String,
        limit: f64,
        observed: f64,
    },

    /// The payload looks adversarial (e.g. a near-exact repeat of a pattern).
    #[error("suspicious input: {reason}")]
    SuspiciousInput { reason: String },

    /// The payload exceeds the configured byte bound.
    #[error("input of {size} bytes exceeds the {limit} byte limit")]
    InputTooLarge { size: usize, limit: usize },

    /// The action kind is not on the allow-list.
    #[error("action '{action}' is not authorized")]
    UnauthorizedAction { action: String },

    /// The loop detector fired and the workflow was halted.
    #[error("loop detected: {0}")]
    LoopDetected(Box<HaltReport>),

    /// Autonomous action has stopped; a human must take over.
    #[error("escalated to human: {0}")]
    EscalateToHuman(Box<HaltReport>),

    /// The workflow was halted earlier and accepts no further actions.
    #[error("workflow '{workflow_id}' is halted ({code})")]
    WorkflowHalted { workflow_id: String, code: String },

    /// The workflow was cancelled between actions.
    #[error("workflow '{workflow_id}' was cancelled")]
    WorkflowCancelled { workflow_id: String },

    /// Another action of the same workflow is still in flight.
    #[error("workflow '{workflow_id}' already has an action in flight")]
    WorkflowBusy { workflow_id: String },

    /// A checkpoint write did not advance the workflow's step index.
    #[error("checkpoint for '{workflow_id}' out of order: step {attempted} after step {last}")]
    CheckpointOutOfOrder {
        workflow_id: String,
        last: u64,
        attempted: u64,
    },

    /// The executor reported an error.
    #[error("action '{action}' failed: {reason}")]
    ActionFailed { action: String, reason: String },

    /// The executor did not finish within the per-action timeout.
    #[error("action '{action}' timed out after {timeout_ms}ms")]
    ActionTimedOut { action: String, timeout_ms: u64 },

    /// The persistence backend failed.
    #[error("store error: {reason}")]
    StoreError { reason: String },

    /// A required configuration value is missing or invalid.
    #[error("configuration error: {reason}")]
    ConfigError { reason: String },
}

impl TripwireError {
    /// Machine-readable reason code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::MalformedAction { .. } => "malformed_action",
            Self::DependencyUnavailable { .. } => "dependency_unavailable",
            Self::BudgetExceeded { .. } => "budget_exceeded",
            Self::SuspiciousInput { .. } => "suspicious_input",
            Self::InputTooLarge { .. } => "input_too_large",
            Self::UnauthorizedAction { .. } => "unauthorized_action",
            Self::LoopDetected(report) => report.code(),
            Self::EscalateToHuman(report) => report.code(),
            Self::WorkflowHalted { .. } => "workflow_halted",
            Self::WorkflowCancelled { .. } => "workflow_cancelled",
            Self::WorkflowBusy { .. } => "workflow_busy",
            Self::CheckpointOutOfOrder { .. } => "checkpoint_out_of_order",
            Self::ActionFailed { .. } => "action_failed",
            Self::ActionTimedOut { .. } => "action_timed_out",
            Self::StoreError { .. } => "store_error",
            Self::ConfigError { .. } => "config_error",
        }
    }

    /// True for failures a caller may retry with backoff outside the guard.
    ///
    /// Validation, authorization, budget, and halt errors are permanent.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::DependencyUnavailable { .. }
                | Self::ActionFailed { .. }
                | Self::ActionTimedOut { .. }
                | Self::StoreError { .. }
                | Self::WorkflowBusy { .. }
        )
    }

    /// True when the error ends autonomous action for the workflow.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::LoopDetected(_)
                | Self::EscalateToHuman(_)
                | Self::WorkflowHalted { .. }
                | Self::WorkflowCancelled { .. }
        )
    }

    /// The halt report, for errors that carry one.
    pub fn halt_report(&self) -> Option<&HaltReport> {
        match self {
            Self::LoopDetected(report) | Self::EscalateToHuman(report) => Some(report),
            _ => None,
        }
    }
}

/// Convenience alias used throughout the tripwire crates.
pub type TripwireResult<T> = Result<T, TripwireError>;
