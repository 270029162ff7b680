//! Loop signals and halt reports.
//!
//! A `LoopSignal` is advisory: the loop detector raises it, the supervisor
//! decides to halt. A `HaltReport` is what an operator sees once a workflow
//! has been stopped: a reason code, a one-line explanation, the threshold
//! that fired, and enough context to triage without reading raw logs.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    action::WorkflowId,
    circuit::CircuitState,
    execution::ActionHistoryRecord,
};

/// Why the loop detector thinks the agent is stuck.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopReason {
    /// The same action fingerprint keeps recurring in the trailing window.
    Repetition,
    /// The agent came back to a world state it had already left.
    StateRevisit,
    /// A delegate appears twice on the delegation call stack.
    CircularDelegation,
    /// The delegation call stack is too deep.
    DelegationDepth,
    /// The workflow used up its iteration budget.
    IterationBudget,
}

impl LoopReason {
    /// Machine-readable reason code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Repetition => "loop.repetition",
            Self::StateRevisit => "loop.state_revisit",
            Self::CircularDelegation => "loop.circular_delegation",
            Self::DelegationDepth => "loop.delegation_depth",
            Self::IterationBudget => "loop.iteration_budget",
        }
    }

    /// The configuration knob whose limit this reason enforces.
    pub fn threshold_name(&self) -> &'static str {
        match self {
            Self::Repetition => "max_action_repetitions",
            Self::StateRevisit => "state_revisit",
            Self::CircularDelegation => "circular_delegation",
            Self::DelegationDepth => "max_call_depth",
            Self::IterationBudget => "max_iterations",
        }
    }
}

impl fmt::Display for LoopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// An advisory signal from the loop detector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopSignal {
    pub reason: LoopReason,
    /// What repeated: an action label, a state digest, or an agent id.
    pub subject: String,
    /// How many times (or how deep) it was observed.
    pub count: u64,
    /// The limit that was hit.
    pub limit: u64,
    pub explanation: String,
}

impl fmt::Display for LoopSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.reason.code(), self.explanation)
    }
}

/// The threshold that tripped a halt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Threshold {
    pub name: String,
    pub limit: u64,
    pub observed: u64,
}

/// Why a workflow (or the whole guard) stopped acting autonomously.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum HaltCause {
    Loop(LoopSignal),
    /// The health monitor stayed unhealthy through every local remediation.
    SelfHealExhausted {
        consecutive_failures: u32,
        limit: u32,
        failed_checks: Vec<String>,
    },
    /// An action kind that needs human sign-off was requested.
    ApprovalRequired { action: String, reason: String },
}

impl HaltCause {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Loop(signal) => signal.reason.code(),
            Self::SelfHealExhausted { .. } => "escalate.self_heal_exhausted",
            Self::ApprovalRequired { .. } => "escalate.approval_required",
        }
    }
}

/// Full diagnostic context handed to the escalation channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HaltReport {
    /// The workflow that halted. `None` when the whole guard suspended itself.
    pub workflow_id: Option<WorkflowId>,
    pub cause: HaltCause,
    /// Human-readable one-liner, e.g. "action restart:x repeated 3 times
    /// without state change".
    pub explanation: String,
    pub threshold: Threshold,
    pub recent_history: Vec<ActionHistoryRecord>,
    pub circuit_states: BTreeMap<String, CircuitState>,
    pub raised_at: DateTime<Utc>,
}

impl HaltReport {
    pub fn code(&self) -> &'static str {
        self.cause.code()
    }

    /// The loop signal behind this halt, if it was loop-triggered.
    pub fn loop_signal(&self) -> Option<&LoopSignal> {
        match &self.cause {
            HaltCause::Loop(signal) => Some(signal),
            _ => None,
        }
    }
}

impl fmt::Display for HaltReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.workflow_id {
            Some(id) => write!(f, "[{}] workflow {}: {}", self.code(), id, self.explanation),
            None => write!(f, "[{}] {}", self.code(), self.explanation),
        }
    }
}
