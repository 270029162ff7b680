//! Per-action results and the durable records the guard keeps.
//!
//! `ActionOutcome` is what `submit_action` hands back to the caller.
//! `ActionHistoryRecord`, `IdempotencyRecord`, and `Checkpoint` are the
//! records the loop detector and the persistence backend own.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    action::WorkflowId,
    identity::{Fingerprint, StateFingerprint},
};

/// The result of one `submit_action` call that did not fail.
///
/// Callers pattern-match on this:
/// - `Executed` → the executor ran; check `converged` to see if it worked
/// - `AlreadyCompleted` → an earlier run of the same fingerprint succeeded;
///   the executor was not invoked
/// - `AwaitingApproval` → the action kind needs human sign-off first
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ActionOutcome {
    Executed {
        fingerprint: Fingerprint,
        result_summary: String,
        converged: bool,
        /// The checkpoint step index written for this action, if it converged.
        step_index: Option<u64>,
    },
    AlreadyCompleted {
        fingerprint: Fingerprint,
        result_summary: String,
        completed_at: DateTime<Utc>,
    },
    AwaitingApproval {
        fingerprint: Fingerprint,
        reason: String,
    },
}

impl ActionOutcome {
    pub fn fingerprint(&self) -> &Fingerprint {
        match self {
            Self::Executed { fingerprint, .. }
            | Self::AlreadyCompleted { fingerprint, .. }
            | Self::AwaitingApproval { fingerprint, .. } => fingerprint,
        }
    }

    /// The cached or fresh result summary, if the action produced one.
    pub fn result_summary(&self) -> Option<&str> {
        match self {
            Self::Executed { result_summary, .. } | Self::AlreadyCompleted { result_summary, .. } => {
                Some(result_summary)
            }
            Self::AwaitingApproval { .. } => None,
        }
    }
}

/// How an executed action turned out, as recorded in the action history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryOutcome {
    /// The executor reported the desired state was reached.
    Converged,
    /// The executor ran but the world did not change as intended.
    Unresolved,
    /// The executor returned an error or timed out.
    Failed,
}

impl HistoryOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Converged => "converged",
            Self::Unresolved => "unresolved",
            Self::Failed => "failed",
        }
    }
}

/// One entry in a workflow's bounded action history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionHistoryRecord {
    pub fingerprint: Fingerprint,
    pub state_before: Option<StateFingerprint>,
    pub state_after: Option<StateFingerprint>,
    pub timestamp: DateTime<Utc>,
    pub outcome: HistoryOutcome,
}

/// Proof that a fingerprint completed once. Read, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub fingerprint: Fingerprint,
    pub result_summary: String,
    pub completed_at: DateTime<Utc>,
}

/// The latest durable progress point of a workflow.
///
/// Superseded by the next checkpoint for the same workflow; `step_index`
/// only ever increases.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub workflow_id: WorkflowId,
    pub step_index: u64,
    pub serialized_state: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

/// Where a workflow picks up when it (re)starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowResume {
    pub workflow_id: WorkflowId,
    /// The first step index not yet covered by a checkpoint.
    pub next_step: u64,
    /// The checkpoint the resume was derived from, if any.
    pub checkpoint: Option<Checkpoint>,
}
