//! The loop detector: bounded action history plus advisory checks.
//!
//! Every check returns `Option<LoopSignal>`. The detector never halts
//! anything itself; the supervisor decides what a signal means.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use tripwire_contracts::{
    action::WorkflowId,
    execution::{ActionHistoryRecord, HistoryOutcome},
    identity::{Fingerprint, StateFingerprint},
    signal::{LoopReason, LoopSignal},
};
use tripwire_core::clock::{elapsed_between, Clock, SystemClock};

use crate::config::LoopDetectorConfig;

/// Summary counters for dashboards and halt reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopStats {
    pub total_iterations: u64,
    pub unique_actions: usize,
    pub history_len: usize,
    /// Labels of the most recent actions, oldest first.
    pub recent_labels: Vec<String>,
}

const RECENT_LABELS: usize = 5;

#[derive(Debug)]
pub struct LoopDetector {
    config: LoopDetectorConfig,
    clock: Arc<dyn Clock>,
    history: VecDeque<ActionHistoryRecord>,
    iterations: HashMap<WorkflowId, u64>,
}

impl LoopDetector {
    pub fn new(config: LoopDetectorConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            history: VecDeque::with_capacity(config.history_window),
            config,
            clock,
            iterations: HashMap::new(),
        }
    }

    pub fn with_config(config: LoopDetectorConfig) -> Self {
        Self::new(config, Arc::new(SystemClock))
    }

    pub fn config(&self) -> &LoopDetectorConfig {
        &self.config
    }

    /// Append one executed action to the history, evicting the oldest entry
    /// once the window is full.
    pub fn record(
        &mut self,
        fingerprint: Fingerprint,
        state_before: Option<StateFingerprint>,
        state_after: Option<StateFingerprint>,
        outcome: HistoryOutcome,
    ) {
        debug!(
            action = %fingerprint,
            digest = %fingerprint.short(),
            outcome = outcome.as_str(),
            "recording action"
        );
        self.history.push_back(ActionHistoryRecord {
            fingerprint,
            state_before,
            state_after,
            timestamp: self.clock.now(),
            outcome,
        });
        while self.history.len() > self.config.history_window {
            self.history.pop_front();
        }
    }

    /// Signal if `fingerprint` occurs `max_action_repetitions` or more times
    /// in the trailing window.
    pub fn check_repetition(&self, fingerprint: &Fingerprint) -> Option<LoopSignal> {
        let now = self.clock.now();
        let window = Duration::from_secs(self.config.repetition_window_secs);
        let matching: Vec<&ActionHistoryRecord> = self
            .history
            .iter()
            .filter(|r| r.fingerprint.digest == fingerprint.digest)
            .filter(|r| window.is_zero() || elapsed_between(r.timestamp, now) <= window)
            .collect();

        let count = matching.len() as u64;
        let limit = u64::from(self.config.max_action_repetitions);
        if count < limit {
            return None;
        }

        let unchanged = matching
            .iter()
            .all(|r| r.outcome != HistoryOutcome::Converged && r.state_before == r.state_after);
        let explanation = if unchanged {
            format!("action {fingerprint} repeated {count} times without state change")
        } else {
            format!("action {fingerprint} repeated {count} times without converging")
        };
        debug!(action = %fingerprint, count, limit, "repetition threshold reached");

        Some(LoopSignal {
            reason: LoopReason::Repetition,
            subject: fingerprint.label.clone(),
            count,
            limit,
            explanation,
        })
    }

    /// Signal if the agent has returned to `state` after leaving it.
    ///
    /// The history is read as a sequence of visited states; consecutive
    /// identical states are one visit. A state with two or more visits in
    /// the window is a revisit. Staying in one state is not a revisit.
    pub fn check_state_revisit(&self, state: &StateFingerprint) -> Option<LoopSignal> {
        let mut visits = 0u64;
        let mut previous: Option<&StateFingerprint> = None;
        for observed in self
            .history
            .iter()
            .flat_map(|r| [r.state_before.as_ref(), r.state_after.as_ref()])
            .flatten()
        {
            if previous != Some(observed) {
                if observed == state {
                    visits += 1;
                }
                previous = Some(observed);
            }
        }

        if visits < 2 {
            return None;
        }
        debug!(state = %state, visits, "state revisited");
        Some(LoopSignal {
            reason: LoopReason::StateRevisit,
            subject: state.0.clone(),
            count: visits,
            limit: 1,
            explanation: format!(
                "world state {state} revisited {visits} times without making progress"
            ),
        })
    }

    /// Count one more attempted action for `workflow_id`.
    ///
    /// Attempts `1..=max_iterations` pass; every attempt after that signals.
    pub fn check_iteration_budget(&mut self, workflow_id: &WorkflowId) -> Option<LoopSignal> {
        let count = self.iterations.entry(workflow_id.clone()).or_insert(0);
        *count += 1;
        let count = *count;
        let limit = self.config.max_iterations;
        if count <= limit {
            return None;
        }
        Some(LoopSignal {
            reason: LoopReason::IterationBudget,
            subject: workflow_id.to_string(),
            count,
            limit,
            explanation: format!(
                "workflow {workflow_id} attempted {count} actions, over its budget of {limit}"
            ),
        })
    }

    pub fn iterations(&self, workflow_id: &WorkflowId) -> u64 {
        self.iterations.get(workflow_id).copied().unwrap_or(0)
    }

    /// Copies of the last `limit` history entries, oldest first.
    pub fn recent_history(&self, limit: usize) -> Vec<ActionHistoryRecord> {
        let skip = self.history.len().saturating_sub(limit);
        self.history.iter().skip(skip).cloned().collect()
    }

    /// The most recent state observed after an action, if any.
    pub fn last_state(&self) -> Option<StateFingerprint> {
        self.history.iter().rev().find_map(|r| r.state_after.clone())
    }

    pub fn stats(&self) -> LoopStats {
        let unique: HashSet<&str> = self
            .history
            .iter()
            .map(|r| r.fingerprint.digest.as_str())
            .collect();
        LoopStats {
            total_iterations: self.iterations.values().sum(),
            unique_actions: unique.len(),
            history_len: self.history.len(),
            recent_labels: self
                .recent_history(RECENT_LABELS)
                .into_iter()
                .map(|r| r.fingerprint.label)
                .collect(),
        }
    }

    /// Forget all history and iteration counts.
    pub fn reset(&mut self) {
        self.history.clear();
        self.iterations.clear();
    }
}
