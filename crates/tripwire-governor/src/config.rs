//! Governor configuration.
//!
//! Example in TOML:
//! ```toml
//! max_requests_per_window = 60
//! max_cost_per_window = 10.0
//! allowed_actions = ["restart", "scale", "fetch_logs", "notify"]
//! approval_required = ["rollback"]
//!
//! [kind_costs]
//! rollback = 0.5
//!
//! [schemas.scale]
//! type = "object"
//! required = ["replicas"]
//! properties = { replicas = { type = "integer", minimum = 0, maximum = 50 } }
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use tripwire_contracts::action::ActionKind;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GovernorConfig {
    /// Requests admitted per request window.
    pub max_requests_per_window: u64,
    pub request_window_secs: u64,
    /// Cumulative cost allowed per cost window.
    pub max_cost_per_window: f64,
    pub cost_window_secs: u64,
    /// Largest payload (target plus serialized parameters) accepted, in bytes.
    pub max_payload_bytes: usize,
    /// Share of repeated 4-byte n-grams above which a payload is suspicious.
    pub repetition_threshold: f64,
    /// Payloads shorter than this skip the repetition heuristic.
    pub min_repetition_check_bytes: usize,
    /// Action kinds the agent may request at all.
    pub allowed_actions: Vec<String>,
    /// Allowed kinds that still need human sign-off before each run.
    pub approval_required: Vec<String>,
    /// Estimated cost of one action when `kind_costs` has no entry.
    pub base_cost: f64,
    /// Estimated cost per KiB of payload, added to the kind cost.
    pub cost_per_kib: f64,
    pub kind_costs: BTreeMap<String, f64>,
    /// JSON Schema documents, keyed by action kind, that parameters must match.
    pub schemas: BTreeMap<String, serde_json::Value>,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            max_requests_per_window: 60,
            request_window_secs: 60,
            max_cost_per_window: 10.0,
            cost_window_secs: 3600,
            max_payload_bytes: 100_000,
            repetition_threshold: 0.8,
            min_repetition_check_bytes: 100,
            allowed_actions: ActionKind::KNOWN
                .iter()
                .map(|k| k.as_str().to_string())
                .collect(),
            approval_required: Vec::new(),
            base_cost: 0.01,
            cost_per_kib: 0.001,
            kind_costs: BTreeMap::new(),
            schemas: BTreeMap::new(),
        }
    }
}
