//! Cost/rate governor: admission control and request validation.
//!
//! `validate_request` runs, in order:
//!
//!   1. allow-list: the kind must be recognized and allowed
//!   2. size bound on target + serialized parameters
//!   3. repetition heuristic on the same payload
//!   4. absolute-state check for mutating kinds
//!   5. the kind's JSON Schema, if one is configured
//!
//! and stops at the first failure. `admit` then charges the request against
//! both budget ledgers. Rejections are final for the call; the governor
//! never retries.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, warn};

use tripwire_contracts::{
    action::{ActionKind, ActionRequest},
    error::{TripwireError, TripwireResult},
};
use tripwire_core::{
    clock::{Clock, SystemClock},
    traits::{MetricsSink, NoopMetrics},
};

use crate::{
    config::GovernorConfig,
    ledger::{BudgetLedger, BudgetSnapshot},
    validation::{relative_delta_key, repeated_ngram_share, ValidationResult},
};

/// How the governor treats an action kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionClass {
    /// May run without a human.
    Autonomous,
    /// Allowed, but each run needs explicit sign-off.
    RequiresApproval,
    /// Not on the allow-list.
    Unauthorized,
}

struct Ledgers {
    requests: BudgetLedger,
    cost: BudgetLedger,
}

pub struct Governor {
    config: GovernorConfig,
    allowed: HashSet<ActionKind>,
    approval: HashSet<ActionKind>,
    schemas: HashMap<ActionKind, jsonschema::Validator>,
    kind_costs: HashMap<ActionKind, f64>,
    clock: Arc<dyn Clock>,
    metrics: Arc<dyn MetricsSink>,
    ledgers: Mutex<Ledgers>,
}

impl std::fmt::Debug for Governor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Governor")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Governor {
    /// Build a governor, compiling every configured schema up front.
    ///
    /// Returns `ConfigError` for unknown kind names, invalid schema
    /// documents, or non-positive windows.
    pub fn new(
        config: GovernorConfig,
        clock: Arc<dyn Clock>,
        metrics: Arc<dyn MetricsSink>,
    ) -> TripwireResult<Self> {
        if config.request_window_secs == 0 || config.cost_window_secs == 0 {
            return Err(TripwireError::ConfigError {
                reason: "budget windows must be at least one second".to_string(),
            });
        }

        let allowed = parse_kinds(&config.allowed_actions, "allowed_actions")?;
        let approval = parse_kinds(&config.approval_required, "approval_required")?;
        if let Some(kind) = approval.iter().find(|k| !allowed.contains(*k)) {
            return Err(TripwireError::ConfigError {
                reason: format!("approval_required kind '{kind}' is not in allowed_actions"),
            });
        }

        let mut schemas = HashMap::new();
        for (name, document) in &config.schemas {
            let kind = parse_kind(name, "schemas")?;
            let validator =
                jsonschema::validator_for(document).map_err(|e| TripwireError::ConfigError {
                    reason: format!("invalid JSON Schema for '{name}': {e}"),
                })?;
            schemas.insert(kind, validator);
        }

        let mut kind_costs = HashMap::new();
        for (name, cost) in &config.kind_costs {
            let kind = parse_kind(name, "kind_costs")?;
            if !cost.is_finite() || *cost < 0.0 {
                return Err(TripwireError::ConfigError {
                    reason: format!("kind_costs: cost for '{name}' must be a non-negative number"),
                });
            }
            kind_costs.insert(kind, *cost);
        }

        let now = clock.now();
        let ledgers = Ledgers {
            requests: BudgetLedger::new(Duration::from_secs(config.request_window_secs), now),
            cost: BudgetLedger::new(Duration::from_secs(config.cost_window_secs), now),
        };

        Ok(Self {
            config,
            allowed,
            approval,
            schemas,
            kind_costs,
            clock,
            metrics,
            ledgers: Mutex::new(ledgers),
        })
    }

    /// A governor on the system clock with no metrics.
    pub fn with_config(config: GovernorConfig) -> TripwireResult<Self> {
        Self::new(config, Arc::new(SystemClock), Arc::new(NoopMetrics))
    }

    pub fn config(&self) -> &GovernorConfig {
        &self.config
    }

    pub fn classify(&self, kind: &ActionKind) -> ActionClass {
        if !kind.is_recognized() || !self.allowed.contains(kind) {
            ActionClass::Unauthorized
        } else if self.approval.contains(kind) {
            ActionClass::RequiresApproval
        } else {
            ActionClass::Autonomous
        }
    }

    /// Size and repetition checks on a raw payload.
    pub fn validate_input(&self, payload: &[u8]) -> ValidationResult {
        if payload.len() > self.config.max_payload_bytes {
            return ValidationResult::TooLarge {
                size: payload.len(),
                limit: self.config.max_payload_bytes,
            };
        }
        if payload.len() >= self.config.min_repetition_check_bytes {
            let share = repeated_ngram_share(payload);
            if share > self.config.repetition_threshold {
                return ValidationResult::Suspicious {
                    reason: format!(
                        "payload is {:.0}% repeated 4-byte sequences (limit {:.0}%)",
                        share * 100.0,
                        self.config.repetition_threshold * 100.0
                    ),
                };
            }
        }
        ValidationResult::Valid
    }

    /// Every shape and authorization check for one request.
    pub fn validate_request(&self, request: &ActionRequest) -> ValidationResult {
        let result = self.check_request(request);
        if !result.is_valid() {
            warn!(
                workflow_id = %request.workflow_id,
                action = %request.kind,
                target = %request.target,
                reason = result.reason(),
                "request failed validation"
            );
            self.metrics.request_rejected(result.reason());
        }
        result
    }

    fn check_request(&self, request: &ActionRequest) -> ValidationResult {
        if self.classify(&request.kind) == ActionClass::Unauthorized {
            return ValidationResult::Unauthorized {
                action: request.kind.to_string(),
            };
        }

        let payload = payload_bytes(request);
        let input = self.validate_input(&payload);
        if !input.is_valid() {
            return input;
        }

        if request.kind.is_mutating() {
            if let Some(key) = relative_delta_key(&request.parameters) {
                return ValidationResult::Malformed {
                    reason: format!(
                        "parameter '{key}' is a relative change; {} must set an absolute desired state",
                        request.kind
                    ),
                };
            }
        }

        if let Some(validator) = self.schemas.get(&request.kind) {
            let violations: Vec<String> = validator
                .iter_errors(&request.parameters)
                .map(|e| format!("{} at '{}'", e, e.instance_path))
                .collect();
            if !violations.is_empty() {
                return ValidationResult::Malformed {
                    reason: format!(
                        "parameters for {} violate schema: {}",
                        request.kind,
                        violations.join("; ")
                    ),
                };
            }
        }

        ValidationResult::Valid
    }

    /// Estimated cost of running `request`: the kind's cost plus a per-KiB
    /// payload cost.
    pub fn estimate_cost(&self, request: &ActionRequest) -> f64 {
        let kind_cost = self
            .kind_costs
            .get(&request.kind)
            .copied()
            .unwrap_or(self.config.base_cost);
        let kib = payload_bytes(request).len() as f64 / 1024.0;
        kind_cost + kib * self.config.cost_per_kib
    }

    /// True if a request with `estimated_cost` fits both budgets; charges
    /// it if so.
    pub fn admit(&self, estimated_cost: f64) -> bool {
        self.try_admit(estimated_cost).is_ok()
    }

    /// Like `admit`, but says which budget refused.
    pub fn try_admit(&self, estimated_cost: f64) -> TripwireResult<()> {
        let now = self.clock.now();
        let mut ledgers = self.ledgers.lock().unwrap_or_else(|e| e.into_inner());
        if ledgers.requests.roll(now) {
            debug!("request window rolled over");
        }
        if ledgers.cost.roll(now) {
            debug!("cost window rolled over");
        }

        let max_requests = self.config.max_requests_per_window;
        let max_cost = self.config.max_cost_per_window;

        let rejection = if ledgers.requests.request_count + 1 > max_requests {
            Some(("request", TripwireError::BudgetExceeded {
                budget: "request".to_string(),
                limit: max_requests as f64,
                observed: ledgers.requests.request_count as f64,
            }))
        } else if ledgers.cost.cumulative_cost >= max_cost
            || ledgers.cost.cumulative_cost + estimated_cost > max_cost
        {
            Some(("cost", TripwireError::BudgetExceeded {
                budget: "cost".to_string(),
                limit: max_cost,
                observed: ledgers.cost.cumulative_cost,
            }))
        } else {
            None
        };

        match rejection {
            Some((budget, err)) => {
                ledgers.requests.rejected_count += 1;
                drop(ledgers);
                warn!(budget, estimated_cost, "admission rejected");
                self.metrics.request_rejected(match budget {
                    "request" => "request_budget",
                    _ => "cost_budget",
                });
                Err(err)
            }
            None => {
                ledgers.requests.request_count += 1;
                ledgers.cost.cumulative_cost += estimated_cost;
                drop(ledgers);
                self.metrics.request_admitted();
                Ok(())
            }
        }
    }

    /// Replace a charged estimate with the actual cost once it is known.
    pub fn settle(&self, estimated_cost: f64, actual_cost: f64) {
        let now = self.clock.now();
        let mut ledgers = self.ledgers.lock().unwrap_or_else(|e| e.into_inner());
        if ledgers.cost.roll(now) {
            // The estimate was charged to a window that has since closed.
            ledgers.cost.cumulative_cost = actual_cost.max(0.0);
        } else {
            let settled = ledgers.cost.cumulative_cost - estimated_cost + actual_cost;
            ledgers.cost.cumulative_cost = settled.max(0.0);
        }
        debug!(estimated_cost, actual_cost, "cost settled");
    }

    pub fn snapshot(&self) -> BudgetSnapshot {
        let now = self.clock.now();
        let mut ledgers = self.ledgers.lock().unwrap_or_else(|e| e.into_inner());
        ledgers.requests.roll(now);
        ledgers.cost.roll(now);
        BudgetSnapshot {
            request_count: ledgers.requests.request_count,
            max_requests: self.config.max_requests_per_window,
            requests_reset_in_secs: ledgers.requests.resets_in(now).as_secs(),
            cumulative_cost: ledgers.cost.cumulative_cost,
            max_cost: self.config.max_cost_per_window,
            cost_reset_in_secs: ledgers.cost.resets_in(now).as_secs(),
            rejected_requests: ledgers.requests.rejected_count,
        }
    }
}

fn payload_bytes(request: &ActionRequest) -> Vec<u8> {
    let mut payload = request.target.as_bytes().to_vec();
    if !request.parameters.is_null() {
        payload.extend_from_slice(request.parameters.to_string().as_bytes());
    }
    payload
}

fn parse_kind(name: &str, field: &str) -> TripwireResult<ActionKind> {
    let kind = ActionKind::parse(name);
    if kind.is_recognized() {
        Ok(kind)
    } else {
        Err(TripwireError::ConfigError {
            reason: format!("{field}: unknown action kind '{name}'"),
        })
    }
}

fn parse_kinds(names: &[String], field: &str) -> TripwireResult<HashSet<ActionKind>> {
    names.iter().map(|n| parse_kind(n, field)).collect()
}
