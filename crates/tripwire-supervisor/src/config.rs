//! Configuration for the whole guard, loaded from one TOML document.
//!
//! Every table is optional; missing tables and fields take their documented
//! defaults.
//!
//! ```toml
//! [breaker]
//! failure_threshold = 5
//! timeout_secs = 60
//!
//! [breaker.dependencies.orchestrator]
//! profile = "critical"
//!
//! [loop]
//! max_action_repetitions = 3
//! max_iterations = 20
//!
//! [governor]
//! max_cost_per_window = 10.0
//! approval_required = ["rollback"]
//!
//! [store]
//! idempotency_ttl_secs = 86400
//! data_dir = "/var/lib/tripwire"
//!
//! [supervisor]
//! max_self_heal_failures = 5
//! action_timeout_ms = 30000
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use tripwire_breaker::BreakerSettings;
use tripwire_contracts::error::{TripwireError, TripwireResult};
use tripwire_core::FingerprintConfig;
use tripwire_governor::GovernorConfig;
use tripwire_loop::LoopDetectorConfig;
use tripwire_store::StoreConfig;

/// Supervisor-level knobs: self-heal, timeouts, and health probing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Consecutive unhealthy ticks tolerated before escalating to a human.
    pub max_self_heal_failures: u32,
    /// Per-action executor timeout. Expiry counts as a breaker failure.
    pub action_timeout_ms: u64,
    /// Period of the background health loop.
    pub health_check_interval_secs: u64,
    /// Average action latency above which the latency probe fails.
    pub max_avg_latency_ms: u64,
    /// Number of recent action latencies the latency probe averages.
    pub latency_window: usize,
    /// History entries attached to a halt report.
    pub halt_history_len: usize,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            max_self_heal_failures: 5,
            action_timeout_ms: 30_000,
            health_check_interval_secs: 30,
            max_avg_latency_ms: 5_000,
            latency_window: 50,
            halt_history_len: 10,
        }
    }
}

impl SupervisorConfig {
    pub fn validate(&self) -> TripwireResult<()> {
        if self.max_self_heal_failures == 0 {
            return Err(TripwireError::ConfigError {
                reason: "max_self_heal_failures must be at least 1".to_string(),
            });
        }
        if self.action_timeout_ms == 0 || self.health_check_interval_secs == 0 {
            return Err(TripwireError::ConfigError {
                reason: "action_timeout_ms and health_check_interval_secs must be positive"
                    .to_string(),
            });
        }
        if self.latency_window == 0 {
            return Err(TripwireError::ConfigError {
                reason: "latency_window must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

/// The complete guard configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TripwireConfig {
    pub breaker: BreakerSettings,
    #[serde(rename = "loop")]
    pub loop_detector: LoopDetectorConfig,
    pub governor: GovernorConfig,
    pub store: StoreConfig,
    pub fingerprint: FingerprintConfig,
    pub supervisor: SupervisorConfig,
}

impl TripwireConfig {
    /// Parse and validate a TOML document.
    ///
    /// Returns `TripwireError::ConfigError` if the TOML is malformed, does
    /// not match the expected shape, or holds an invalid value.
    pub fn from_toml_str(s: &str) -> TripwireResult<Self> {
        let config: Self = toml::from_str(s).map_err(|e| TripwireError::ConfigError {
            reason: format!("failed to parse tripwire TOML: {e}"),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Read the file at `path` and parse it with [`from_toml_str`](Self::from_toml_str).
    pub fn from_file(path: &Path) -> TripwireResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| TripwireError::ConfigError {
            reason: format!("failed to read config file '{}': {e}", path.display()),
        })?;
        Self::from_toml_str(&contents)
    }

    /// Check every section. The governor's kind names and schemas are
    /// checked when the governor is built.
    pub fn validate(&self) -> TripwireResult<()> {
        self.breaker.validate()?;
        self.loop_detector.validate()?;
        self.supervisor.validate()?;
        if self.store.idempotency_ttl_secs == 0 || self.store.checkpoint_retention_secs == 0 {
            return Err(TripwireError::ConfigError {
                reason: "idempotency_ttl_secs and checkpoint_retention_secs must be positive"
                    .to_string(),
            });
        }
        Ok(())
    }
}
