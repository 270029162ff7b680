//! Breaker tuning: defaults, named profiles, per-dependency overrides.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use tripwire_contracts::error::{TripwireError, TripwireResult};

/// Thresholds for one circuit breaker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    /// Consecutive failures in `Closed` that open the breaker.
    pub failure_threshold: u32,
    /// Consecutive trial successes in `HalfOpen` that close it again.
    pub success_threshold: u32,
    /// Seconds an open breaker waits before admitting a trial call.
    pub timeout_secs: u64,
    /// Trial calls allowed in flight at once while half-open.
    pub half_open_max_calls: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        BreakerProfile::Standard.config()
    }
}

impl BreakerConfig {
    pub fn validate(&self) -> TripwireResult<()> {
        if self.failure_threshold == 0 || self.success_threshold == 0 {
            return Err(TripwireError::ConfigError {
                reason: "breaker thresholds must be at least 1".to_string(),
            });
        }
        if self.half_open_max_calls == 0 {
            return Err(TripwireError::ConfigError {
                reason: "half_open_max_calls must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

/// Named starting points for breaker tuning.
///
/// Critical dependencies fail fast and recover conservatively; high-volume
/// dependencies tolerate more noise and probe for recovery sooner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BreakerProfile {
    Standard,
    Critical,
    HighVolume,
}

impl BreakerProfile {
    pub fn config(&self) -> BreakerConfig {
        match self {
            Self::Standard => BreakerConfig {
                failure_threshold: 5,
                success_threshold: 2,
                timeout_secs: 60,
                half_open_max_calls: 1,
            },
            Self::Critical => BreakerConfig {
                failure_threshold: 3,
                success_threshold: 3,
                timeout_secs: 120,
                half_open_max_calls: 1,
            },
            Self::HighVolume => BreakerConfig {
                failure_threshold: 10,
                success_threshold: 2,
                timeout_secs: 30,
                half_open_max_calls: 3,
            },
        }
    }
}

/// Per-dependency tuning. Unset fields fall back to the profile (if any),
/// then to the registry defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DependencyOverride {
    pub profile: Option<BreakerProfile>,
    pub failure_threshold: Option<u32>,
    pub success_threshold: Option<u32>,
    pub timeout_secs: Option<u64>,
    pub half_open_max_calls: Option<u32>,
}

impl DependencyOverride {
    pub fn profile(profile: BreakerProfile) -> Self {
        Self {
            profile: Some(profile),
            ..Self::default()
        }
    }

    fn apply(&self, defaults: &BreakerConfig) -> BreakerConfig {
        let base = self
            .profile
            .map(|p| p.config())
            .unwrap_or_else(|| defaults.clone());
        BreakerConfig {
            failure_threshold: self.failure_threshold.unwrap_or(base.failure_threshold),
            success_threshold: self.success_threshold.unwrap_or(base.success_threshold),
            timeout_secs: self.timeout_secs.unwrap_or(base.timeout_secs),
            half_open_max_calls: self.half_open_max_calls.unwrap_or(base.half_open_max_calls),
        }
    }
}

/// Registry-wide breaker settings.
///
/// ```toml
/// failure_threshold = 5
/// timeout_secs = 60
///
/// [dependencies.orchestrator]
/// profile = "critical"
///
/// [dependencies.metrics-backend]
/// profile = "high-volume"
/// timeout_secs = 15
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerSettings {
    #[serde(flatten)]
    pub defaults: BreakerConfig,
    pub dependencies: BTreeMap<String, DependencyOverride>,
}

impl BreakerSettings {
    /// The effective configuration for `dependency`.
    pub fn for_dependency(&self, dependency: &str) -> BreakerConfig {
        match self.dependencies.get(dependency) {
            Some(over) => over.apply(&self.defaults),
            None => self.defaults.clone(),
        }
    }

    pub fn validate(&self) -> TripwireResult<()> {
        self.defaults.validate()?;
        for (name, over) in &self.dependencies {
            over.apply(&self.defaults).validate().map_err(|e| TripwireError::ConfigError {
                reason: format!("dependency '{name}': {e}"),
            })?;
        }
        Ok(())
    }
}
