//! Registry of breakers keyed by dependency name.
//!
//! One breaker per dependency, shared by every workflow. Breakers are
//! created lazily on first use with the dependency's effective config.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::{Arc, RwLock};

use tracing::debug;

use tripwire_contracts::{
    circuit::{CircuitState, CircuitStatus},
    error::TripwireResult,
};
use tripwire_core::{
    clock::{Clock, SystemClock},
    traits::{MetricsSink, NoopMetrics},
};

use crate::{breaker::CircuitBreaker, config::BreakerSettings};

pub struct BreakerRegistry {
    settings: BreakerSettings,
    clock: Arc<dyn Clock>,
    metrics: Arc<dyn MetricsSink>,
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
}

impl BreakerRegistry {
    pub fn new(
        settings: BreakerSettings,
        clock: Arc<dyn Clock>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            settings,
            clock,
            metrics,
            breakers: RwLock::new(HashMap::new()),
        }
    }

    /// A registry on the system clock with no metrics.
    pub fn with_settings(settings: BreakerSettings) -> Self {
        Self::new(settings, Arc::new(SystemClock), Arc::new(NoopMetrics))
    }

    /// The breaker for `dependency`, creating it if needed.
    pub fn breaker(&self, dependency: &str) -> Arc<CircuitBreaker> {
        if let Some(existing) = self
            .breakers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(dependency)
        {
            return Arc::clone(existing);
        }

        let mut breakers = self.breakers.write().unwrap_or_else(|e| e.into_inner());
        Arc::clone(breakers.entry(dependency.to_string()).or_insert_with(|| {
            let config = self.settings.for_dependency(dependency);
            debug!(
                dependency = %dependency,
                failure_threshold = config.failure_threshold,
                timeout_secs = config.timeout_secs,
                "registering circuit breaker"
            );
            Arc::new(CircuitBreaker::new(
                dependency,
                config,
                Arc::clone(&self.clock),
                Arc::clone(&self.metrics),
            ))
        }))
    }

    /// Run `op` through the breaker for `dependency`.
    ///
    /// This is the only path through which dependency call outcomes are
    /// recorded.
    pub async fn call<T, F, Fut>(&self, dependency: &str, op: F) -> TripwireResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = TripwireResult<T>>,
    {
        let breaker = self.breaker(dependency);
        breaker.call(op).await
    }

    /// Non-consuming gate for `dependency`; see [`CircuitBreaker::check`].
    /// Unknown dependencies pass without creating a breaker.
    pub fn check(&self, dependency: &str) -> TripwireResult<()> {
        let breaker = self
            .breakers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(dependency)
            .cloned();
        match breaker {
            Some(breaker) => breaker.check(),
            None => Ok(()),
        }
    }

    /// Snapshot of every known breaker, sorted by dependency name.
    pub fn states(&self) -> BTreeMap<String, CircuitState> {
        let breakers: Vec<Arc<CircuitBreaker>> = self
            .breakers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect();
        breakers
            .iter()
            .map(|b| (b.dependency().to_string(), b.state()))
            .collect()
    }

    pub fn state(&self, dependency: &str) -> Option<CircuitState> {
        self.breakers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(dependency)
            .map(|b| b.state())
    }

    /// Names of dependencies whose breaker is currently open.
    pub fn open_dependencies(&self) -> Vec<String> {
        self.states()
            .into_values()
            .filter(|s| s.status == CircuitStatus::Open)
            .map(|s| s.dependency)
            .collect()
    }

    /// Number of breakers created so far.
    pub fn len(&self) -> usize {
        self.breakers.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
