//! Health monitoring and the self-heal loop's building blocks.
//!
//! A `HealthMonitor` evaluates its probes, rolls them up into a
//! `HealthSnapshot`, and counts consecutive unhealthy ticks. What to do about
//! an unhealthy tick (remediate, escalate, suspend) is the supervisor's call.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use tripwire_breaker::BreakerRegistry;
use tripwire_contracts::{
    error::TripwireResult,
    health::{CheckResult, HealthSnapshot, HealthStatus},
};
use tripwire_core::{
    clock::Clock,
    traits::{HealthProbe, MetricsSink, Remediation},
};
use tripwire_store::IdempotencyGuard;

// ── Monitor ───────────────────────────────────────────────────────────────────

pub struct HealthMonitor {
    probes: Vec<Arc<dyn HealthProbe>>,
    remediations: Vec<Arc<dyn Remediation>>,
    clock: Arc<dyn Clock>,
    metrics: Arc<dyn MetricsSink>,
    latest: Mutex<HealthSnapshot>,
}

impl HealthMonitor {
    pub fn new(
        probes: Vec<Arc<dyn HealthProbe>>,
        remediations: Vec<Arc<dyn Remediation>>,
        clock: Arc<dyn Clock>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        let latest = Mutex::new(HealthSnapshot::initial(clock.now()));
        Self {
            probes,
            remediations,
            clock,
            metrics,
            latest,
        }
    }

    /// Run every probe and store the resulting snapshot.
    ///
    /// `consecutive_unhealthy` grows by one on an `Unhealthy` result and
    /// resets on anything else.
    pub fn evaluate(&self) -> HealthSnapshot {
        let checks: Vec<CheckResult> = self.probes.iter().map(|p| p.check()).collect();
        let passed = checks.iter().filter(|c| c.passed).count();
        let status = HealthStatus::from_counts(passed, checks.len());
        let failed_checks: Vec<String> = checks
            .iter()
            .filter(|c| !c.passed)
            .map(|c| c.name.clone())
            .collect();

        let mut latest = self.latest.lock().unwrap_or_else(|e| e.into_inner());
        let consecutive_unhealthy = match status {
            HealthStatus::Unhealthy => latest.consecutive_unhealthy + 1,
            _ => 0,
        };
        if latest.status != status {
            info!(
                from = latest.status.as_str(),
                to = status.as_str(),
                failed = ?failed_checks,
                "health status changed"
            );
        }
        *latest = HealthSnapshot {
            status,
            failed_checks,
            checks,
            consecutive_unhealthy,
            timestamp: self.clock.now(),
        };
        latest.clone()
    }

    /// The most recent snapshot, without probing.
    pub fn latest(&self) -> HealthSnapshot {
        self.latest.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Apply every remediation once, in order. Returns `(name, succeeded)`
    /// per remediation. A failing remediation does not stop the others.
    pub async fn remediate(&self) -> Vec<(String, bool)> {
        let mut results = Vec::with_capacity(self.remediations.len());
        for remediation in &self.remediations {
            let name = remediation.name().to_string();
            let succeeded = match remediation.apply().await {
                Ok(()) => {
                    info!(remediation = %name, "remediation applied");
                    true
                }
                Err(e) => {
                    warn!(remediation = %name, error = %e, "remediation failed");
                    false
                }
            };
            self.metrics.self_heal_attempted(&name, succeeded);
            results.push((name, succeeded));
        }
        results
    }

    /// Forget the unhealthy streak (after a human takes over).
    pub fn reset_streak(&self) {
        self.latest
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .consecutive_unhealthy = 0;
    }

    pub fn probe_names(&self) -> Vec<String> {
        self.probes.iter().map(|p| p.name().to_string()).collect()
    }
}

// ── Latency tracking ──────────────────────────────────────────────────────────

/// A sliding window of recent executor latencies.
#[derive(Debug)]
pub struct LatencyTracker {
    window: usize,
    samples: Mutex<VecDeque<Duration>>,
}

impl LatencyTracker {
    pub fn new(window: usize) -> Self {
        Self {
            window: window.max(1),
            samples: Mutex::new(VecDeque::new()),
        }
    }

    pub fn record(&self, latency: Duration) {
        let mut samples = self.samples.lock().unwrap_or_else(|e| e.into_inner());
        samples.push_back(latency);
        while samples.len() > self.window {
            samples.pop_front();
        }
    }

    /// Mean of the window, or `None` before the first sample.
    pub fn average(&self) -> Option<Duration> {
        let samples = self.samples.lock().unwrap_or_else(|e| e.into_inner());
        if samples.is_empty() {
            return None;
        }
        let total: Duration = samples.iter().sum();
        Some(total / samples.len() as u32)
    }
}

// ── Built-in probes ───────────────────────────────────────────────────────────

/// Fails while any dependency's breaker is open.
pub struct ConnectivityProbe {
    registry: Arc<BreakerRegistry>,
}

impl ConnectivityProbe {
    pub fn new(registry: Arc<BreakerRegistry>) -> Self {
        Self { registry }
    }
}

impl HealthProbe for ConnectivityProbe {
    fn name(&self) -> &str {
        "downstream_connectivity"
    }

    fn check(&self) -> CheckResult {
        let open = self.registry.open_dependencies();
        if open.is_empty() {
            CheckResult::pass(self.name(), "no open circuits")
        } else {
            CheckResult::fail(self.name(), format!("open circuits: {}", open.join(", ")))
                .measured(open.len() as f64, 0.0)
        }
    }
}

/// Fails when the average executor latency exceeds a bound.
pub struct LatencyProbe {
    tracker: Arc<LatencyTracker>,
    max_average: Duration,
}

impl LatencyProbe {
    pub fn new(tracker: Arc<LatencyTracker>, max_average: Duration) -> Self {
        Self {
            tracker,
            max_average,
        }
    }
}

impl HealthProbe for LatencyProbe {
    fn name(&self) -> &str {
        "response_latency"
    }

    fn check(&self) -> CheckResult {
        let limit_ms = self.max_average.as_secs_f64() * 1000.0;
        match self.tracker.average() {
            None => CheckResult::pass(self.name(), "no actions observed yet"),
            Some(avg) => {
                let avg_ms = avg.as_secs_f64() * 1000.0;
                let detail = format!("average latency {avg_ms:.0}ms (limit {limit_ms:.0}ms)");
                let result = if avg <= self.max_average {
                    CheckResult::pass(self.name(), detail)
                } else {
                    CheckResult::fail(self.name(), detail)
                };
                result.measured(avg_ms, limit_ms)
            }
        }
    }
}

/// A probe over any reading: passes while `read()` stays at or below the
/// threshold. Used for resource pressure, queue depth, and the like.
pub struct ThresholdProbe<F> {
    name: String,
    threshold: f64,
    read: F,
}

impl<F> ThresholdProbe<F>
where
    F: Fn() -> f64 + Send + Sync,
{
    pub fn new(name: impl Into<String>, threshold: f64, read: F) -> Self {
        Self {
            name: name.into(),
            threshold,
            read,
        }
    }
}

impl<F> HealthProbe for ThresholdProbe<F>
where
    F: Fn() -> f64 + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn check(&self) -> CheckResult {
        let observed = (self.read)();
        let detail = format!("{observed} (threshold {})", self.threshold);
        let result = if observed <= self.threshold {
            CheckResult::pass(&self.name, detail)
        } else {
            CheckResult::fail(&self.name, detail)
        };
        result.measured(observed, self.threshold)
    }
}

// ── Built-in remediations ─────────────────────────────────────────────────────

/// Clears the idempotency cache of records past their TTL.
pub struct PurgeExpiredRecords {
    guard: Arc<IdempotencyGuard>,
}

impl PurgeExpiredRecords {
    pub fn new(guard: Arc<IdempotencyGuard>) -> Self {
        Self { guard }
    }
}

#[async_trait]
impl Remediation for PurgeExpiredRecords {
    fn name(&self) -> &str {
        "purge_expired_idempotency"
    }

    async fn apply(&self) -> TripwireResult<()> {
        let purged = self.guard.purge_expired().await?;
        debug!(purged, "expired idempotency records purged");
        Ok(())
    }
}

/// A remediation backed by a synchronous closure (reset a pool, reload
/// configuration, drop a cache).
pub struct FnRemediation<F> {
    name: String,
    apply: F,
}

impl<F> FnRemediation<F>
where
    F: Fn() -> TripwireResult<()> + Send + Sync,
{
    pub fn new(name: impl Into<String>, apply: F) -> Self {
        Self {
            name: name.into(),
            apply,
        }
    }
}

#[async_trait]
impl<F> Remediation for FnRemediation<F>
where
    F: Fn() -> TripwireResult<()> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn apply(&self) -> TripwireResult<()> {
        (self.apply)()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use tripwire_contracts::error::TripwireError;
    use tripwire_core::{clock::ManualClock, traits::NoopMetrics};

    use super::*;

    fn monitor(
        probes: Vec<Arc<dyn HealthProbe>>,
        remediations: Vec<Arc<dyn Remediation>>,
    ) -> HealthMonitor {
        HealthMonitor::new(
            probes,
            remediations,
            Arc::new(ManualClock::starting_now()),
            Arc::new(NoopMetrics),
        )
    }

    fn fixed(name: &str, value: f64) -> Arc<dyn HealthProbe> {
        Arc::new(ThresholdProbe::new(name, 1.0, move || value))
    }

    #[test]
    fn status_rolls_up_by_share_of_passing_checks() {
        let all_pass = monitor(vec![fixed("a", 0.0), fixed("b", 0.0)], vec![]);
        assert_eq!(all_pass.evaluate().status, HealthStatus::Healthy);

        let three_of_four = monitor(
            vec![fixed("a", 0.0), fixed("b", 0.0), fixed("c", 0.0), fixed("d", 2.0)],
            vec![],
        );
        let snapshot = three_of_four.evaluate();
        assert_eq!(snapshot.status, HealthStatus::Degraded);
        assert_eq!(snapshot.failed_checks, vec!["d".to_string()]);

        let half = monitor(vec![fixed("a", 0.0), fixed("b", 2.0)], vec![]);
        assert_eq!(half.evaluate().status, HealthStatus::Unhealthy);
    }

    #[test]
    fn unhealthy_streak_counts_and_resets() {
        let reading = Arc::new(AtomicU32::new(5));
        let source = Arc::clone(&reading);
        let probe: Arc<dyn HealthProbe> = Arc::new(ThresholdProbe::new("queue_depth", 1.0, move || {
            f64::from(source.load(Ordering::SeqCst))
        }));
        let monitor = monitor(vec![probe], vec![]);

        assert_eq!(monitor.evaluate().consecutive_unhealthy, 1);
        assert_eq!(monitor.evaluate().consecutive_unhealthy, 2);

        reading.store(0, Ordering::SeqCst);
        let snapshot = monitor.evaluate();
        assert_eq!(snapshot.status, HealthStatus::Healthy);
        assert_eq!(snapshot.consecutive_unhealthy, 0);
        assert_eq!(monitor.latest(), snapshot);
    }

    #[tokio::test]
    async fn remediations_all_run_even_when_one_fails() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let failing: Arc<dyn Remediation> = Arc::new(FnRemediation::new("reload_config", || {
            Err(TripwireError::ConfigError {
                reason: "config file missing".to_string(),
            })
        }));
        let counting: Arc<dyn Remediation> = Arc::new(FnRemediation::new("reset_pool", move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }));

        let monitor = monitor(vec![], vec![failing, counting]);
        let results = monitor.remediate().await;

        assert_eq!(
            results,
            vec![
                ("reload_config".to_string(), false),
                ("reset_pool".to_string(), true)
            ]
        );
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn latency_probe_averages_the_window() {
        let tracker = Arc::new(LatencyTracker::new(2));
        let probe = LatencyProbe::new(Arc::clone(&tracker), Duration::from_millis(100));
        assert!(probe.check().passed);

        tracker.record(Duration::from_millis(500));
        tracker.record(Duration::from_millis(50));
        assert!(!probe.check().passed, "average 275ms");

        tracker.record(Duration::from_millis(50));
        assert_eq!(tracker.average(), Some(Duration::from_millis(50)));
        assert!(probe.check().passed);
    }
}
