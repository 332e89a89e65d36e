//! Provider health read model
//!
//! Combines each provider's circuit breaker snapshot with rolling call
//! statistics. Written only by the engine's post-call hook; read by the
//! health endpoint.

use crate::utils::{CircuitBreakerRegistry, CircuitState, Clock};
use chrono::{DateTime, Utc};
use council_llm::ProviderRegistry;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};

/// Default number of outcomes kept per provider
pub const DEFAULT_WINDOW_SIZE: usize = 100;

/// Aggregate health
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OverallStatus {
    /// Every enabled provider's circuit is closed
    Healthy,
    /// Some circuits are not closed but consensus is still reachable
    Degraded,
    /// Fewer callable providers than the consensus threshold
    Unhealthy,
}

/// Health of one provider
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderHealth {
    /// Provider id
    pub id: String,
    /// Display name
    pub name: String,
    /// Effective circuit state
    pub state: CircuitState,
    /// Consecutive failures since the last success
    pub consecutive_failures: u32,
    /// Outcomes in the rolling window
    pub request_count: usize,
    /// Share of successful outcomes in the window, `None` before the first call
    pub success_rate: Option<f64>,
    /// Mean latency of successful calls in the window
    pub average_latency_ms: Option<u64>,
    /// When an open circuit admits its next trial
    pub open_until: Option<DateTime<Utc>>,
    /// Last recorded failure
    pub last_failure: Option<DateTime<Utc>>,
}

/// Full health report
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    /// Aggregate status
    pub status: OverallStatus,
    /// When the report was produced
    pub checked_at: DateTime<Utc>,
    /// Providers whose circuit admits calls
    pub callable: usize,
    /// Agreement needed for consensus
    pub threshold: usize,
    /// Per-provider detail, in registry order
    pub providers: Vec<ProviderHealth>,
}

#[derive(Debug, Clone, Copy)]
struct Outcome {
    success: bool,
    latency_ms: u64,
}

/// Rolling per-provider statistics plus breaker state
pub struct HealthMonitor {
    registry: Arc<ProviderRegistry>,
    breakers: Arc<CircuitBreakerRegistry>,
    clock: Arc<dyn Clock>,
    threshold: usize,
    window_size: usize,
    outcomes: Mutex<HashMap<String, VecDeque<Outcome>>>,
}

impl std::fmt::Debug for HealthMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthMonitor")
            .field("threshold", &self.threshold)
            .field("window_size", &self.window_size)
            .finish_non_exhaustive()
    }
}

impl HealthMonitor {
    /// Create a monitor over the given providers and breakers
    #[must_use]
    pub fn new(
        registry: Arc<ProviderRegistry>,
        breakers: Arc<CircuitBreakerRegistry>,
        clock: Arc<dyn Clock>,
        threshold: usize,
        window_size: usize,
    ) -> Self {
        Self {
            registry,
            breakers,
            clock,
            threshold,
            window_size: window_size.max(1),
            outcomes: Mutex::new(HashMap::new()),
        }
    }

    /// Record the outcome of one provider call
    pub fn record(&self, provider_id: &str, success: bool, latency_ms: u64) {
        let mut outcomes = self.outcomes.lock().unwrap_or_else(PoisonError::into_inner);
        let window = outcomes.entry(provider_id.to_string()).or_default();
        if window.len() == self.window_size {
            window.pop_front();
        }
        window.push_back(Outcome {
            success,
            latency_ms,
        });
    }

    /// Build the current report
    #[must_use]
    pub fn report(&self) -> HealthReport {
        let outcomes = self.outcomes.lock().unwrap_or_else(PoisonError::into_inner);

        let providers: Vec<ProviderHealth> = self
            .registry
            .enabled()
            .map(|provider| {
                let snapshot = self.breakers.snapshot(&provider.id);
                let window = outcomes.get(&provider.id);

                let request_count = window.map_or(0, VecDeque::len);
                let (successes, latency_sum) = window
                    .into_iter()
                    .flatten()
                    .filter(|o| o.success)
                    .fold((0u64, 0u64), |(n, sum), o| (n + 1, sum + o.latency_ms));

                ProviderHealth {
                    id: provider.id.clone(),
                    name: provider.name.clone(),
                    state: snapshot.as_ref().map_or(CircuitState::Closed, |s| s.state),
                    consecutive_failures: snapshot.as_ref().map_or(0, |s| s.consecutive_failures),
                    request_count,
                    success_rate: (request_count > 0)
                        .then(|| successes as f64 / request_count as f64),
                    average_latency_ms: (successes > 0).then(|| latency_sum / successes),
                    open_until: snapshot.as_ref().and_then(|s| s.open_until),
                    last_failure: snapshot.as_ref().and_then(|s| s.last_failure),
                }
            })
            .collect();

        let callable = providers
            .iter()
            .filter(|p| p.state != CircuitState::Open)
            .count();

        let status = if callable < self.threshold {
            OverallStatus::Unhealthy
        } else if providers.iter().all(|p| p.state == CircuitState::Closed) {
            OverallStatus::Healthy
        } else {
            OverallStatus::Degraded
        };

        HealthReport {
            status,
            checked_at: self.clock.now(),
            callable,
            threshold: self.threshold,
            providers,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::{CircuitBreakerConfig, SystemClock};
    use council_llm::default_providers;

    fn monitor(window_size: usize) -> (HealthMonitor, Arc<CircuitBreakerRegistry>) {
        let registry = Arc::new(ProviderRegistry::new(default_providers()).unwrap());
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let breakers = Arc::new(CircuitBreakerRegistry::new(
            registry.all().iter().map(|p| p.id.clone()),
            CircuitBreakerConfig::default(),
            Arc::clone(&clock),
        ));
        let monitor = HealthMonitor::new(registry, Arc::clone(&breakers), clock, 4, window_size);
        (monitor, breakers)
    }

    fn open(breakers: &CircuitBreakerRegistry, id: &str) {
        for _ in 0..3 {
            let permit = breakers.allow(id).unwrap();
            breakers.record_failure(id, permit);
        }
    }

    #[test]
    fn test_fresh_monitor_is_healthy() {
        let (monitor, _) = monitor(DEFAULT_WINDOW_SIZE);
        let report = monitor.report();

        assert_eq!(report.status, OverallStatus::Healthy);
        assert_eq!(report.callable, 5);
        assert_eq!(report.providers.len(), 5);
        assert!(report.providers.iter().all(|p| p.success_rate.is_none()));
    }

    #[test]
    fn test_rolling_statistics() {
        let (monitor, _) = monitor(3);
        monitor.record("glm", true, 100);
        monitor.record("glm", false, 30_000);
        monitor.record("glm", true, 300);
        monitor.record("glm", true, 500);

        let report = monitor.report();
        let glm = report.providers.iter().find(|p| p.id == "glm").unwrap();

        // Oldest outcome (100ms success) fell out of the window
        assert_eq!(glm.request_count, 3);
        assert!((glm.success_rate.unwrap() - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(glm.average_latency_ms, Some(400));
    }

    #[test]
    fn test_degraded_and_unhealthy() {
        let (monitor, breakers) = monitor(DEFAULT_WINDOW_SIZE);

        open(&breakers, "kimi");
        let report = monitor.report();
        assert_eq!(report.status, OverallStatus::Degraded);
        assert_eq!(report.callable, 4);
        let kimi = report.providers.iter().find(|p| p.id == "kimi").unwrap();
        assert_eq!(kimi.state, CircuitState::Open);
        assert!(kimi.open_until.is_some());
        assert_eq!(kimi.consecutive_failures, 3);

        open(&breakers, "gemini");
        assert_eq!(monitor.report().status, OverallStatus::Unhealthy);
    }

    #[test]
    fn test_report_serializes() {
        let (monitor, _) = monitor(DEFAULT_WINDOW_SIZE);
        let json = serde_json::to_value(monitor.report()).unwrap();
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["providers"][0]["state"], "closed");
    }
}
