//! Circuit Breaker pattern implementation
//!
//! One breaker per provider, created at process start. The breaker has three
//! states:
//! - Closed: calls pass through, consecutive failures are counted
//! - Open: calls are refused until the cool-down elapses
//! - HalfOpen: exactly one trial call decides between Closed and Open
//!
//! The breaker never retries; it only answers "may I call?" and records
//! outcomes. All transitions of one breaker happen under its own mutex.

use super::clock::{saturating_add, Clock};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation - calls pass through
    Closed,
    /// Too many consecutive failures - calls are refused
    Open,
    /// Cool-down elapsed - one trial call allowed
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Configuration for circuit breaker
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening the circuit
    pub failure_threshold: u32,
    /// How long the circuit stays open before a trial call is allowed
    pub cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            cooldown: Duration::from_secs(10 * 60),
        }
    }
}

impl CircuitBreakerConfig {
    /// Create a new configuration
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set failure threshold (minimum 1)
    #[must_use]
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold.max(1);
        self
    }

    /// Set cool-down
    #[must_use]
    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }
}

/// Point-in-time view of one breaker
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BreakerSnapshot {
    /// Effective state (an open circuit past its cool-down reports half_open)
    pub state: CircuitState,
    /// Consecutive failures since the last success
    pub consecutive_failures: u32,
    /// When the last failure was recorded
    pub last_failure: Option<DateTime<Utc>>,
    /// When an open circuit will admit a trial call
    pub open_until: Option<DateTime<Utc>>,
}

/// Admission handed out by [`CircuitBreaker::allow`].
///
/// Outcomes are only counted for permits issued since the breaker's last
/// transition, so a call admitted before the circuit opened cannot decide
/// the half-open trial.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "report the call outcome with the permit"]
pub struct Permit {
    generation: u64,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    last_failure: Option<DateTime<Utc>>,
    open_until: Option<DateTime<Utc>>,
    /// Bumped on every state transition
    generation: u64,
}

impl BreakerInner {
    fn closed(generation: u64) -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            last_failure: None,
            open_until: None,
            generation,
        }
    }

    fn permit(&self) -> Permit {
        Permit {
            generation: self.generation,
        }
    }
}

/// Circuit breaker for a single provider
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
    inner: Mutex<BreakerInner>,
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("inner", &*self.lock())
            .finish()
    }
}

impl CircuitBreaker {
    /// Create a new circuit breaker in the closed state
    #[must_use]
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            name: name.into(),
            config,
            clock,
            inner: Mutex::new(BreakerInner::closed(0)),
        }
    }

    /// Get the circuit breaker name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    // A panic while holding the lock cannot leave the state half-written, so
    // a poisoned mutex is still safe to use.
    fn lock(&self) -> MutexGuard<'_, BreakerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Ask whether a call may proceed.
    ///
    /// A permit from an open circuit whose cool-down has elapsed moves the
    /// breaker to half-open and is the single trial; while it is outstanding
    /// every other caller is refused. The caller must report the outcome with
    /// [`record_success`](Self::record_success) or
    /// [`record_failure`](Self::record_failure).
    pub fn allow(&self) -> Option<Permit> {
        let now = self.clock.now();
        let mut inner = self.lock();

        match inner.state {
            CircuitState::Closed => Some(inner.permit()),
            CircuitState::Open => {
                let cooled_down = inner.open_until.map_or(true, |until| now >= until);
                if cooled_down {
                    info!(name = %self.name, "Circuit breaker entering half-open state");
                    inner.state = CircuitState::HalfOpen;
                    inner.generation += 1;
                    Some(inner.permit())
                } else {
                    None
                }
            }
            CircuitState::HalfOpen => {
                debug!(name = %self.name, "Trial call already in flight, refusing");
                None
            }
        }
    }

    fn is_stale(&self, inner: &BreakerInner, permit: Permit) -> bool {
        let stale = permit.generation != inner.generation;
        if stale {
            debug!(
                name = %self.name,
                state = %inner.state,
                "Ignoring outcome of a call admitted before the last transition"
            );
        }
        stale
    }

    /// Record a successful call
    pub fn record_success(&self, permit: Permit) {
        let mut inner = self.lock();
        if self.is_stale(&inner, permit) {
            return;
        }

        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures = 0;
            }
            CircuitState::HalfOpen => {
                info!(name = %self.name, "Trial call succeeded, circuit breaker closed");
                *inner = BreakerInner {
                    last_failure: inner.last_failure,
                    ..BreakerInner::closed(inner.generation + 1)
                };
            }
            // Opening bumps the generation, so no current permit exists
            CircuitState::Open => {}
        }
    }

    /// Record a failed call
    pub fn record_failure(&self, permit: Permit) {
        let now = self.clock.now();
        let mut inner = self.lock();
        if self.is_stale(&inner, permit) {
            return;
        }
        inner.last_failure = Some(now);
        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);

        match inner.state {
            CircuitState::Closed => {
                debug!(
                    name = %self.name,
                    failures = inner.consecutive_failures,
                    threshold = self.config.failure_threshold,
                    "Circuit breaker failure recorded"
                );

                if inner.consecutive_failures >= self.config.failure_threshold {
                    self.open(&mut inner, now);
                }
            }
            CircuitState::HalfOpen => {
                warn!(name = %self.name, "Trial call failed, reopening circuit breaker");
                self.open(&mut inner, now);
            }
            CircuitState::Open => {}
        }
    }

    fn open(&self, inner: &mut BreakerInner, now: DateTime<Utc>) {
        let until = saturating_add(now, self.config.cooldown);
        info!(
            name = %self.name,
            failures = inner.consecutive_failures,
            open_until = %until,
            "Circuit breaker opened"
        );
        inner.state = CircuitState::Open;
        inner.open_until = Some(until);
        inner.generation += 1;
    }

    /// Current state without side effects
    #[must_use]
    pub fn snapshot(&self) -> BreakerSnapshot {
        let now = self.clock.now();
        let inner = self.lock();

        let state = match inner.state {
            CircuitState::Open if inner.open_until.map_or(true, |until| now >= until) => {
                CircuitState::HalfOpen
            }
            state => state,
        };

        BreakerSnapshot {
            state,
            consecutive_failures: inner.consecutive_failures,
            last_failure: inner.last_failure,
            open_until: match inner.state {
                CircuitState::Open => inner.open_until,
                _ => None,
            },
        }
    }

    /// Force the breaker back to closed
    pub fn reset(&self) {
        let mut inner = self.lock();
        if inner.state != CircuitState::Closed || inner.consecutive_failures > 0 {
            info!(name = %self.name, "Circuit breaker manually reset");
        }
        *inner = BreakerInner::closed(inner.generation + 1);
    }
}

/// Process-wide set of breakers, one per provider id
///
/// Built once at start; the map itself is never mutated afterwards.
#[derive(Debug)]
pub struct CircuitBreakerRegistry {
    breakers: HashMap<String, CircuitBreaker>,
}

impl CircuitBreakerRegistry {
    /// Create one closed breaker per id
    pub fn new<I, S>(ids: I, config: CircuitBreakerConfig, clock: Arc<dyn Clock>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let breakers = ids
            .into_iter()
            .map(|id| {
                let id = id.into();
                let breaker = CircuitBreaker::new(id.clone(), config.clone(), Arc::clone(&clock));
                (id, breaker)
            })
            .collect();
        Self { breakers }
    }

    /// Look up a breaker
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&CircuitBreaker> {
        self.breakers.get(id)
    }

    /// See [`CircuitBreaker::allow`]. Unknown ids are always allowed.
    pub fn allow(&self, id: &str) -> Option<Permit> {
        match self.breakers.get(id) {
            Some(breaker) => breaker.allow(),
            None => {
                warn!(provider = %id, "No circuit breaker registered for provider");
                Some(Permit { generation: 0 })
            }
        }
    }

    /// See [`CircuitBreaker::record_success`]
    pub fn record_success(&self, id: &str, permit: Permit) {
        if let Some(breaker) = self.breakers.get(id) {
            breaker.record_success(permit);
        }
    }

    /// See [`CircuitBreaker::record_failure`]
    pub fn record_failure(&self, id: &str, permit: Permit) {
        if let Some(breaker) = self.breakers.get(id) {
            breaker.record_failure(permit);
        }
    }

    /// Snapshot one breaker
    #[must_use]
    pub fn snapshot(&self, id: &str) -> Option<BreakerSnapshot> {
        self.breakers.get(id).map(CircuitBreaker::snapshot)
    }

    /// Reset one breaker; returns false for unknown ids
    pub fn reset(&self, id: &str) -> bool {
        match self.breakers.get(id) {
            Some(breaker) => {
                breaker.reset();
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests;
