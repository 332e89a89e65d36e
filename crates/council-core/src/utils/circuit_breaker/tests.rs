use super::*;
use crate::utils::clock::MockClock;
use chrono::TimeZone;

/// Mock clock whose time the test can move forward
fn controlled_clock() -> (Arc<dyn Clock>, Arc<Mutex<DateTime<Utc>>>) {
    let now = Arc::new(Mutex::new(Utc.with_ymd_and_hms(2025, 1, 1, 12, 0, 0).unwrap()));
    let shared = Arc::clone(&now);
    let mut clock = MockClock::new();
    clock
        .expect_now()
        .returning(move || *shared.lock().unwrap());
    (Arc::new(clock), now)
}

fn advance(now: &Mutex<DateTime<Utc>>, secs: i64) {
    let mut guard = now.lock().unwrap();
    *guard += chrono::Duration::seconds(secs);
}

fn breaker(clock: Arc<dyn Clock>) -> CircuitBreaker {
    CircuitBreaker::new("deepseek", CircuitBreakerConfig::default(), clock)
}

/// One admitted call that fails
fn fail(cb: &CircuitBreaker) {
    let permit = cb.allow().unwrap();
    cb.record_failure(permit);
}

fn trip(cb: &CircuitBreaker) {
    for _ in 0..3 {
        fail(cb);
    }
}

#[test]
fn test_config_defaults_and_builder() {
    let config = CircuitBreakerConfig::default();
    assert_eq!(config.failure_threshold, 3);
    assert_eq!(config.cooldown, Duration::from_secs(600));

    let config = CircuitBreakerConfig::new()
        .with_failure_threshold(0)
        .with_cooldown(Duration::from_secs(5));
    assert_eq!(config.failure_threshold, 1);
    assert_eq!(config.cooldown, Duration::from_secs(5));
}

#[test]
fn test_initial_state_closed() {
    let (clock, _) = controlled_clock();
    let cb = breaker(clock);

    assert!(cb.allow().is_some());
    let snapshot = cb.snapshot();
    assert_eq!(snapshot.state, CircuitState::Closed);
    assert_eq!(snapshot.consecutive_failures, 0);
    assert!(snapshot.last_failure.is_none());
    assert!(snapshot.open_until.is_none());
}

#[test]
fn test_opens_after_three_consecutive_failures() {
    let (clock, now) = controlled_clock();
    let cb = breaker(clock);

    fail(&cb);
    fail(&cb);
    assert_eq!(cb.snapshot().state, CircuitState::Closed);
    assert!(cb.allow().is_some());

    fail(&cb);
    let snapshot = cb.snapshot();
    assert_eq!(snapshot.state, CircuitState::Open);
    assert_eq!(
        snapshot.open_until,
        Some(*now.lock().unwrap() + chrono::Duration::minutes(10))
    );
    assert!(cb.allow().is_none());
}

#[test]
fn test_success_resets_failure_count() {
    let (clock, _) = controlled_clock();
    let cb = breaker(clock);

    fail(&cb);
    fail(&cb);
    let permit = cb.allow().unwrap();
    cb.record_success(permit);
    assert_eq!(cb.snapshot().consecutive_failures, 0);

    // Two more failures are not enough after the reset
    fail(&cb);
    fail(&cb);
    assert_eq!(cb.snapshot().state, CircuitState::Closed);
}

#[test]
fn test_stays_open_until_cooldown() {
    let (clock, now) = controlled_clock();
    let cb = breaker(clock);
    trip(&cb);

    advance(&now, 9 * 60 + 59);
    assert!(cb.allow().is_none());
    assert_eq!(cb.snapshot().state, CircuitState::Open);

    advance(&now, 1);
    assert_eq!(cb.snapshot().state, CircuitState::HalfOpen);
}

#[test]
fn test_half_open_allows_single_trial() {
    let (clock, now) = controlled_clock();
    let cb = breaker(clock);
    trip(&cb);
    advance(&now, 600);

    assert!(cb.allow().is_some());
    assert!(cb.allow().is_none());
    assert!(cb.allow().is_none());
}

#[test]
fn test_half_open_success_closes() {
    let (clock, now) = controlled_clock();
    let cb = breaker(clock);
    trip(&cb);
    advance(&now, 600);

    let trial = cb.allow().unwrap();
    cb.record_success(trial);

    let snapshot = cb.snapshot();
    assert_eq!(snapshot.state, CircuitState::Closed);
    assert_eq!(snapshot.consecutive_failures, 0);
    assert!(snapshot.last_failure.is_some());
    assert!(cb.allow().is_some());
    assert!(cb.allow().is_some());
}

#[test]
fn test_half_open_failure_reopens_from_now() {
    let (clock, now) = controlled_clock();
    let cb = breaker(clock);
    trip(&cb);
    advance(&now, 700);

    let trial = cb.allow().unwrap();
    cb.record_failure(trial);

    let snapshot = cb.snapshot();
    assert_eq!(snapshot.state, CircuitState::Open);
    assert_eq!(
        snapshot.open_until,
        Some(*now.lock().unwrap() + chrono::Duration::minutes(10))
    );
    assert!(cb.allow().is_none());
}

#[test]
fn test_snapshot_does_not_claim_trial() {
    let (clock, now) = controlled_clock();
    let cb = breaker(clock);
    trip(&cb);
    advance(&now, 600);

    assert_eq!(cb.snapshot().state, CircuitState::HalfOpen);
    assert_eq!(cb.snapshot().state, CircuitState::HalfOpen);
    assert!(cb.allow().is_some());
}

#[test]
fn test_reset() {
    let (clock, _) = controlled_clock();
    let cb = breaker(clock);
    trip(&cb);
    assert!(cb.allow().is_none());

    cb.reset();
    assert!(cb.allow().is_some());
    assert_eq!(cb.snapshot(), BreakerSnapshot {
        state: CircuitState::Closed,
        consecutive_failures: 0,
        last_failure: None,
        open_until: None,
    });
}

#[test]
fn test_registry_isolates_providers() {
    let (clock, _) = controlled_clock();
    let registry = CircuitBreakerRegistry::new(
        ["deepseek", "kimi"],
        CircuitBreakerConfig::default(),
        clock,
    );

    for _ in 0..3 {
        let permit = registry.allow("deepseek").unwrap();
        registry.record_failure("deepseek", permit);
    }

    assert!(registry.allow("deepseek").is_none());
    assert!(registry.allow("kimi").is_some());
    assert_eq!(
        registry.snapshot("deepseek").map(|s| s.state),
        Some(CircuitState::Open)
    );
    assert!(registry.snapshot("unknown").is_none());
    assert!(registry.allow("unknown").is_some());

    assert!(registry.reset("deepseek"));
    assert!(!registry.reset("unknown"));
    assert!(registry.allow("deepseek").is_some());
}

#[test]
fn test_concurrent_half_open_admits_one() {
    let (clock, now) = controlled_clock();
    let cb = Arc::new(breaker(clock));
    trip(&cb);
    advance(&now, 600);

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let cb = Arc::clone(&cb);
            std::thread::spawn(move || cb.allow())
        })
        .collect();
    let admitted = handles
        .into_iter()
        .filter_map(|h| h.join().unwrap())
        .count();

    assert_eq!(admitted, 1);
}

#[test]
fn test_late_outcome_cannot_decide_trial() {
    let (clock, now) = controlled_clock();
    let cb = breaker(clock);

    // Admitted while closed, still running when the circuit opens
    let slow = cb.allow().unwrap();
    trip(&cb);
    advance(&now, 600);
    let trial = cb.allow().unwrap();

    cb.record_success(slow);
    assert_eq!(cb.snapshot().state, CircuitState::HalfOpen);
    assert!(cb.allow().is_none());

    cb.record_failure(trial);
    assert_eq!(cb.snapshot().state, CircuitState::Open);
}

#[test]
fn test_late_failure_after_close_is_ignored() {
    let (clock, now) = controlled_clock();
    let cb = breaker(clock);

    let slow = cb.allow().unwrap();
    trip(&cb);
    advance(&now, 600);
    let trial = cb.allow().unwrap();
    cb.record_success(trial);

    cb.record_failure(slow);
    let snapshot = cb.snapshot();
    assert_eq!(snapshot.state, CircuitState::Closed);
    assert_eq!(snapshot.consecutive_failures, 0);
}

#[test]
fn test_permit_from_before_reset_is_ignored() {
    let (clock, _) = controlled_clock();
    let cb = breaker(clock);

    let old = cb.allow().unwrap();
    fail(&cb);
    fail(&cb);
    cb.reset();

    cb.record_failure(old);
    assert_eq!(cb.snapshot().consecutive_failures, 0);
}

#[test]
fn test_state_display_and_serde() {
    assert_eq!(CircuitState::HalfOpen.to_string(), "half_open");
    assert_eq!(
        serde_json::to_string(&CircuitState::Open).unwrap(),
        "\"open\""
    );
}
