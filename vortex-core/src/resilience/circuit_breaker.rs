//! Per-provider circuit breaker.
//!
//! Promotes `trendlab-core/src/data/circuit_breaker.rs`'s two-state
//! `Closed`/`Open{tripped_at}` machine to the three-state
//! `CLOSED`/`OPEN`/`HALF_OPEN` machine spec.md §4.2 requires, keeping its
//! `Mutex`-guarded interior-mutability shape and `record_success` /
//! `record_failure` / `trip` / `is_allowed` method names.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

/// Circuit breaker for a single provider.
#[derive(Debug)]
pub struct CircuitBreaker {
    state: Mutex<BreakerState>,
    opened_at: Mutex<Option<Instant>>,
    consecutive_failures: Mutex<u32>,
    probe_in_flight: Mutex<bool>,
    failure_threshold: u32,
    recovery_timeout: Duration,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, recovery_timeout: Duration) -> Self {
        Self {
            state: Mutex::new(BreakerState::Closed),
            opened_at: Mutex::new(None),
            consecutive_failures: Mutex::new(0),
            probe_in_flight: Mutex::new(false),
            failure_threshold,
            recovery_timeout,
        }
    }

    /// `failure_threshold = 5`, `recovery_timeout = 60s` (spec.md §4.2 defaults).
    pub fn default_provider() -> Self {
        Self::new(5, Duration::from_secs(60))
    }

    /// Is a call currently admitted? In `HALF_OPEN`, only one caller at a
    /// time is admitted as the probe; concurrent callers are refused until
    /// that probe resolves via `record_success`/`record_failure`.
    pub fn is_allowed(&self) -> bool {
        let mut state = self.state.lock().unwrap();
        match *state {
            BreakerState::Closed => true,
            BreakerState::Open => {
                let elapsed = self
                    .opened_at
                    .lock()
                    .unwrap()
                    .map(|t| t.elapsed())
                    .unwrap_or(Duration::MAX);
                if elapsed >= self.recovery_timeout {
                    *state = BreakerState::HalfOpen;
                    let mut probe = self.probe_in_flight.lock().unwrap();
                    *probe = true;
                    true
                } else {
                    false
                }
            }
            BreakerState::HalfOpen => {
                let mut probe = self.probe_in_flight.lock().unwrap();
                if *probe {
                    false
                } else {
                    *probe = true;
                    true
                }
            }
        }
    }

    /// Record a successful call. From `HALF_OPEN` this closes the breaker
    /// and resets the failure counter; from `CLOSED` it just resets.
    pub fn record_success(&self) {
        let mut state = self.state.lock().unwrap();
        *state = BreakerState::Closed;
        *self.consecutive_failures.lock().unwrap() = 0;
        *self.probe_in_flight.lock().unwrap() = false;
        *self.opened_at.lock().unwrap() = None;
    }

    /// Record a failed call. A `HALF_OPEN` probe failure re-opens the
    /// breaker and resets its timer; a `CLOSED` failure only trips once
    /// `consecutive_failures` reaches the threshold.
    pub fn record_failure(&self) {
        let mut state = self.state.lock().unwrap();
        match *state {
            BreakerState::HalfOpen => {
                *state = BreakerState::Open;
                *self.opened_at.lock().unwrap() = Some(Instant::now());
                *self.probe_in_flight.lock().unwrap() = false;
            }
            BreakerState::Closed | BreakerState::Open => {
                let mut failures = self.consecutive_failures.lock().unwrap();
                *failures += 1;
                if *failures >= self.failure_threshold {
                    *state = BreakerState::Open;
                    *self.opened_at.lock().unwrap() = Some(Instant::now());
                }
            }
        }
    }

    /// Immediately trip the breaker regardless of the failure counter.
    pub fn trip(&self) {
        *self.state.lock().unwrap() = BreakerState::Open;
        *self.opened_at.lock().unwrap() = Some(Instant::now());
        *self.probe_in_flight.lock().unwrap() = false;
    }

    pub fn is_open(&self) -> bool {
        matches!(*self.state.lock().unwrap(), BreakerState::Open)
    }
}

/// Process-wide registry of one breaker per provider, keyed by provider name
/// (spec.md §9, "Global state").
#[derive(Debug, Default)]
pub struct BreakerRegistry {
    breakers: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
}

impl BreakerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_create(&self, provider: &str) -> Arc<CircuitBreaker> {
        let mut breakers = self.breakers.lock().unwrap();
        breakers
            .entry(provider.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::default_provider()))
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_closed() {
        let cb = CircuitBreaker::new(3, Duration::from_secs(60));
        assert!(cb.is_allowed());
    }

    #[test]
    fn trips_after_threshold_failures() {
        let cb = CircuitBreaker::new(3, Duration::from_secs(60));
        cb.record_failure();
        cb.record_failure();
        assert!(cb.is_allowed());
        cb.record_failure();
        assert!(!cb.is_allowed());
    }

    #[test]
    fn half_open_admits_single_probe() {
        let cb = CircuitBreaker::new(1, Duration::from_millis(5));
        cb.record_failure(); // -> Open
        std::thread::sleep(Duration::from_millis(10));
        assert!(cb.is_allowed()); // -> HalfOpen, probe admitted
        assert!(!cb.is_allowed()); // second caller refused while probe in flight
    }

    #[test]
    fn half_open_success_closes_breaker() {
        let cb = CircuitBreaker::new(1, Duration::from_millis(5));
        cb.record_failure();
        std::thread::sleep(Duration::from_millis(10));
        assert!(cb.is_allowed());
        cb.record_success();
        assert!(cb.is_allowed());
        assert!(cb.is_allowed()); // closed again, unlimited admission
    }

    #[test]
    fn half_open_failure_reopens_and_resets_timer() {
        let cb = CircuitBreaker::new(1, Duration::from_millis(20));
        cb.record_failure();
        std::thread::sleep(Duration::from_millis(25));
        assert!(cb.is_allowed());
        cb.record_failure();
        assert!(!cb.is_allowed()); // fresh cooldown window
    }

    #[test]
    fn registry_returns_same_breaker_for_same_provider() {
        let registry = BreakerRegistry::new();
        let a = registry.get_or_create("yahoo");
        a.trip();
        let b = registry.get_or_create("yahoo");
        assert!(b.is_open());
    }

    #[test]
    fn registry_isolates_breakers_per_provider() {
        let registry = BreakerRegistry::new();
        registry.get_or_create("yahoo").trip();
        assert!(!registry.get_or_create("barchart").is_open());
    }
}
