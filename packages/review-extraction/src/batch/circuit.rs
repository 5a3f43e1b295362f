//! Consecutive-failure circuit breaker shared by every batch worker.

use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Snapshot of the breaker's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitState {
    pub failure_count: usize,
    pub threshold: usize,
    pub is_open: bool,
}

/// Opens after `threshold` consecutive document failures and closes on
/// the next success.
///
/// Every mutation happens under one mutex, so concurrent workers never
/// lose an increment.
#[derive(Debug)]
pub struct CircuitBreaker {
    state: Mutex<CircuitState>,
}

impl CircuitBreaker {
    pub fn new(threshold: usize) -> Self {
        Self {
            state: Mutex::new(CircuitState {
                failure_count: 0,
                threshold: threshold.max(1),
                is_open: false,
            }),
        }
    }

    /// Reset the failure count and close the circuit.
    pub fn record_success(&self) {
        let mut state = self.lock();
        state.failure_count = 0;
        state.is_open = false;
    }

    /// Count a failure, opening the circuit at the threshold.
    ///
    /// Returns true if this call opened it.
    pub fn record_failure(&self) -> bool {
        let mut state = self.lock();
        state.failure_count += 1;
        if !state.is_open && state.failure_count >= state.threshold {
            state.is_open = true;
            warn!(
                failures = state.failure_count,
                threshold = state.threshold,
                "Circuit breaker opened, skipping remaining documents"
            );
            return true;
        }
        false
    }

    pub fn is_open(&self) -> bool {
        self.lock().is_open
    }

    pub fn state(&self) -> CircuitState {
        *self.lock()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CircuitState> {
        // The state is plain data; a panicked holder cannot leave it torn.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_opens_at_threshold_and_resets_on_success() {
        let breaker = CircuitBreaker::new(3);
        assert!(!breaker.record_failure());
        assert!(!breaker.record_failure());
        assert!(!breaker.is_open());
        assert!(breaker.record_failure());
        assert!(breaker.is_open());
        assert!(!breaker.record_failure());

        breaker.record_success();
        assert_eq!(
            breaker.state(),
            CircuitState {
                failure_count: 0,
                threshold: 3,
                is_open: false
            }
        );
    }

    #[test]
    fn test_concurrent_failures_are_all_counted() {
        let breaker = Arc::new(CircuitBreaker::new(1000));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let breaker = breaker.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        breaker.record_failure();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(breaker.state().failure_count, 800);
        assert!(!breaker.is_open());
    }
}
