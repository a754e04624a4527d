use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::constants::{
    BREAKER_HALF_OPEN_SUCCESSES, BREAKER_MAX_FAILURES, BREAKER_RESET_TIMEOUT_SECS,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BreakerState::Closed => "closed",
            BreakerState::Open => "open",
            BreakerState::HalfOpen => "half-open",
        }
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: BreakerState,
    consecutive_failures: u32,
    half_open_successes: u32,
    opened_at: Option<Instant>,
}

/// Per-dependency failure isolation: closed → open after `max_failures`
/// consecutive failures, open → half-open after `reset_timeout`, half-open →
/// closed after a small burst of successes. While open, `is_available()` is
/// false and callers must not touch the dependency.
///
/// One value per external dependency, injected into its caller. No
/// module-level singletons.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: &'static str,
    max_failures: u32,
    reset_timeout: Duration,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(name: &'static str) -> Self {
        Self::with_thresholds(
            name,
            BREAKER_MAX_FAILURES,
            Duration::from_secs(BREAKER_RESET_TIMEOUT_SECS),
        )
    }

    pub fn with_thresholds(name: &'static str, max_failures: u32, reset_timeout: Duration) -> Self {
        Self {
            name,
            max_failures,
            reset_timeout,
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                half_open_successes: 0,
                opened_at: None,
            }),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Whether a call may proceed. Transitions open → half-open when the
    /// reset timeout has elapsed.
    pub fn is_available(&self) -> bool {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        match inner.state {
            BreakerState::Closed | BreakerState::HalfOpen => true,
            BreakerState::Open => {
                let elapsed = inner
                    .opened_at
                    .map(|t| t.elapsed() >= self.reset_timeout)
                    .unwrap_or(true);
                if elapsed {
                    inner.state = BreakerState::HalfOpen;
                    inner.half_open_successes = 0;
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        match inner.state {
            BreakerState::Closed => inner.consecutive_failures = 0,
            BreakerState::HalfOpen => {
                inner.half_open_successes += 1;
                if inner.half_open_successes >= BREAKER_HALF_OPEN_SUCCESSES {
                    inner.state = BreakerState::Closed;
                    inner.consecutive_failures = 0;
                    inner.opened_at = None;
                }
            }
            BreakerState::Open => {}
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        match inner.state {
            BreakerState::HalfOpen => {
                inner.state = BreakerState::Open;
                inner.opened_at = Some(Instant::now());
            }
            BreakerState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.max_failures {
                    inner.state = BreakerState::Open;
                    inner.opened_at = Some(Instant::now());
                }
            }
            BreakerState::Open => {}
        }
    }

    pub fn state(&self) -> BreakerState {
        self.inner.lock().expect("breaker lock poisoned").state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_after_three_consecutive_failures() {
        let cb = CircuitBreaker::new("test");
        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), BreakerState::Closed);
        cb.record_failure();
        assert_eq!(cb.state(), BreakerState::Open);
        assert!(!cb.is_available());
    }

    #[test]
    fn success_resets_failure_streak() {
        let cb = CircuitBreaker::new("test");
        cb.record_failure();
        cb.record_failure();
        cb.record_success();
        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), BreakerState::Closed);
    }

    #[test]
    fn half_open_closes_after_success_burst() {
        let cb = CircuitBreaker::with_thresholds("test", 3, Duration::from_millis(0));
        for _ in 0..3 {
            cb.record_failure();
        }
        assert_eq!(cb.state(), BreakerState::Open);
        // Zero reset timeout: next availability check flips to half-open.
        assert!(cb.is_available());
        assert_eq!(cb.state(), BreakerState::HalfOpen);
        cb.record_success();
        cb.record_success();
        assert_eq!(cb.state(), BreakerState::Closed);
    }

    #[test]
    fn half_open_failure_reopens() {
        let cb = CircuitBreaker::with_thresholds("test", 3, Duration::from_millis(0));
        for _ in 0..3 {
            cb.record_failure();
        }
        assert!(cb.is_available());
        cb.record_failure();
        assert_eq!(cb.state(), BreakerState::Open);
    }
}
