// Per-adapter circuit breaker (§4.X). Opens after N consecutive
// failures, half-opens for a single probe after a cool-down, and closes
// again on that probe's success.

use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Closed,
    Open,
    HalfOpen,
}

struct Inner {
    state: State,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
}

pub struct CircuitBreaker {
    failure_threshold: u32,
    cooldown: Duration,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            failure_threshold,
            cooldown,
            inner: Mutex::new(Inner { state: State::Closed, consecutive_failures: 0, opened_at: None }),
        }
    }

    /// Call before issuing a request. Returns false if the breaker is open
    /// and the cool-down has not elapsed; transitions Open -> HalfOpen
    /// (admitting exactly one probe) once it has.
    pub fn allow_request(&self) -> bool {
        let mut guard = self.inner.lock().unwrap();
        match guard.state {
            State::Closed => true,
            State::HalfOpen => false, // a probe is already in flight
            State::Open => {
                if guard.opened_at.map(|t| t.elapsed() >= self.cooldown).unwrap_or(false) {
                    guard.state = State::HalfOpen;
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut guard = self.inner.lock().unwrap();
        guard.state = State::Closed;
        guard.consecutive_failures = 0;
        guard.opened_at = None;
    }

    pub fn record_failure(&self) {
        let mut guard = self.inner.lock().unwrap();
        guard.consecutive_failures += 1;
        if guard.state == State::HalfOpen || guard.consecutive_failures >= self.failure_threshold {
            guard.state = State::Open;
            guard.opened_at = Some(Instant::now());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_after_threshold_consecutive_failures() {
        let breaker = CircuitBreaker::new(3, Duration::from_secs(60));
        assert!(breaker.allow_request());
        breaker.record_failure();
        breaker.record_failure();
        assert!(breaker.allow_request());
        breaker.record_failure();
        assert!(!breaker.allow_request());
    }

    #[test]
    fn success_resets_failure_count() {
        let breaker = CircuitBreaker::new(3, Duration::from_secs(60));
        breaker.record_failure();
        breaker.record_failure();
        breaker.record_success();
        breaker.record_failure();
        breaker.record_failure();
        assert!(breaker.allow_request());
    }

    #[tokio::test]
    async fn half_open_admits_single_probe() {
        let breaker = CircuitBreaker::new(1, Duration::from_millis(20));
        breaker.record_failure();
        assert!(!breaker.allow_request());
        tokio::time::sleep(Duration::from_millis(30)).await;
        // cooldown elapsed: the next call half-opens and admits a probe
        assert!(breaker.allow_request());
        // while the probe is outstanding, no further requests are admitted
        assert!(!breaker.allow_request());
    }
}
