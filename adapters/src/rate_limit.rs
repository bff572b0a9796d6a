// Per-adapter token bucket rate limiter (§4.X), e.g. the attestation
// API's provider-declared 35 rps.

use std::sync::Mutex;
use std::time::Instant;

struct Inner {
    tokens: f64,
    last_refill: Instant,
}

pub struct RateLimiter {
    capacity: f64,
    refill_per_sec: f64,
    inner: Mutex<Inner>,
}

impl RateLimiter {
    pub fn new(rate_per_sec: f64) -> Self {
        Self {
            capacity: rate_per_sec.max(1.0),
            refill_per_sec: rate_per_sec.max(1.0),
            inner: Mutex::new(Inner { tokens: rate_per_sec.max(1.0), last_refill: Instant::now() }),
        }
    }

    fn refill(&self, guard: &mut Inner) {
        let elapsed = guard.last_refill.elapsed().as_secs_f64();
        guard.tokens = (guard.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        guard.last_refill = Instant::now();
    }

    /// Returns `true` and consumes a token if one is available, else
    /// `false`. Callers that get `false` should surface `RateLimited`
    /// rather than block — the adapter layer does not implement its own
    /// queueing.
    pub fn try_acquire(&self) -> bool {
        let mut guard = self.inner.lock().unwrap();
        self.refill(&mut guard);
        if guard.tokens >= 1.0 {
            guard.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exhausts_then_refills() {
        let limiter = RateLimiter::new(2.0);
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
    }
}
