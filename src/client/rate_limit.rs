//! Token bucket rate limiting
//!
//! The bucket refills continuously at a fixed rate up to its capacity. Refill
//! is computed lazily from the elapsed time on every acquire, so there is no
//! background task and the limiter works the same for one caller or many.

use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

use crate::config::RateLimitConfig;
use crate::metrics::RateLimiterMetrics;

/// Smallest wait between two refill checks, avoids spinning on rounding error.
const MIN_WAIT: Duration = Duration::from_millis(1);

/// Mutable bucket state. Invariant: `0 <= tokens <= capacity`.
#[derive(Debug, Clone)]
struct RateBudget {
    tokens: f64,
    capacity: f64,
    refill_rate_per_second: f64,
    last_refill_at: Instant,
}

impl RateBudget {
    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill_at);
        self.tokens =
            (self.tokens + elapsed.as_secs_f64() * self.refill_rate_per_second).min(self.capacity);
        self.last_refill_at = now;
    }

    /// Debit `cost` tokens, or report how long until they will be available.
    fn try_debit(&mut self, cost: f64, now: Instant) -> Result<(), Duration> {
        self.refill(now);
        if self.tokens >= cost {
            self.tokens -= cost;
            return Ok(());
        }
        let missing = cost - self.tokens;
        let wait = Duration::from_secs_f64(missing / self.refill_rate_per_second);
        Err(wait.max(MIN_WAIT))
    }
}

/// Token bucket gate shared by every outbound call.
#[derive(Debug)]
pub struct RateLimiter {
    budget: Mutex<RateBudget>,
}

impl RateLimiter {
    /// Create a limiter with the given steady rate and burst capacity.
    ///
    /// The bucket starts full. Non-positive values are raised to a minimal
    /// working limiter (rate 0.1/s, capacity 1) instead of stalling forever.
    pub fn new(refill_rate_per_second: f64, capacity: f64) -> Self {
        let refill_rate_per_second = if refill_rate_per_second > 0.0 {
            refill_rate_per_second
        } else {
            0.1
        };
        let capacity = capacity.max(1.0);
        Self {
            budget: Mutex::new(RateBudget {
                tokens: capacity,
                capacity,
                refill_rate_per_second,
                last_refill_at: Instant::now(),
            }),
        }
    }

    /// Create a limiter from configuration.
    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(config.requests_per_second, config.burst)
    }

    fn lock(&self) -> MutexGuard<'_, RateBudget> {
        // Budget updates are single assignments, a poisoned guard is still consistent.
        self.budget.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Wait until `cost` tokens are available, then debit them.
    ///
    /// Never fails: an exhausted bucket only delays the caller. Costs above
    /// the capacity are clamped to the capacity.
    pub async fn acquire(&self, cost: u32) {
        if cost == 0 {
            return;
        }

        let mut cost = f64::from(cost);
        let capacity = self.capacity();
        if cost > capacity {
            warn!(cost, capacity, "Rate limit cost exceeds bucket capacity, clamping");
            cost = capacity;
        }

        let mut metrics = RateLimiterMetrics::new();
        metrics.start_acquire();

        loop {
            // Guard dropped before sleeping so waiters never block each other.
            let outcome = self.lock().try_debit(cost, Instant::now());
            match outcome {
                Ok(()) => {
                    metrics.record_acquired(cost as u32);
                    metrics.update_available_permits(self.available());
                    return;
                }
                Err(wait) => {
                    debug!(wait_ms = wait.as_millis() as u64, "Waiting for rate limit tokens");
                    sleep(wait).await;
                }
            }
        }
    }

    /// Tokens currently in the bucket (after a lazy refill).
    pub fn available(&self) -> f64 {
        let mut budget = self.lock();
        budget.refill(Instant::now());
        budget.tokens
    }

    /// Bucket capacity.
    pub fn capacity(&self) -> f64 {
        self.lock().capacity
    }

    /// Steady refill rate in tokens per second.
    pub fn refill_rate(&self) -> f64 {
        self.lock().refill_rate_per_second
    }
}
