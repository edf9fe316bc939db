//! Token-bucket rate limiting per endpoint category.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};

use crate::domain::EndpointCategory;

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Continuously-refilling token bucket. Tokens never exceed capacity.
pub struct TokenBucket {
    state: Mutex<BucketState>,
    capacity: f64,
    refill_per_second: f64,
}

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    pub fn new(capacity: u32, refill_per_second: u32) -> Self {
        Self {
            state: Mutex::new(BucketState {
                tokens: capacity as f64,
                last_refill: Instant::now(),
            }),
            capacity: capacity as f64,
            refill_per_second: refill_per_second as f64,
        }
    }

    /// Atomically check and decrement. Returns false when short of tokens.
    pub fn try_acquire(&self, weight: u32) -> bool {
        let mut state = self.state.lock();
        let elapsed = state.last_refill.elapsed().as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.refill_per_second).min(self.capacity);
        state.last_refill = Instant::now();

        let w = weight as f64;
        if state.tokens >= w {
            state.tokens -= w;
            true
        } else {
            false
        }
    }

    /// Sleep-poll at 10 ms until tokens are available. Cancel-safe: dropping
    /// the future (deadline, shutdown select) abandons the wait.
    pub async fn acquire(&self, weight: u32) {
        loop {
            if self.try_acquire(weight) {
                return;
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    #[cfg(test)]
    fn tokens(&self) -> f64 {
        self.state.lock().tokens
    }
}

/// Buckets keyed by endpoint category. An unknown category trivially
/// succeeds.
pub struct RateLimiter {
    buckets: RwLock<HashMap<EndpointCategory, TokenBucket>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            buckets: RwLock::new(HashMap::new()),
        }
    }

    pub fn add_bucket(&self, category: EndpointCategory, capacity: u32, refill_per_second: u32) {
        self.buckets
            .write()
            .insert(category, TokenBucket::new(capacity, refill_per_second));
    }

    pub fn try_acquire(&self, category: EndpointCategory, weight: u32) -> bool {
        let buckets = self.buckets.read();
        match buckets.get(&category) {
            Some(bucket) => bucket.try_acquire(weight),
            None => true,
        }
    }

    pub async fn acquire(&self, category: EndpointCategory, weight: u32) {
        loop {
            if self.try_acquire(category, weight) {
                return;
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn try_acquire_decrements() {
        let bucket = TokenBucket::new(10, 1);
        assert!(bucket.try_acquire(4));
        assert!(bucket.tokens() <= 6.0 + 0.01);
        assert!(bucket.try_acquire(6));
        assert!(!bucket.try_acquire(1));
    }

    #[test]
    fn tokens_never_exceed_capacity() {
        let bucket = TokenBucket::new(5, 1000);
        std::thread::sleep(Duration::from_millis(20));
        assert!(bucket.try_acquire(1));
        assert!(bucket.tokens() <= 5.0);
    }

    #[test]
    fn unknown_category_trivially_succeeds() {
        let limiter = RateLimiter::new();
        assert!(limiter.try_acquire(EndpointCategory::Account, 100));
    }

    #[tokio::test]
    async fn acquire_waits_for_refill() {
        let limiter = RateLimiter::new();
        limiter.add_bucket(EndpointCategory::OrderPlace, 1, 100);
        assert!(limiter.try_acquire(EndpointCategory::OrderPlace, 1));
        // Bucket empty; refill at 100/s makes one token in ~10ms.
        limiter.acquire(EndpointCategory::OrderPlace, 1).await;
    }
}
