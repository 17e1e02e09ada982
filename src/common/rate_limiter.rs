//! Token-bucket rate limiter for venue API pacing

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};
use tokio::time::Instant;

/// Consumable-permit rate limiter
///
/// The bucket holds `per_second` permits and refills once a second.
/// `acquire` consumes a permit, waiting when the bucket is empty.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    permits: Arc<Semaphore>,
    per_second: usize,
    last_refill: Arc<Mutex<Instant>>,
}

impl RateLimiter {
    pub fn new(per_second: usize) -> Self {
        RateLimiter {
            permits: Arc::new(Semaphore::new(per_second)),
            per_second,
            last_refill: Arc::new(Mutex::new(Instant::now())),
        }
    }

    /// Wait for and consume one permit
    pub async fn acquire(&self) {
        self.refill().await;
        let permit = self
            .permits
            .acquire()
            .await
            .expect("rate limiter semaphore closed");
        permit.forget();
    }

    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    async fn refill(&self) {
        let mut last = self.last_refill.lock().await;
        if last.elapsed() >= Duration::from_secs(1) {
            let missing = self.per_second.saturating_sub(self.permits.available_permits());
            if missing > 0 {
                self.permits.add_permits(missing);
            }
            *last = Instant::now();
        }
    }
}
