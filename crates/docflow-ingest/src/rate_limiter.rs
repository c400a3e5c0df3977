//! Minimum-spacing limiter for throttled external services
//!
//! A bucket of size one: each [`RateLimiter::acquire`] waits until at least
//! `min_interval` has passed since the previous grant. The check, the wait
//! and the timestamp update all happen under one async mutex, so callers
//! sharing a limiter are granted strictly one after another.

use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};
use tracing::trace;

#[derive(Debug)]
pub struct RateLimiter {
    min_interval: Duration,
    last_granted: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_granted: Mutex::new(None),
        }
    }

    /// A limiter that never waits
    pub fn unlimited() -> Self {
        Self::new(Duration::ZERO)
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Wait for permission to make the next call
    pub async fn acquire(&self) {
        if self.min_interval.is_zero() {
            return;
        }

        let mut last = self.last_granted.lock().await;
        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < self.min_interval {
                let remaining = self.min_interval - elapsed;
                trace!(wait_ms = remaining.as_millis() as u64, "Throttling outbound call");
                sleep(remaining).await;
            }
        }
        *last = Some(Instant::now());
    }
}
