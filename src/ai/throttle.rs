//! Minimum inter-call interval gate
//!
//! Free-tier providers cap aggregate QPS, so every provider-bound call
//! waits its turn here. Callers queue FIFO on the internal mutex; each
//! acquisition reserves the next slot before sleeping, so concurrent
//! callers are spaced by the full interval.

use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

pub struct Throttle {
    next_slot: Mutex<Instant>,
    interval: Duration,
}

impl Throttle {
    /// `interval` is the minimum spacing between calls; scale it by the
    /// number of worker replicas sharing the provider quota.
    pub fn new(interval: Duration) -> Self {
        Self {
            next_slot: Mutex::new(Instant::now()),
            interval,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Wait until this caller's slot arrives.
    pub async fn acquire(&self) {
        if self.interval.is_zero() {
            return;
        }
        let wait = {
            let mut slot = self.next_slot.lock().await;
            let now = Instant::now();
            let at = (*slot).max(now);
            *slot = at + self.interval;
            at.saturating_duration_since(now)
        };
        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }
    }
}
