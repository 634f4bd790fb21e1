//! Shared exponential backoff with jitter
//!
//! One policy type reused by the queue redelivery path, the LLM client and
//! the vector client. Delays grow by `multiplier` from `initial` up to
//! `max`, each spread by `jitter` (a fraction of the computed delay), and
//! the whole retry loop is bounded by `max_elapsed` when set.

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct Backoff {
    pub initial: Duration,
    pub max: Duration,
    pub multiplier: f64,
    /// Total budget across all attempts; `None` means retry forever.
    pub max_elapsed: Option<Duration>,
    /// Jitter fraction in `[0, 1]`; 0.2 spreads each delay by ±20%.
    pub jitter: f64,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(500),
            max: Duration::from_secs(30),
            multiplier: 2.0,
            max_elapsed: Some(Duration::from_secs(60)),
            jitter: 0.2,
        }
    }
}

impl Backoff {
    /// Raw delay for a 1-based attempt number, before jitter.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(30);
        let raw = self.initial.as_secs_f64() * self.multiplier.powi(exp as i32);
        Duration::from_secs_f64(raw.min(self.max.as_secs_f64()))
    }

    /// Delay for a 1-based attempt number with jitter applied.
    pub fn delay(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        if self.jitter <= 0.0 {
            return base;
        }
        let spread = base.as_secs_f64() * self.jitter;
        let offset = rand::thread_rng().gen_range(-spread..=spread);
        Duration::from_secs_f64((base.as_secs_f64() + offset).max(0.0))
    }
}

/// Retry `op` while `retriable` says the error is transient and the elapsed
/// budget is not exhausted. The final error is returned unchanged.
pub async fn retry<T, E, F, Fut>(
    policy: &Backoff,
    retriable: impl Fn(&E) -> bool,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let started = Instant::now();
    let mut attempt: u32 = 1;

    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if !retriable(&err) {
                    return Err(err);
                }
                let delay = policy.delay(attempt);
                if let Some(budget) = policy.max_elapsed {
                    if started.elapsed() + delay >= budget {
                        return Err(err);
                    }
                }
                tracing::debug!(attempt, delay_ms = delay.as_millis() as u64, "retrying after error");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy() -> Backoff {
        Backoff {
            initial: Duration::from_millis(1),
            max: Duration::from_millis(8),
            multiplier: 2.0,
            max_elapsed: Some(Duration::from_millis(200)),
            jitter: 0.0,
        }
    }

    #[test]
    fn base_delay_grows_and_caps() {
        let p = policy();
        assert_eq!(p.base_delay(1), Duration::from_millis(1));
        assert_eq!(p.base_delay(2), Duration::from_millis(2));
        assert_eq!(p.base_delay(3), Duration::from_millis(4));
        assert_eq!(p.base_delay(4), Duration::from_millis(8));
        assert_eq!(p.base_delay(10), Duration::from_millis(8));
    }

    #[test]
    fn jitter_stays_within_spread() {
        let p = Backoff {
            jitter: 0.5,
            ..policy()
        };
        for _ in 0..50 {
            let d = p.delay(4);
            assert!(d >= Duration::from_millis(4));
            assert!(d <= Duration::from_millis(12));
        }
    }

    #[tokio::test]
    async fn retries_until_success() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, &str> = retry(&policy(), |_| true, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move { if n < 2 { Err("transient") } else { Ok(n) } }
        })
        .await;
        assert_eq!(result, Ok(2));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retriable_fails_immediately() {
        let calls = AtomicU32::new(0);
        let result: Result<(), &str> = retry(&policy(), |_| false, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err("fatal") }
        })
        .await;
        assert_eq!(result, Err("fatal"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn gives_up_when_budget_exhausted() {
        let p = Backoff {
            initial: Duration::from_millis(50),
            max_elapsed: Some(Duration::from_millis(60)),
            ..policy()
        };
        let result: Result<(), &str> = retry(&p, |_| true, || async { Err("transient") }).await;
        assert_eq!(result, Err("transient"));
    }
}
