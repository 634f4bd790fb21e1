use std::sync::Arc;

use crate::admission::Admission;
use crate::config::Config;
use crate::extract::TextExtractor;
use crate::ledger::FjallLedger;
use crate::observability::Metrics;
use crate::queue::FjallQueue;

use super::ratelimit::RateLimiter;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub ledger: Arc<FjallLedger>,
    pub queue: Arc<FjallQueue>,
    pub admission: Arc<Admission>,
    pub extractor: Arc<dyn TextExtractor>,
    pub metrics: Arc<Metrics>,
    pub rate_limiter: Arc<RateLimiter>,
}

impl AppState {
    pub fn new(
        config: Config,
        ledger: Arc<FjallLedger>,
        queue: Arc<FjallQueue>,
        admission: Arc<Admission>,
        extractor: Arc<dyn TextExtractor>,
        metrics: Arc<Metrics>,
    ) -> Self {
        let rate_limiter = Arc::new(RateLimiter::new(
            config.server.rate_limit_per_min,
            std::time::Duration::from_secs(60),
        ));
        Self {
            config: Arc::new(config),
            ledger,
            queue,
            admission,
            extractor,
            metrics,
            rate_limiter,
        }
    }
}
