use thiserror::Error;

use super::models::Config;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("queue.consumer_max_concurrency must be at least 1")]
    ZeroConcurrency,

    #[error("{0} multiplier must be at least 1.0")]
    MultiplierBelowOne(&'static str),

    #[error("queue.retry.jitter must be within [0, 1]")]
    JitterOutOfRange,

    #[error(
        "sweeper.max_processing_age_secs ({max_age}) must be at least sweeper.result_stale_after_secs ({stale})"
    )]
    SweeperBelowStaleHorizon { max_age: u64, stale: u64 },

    #[error("vector.dim must be positive")]
    ZeroVectorDim,

    #[error("server.max_upload_mb must be at least 1")]
    ZeroUploadLimit,

    #[error("pipeline.schema_retries must be at least 1")]
    ZeroSchemaRetries,

    #[error("sweeper.page_size must be at least 1")]
    ZeroPageSize,

    #[error("retention.days must be at least 1")]
    ZeroRetention,
}

pub fn validate(config: &Config) -> Result<(), ValidationError> {
    if config.queue.consumer_max_concurrency == 0 {
        return Err(ValidationError::ZeroConcurrency);
    }
    if config.queue.retry.multiplier < 1.0 {
        return Err(ValidationError::MultiplierBelowOne("queue.retry"));
    }
    if !(0.0..=1.0).contains(&config.queue.retry.jitter) {
        return Err(ValidationError::JitterOutOfRange);
    }
    if config.ai.backoff.multiplier < 1.0 {
        return Err(ValidationError::MultiplierBelowOne("ai.backoff"));
    }
    if config.sweeper.max_processing_age_secs < config.sweeper.result_stale_after_secs {
        return Err(ValidationError::SweeperBelowStaleHorizon {
            max_age: config.sweeper.max_processing_age_secs,
            stale: config.sweeper.result_stale_after_secs,
        });
    }
    if config.vector.dim == 0 {
        return Err(ValidationError::ZeroVectorDim);
    }
    if config.server.max_upload_mb == 0 {
        return Err(ValidationError::ZeroUploadLimit);
    }
    if config.pipeline.schema_retries == 0 {
        return Err(ValidationError::ZeroSchemaRetries);
    }
    if config.sweeper.page_size == 0 {
        return Err(ValidationError::ZeroPageSize);
    }
    if config.retention.days == 0 {
        return Err(ValidationError::ZeroRetention);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(validate(&Config::default()).is_ok());
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let mut config = Config::default();
        config.queue.consumer_max_concurrency = 0;
        assert!(matches!(
            validate(&config),
            Err(ValidationError::ZeroConcurrency)
        ));
    }

    #[test]
    fn sweeper_horizon_must_cover_stale_horizon() {
        let mut config = Config::default();
        config.sweeper.max_processing_age_secs = 60;
        config.sweeper.result_stale_after_secs = 120;
        assert!(matches!(
            validate(&config),
            Err(ValidationError::SweeperBelowStaleHorizon { .. })
        ));
    }

    #[test]
    fn jitter_bounds_are_enforced() {
        let mut config = Config::default();
        config.queue.retry.jitter = 1.5;
        assert!(matches!(
            validate(&config),
            Err(ValidationError::JitterOutOfRange)
        ));
    }

    #[test]
    fn multiplier_below_one_is_rejected() {
        let mut config = Config::default();
        config.ai.backoff.multiplier = 0.5;
        assert!(matches!(
            validate(&config),
            Err(ValidationError::MultiplierBelowOne("ai.backoff"))
        ));
    }
}
