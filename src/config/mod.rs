//! Configuration management
//!
//! Layered configuration loaded from:
//! 1. Default values (embedded in structs)
//! 2. TOML configuration file
//! 3. Environment variables (highest priority)
//!
//! # Environment Variables
//!
//! Settings can be overridden with the pattern `EVALBOX__<section>__<key>`:
//! - `EVALBOX__SERVER__BIND_ADDR=0.0.0.0:9000`
//! - `EVALBOX__QUEUE__CONSUMER_MAX_CONCURRENCY=8`
//! - `EVALBOX__AI__PRIMARY_MODEL=qwen/qwen-2.5-72b-instruct:free`
//!
//! Secrets (`EVALBOX_AI_API_KEY` or `OPENROUTER_API_KEY`) come only from
//! the environment, never from files.
//!
//! # Configuration File
//!
//! By default the configuration is loaded from `config/evalbox.toml`; the
//! `EVALBOX_CONFIG` environment variable overrides the path.

mod models;
mod sources;
mod validation;

pub use models::{
    AiBackoffSettings, AiConfig, Config, ExtractorConfig, LedgerConfig, PipelineSettings,
    QueueConfig, RetentionConfig, RetrySettings, ServerConfig, SweeperSettings, VectorConfig,
};
pub use validation::ValidationError;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    LoadError(#[from] config::ConfigError),

    #[error("Configuration validation failed: {0}")]
    ValidationError(#[from] ValidationError),
}

impl Config {
    /// Load configuration from all sources (file + environment).
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration file is malformed or the
    /// validation pass rejects the merged settings.
    pub fn load() -> Result<Self, ConfigError> {
        let config = sources::load()?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific path.
    ///
    /// Useful for testing with custom configuration files.
    pub fn load_from_path(path: std::path::PathBuf) -> Result<Self, ConfigError> {
        let config = sources::load_from_sources(path)?;
        validation::validate(&config)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn load_minimal_config() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test.toml");

        let toml_content = r#"
[server]
bind_addr = "127.0.0.1:8081"
        "#;
        fs::write(&config_path, toml_content).unwrap();

        let config = Config::load_from_path(config_path).unwrap();
        assert_eq!(config.server.bind_addr.to_string(), "127.0.0.1:8081");
    }

    #[test]
    fn validation_catches_bad_horizons() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test.toml");

        let toml_content = r#"
[sweeper]
max_processing_age_secs = 30
result_stale_after_secs = 120
        "#;
        fs::write(&config_path, toml_content).unwrap();

        let result = Config::load_from_path(config_path);
        assert!(matches!(
            result.unwrap_err(),
            ConfigError::ValidationError(ValidationError::SweeperBelowStaleHorizon { .. })
        ));
    }

    #[test]
    fn full_config_example() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test.toml");

        let toml_content = r#"
[server]
bind_addr = "0.0.0.0:8080"
request_timeout_secs = 30
shutdown_timeout_secs = 30
rate_limit_per_min = 120
max_upload_mb = 2

[ledger]
path = "data/ledger"

[queue]
path = "data/queue"
consumer_max_concurrency = 4
channel_capacity = 100
dlq_max_age_hours = 168
dlq_cleanup_interval_secs = 3600

[queue.retry]
max_retries = 3
initial_delay_ms = 500
max_delay_ms = 30000
multiplier = 2.0
jitter = 0.2

[ai]
base_url = "https://openrouter.ai/api/v1"
primary_model = "meta-llama/llama-3.3-70b-instruct:free"
fallback_models = ["qwen/qwen-2.5-72b-instruct:free"]
embedding_model = "openai/text-embedding-3-small"
min_interval_ms = 2000
worker_replicas = 2
refresh_interval_secs = 3600

[ai.backoff]
max_elapsed_secs = 60
initial_interval_ms = 500
max_interval_ms = 10000
multiplier = 2.0

[vector]
url = "http://qdrant:6333"
dim = 1536

[extractor]
url = "http://extractor:8200"

[pipeline]
top_k = 8
schema_retries = 3
job_deadline_secs = 120

[sweeper]
interval_secs = 60
max_processing_age_secs = 180
page_size = 100
result_stale_after_secs = 120

[retention]
days = 90
cleanup_interval_hours = 24
        "#;
        fs::write(&config_path, toml_content).unwrap();

        let config = Config::load_from_path(config_path).unwrap();
        assert_eq!(config.ai.fallback_models.len(), 1);
        assert_eq!(config.vector.url, "http://qdrant:6333");
        assert_eq!(config.queue.dlq_max_age_hours, 168);
        assert_eq!(
            config.ai.effective_min_interval(),
            std::time::Duration::from_secs(4)
        );
    }
}
