use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::pipeline::PromptDefaults;

/// Top-level configuration
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub ai: AiConfig,
    #[serde(default)]
    pub vector: VectorConfig,
    #[serde(default)]
    pub extractor: ExtractorConfig,
    #[serde(default)]
    pub pipeline: PipelineSettings,
    #[serde(default)]
    pub sweeper: SweeperSettings,
    #[serde(default)]
    pub retention: RetentionConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
    /// Per-IP budget for mutating endpoints, per minute.
    #[serde(default = "default_rate_limit_per_min")]
    pub rate_limit_per_min: u32,
    /// Per-file upload limit; the multipart body cap is twice this.
    #[serde(default = "default_max_upload_mb")]
    pub max_upload_mb: u64,
}

impl ServerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    pub fn max_upload_bytes(&self) -> u64 {
        self.max_upload_mb * 1024 * 1024
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            request_timeout_secs: default_request_timeout_secs(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
            rate_limit_per_min: default_rate_limit_per_min(),
            max_upload_mb: default_max_upload_mb(),
        }
    }
}

fn default_bind_addr() -> SocketAddr {
    "0.0.0.0:8080".parse().unwrap()
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_shutdown_timeout_secs() -> u64 {
    30
}

fn default_rate_limit_per_min() -> u32 {
    60
}

fn default_max_upload_mb() -> u64 {
    2
}

/// Ledger (durable store) configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LedgerConfig {
    #[serde(default = "default_ledger_path")]
    pub path: PathBuf,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            path: default_ledger_path(),
        }
    }
}

fn default_ledger_path() -> PathBuf {
    PathBuf::from("data/ledger")
}

/// Queue and consumer-group configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QueueConfig {
    #[serde(default = "default_queue_path")]
    pub path: PathBuf,
    #[serde(default = "default_consumer_max_concurrency")]
    pub consumer_max_concurrency: usize,
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    #[serde(default)]
    pub retry: RetrySettings,
    #[serde(default = "default_dlq_max_age_hours")]
    pub dlq_max_age_hours: u64,
    #[serde(default = "default_dlq_cleanup_interval_secs")]
    pub dlq_cleanup_interval_secs: u64,
}

impl QueueConfig {
    pub fn dlq_max_age(&self) -> Duration {
        Duration::from_secs(self.dlq_max_age_hours * 3600)
    }

    pub fn dlq_cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.dlq_cleanup_interval_secs)
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            path: default_queue_path(),
            consumer_max_concurrency: default_consumer_max_concurrency(),
            channel_capacity: default_channel_capacity(),
            retry: RetrySettings::default(),
            dlq_max_age_hours: default_dlq_max_age_hours(),
            dlq_cleanup_interval_secs: default_dlq_cleanup_interval_secs(),
        }
    }
}

fn default_queue_path() -> PathBuf {
    PathBuf::from("data/queue")
}

fn default_consumer_max_concurrency() -> usize {
    4
}

fn default_channel_capacity() -> usize {
    100
}

fn default_dlq_max_age_hours() -> u64 {
    168
}

fn default_dlq_cleanup_interval_secs() -> u64 {
    3600
}

/// Per-message queue retry policy
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetrySettings {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

impl RetrySettings {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            multiplier: default_multiplier(),
            jitter: default_jitter(),
        }
    }
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_jitter() -> f64 {
    0.2
}

/// LLM provider configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AiConfig {
    #[serde(default = "default_ai_base_url")]
    pub base_url: String,
    /// Loaded from the environment, never from config files.
    #[serde(skip)]
    pub api_key: Option<String>,
    #[serde(default = "default_primary_model")]
    pub primary_model: String,
    #[serde(default)]
    pub fallback_models: Vec<String>,
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    /// Minimum spacing between provider calls from one replica.
    #[serde(default = "default_min_interval_ms")]
    pub min_interval_ms: u64,
    /// Replicas sharing the provider quota; scales the interval up.
    #[serde(default = "default_worker_replicas")]
    pub worker_replicas: u32,
    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,
    #[serde(default = "default_ai_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// LRU capacity of the text -> embedding cache.
    #[serde(default = "default_embed_cache_size")]
    pub embed_cache_size: u64,
    #[serde(default)]
    pub backoff: AiBackoffSettings,
}

impl AiConfig {
    /// Per-process interval scaled by replica count.
    pub fn effective_min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms * u64::from(self.worker_replicas.max(1)))
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            base_url: default_ai_base_url(),
            api_key: None,
            primary_model: default_primary_model(),
            fallback_models: Vec::new(),
            embedding_model: default_embedding_model(),
            min_interval_ms: default_min_interval_ms(),
            worker_replicas: default_worker_replicas(),
            refresh_interval_secs: default_refresh_interval_secs(),
            request_timeout_secs: default_ai_request_timeout_secs(),
            embed_cache_size: default_embed_cache_size(),
            backoff: AiBackoffSettings::default(),
        }
    }
}

fn default_embed_cache_size() -> u64 {
    1024
}

fn default_ai_base_url() -> String {
    "https://openrouter.ai/api/v1".to_string()
}

fn default_primary_model() -> String {
    "meta-llama/llama-3.3-70b-instruct:free".to_string()
}

fn default_embedding_model() -> String {
    "openai/text-embedding-3-small".to_string()
}

fn default_min_interval_ms() -> u64 {
    2000
}

fn default_worker_replicas() -> u32 {
    1
}

fn default_refresh_interval_secs() -> u64 {
    3600
}

fn default_ai_request_timeout_secs() -> u64 {
    60
}

/// Backoff for provider-bound calls
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AiBackoffSettings {
    #[serde(default = "default_ai_max_elapsed_secs")]
    pub max_elapsed_secs: u64,
    #[serde(default = "default_ai_initial_interval_ms")]
    pub initial_interval_ms: u64,
    #[serde(default = "default_ai_max_interval_ms")]
    pub max_interval_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
}

impl AiBackoffSettings {
    pub fn max_elapsed(&self) -> Duration {
        Duration::from_secs(self.max_elapsed_secs)
    }

    pub fn initial_interval(&self) -> Duration {
        Duration::from_millis(self.initial_interval_ms)
    }

    pub fn max_interval(&self) -> Duration {
        Duration::from_millis(self.max_interval_ms)
    }
}

impl Default for AiBackoffSettings {
    fn default() -> Self {
        Self {
            max_elapsed_secs: default_ai_max_elapsed_secs(),
            initial_interval_ms: default_ai_initial_interval_ms(),
            max_interval_ms: default_ai_max_interval_ms(),
            multiplier: default_multiplier(),
        }
    }
}

fn default_ai_max_elapsed_secs() -> u64 {
    60
}

fn default_ai_initial_interval_ms() -> u64 {
    500
}

fn default_ai_max_interval_ms() -> u64 {
    10_000
}

/// Vector store configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct VectorConfig {
    #[serde(default = "default_vector_url")]
    pub url: String,
    #[serde(default = "default_vector_dim")]
    pub dim: usize,
    #[serde(default = "default_vector_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl VectorConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self {
            url: default_vector_url(),
            dim: default_vector_dim(),
            request_timeout_secs: default_vector_request_timeout_secs(),
        }
    }
}

fn default_vector_url() -> String {
    "http://localhost:6333".to_string()
}

fn default_vector_dim() -> usize {
    1536
}

fn default_vector_request_timeout_secs() -> u64 {
    10
}

/// Text extractor service configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExtractorConfig {
    #[serde(default = "default_extractor_url")]
    pub url: String,
    #[serde(default = "default_extractor_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl ExtractorConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            url: default_extractor_url(),
            request_timeout_secs: default_extractor_request_timeout_secs(),
        }
    }
}

fn default_extractor_url() -> String {
    "http://localhost:8200".to_string()
}

fn default_extractor_request_timeout_secs() -> u64 {
    30
}

/// Pipeline tuning and server-side default prompts
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PipelineSettings {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_stage_timeout_secs")]
    pub retrieval_timeout_secs: u64,
    #[serde(default = "default_stage_timeout_secs")]
    pub embed_timeout_secs: u64,
    #[serde(default = "default_schema_retries")]
    pub schema_retries: u32,
    #[serde(default = "default_job_deadline_secs")]
    pub job_deadline_secs: u64,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default)]
    pub defaults: PromptDefaults,
}

impl PipelineSettings {
    pub fn retrieval_timeout(&self) -> Duration {
        Duration::from_secs(self.retrieval_timeout_secs)
    }

    pub fn embed_timeout(&self) -> Duration {
        Duration::from_secs(self.embed_timeout_secs)
    }

    pub fn job_deadline(&self) -> Duration {
        Duration::from_secs(self.job_deadline_secs)
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            retrieval_timeout_secs: default_stage_timeout_secs(),
            embed_timeout_secs: default_stage_timeout_secs(),
            schema_retries: default_schema_retries(),
            job_deadline_secs: default_job_deadline_secs(),
            temperature: default_temperature(),
            defaults: PromptDefaults::default(),
        }
    }
}

fn default_top_k() -> usize {
    8
}

fn default_stage_timeout_secs() -> u64 {
    5
}

fn default_schema_retries() -> u32 {
    3
}

fn default_job_deadline_secs() -> u64 {
    120
}

fn default_temperature() -> f32 {
    0.1
}

/// Stuck-job sweeper and result staleness configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SweeperSettings {
    #[serde(default = "default_sweeper_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_max_processing_age_secs")]
    pub max_processing_age_secs: u64,
    #[serde(default = "default_sweeper_page_size")]
    pub page_size: usize,
    /// The result service fails jobs older than this on read; must not
    /// exceed the sweeper horizon.
    #[serde(default = "default_result_stale_after_secs")]
    pub result_stale_after_secs: u64,
}

impl SweeperSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn max_processing_age(&self) -> Duration {
        Duration::from_secs(self.max_processing_age_secs)
    }

    pub fn result_stale_after(&self) -> Duration {
        Duration::from_secs(self.result_stale_after_secs)
    }
}

impl Default for SweeperSettings {
    fn default() -> Self {
        Self {
            interval_secs: default_sweeper_interval_secs(),
            max_processing_age_secs: default_max_processing_age_secs(),
            page_size: default_sweeper_page_size(),
            result_stale_after_secs: default_result_stale_after_secs(),
        }
    }
}

fn default_sweeper_interval_secs() -> u64 {
    60
}

fn default_max_processing_age_secs() -> u64 {
    180
}

fn default_sweeper_page_size() -> usize {
    100
}

fn default_result_stale_after_secs() -> u64 {
    120
}

/// Data retention configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetentionConfig {
    #[serde(default = "default_retention_days")]
    pub days: u32,
    #[serde(default = "default_cleanup_interval_hours")]
    pub cleanup_interval_hours: u64,
}

impl RetentionConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(u64::from(self.days) * 86400)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_hours * 3600)
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            days: default_retention_days(),
            cleanup_interval_hours: default_cleanup_interval_hours(),
        }
    }
}

fn default_retention_days() -> u32 {
    90
}

fn default_cleanup_interval_hours() -> u64 {
    24
}
