/// LLM provider access
///
/// The [`LlmApi`] trait is the seam between the pipeline and the provider;
/// production wiring uses [`OpenRouterClient`] (throttled, retried, with
/// free-model fallback), tests plug in mocks without touching callers.
pub mod cache;
pub mod catalog;
pub mod client;
pub mod error;
pub mod throttle;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use cache::EmbeddingCache;
pub use catalog::ModelCatalog;
pub use client::{OpenRouterClient, OpenRouterConfig};
pub use error::AiError;
pub use throttle::Throttle;

/// One turn of a chat-completion conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// Per-call options for chat completion.
#[derive(Debug, Clone, Default)]
pub struct ChatOptions {
    /// Overrides the configured primary model when set.
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    /// Ask the provider for a JSON object response.
    pub json_response: bool,
}

#[async_trait]
pub trait LlmApi: Send + Sync {
    /// Chat completion; returns the assistant message content.
    async fn chat(&self, messages: &[ChatMessage], options: &ChatOptions)
    -> Result<String, AiError>;

    /// Embeddings with identical input/output ordering.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, AiError>;

    /// Model name used for embeddings; part of the cache key.
    fn embedding_model(&self) -> &str;
}
