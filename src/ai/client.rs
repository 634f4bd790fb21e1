//! OpenRouter-compatible chat + embedding client
//!
//! All provider-bound calls queue behind the process-wide throttle, retry
//! transient failures with the shared backoff policy, and fall back across
//! the free-model catalog on hard per-model failures. Models that answer
//! 429 with a Retry-After hint are put on cooldown for the hinted duration.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::observability::Metrics;
use crate::retry::{Backoff, retry};

use super::catalog::ModelCatalog;
use super::error::AiError;
use super::throttle::Throttle;
use super::{ChatMessage, ChatOptions, LlmApi};

const DEFAULT_COOLDOWN: Duration = Duration::from_secs(60);

/// Wiring options for [`OpenRouterClient`], filled from `[ai]` config.
#[derive(Debug, Clone)]
pub struct OpenRouterConfig {
    pub base_url: String,
    pub api_key: String,
    pub primary_model: String,
    pub fallback_models: Vec<String>,
    pub embedding_model: String,
    /// Minimum inter-call spacing, already scaled by worker replicas.
    pub min_interval: Duration,
    pub request_timeout: Duration,
    pub backoff: Backoff,
}

pub struct OpenRouterClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    primary_model: String,
    fallback_models: Vec<String>,
    embedding_model: String,
    catalog: Arc<ModelCatalog>,
    throttle: Throttle,
    backoff: Backoff,
    cooldowns: Mutex<HashMap<String, Instant>>,
    request_timeout: Duration,
    metrics: Arc<Metrics>,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: String,
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbedResponse {
    data: Vec<EmbedDatum>,
}

#[derive(Deserialize)]
struct EmbedDatum {
    index: usize,
    embedding: Vec<f32>,
}

impl OpenRouterClient {
    pub fn new(
        config: OpenRouterConfig,
        catalog: Arc<ModelCatalog>,
        metrics: Arc<Metrics>,
    ) -> Result<Self, AiError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| AiError::Transport(e.to_string()))?;

        Ok(Self {
            http,
            base_url: config.base_url,
            api_key: config.api_key,
            primary_model: config.primary_model,
            fallback_models: config.fallback_models,
            embedding_model: config.embedding_model,
            catalog,
            throttle: Throttle::new(config.min_interval),
            backoff: config.backoff,
            cooldowns: Mutex::new(HashMap::new()),
            request_timeout: config.request_timeout,
            metrics,
        })
    }

    /// Candidate models in fallback order, stable for this call: explicit
    /// override or primary, then configured fallbacks, then the current
    /// catalog snapshot. Duplicates collapse to their first position.
    fn candidate_models(&self, explicit: Option<&str>) -> Vec<String> {
        let mut candidates = Vec::new();
        let mut push = |model: &str| {
            if !model.is_empty() && !candidates.iter().any(|m| m == model) {
                candidates.push(model.to_string());
            }
        };

        push(explicit.unwrap_or(&self.primary_model));
        for model in &self.fallback_models {
            push(model);
        }
        let snapshot = self.catalog.snapshot();
        for model in snapshot.iter() {
            push(model);
        }
        candidates
    }

    fn cooling_down(&self, model: &str) -> bool {
        let mut cooldowns = self.cooldowns.lock().expect("cooldown lock poisoned");
        match cooldowns.get(model) {
            Some(until) if *until > Instant::now() => true,
            Some(_) => {
                cooldowns.remove(model);
                false
            }
            None => false,
        }
    }

    fn set_cooldown(&self, model: &str, retry_after: Option<Duration>) {
        let until = Instant::now() + retry_after.unwrap_or(DEFAULT_COOLDOWN);
        self.cooldowns
            .lock()
            .expect("cooldown lock poisoned")
            .insert(model.to_string(), until);
        debug!(model, "Model placed on rate-limit cooldown");
    }

    async fn chat_once(
        &self,
        model: &str,
        messages: &[ChatMessage],
        options: &ChatOptions,
    ) -> Result<String, AiError> {
        self.throttle.acquire().await;
        self.metrics.llm_call();

        let request = ChatRequest {
            model,
            messages,
            temperature: options.temperature,
            max_tokens: options.max_tokens,
            response_format: options
                .json_response
                .then_some(ResponseFormat { kind: "json_object" }),
        };

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .timeout(self.request_timeout)
            .json(&request)
            .send()
            .await
            .map_err(classify_reqwest_error)?;

        let status = response.status();
        if status.as_u16() == 429 {
            let retry_after = parse_retry_after(response.headers());
            return Err(AiError::RateLimited {
                message: format!("model {model} rate limited"),
                retry_after,
            });
        }
        if !status.is_success() {
            return Err(AiError::Provider {
                status: status.as_u16(),
                message: format!("chat completion failed for {model}"),
            });
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| AiError::InvalidResponse(e.to_string()))?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| AiError::InvalidResponse("empty choices".into()))?;
        Ok(content)
    }

    /// One model, with the full transient-retry budget.
    async fn chat_with_model(
        &self,
        model: &str,
        messages: &[ChatMessage],
        options: &ChatOptions,
    ) -> Result<String, AiError> {
        retry(&self.backoff, AiError::is_retriable, move || {
            self.chat_once(model, messages, options)
        })
        .await
    }

    async fn embed_once(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, AiError> {
        self.throttle.acquire().await;
        self.metrics.llm_call();

        let request = EmbedRequest {
            model: &self.embedding_model,
            input: texts,
        };

        let response = self
            .http
            .post(format!("{}/embeddings", self.base_url))
            .bearer_auth(&self.api_key)
            .timeout(self.request_timeout)
            .json(&request)
            .send()
            .await
            .map_err(classify_reqwest_error)?;

        let status = response.status();
        if status.as_u16() == 429 {
            let retry_after = parse_retry_after(response.headers());
            return Err(AiError::RateLimited {
                message: "embedding model rate limited".into(),
                retry_after,
            });
        }
        if !status.is_success() {
            return Err(AiError::Provider {
                status: status.as_u16(),
                message: "embedding request failed".into(),
            });
        }

        let parsed: EmbedResponse = response
            .json()
            .await
            .map_err(|e| AiError::InvalidResponse(e.to_string()))?;
        if parsed.data.len() != texts.len() {
            return Err(AiError::InvalidResponse(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                parsed.data.len()
            )));
        }

        // The provider indexes each vector; reorder to match the input.
        let mut data = parsed.data;
        data.sort_by_key(|datum| datum.index);
        Ok(data.into_iter().map(|datum| datum.embedding).collect())
    }
}

#[async_trait]
impl LlmApi for OpenRouterClient {
    async fn chat(
        &self,
        messages: &[ChatMessage],
        options: &ChatOptions,
    ) -> Result<String, AiError> {
        let candidates = self.candidate_models(options.model.as_deref());
        let mut last_rate_limit: Option<AiError> = None;
        let mut last_fallback: Option<AiError> = None;

        for model in &candidates {
            if self.cooling_down(model) {
                debug!(model, "Skipping model on cooldown");
                continue;
            }
            match self.chat_with_model(model, messages, options).await {
                Ok(text) => return Ok(text),
                Err(err @ AiError::RateLimited { .. }) => {
                    let retry_after = match &err {
                        AiError::RateLimited { retry_after, .. } => *retry_after,
                        _ => None,
                    };
                    self.set_cooldown(model, retry_after);
                    warn!(model, "Model rate limited after retries, trying next");
                    last_rate_limit = Some(err);
                }
                Err(err) if err.is_model_fallback() => {
                    warn!(model, error = %err, "Model hard failure, trying next");
                    last_fallback = Some(err);
                }
                // Transient budget exhausted (timeout / 5xx / transport):
                // surface to the caller, the queue owns the outer retry.
                Err(err) => return Err(err),
            }
        }

        Err(last_rate_limit
            .or(last_fallback)
            .unwrap_or(AiError::NoModelsAvailable))
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, AiError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        retry(&self.backoff, AiError::is_retriable, move || {
            self.embed_once(texts)
        })
        .await
    }

    fn embedding_model(&self) -> &str {
        &self.embedding_model
    }
}

fn classify_reqwest_error(err: reqwest::Error) -> AiError {
    if err.is_timeout() {
        AiError::Timeout(err.to_string())
    } else {
        AiError::Transport(err.to_string())
    }
}

fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}
