//! Bounded LRU of text -> embedding vector
//!
//! Keyed by a stable hash of (model, text) so a model change never serves
//! stale vectors. Population is best-effort: a cache failure only costs an
//! extra provider call, never correctness.

use std::sync::Arc;

use moka::sync::Cache;
use sha2::{Digest, Sha256};

use crate::observability::Metrics;

use super::LlmApi;
use super::error::AiError;

#[derive(Clone)]
pub struct EmbeddingCache {
    cache: Cache<String, Arc<Vec<f32>>>,
    metrics: Arc<Metrics>,
}

/// Stable cache key: hex(SHA-256(model || NUL || text)).
pub fn cache_key(model: &str, text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(model.as_bytes());
    hasher.update([0u8]);
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

impl EmbeddingCache {
    pub fn new(capacity: u64, metrics: Arc<Metrics>) -> Self {
        Self {
            cache: Cache::builder().max_capacity(capacity).build(),
            metrics,
        }
    }

    /// Resolve embeddings for `texts`, in order, hitting the provider only
    /// for cache misses.
    pub async fn get_or_embed(
        &self,
        llm: &dyn LlmApi,
        texts: &[String],
    ) -> Result<Vec<Arc<Vec<f32>>>, AiError> {
        let model = llm.embedding_model().to_string();
        let mut resolved: Vec<Option<Arc<Vec<f32>>>> = Vec::with_capacity(texts.len());
        let mut missing: Vec<usize> = Vec::new();

        for (i, text) in texts.iter().enumerate() {
            match self.cache.get(&cache_key(&model, text)) {
                Some(vector) => {
                    self.metrics.embed_cache_hit();
                    resolved.push(Some(vector));
                }
                None => {
                    self.metrics.embed_cache_miss();
                    resolved.push(None);
                    missing.push(i);
                }
            }
        }

        if !missing.is_empty() {
            let inputs: Vec<String> = missing.iter().map(|&i| texts[i].clone()).collect();
            let vectors = llm.embed(&inputs).await?;
            for (slot, vector) in missing.into_iter().zip(vectors) {
                let vector = Arc::new(vector);
                self.cache
                    .insert(cache_key(&model, &texts[slot]), Arc::clone(&vector));
                resolved[slot] = Some(vector);
            }
        }

        Ok(resolved.into_iter().map(|v| v.expect("slot filled")).collect())
    }

    pub fn entry_count(&self) -> u64 {
        self.cache.run_pending_tasks();
        self.cache.entry_count()
    }
}
