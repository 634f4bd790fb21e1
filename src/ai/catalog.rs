//! Refreshable catalog of currently-available free models
//!
//! A background task refreshes the list periodically; readers always see a
//! coherent snapshot via copy-on-update (`RwLock<Arc<Vec<_>>>`). Fallback
//! selection iterates the snapshot taken at call start, so the order is
//! stable for the duration of a single call.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use serde::Deserialize;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::error::AiError;

#[derive(Debug, Deserialize)]
struct ModelListResponse {
    data: Vec<ModelEntry>,
}

#[derive(Debug, Deserialize)]
struct ModelEntry {
    id: String,
    #[serde(default)]
    pricing: Option<ModelPricing>,
}

#[derive(Debug, Deserialize)]
struct ModelPricing {
    #[serde(default)]
    prompt: String,
    #[serde(default)]
    completion: String,
}

impl ModelEntry {
    fn is_free(&self) -> bool {
        if self.id.ends_with(":free") {
            return true;
        }
        self.pricing
            .as_ref()
            .is_some_and(|p| p.prompt == "0" && p.completion == "0")
    }
}

pub struct ModelCatalog {
    http: reqwest::Client,
    base_url: String,
    models: RwLock<Arc<Vec<String>>>,
}

impl ModelCatalog {
    /// `seed` is served until the first successful refresh.
    pub fn new(http: reqwest::Client, base_url: impl Into<String>, seed: Vec<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            models: RwLock::new(Arc::new(seed)),
        }
    }

    /// Current snapshot; cheap to clone, coherent for the caller's lifetime.
    pub fn snapshot(&self) -> Arc<Vec<String>> {
        Arc::clone(&self.models.read().expect("catalog lock poisoned"))
    }

    /// Fetch the provider's model list and install the free subset. An
    /// empty or failed fetch keeps the previous snapshot.
    pub async fn refresh(&self) -> Result<usize, AiError> {
        let url = format!("{}/models", self.base_url);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| AiError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(AiError::Provider {
                status: response.status().as_u16(),
                message: "model list fetch failed".into(),
            });
        }

        let list: ModelListResponse = response
            .json()
            .await
            .map_err(|e| AiError::InvalidResponse(e.to_string()))?;

        let free: Vec<String> = list
            .data
            .into_iter()
            .filter(ModelEntry::is_free)
            .map(|entry| entry.id)
            .collect();

        if free.is_empty() {
            debug!("Model refresh returned no free models, keeping previous snapshot");
            return Ok(0);
        }

        let count = free.len();
        *self.models.write().expect("catalog lock poisoned") = Arc::new(free);
        info!(count, "Model catalog refreshed");
        Ok(count)
    }

    /// Background refresher; runs until the shutdown signal flips.
    pub fn spawn_refresher(
        self: Arc<Self>,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {
                        if let Err(err) = self.refresh().await {
                            warn!(error = %err, "Model catalog refresh failed");
                        }
                    }
                    _ = shutdown.changed() => {
                        debug!("Model refresher stopping");
                        return;
                    }
                }
            }
        })
    }
}
