//! Qdrant-compatible REST client
//!
//! Collection management and point upsert/search over the HTTP API.
//! Searches go through the shared retry policy; `ensure_collection`
//! tolerates an already-existing collection with matching parameters.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;
use uuid::Uuid;

use crate::retry::{Backoff, retry};

use super::{DistanceMetric, SearchHit, VectorError, VectorIndex};

pub struct QdrantIndex {
    http: reqwest::Client,
    base_url: String,
    backoff: Backoff,
}

#[derive(Deserialize)]
struct SearchResponse {
    result: Vec<ScoredPoint>,
}

#[derive(Deserialize)]
struct ScoredPoint {
    score: f32,
    #[serde(default)]
    payload: Value,
}

#[derive(Deserialize)]
struct CollectionInfoResponse {
    result: CollectionInfo,
}

#[derive(Deserialize)]
struct CollectionInfo {
    config: CollectionConfig,
}

#[derive(Deserialize)]
struct CollectionConfig {
    params: CollectionParams,
}

#[derive(Deserialize)]
struct CollectionParams {
    vectors: VectorParams,
}

#[derive(Deserialize)]
struct VectorParams {
    size: usize,
    distance: String,
}

impl QdrantIndex {
    pub fn new(
        base_url: impl Into<String>,
        request_timeout: Duration,
        backoff: Backoff,
    ) -> Result<Self, VectorError> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| VectorError::Transport(e.to_string()))?;
        Ok(Self {
            http,
            base_url: base_url.into(),
            backoff,
        })
    }

    fn collection_url(&self, name: &str) -> String {
        format!("{}/collections/{}", self.base_url, name)
    }

    async fn get_collection_params(&self, name: &str) -> Result<Option<VectorParams>, VectorError> {
        let response = self
            .http
            .get(self.collection_url(name))
            .send()
            .await
            .map_err(|e| VectorError::Transport(e.to_string()))?;

        if response.status().as_u16() == 404 {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(VectorError::Store {
                status: response.status().as_u16(),
                message: format!("collection info failed for {name}"),
            });
        }
        let info: CollectionInfoResponse = response
            .json()
            .await
            .map_err(|e| VectorError::Transport(e.to_string()))?;
        Ok(Some(info.result.config.params.vectors))
    }
}

#[async_trait]
impl VectorIndex for QdrantIndex {
    async fn ensure_collection(
        &self,
        name: &str,
        dim: usize,
        metric: DistanceMetric,
    ) -> Result<(), VectorError> {
        if let Some(existing) = self.get_collection_params(name).await? {
            if existing.size == dim && existing.distance.eq_ignore_ascii_case(metric.as_str()) {
                debug!(collection = name, "Collection already exists with matching parameters");
                return Ok(());
            }
            return Err(VectorError::InvalidArgument(format!(
                "collection {name} exists with dim {} / {}, requested {dim} / {}",
                existing.size,
                existing.distance,
                metric.as_str()
            )));
        }

        let body = json!({
            "vectors": { "size": dim, "distance": metric.as_str() }
        });
        let response = self
            .http
            .put(self.collection_url(name))
            .json(&body)
            .send()
            .await
            .map_err(|e| VectorError::Transport(e.to_string()))?;

        // Lost a creation race: fine as long as parameters match.
        if response.status().as_u16() == 409 {
            return Ok(());
        }
        if !response.status().is_success() {
            return Err(VectorError::Store {
                status: response.status().as_u16(),
                message: format!("collection create failed for {name}"),
            });
        }
        debug!(collection = name, dim, "Collection created");
        Ok(())
    }

    async fn upsert_points(
        &self,
        collection: &str,
        vectors: Vec<Vec<f32>>,
        payloads: Vec<Value>,
        ids: Option<Vec<String>>,
    ) -> Result<(), VectorError> {
        if vectors.len() != payloads.len() {
            return Err(VectorError::InvalidArgument(format!(
                "{} vectors but {} payloads",
                vectors.len(),
                payloads.len()
            )));
        }
        let ids = match ids {
            Some(ids) if ids.len() != vectors.len() => {
                return Err(VectorError::InvalidArgument(format!(
                    "{} vectors but {} ids",
                    vectors.len(),
                    ids.len()
                )));
            }
            Some(ids) => ids,
            None => (0..vectors.len())
                .map(|_| Uuid::new_v4().to_string())
                .collect(),
        };

        let points: Vec<Value> = ids
            .into_iter()
            .zip(vectors)
            .zip(payloads)
            .map(|((id, vector), payload)| json!({ "id": id, "vector": vector, "payload": payload }))
            .collect();

        let response = self
            .http
            .put(format!("{}/points?wait=true", self.collection_url(collection)))
            .json(&json!({ "points": points }))
            .send()
            .await
            .map_err(|e| VectorError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            debug!(collection, "Points upserted");
            Ok(())
        } else if status.as_u16() == 404 {
            Err(VectorError::CollectionNotFound(collection.to_string()))
        } else {
            Err(VectorError::Store {
                status: status.as_u16(),
                message: format!("point upsert failed for {collection}"),
            })
        }
    }

    async fn search(
        &self,
        collection: &str,
        query: &[f32],
        k: usize,
    ) -> Result<Vec<SearchHit>, VectorError> {
        let body = json!({
            "vector": query,
            "limit": k,
            "with_payload": true,
        });
        let url = format!("{}/points/search", self.collection_url(collection));

        retry(&self.backoff, VectorError::is_retriable, move || {
            let body = body.clone();
            let url = url.clone();
            async move {
                let response = self
                    .http
                    .post(url)
                    .json(&body)
                    .send()
                    .await
                    .map_err(|e| VectorError::Transport(e.to_string()))?;

                let status = response.status();
                if status.as_u16() == 404 {
                    return Err(VectorError::CollectionNotFound(collection.to_string()));
                }
                if !status.is_success() {
                    return Err(VectorError::Store {
                        status: status.as_u16(),
                        message: format!("search failed for {collection}"),
                    });
                }

                let parsed: SearchResponse = response
                    .json()
                    .await
                    .map_err(|e| VectorError::Transport(e.to_string()))?;
                Ok(parsed
                    .result
                    .into_iter()
                    .map(|point| SearchHit {
                        score: point.score,
                        payload: point.payload,
                    })
                    .collect())
            }
        })
        .await
    }
}
