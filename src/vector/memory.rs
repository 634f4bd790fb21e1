//! In-memory cosine index for test wiring and local development

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use super::{DistanceMetric, SearchHit, VectorError, VectorIndex};

struct Collection {
    dim: usize,
    points: Vec<(String, Vec<f32>, Value)>,
}

#[derive(Default)]
pub struct MemoryIndex {
    collections: RwLock<HashMap<String, Collection>>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn point_count(&self, collection: &str) -> usize {
        self.collections
            .read()
            .expect("index lock poisoned")
            .get(collection)
            .map(|c| c.points.len())
            .unwrap_or(0)
    }
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[async_trait]
impl VectorIndex for MemoryIndex {
    async fn ensure_collection(
        &self,
        name: &str,
        dim: usize,
        _metric: DistanceMetric,
    ) -> Result<(), VectorError> {
        let mut collections = self.collections.write().expect("index lock poisoned");
        match collections.get(name) {
            Some(existing) if existing.dim != dim => Err(VectorError::InvalidArgument(format!(
                "collection {name} exists with dim {}, requested {dim}",
                existing.dim
            ))),
            Some(_) => Ok(()),
            None => {
                collections.insert(
                    name.to_string(),
                    Collection {
                        dim,
                        points: Vec::new(),
                    },
                );
                Ok(())
            }
        }
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

        let mut collections = self.collections.write().expect("index lock poisoned");
        let target = collections
            .get_mut(collection)
            .ok_or_else(|| VectorError::CollectionNotFound(collection.to_string()))?;

        for ((id, vector), payload) in ids.into_iter().zip(vectors).zip(payloads) {
            if vector.len() != target.dim {
                return Err(VectorError::InvalidArgument(format!(
                    "vector dim {} does not match collection dim {}",
                    vector.len(),
                    target.dim
                )));
            }
            if let Some(existing) = target.points.iter_mut().find(|(pid, _, _)| *pid == id) {
                existing.1 = vector;
                existing.2 = payload;
            } else {
                target.points.push((id, vector, payload));
            }
        }
        Ok(())
    }

    async fn search(
        &self,
        collection: &str,
        query: &[f32],
        k: usize,
    ) -> Result<Vec<SearchHit>, VectorError> {
        let collections = self.collections.read().expect("index lock poisoned");
        let target = collections
            .get(collection)
            .ok_or_else(|| VectorError::CollectionNotFound(collection.to_string()))?;

        let mut hits: Vec<SearchHit> = target
            .points
            .iter()
            .map(|(_, vector, payload)| SearchHit {
                score: cosine(query, vector),
                payload: payload.clone(),
            })
            .collect();
        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(k);
        Ok(hits)
    }
}
