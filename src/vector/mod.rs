/// Vector index access
///
/// [`VectorIndex`] is the seam between the pipeline and the vector store;
/// production wiring talks to a Qdrant-compatible REST API, tests use the
/// in-memory cosine index.
pub mod memory;
pub mod qdrant;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

pub use memory::MemoryIndex;
pub use qdrant::QdrantIndex;

/// Collection queried for job-description grounding.
pub const JOB_DESCRIPTION_COLLECTION: &str = "job_description";
/// Collection queried for scoring-rubric grounding.
pub const SCORING_RUBRIC_COLLECTION: &str = "scoring_rubric";
/// Dimensionality of the default embedding model.
pub const EMBEDDING_DIM: usize = 1536;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistanceMetric {
    Cosine,
}

impl DistanceMetric {
    pub fn as_str(&self) -> &'static str {
        match self {
            DistanceMetric::Cosine => "Cosine",
        }
    }
}

/// One search hit: similarity score plus the stored payload.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub score: f32,
    pub payload: Value,
}

#[derive(Debug, Error)]
pub enum VectorError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("vector store error (status {status}): {message}")]
    Store { status: u16, message: String },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("collection not found: {0}")]
    CollectionNotFound(String),
}

impl VectorError {
    pub fn is_retriable(&self) -> bool {
        match self {
            VectorError::Transport(_) => true,
            VectorError::Store { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Idempotent: creating an existing collection with matching parameters
    /// succeeds.
    async fn ensure_collection(
        &self,
        name: &str,
        dim: usize,
        metric: DistanceMetric,
    ) -> Result<(), VectorError>;

    /// Vectors and payloads are positionally aligned; ids are auto-assigned
    /// when absent.
    async fn upsert_points(
        &self,
        collection: &str,
        vectors: Vec<Vec<f32>>,
        payloads: Vec<Value>,
        ids: Option<Vec<String>>,
    ) -> Result<(), VectorError>;

    /// Top-k by the collection's distance metric.
    async fn search(
        &self,
        collection: &str,
        query: &[f32],
        k: usize,
    ) -> Result<Vec<SearchHit>, VectorError>;
}
