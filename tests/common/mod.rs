//! Shared harness for integration tests: the production router wired
//! against mock collaborators (LLM, vector index, extractor), with an
//! optional in-process worker pool.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::{Request, header};
use bytes::Bytes;
use serde_json::json;
use tempfile::TempDir;
use tokio::sync::watch;

use evalbox::admission::Admission;
use evalbox::ai::{AiError, ChatMessage, ChatOptions, EmbeddingCache, LlmApi};
use evalbox::api::{AppState, build_router};
use evalbox::config::Config;
use evalbox::extract::{ExtractError, TextExtractor};
use evalbox::ledger::{FjallLedger, JobStatus};
use evalbox::observability::Metrics;
use evalbox::pipeline::{EvalPipeline, PipelineConfig, PromptDefaults};
use evalbox::queue::{Envelope, EvalBroker, FjallQueue, RetryPolicy};
use evalbox::retry::Backoff;
use evalbox::sweeper::{Sweeper, SweeperConfig};
use evalbox::vector::{
    DistanceMetric, JOB_DESCRIPTION_COLLECTION, MemoryIndex, SCORING_RUBRIC_COLLECTION,
    VectorIndex,
};
use evalbox::worker::{WorkerConfig, WorkerPool};

/// How the mock provider behaves across a test.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockLlmMode {
    /// Well-formed JSON for every scoring call.
    Good,
    /// The CV call leaks reasoning and never conforms.
    CvSchemaInvalid,
    /// Every call answers 429 with a Retry-After hint.
    AlwaysRateLimited,
}

pub struct MockLlm {
    pub mode: MockLlmMode,
}

#[async_trait]
impl LlmApi for MockLlm {
    async fn chat(
        &self,
        messages: &[ChatMessage],
        _options: &ChatOptions,
    ) -> Result<String, AiError> {
        if self.mode == MockLlmMode::AlwaysRateLimited {
            return Err(AiError::RateLimited {
                message: "provider cap exhausted".into(),
                retry_after: Some(Duration::from_secs(60)),
            });
        }

        let system = messages
            .first()
            .map(|m| m.content.as_str())
            .unwrap_or_default();
        if system.contains("cv_match_rate") {
            if self.mode == MockLlmMode::CvSchemaInvalid {
                return Ok(r#"{"reasoning": "Step 1: read the CV", "cv_match_rate": 0.5}"#.into());
            }
            return Ok(
                r#"{"cv_match_rate": 0.82, "cv_feedback": "Strong backend experience with relevant tooling."}"#
                    .into(),
            );
        }
        if system.contains("project_score") {
            return Ok(
                r#"{"project_score": 7.5, "project_feedback": "Resilient async design with sensible retries."}"#
                    .into(),
            );
        }
        Ok(
            r#"{"overall_summary": "The candidate matches the role well. The project shows production judgement. Communication is clear. A solid hire overall."}"#
                .into(),
        )
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, AiError> {
        Ok(texts.iter().map(|t| vec![t.len() as f32, 1.0]).collect())
    }

    fn embedding_model(&self) -> &str {
        "mock-embedder"
    }
}

/// Extractor stub: hands back canned text for binary formats.
pub struct MockExtractor;

#[async_trait]
impl TextExtractor for MockExtractor {
    async fn extract(
        &self,
        _filename: &str,
        _mime: &str,
        _data: Bytes,
    ) -> Result<String, ExtractError> {
        Ok("Extracted document text from the external service.".to_string())
    }
}

pub struct HarnessOptions {
    pub llm_mode: MockLlmMode,
    pub max_retries: u32,
    pub rate_limit_per_min: u32,
    pub result_stale_after_secs: u64,
    pub start_workers: bool,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self {
            llm_mode: MockLlmMode::Good,
            max_retries: 3,
            rate_limit_per_min: 1000,
            result_stale_after_secs: 120,
            start_workers: true,
        }
    }
}

pub struct TestHarness {
    pub app: Router,
    pub ledger: Arc<FjallLedger>,
    pub queue: Arc<FjallQueue>,
    pub metrics: Arc<Metrics>,
    pool: Option<WorkerPool>,
    shutdown_tx: watch::Sender<bool>,
    sweeper: Sweeper,
    // Undrained consumer channels when workers are off, so enqueued tasks
    // still dispatch cleanly.
    _receivers: Vec<tokio::sync::mpsc::Receiver<Envelope>>,
    _tmp: TempDir,
}

impl TestHarness {
    pub async fn with_options(options: HarnessOptions) -> Self {
        let tmp = TempDir::new().expect("temp dir");
        let metrics = Arc::new(Metrics::new());
        let ledger = Arc::new(FjallLedger::open(tmp.path().join("ledger")).expect("ledger"));
        let queue = Arc::new(FjallQueue::open(tmp.path().join("queue")).expect("queue"));

        let mut config = Config::default();
        config.server.rate_limit_per_min = options.rate_limit_per_min;
        config.sweeper.result_stale_after_secs = options.result_stale_after_secs;
        config.sweeper.max_processing_age_secs = options.result_stale_after_secs.max(1);

        let (broker, receivers) = EvalBroker::new(
            Arc::clone(&queue),
            Arc::clone(&ledger),
            2,
            32,
            RetryPolicy {
                max_retries: options.max_retries,
                backoff: Backoff {
                    initial: Duration::from_millis(1),
                    max: Duration::from_millis(8),
                    multiplier: 2.0,
                    max_elapsed: None,
                    jitter: 0.0,
                },
            },
            Arc::clone(&metrics),
        );
        let broker = Arc::new(broker);

        let vectors = Arc::new(MemoryIndex::new());
        for collection in [JOB_DESCRIPTION_COLLECTION, SCORING_RUBRIC_COLLECTION] {
            vectors
                .ensure_collection(collection, 2, DistanceMetric::Cosine)
                .await
                .expect("collection");
            vectors
                .upsert_points(
                    collection,
                    vec![vec![10.0, 1.0]],
                    vec![json!({"text": format!("{collection} grounding context")})],
                    None,
                )
                .await
                .expect("seed points");
        }

        let llm: Arc<dyn LlmApi> = Arc::new(MockLlm {
            mode: options.llm_mode,
        });
        let pipeline = Arc::new(EvalPipeline::new(
            Arc::clone(&ledger),
            llm,
            vectors,
            EmbeddingCache::new(64, Arc::clone(&metrics)),
            PromptDefaults::default(),
            PipelineConfig::default(),
        ));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut kept_receivers = Vec::new();
        let pool = if options.start_workers {
            Some(WorkerPool::spawn(
                receivers,
                Arc::clone(&broker),
                Arc::clone(&ledger),
                pipeline,
                WorkerConfig::default(),
                Arc::clone(&metrics),
                shutdown_rx,
            ))
        } else {
            kept_receivers = receivers;
            None
        };

        let sweeper = Sweeper::new(
            Arc::clone(&ledger),
            SweeperConfig {
                interval: Duration::from_secs(3600),
                max_processing_age: Duration::ZERO,
                page_size: 100,
            },
            Arc::clone(&metrics),
        );

        let admission = Arc::new(Admission::new(
            Arc::clone(&ledger),
            broker,
            Arc::clone(&metrics),
        ));
        let state = AppState::new(
            config,
            Arc::clone(&ledger),
            Arc::clone(&queue),
            admission,
            Arc::new(MockExtractor),
            Arc::clone(&metrics),
        );

        Self {
            app: build_router(state),
            ledger,
            queue,
            metrics,
            pool,
            shutdown_tx,
            sweeper,
            _receivers: kept_receivers,
            _tmp: tmp,
        }
    }

    pub async fn new() -> Self {
        Self::with_options(HarnessOptions::default()).await
    }

    /// Run one sweeper pass (the harness sweeper treats any `processing`
    /// job as already stale).
    pub fn sweep(&self) -> usize {
        self.sweeper.sweep_once().expect("sweep")
    }

    pub async fn wait_for_terminal(&self, job_id: &str) -> JobStatus {
        for _ in 0..300 {
            let job = self.ledger.get_job(job_id).expect("get job");
            if let Some(job) = job {
                if job.status.is_terminal() {
                    return job.status;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {job_id} never reached a terminal status");
    }

    pub async fn shutdown(mut self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(pool) = self.pool.take() {
            pool.shutdown(Duration::from_secs(2)).await;
        }
    }
}

pub const BOUNDARY: &str = "evalbox-test-boundary";

/// Build a multipart/form-data body from (field, filename, content-type,
/// bytes) parts.
pub fn multipart_body(parts: &[(&str, &str, &str, &[u8])]) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, filename, content_type, data) in parts {
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        body.extend_from_slice(
            format!("Content-Disposition: form-data; name=\"{name}\"; filename=\"{filename}\"\r\n")
                .as_bytes(),
        );
        body.extend_from_slice(format!("Content-Type: {content_type}\r\n\r\n").as_bytes());
        body.extend_from_slice(data);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

pub fn upload_request(parts: &[(&str, &str, &str, &[u8])]) -> Request<Body> {
    Request::builder()
        .uri("/v1/upload")
        .method("POST")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(multipart_body(parts)))
        .unwrap()
}

pub fn evaluate_request(body: &serde_json::Value, idempotency_key: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .uri("/v1/evaluate")
        .method("POST")
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(key) = idempotency_key {
        builder = builder.header("Idempotency-Key", key);
    }
    builder
        .body(Body::from(serde_json::to_vec(body).unwrap()))
        .unwrap()
}

pub fn result_request(job_id: &str, if_none_match: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .uri(format!("/v1/result/{job_id}"))
        .method("GET");
    if let Some(etag) = if_none_match {
        builder = builder.header(header::IF_NONE_MATCH, etag);
    }
    builder.body(Body::empty()).unwrap()
}

pub async fn response_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    serde_json::from_slice(&bytes).expect("json body")
}

/// Upload a standard pair of text documents and return (cv_id, project_id).
pub async fn upload_documents(app: &Router) -> (String, String) {
    use tower::ServiceExt;

    let request = upload_request(&[
        (
            "cv",
            "cv.txt",
            "text/plain",
            b"I am a backend engineer with five years of Go and Rust experience.".as_slice(),
        ),
        (
            "project",
            "project.txt",
            "text/plain",
            b"I built a queue-backed microservice with retries and idempotency.".as_slice(),
        ),
    ]);
    let response = app.clone().oneshot(request).await.expect("upload");
    assert_eq!(response.status(), axum::http::StatusCode::OK);
    let json = response_json(response).await;
    (
        json["cv_id"].as_str().expect("cv_id").to_string(),
        json["project_id"].as_str().expect("project_id").to_string(),
    )
}
