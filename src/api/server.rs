use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, DefaultBodyLimit, Request, State};
use axum::http::{HeaderValue, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::{Router, routing::get, routing::post};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::timeout::TimeoutLayer;
use tracing::{info, warn};

use crate::admission::Admission;
use crate::ai::{EmbeddingCache, LlmApi, ModelCatalog, OpenRouterClient, OpenRouterConfig};
use crate::config::Config;
use crate::extract::{HttpExtractor, TextExtractor};
use crate::ledger::FjallLedger;
use crate::observability::Metrics;
use crate::pipeline::{EvalPipeline, PipelineConfig};
use crate::queue::{EvalBroker, FjallQueue, RetryPolicy};
use crate::retry::Backoff;
use crate::sweeper::{Sweeper, SweeperConfig};
use crate::vector::{
    DistanceMetric, JOB_DESCRIPTION_COLLECTION, QdrantIndex, SCORING_RUBRIC_COLLECTION,
    VectorIndex,
};
use crate::worker::{WorkerConfig, WorkerPool};

use super::error::ApiError;
use super::services::{evaluate, get_result, health, upload_documents};
use super::state::AppState;

type AnyError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Build the HTTP router with all middleware. Public so integration tests
/// can run the exact production surface against mock collaborators.
pub fn build_router(state: AppState) -> Router {
    let request_timeout = state.config.server.request_timeout();
    // Total multipart body: two documents plus form overhead.
    let body_limit = (state.config.server.max_upload_bytes() * 2 + 64 * 1024) as usize;

    let mutating = Router::new()
        .route("/v1/upload", post(upload_documents))
        .route("/v1/evaluate", post(evaluate))
        .route_layer(middleware::from_fn_with_state(state.clone(), rate_limit));

    Router::new()
        .merge(mutating)
        .route("/v1/result/{id}", get(get_result))
        .route("/health", get(health))
        .with_state(state)
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::X_FRAME_OPTIONS,
            HeaderValue::from_static("DENY"),
        ))
        .layer(TimeoutLayer::new(request_timeout))
        .layer(RequestBodyLimitLayer::new(body_limit))
        .layer(DefaultBodyLimit::max(body_limit))
}

/// Per-IP rate limit on mutating endpoints.
async fn rate_limit(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let key = client_key(&request);
    if !state.rate_limiter.check(&key) {
        return ApiError::RateLimited.into_response();
    }
    next.run(request).await
}

fn client_key(request: &Request) -> String {
    if let Some(forwarded) = request
        .headers()
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
    {
        if let Some(first) = forwarded.split(',').next() {
            let first = first.trim();
            if !first.is_empty() {
                return first.to_string();
            }
        }
    }
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0.ip().to_string())
        .unwrap_or_else(|| "local".to_string())
}

/// Run the full service: HTTP front-end, worker pool, model-list
/// refresher, sweeper and retention loops, with graceful shutdown.
pub async fn run(config: Config) -> Result<(), AnyError> {
    let metrics = Arc::new(Metrics::new());

    info!(path = %config.ledger.path.display(), "Opening ledger");
    let ledger = Arc::new(FjallLedger::open(&config.ledger.path)?);
    info!(path = %config.queue.path.display(), "Opening queue");
    let queue = Arc::new(FjallQueue::open(&config.queue.path)?);

    let retry_policy = RetryPolicy {
        max_retries: config.queue.retry.max_retries,
        backoff: Backoff {
            initial: config.queue.retry.initial_delay(),
            max: config.queue.retry.max_delay(),
            multiplier: config.queue.retry.multiplier,
            max_elapsed: None,
            jitter: config.queue.retry.jitter,
        },
    };
    let (broker, receivers) = EvalBroker::new(
        Arc::clone(&queue),
        Arc::clone(&ledger),
        config.queue.consumer_max_concurrency,
        config.queue.channel_capacity,
        retry_policy,
        Arc::clone(&metrics),
    );
    let broker = Arc::new(broker);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // LLM provider with refreshable free-model catalog.
    let api_key = config.ai.api_key.clone().unwrap_or_default();
    if api_key.is_empty() {
        warn!("No AI API key configured; provider calls will be rejected upstream");
    }
    let mut seed_models = vec![config.ai.primary_model.clone()];
    seed_models.extend(config.ai.fallback_models.iter().cloned());
    let catalog = Arc::new(ModelCatalog::new(
        reqwest::Client::new(),
        config.ai.base_url.clone(),
        seed_models,
    ));
    {
        let catalog = Arc::clone(&catalog);
        tokio::spawn(async move {
            if let Err(err) = catalog.refresh().await {
                warn!(error = %err, "Initial model catalog refresh failed");
            }
        });
    }
    Arc::clone(&catalog).spawn_refresher(config.ai.refresh_interval(), shutdown_rx.clone());

    let llm: Arc<dyn LlmApi> = Arc::new(OpenRouterClient::new(
        OpenRouterConfig {
            base_url: config.ai.base_url.clone(),
            api_key,
            primary_model: config.ai.primary_model.clone(),
            fallback_models: config.ai.fallback_models.clone(),
            embedding_model: config.ai.embedding_model.clone(),
            min_interval: config.ai.effective_min_interval(),
            request_timeout: config.ai.request_timeout(),
            backoff: Backoff {
                initial: config.ai.backoff.initial_interval(),
                max: config.ai.backoff.max_interval(),
                multiplier: config.ai.backoff.multiplier,
                max_elapsed: Some(config.ai.backoff.max_elapsed()),
                jitter: 0.2,
            },
        },
        catalog,
        Arc::clone(&metrics),
    )?);

    let vectors: Arc<dyn VectorIndex> = Arc::new(QdrantIndex::new(
        config.vector.url.clone(),
        config.vector.request_timeout(),
        Backoff {
            initial: std::time::Duration::from_millis(200),
            max: std::time::Duration::from_secs(2),
            multiplier: 2.0,
            max_elapsed: Some(config.vector.request_timeout()),
            jitter: 0.2,
        },
    )?);
    // Bootstrap of collection content is external; creating the empty
    // collections here is idempotent and keeps first-run searches from 404s.
    for collection in [JOB_DESCRIPTION_COLLECTION, SCORING_RUBRIC_COLLECTION] {
        if let Err(err) = vectors
            .ensure_collection(collection, config.vector.dim, DistanceMetric::Cosine)
            .await
        {
            warn!(collection, error = %err, "Could not ensure vector collection");
        }
    }

    let cache = EmbeddingCache::new(config.ai.embed_cache_size, Arc::clone(&metrics));
    let pipeline = Arc::new(EvalPipeline::new(
        Arc::clone(&ledger),
        llm,
        vectors,
        cache,
        config.pipeline.defaults.clone(),
        PipelineConfig {
            top_k: config.pipeline.top_k,
            retrieval_timeout: config.pipeline.retrieval_timeout(),
            embed_timeout: config.pipeline.embed_timeout(),
            schema_retries: config.pipeline.schema_retries,
            temperature: config.pipeline.temperature,
        },
    ));

    let pool = WorkerPool::spawn(
        receivers,
        Arc::clone(&broker),
        Arc::clone(&ledger),
        pipeline,
        WorkerConfig {
            job_deadline: config.pipeline.job_deadline(),
        },
        Arc::clone(&metrics),
        shutdown_rx.clone(),
    );
    // Tasks left unacknowledged by a previous process get re-dispatched.
    broker.recover().await?;

    Sweeper::new(
        Arc::clone(&ledger),
        SweeperConfig {
            interval: config.sweeper.interval(),
            max_processing_age: config.sweeper.max_processing_age(),
            page_size: config.sweeper.page_size,
        },
        Arc::clone(&metrics),
    )
    .spawn(shutdown_rx.clone());

    spawn_retention_loop(
        Arc::clone(&ledger),
        config.retention.window(),
        config.retention.cleanup_interval(),
        shutdown_rx.clone(),
    );
    spawn_dlq_cleanup_loop(
        Arc::clone(&queue),
        config.queue.dlq_max_age(),
        config.queue.dlq_cleanup_interval(),
        shutdown_rx.clone(),
    );

    let extractor: Arc<dyn TextExtractor> = Arc::new(HttpExtractor::new(
        config.extractor.url.clone(),
        config.extractor.request_timeout(),
    )?);
    let admission = Arc::new(Admission::new(
        Arc::clone(&ledger),
        Arc::clone(&broker),
        Arc::clone(&metrics),
    ));

    let bind_addr = config.server.bind_addr;
    let shutdown_grace = config.server.shutdown_timeout();
    let state = AppState::new(
        config,
        Arc::clone(&ledger),
        Arc::clone(&queue),
        admission,
        extractor,
        metrics,
    );
    let app = build_router(state);

    let listener = TcpListener::bind(bind_addr).await?;
    info!(address = %bind_addr, "EvalBox API listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    // HTTP drained; stop background work, give in-flight jobs the grace
    // period, then flush the stores.
    let _ = shutdown_tx.send(true);
    pool.shutdown(shutdown_grace).await;
    ledger.persist()?;
    queue.flush()?;
    info!("Shutdown complete");
    Ok(())
}

fn spawn_retention_loop(
    ledger: Arc<FjallLedger>,
    window: std::time::Duration,
    interval: std::time::Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    match ledger.prune_expired(window) {
                        Ok(stats) => info!(?stats, "Retention pass finished"),
                        Err(err) => warn!(error = %err, "Retention pass failed"),
                    }
                }
                _ = shutdown.changed() => return,
            }
        }
    });
}

fn spawn_dlq_cleanup_loop(
    queue: Arc<FjallQueue>,
    max_age: std::time::Duration,
    interval: std::time::Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    match queue.purge_dlq_older_than(max_age) {
                        Ok(0) => {}
                        Ok(purged) => info!(purged, "DLQ cleanup finished"),
                        Err(err) => warn!(error = %err, "DLQ cleanup failed"),
                    }
                }
                _ = shutdown.changed() => return,
            }
        }
    });
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        let mut sigterm =
            signal(SignalKind::terminate()).expect("failed to install signal handler");
        sigterm.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
