use std::collections::HashMap;

use axum::extract::{Multipart, Path, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::IntoResponse;
use axum::Json;
use bytes::Bytes;
use chrono::Utc;
use uuid::Uuid;

use crate::admission::EnqueueRequest;
use crate::extract::{ExtractError, decode_plain_text, sanitize_text};
use crate::ledger::{Job, JobStatus, LedgerError, NewUpload, Upload, UploadKind};

use super::error::ApiError;
use super::etag::{etag_for, matches_if_none_match};
use super::models::{
    EvaluateRequest, EvaluateResponse, HealthResponse, ResultResponse, UploadResponse,
};
use super::state::AppState;
use super::validation::{
    check_declared_mime, sniff_content, validate_extension, validate_upload_size,
};

/// Document ingestion endpoint (POST /v1/upload)
///
/// Multipart form with `cv` and `project` file fields. Each file passes
/// the extension allowlist, a content sniff against the extension's magic
/// numbers, and the size limit; non-text documents go to the external
/// extractor. Returns the two upload ids used by `POST /v1/evaluate`.
pub async fn upload_documents(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    let mut cv: Option<(String, Option<String>, Bytes)> = None;
    let mut project: Option<(String, Option<String>, Bytes)> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::InvalidArgument(format!("malformed multipart body: {e}")))?
    {
        let name = field.name().unwrap_or_default().to_string();
        let filename = field.file_name().unwrap_or_default().to_string();
        let declared = field.content_type().map(str::to_owned);
        let data = field
            .bytes()
            .await
            .map_err(|e| ApiError::InvalidArgument(format!("failed to read field '{name}': {e}")))?;
        match name.as_str() {
            "cv" => cv = Some((filename, declared, data)),
            "project" => project = Some((filename, declared, data)),
            _ => {}
        }
    }

    let (cv_filename, cv_declared, cv_data) =
        cv.ok_or_else(|| ApiError::InvalidArgument("multipart field 'cv' is required".into()))?;
    let (project_filename, project_declared, project_data) = project
        .ok_or_else(|| ApiError::InvalidArgument("multipart field 'project' is required".into()))?;

    let cv_upload = ingest_document(
        &state,
        UploadKind::Cv,
        &cv_filename,
        cv_declared.as_deref(),
        cv_data,
    )
    .await?;
    let project_upload = ingest_document(
        &state,
        UploadKind::Project,
        &project_filename,
        project_declared.as_deref(),
        project_data,
    )
    .await?;

    Ok((
        StatusCode::OK,
        Json(UploadResponse {
            cv_id: cv_upload.id,
            project_id: project_upload.id,
        }),
    ))
}

async fn ingest_document(
    state: &AppState,
    kind: UploadKind,
    filename: &str,
    declared_mime: Option<&str>,
    data: Bytes,
) -> Result<Upload, ApiError> {
    let extension = validate_extension(filename)?;
    validate_upload_size(data.len(), state.config.server.max_upload_bytes())?;
    let mime = sniff_content(extension, &data)?;
    if let Some(declared) = declared_mime {
        check_declared_mime(declared, mime)?;
    }

    let size = data.len() as u64;
    let text = if mime == "text/plain" {
        decode_plain_text(&data).map_err(map_extract_error)?
    } else {
        let raw = state
            .extractor
            .extract(filename, mime, data)
            .await
            .map_err(map_extract_error)?;
        sanitize_text(&raw)
    };
    if text.trim().is_empty() {
        return Err(ApiError::InvalidArgument(format!(
            "no extractable text in '{filename}'"
        )));
    }

    let upload = state.ledger.create_upload(NewUpload {
        kind,
        text,
        filename: filename.to_string(),
        mime: mime.to_string(),
        size,
    })?;
    Ok(upload)
}

fn map_extract_error(err: ExtractError) -> ApiError {
    match err {
        ExtractError::Timeout => ApiError::UpstreamTimeout("text extraction timed out".into()),
        ExtractError::Unsupported(message) => ApiError::UnsupportedMedia(message),
        ExtractError::Failed(message) => {
            ApiError::Internal(format!("text extraction failed: {message}"))
        }
    }
}

/// Evaluation admission endpoint (POST /v1/evaluate)
///
/// Optional context fields fall back to server defaults inside the worker.
/// An `Idempotency-Key` header makes the call safely re-submittable: the
/// same key returns the same job and enqueues nothing new.
pub async fn evaluate(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<EvaluateRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let idempotency_key = headers
        .get("Idempotency-Key")
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned)
        .filter(|value| !value.is_empty());

    let request_id = headers
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let job = state
        .admission
        .enqueue(EnqueueRequest {
            cv_id: request.cv_id,
            project_id: request.project_id,
            job_description: request.job_description.unwrap_or_default(),
            study_case_brief: request.study_case_brief.unwrap_or_default(),
            scoring_rubric: request.scoring_rubric.unwrap_or_default(),
            idempotency_key,
            request_id,
        })
        .await?;

    Ok((
        StatusCode::OK,
        Json(EvaluateResponse {
            id: job.id,
            status: job.status.as_str().to_string(),
        }),
    ))
}

/// Result polling endpoint (GET /v1/result/{id})
///
/// Serves the evaluation for completed jobs and `{id, status}` otherwise,
/// with the stale policy applied first: a job stuck past the configured
/// horizon is failed on read so clients never poll forever. Responses
/// carry a strong ETag; a matching `If-None-Match` yields 304.
pub async fn get_result(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<axum::response::Response, ApiError> {
    let job = state
        .ledger
        .get_job(&id)?
        .ok_or_else(|| ApiError::NotFound(format!("job {id}")))?;
    let job = apply_stale_policy(&state, job)?;

    let body = if job.status == JobStatus::Completed {
        let evaluation = state.ledger.get_result(&job.id)?.ok_or_else(|| {
            ApiError::Internal(format!("result missing for completed job {}", job.id))
        })?;
        ResultResponse::for_completed(&job, &evaluation)
    } else {
        ResultResponse::for_job(&job)
    };

    let body_value = serde_json::to_value(&body)
        .map_err(|e| ApiError::Internal(format!("response serialization: {e}")))?;
    let etag = etag_for(&body_value);
    let etag_header = HeaderValue::from_str(&format!("\"{etag}\""))
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    if let Some(if_none_match) = headers
        .get(header::IF_NONE_MATCH)
        .and_then(|value| value.to_str().ok())
    {
        if matches_if_none_match(if_none_match, &etag) {
            return Ok((StatusCode::NOT_MODIFIED, [(header::ETAG, etag_header)]).into_response());
        }
    }

    Ok((StatusCode::OK, [(header::ETAG, etag_header)], Json(body)).into_response())
}

/// Fail jobs the lifecycle lost track of: `queued` older than the stale
/// horizon (the message never reached a worker) or `processing` with a
/// stale heartbeat (the worker died). Losing the race to a concurrent
/// completion is fine; the fresh job state wins.
fn apply_stale_policy(state: &AppState, job: Job) -> Result<Job, ApiError> {
    let horizon = state.config.sweeper.result_stale_after();
    let cutoff = Utc::now()
        - chrono::Duration::from_std(horizon).unwrap_or_else(|_| chrono::Duration::minutes(2));

    let is_stale = match job.status {
        JobStatus::Queued => job.created_at < cutoff,
        JobStatus::Processing => job.updated_at < cutoff,
        JobStatus::Completed | JobStatus::Failed => false,
    };
    if !is_stale {
        return Ok(job);
    }

    let message = stale_message(horizon);
    match state
        .ledger
        .update_status(&job.id, JobStatus::Failed, Some(&message))
    {
        Ok(updated) => {
            state.metrics.job_failed();
            Ok(updated)
        }
        Err(LedgerError::Conflict(_)) => state
            .ledger
            .get_job(&job.id)?
            .ok_or_else(|| ApiError::NotFound(format!("job {}", job.id))),
        Err(err) => Err(err.into()),
    }
}

fn stale_message(horizon: std::time::Duration) -> String {
    let secs = horizon.as_secs();
    if secs >= 60 && secs % 60 == 0 {
        format!("timeout: job exceeded {} minutes", secs / 60)
    } else {
        format!("timeout: job exceeded {secs} seconds")
    }
}

/// Health check endpoint (GET /health)
///
/// Reports per-component status; 503 when any component is unhealthy.
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let mut components = HashMap::new();
    components.insert("api".to_string(), "healthy".to_string());
    components.insert(
        "ledger".to_string(),
        match state.ledger.health_check() {
            Ok(()) => "healthy".to_string(),
            Err(err) => format!("unhealthy: {err}"),
        },
    );
    components.insert(
        "queue".to_string(),
        match state.queue.health_check() {
            Ok(()) => "healthy".to_string(),
            Err(err) => format!("unhealthy: {err}"),
        },
    );

    let all_healthy = components.values().all(|status| status == "healthy");
    let status_code = if all_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let response = HealthResponse {
        status: if all_healthy { "healthy" } else { "unhealthy" }.to_string(),
        components,
        version: env!("CARGO_PKG_VERSION").to_string(),
    };
    (status_code, Json(response))
}
