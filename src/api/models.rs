//! API models for the upload, evaluate and result endpoints
//!
//! The external contract:
//! - `POST /v1/upload` (multipart `cv` + `project`) -> [`UploadResponse`]
//! - `POST /v1/evaluate` ([`EvaluateRequest`], optional `Idempotency-Key`
//!   header) -> [`EvaluateResponse`]
//! - `GET /v1/result/{id}` -> [`ResultResponse`] with a strong ETag;
//!   `If-None-Match` yields `304 Not Modified`
//!
//! Errors share the envelope `{"error": {"code": ..., "message": ...}}`.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::ledger::{Evaluation, Job};

use super::error::code_for_job_error;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct UploadResponse {
    pub cv_id: String,
    pub project_id: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EvaluateRequest {
    pub cv_id: String,
    pub project_id: String,
    #[serde(default)]
    pub job_description: Option<String>,
    #[serde(default)]
    pub study_case_brief: Option<String>,
    #[serde(default)]
    pub scoring_rubric: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct EvaluateResponse {
    pub id: String,
    pub status: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ResultPayload {
    pub cv_match_rate: f64,
    pub cv_feedback: String,
    pub project_score: f64,
    pub project_feedback: String,
    pub overall_summary: String,
}

impl From<&Evaluation> for ResultPayload {
    fn from(evaluation: &Evaluation) -> Self {
        Self {
            cv_match_rate: evaluation.cv_match_rate,
            cv_feedback: evaluation.cv_feedback.clone(),
            project_score: evaluation.project_score,
            project_feedback: evaluation.project_feedback.clone(),
            overall_summary: evaluation.overall_summary.clone(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ResultResponse {
    pub id: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<ResultPayload>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl ResultResponse {
    /// Body for a non-completed job: `{id, status}` plus the mapped error
    /// when the job failed.
    pub fn for_job(job: &Job) -> Self {
        let error = if job.status == crate::ledger::JobStatus::Failed {
            Some(ErrorBody {
                code: code_for_job_error(&job.error).to_string(),
                message: job.error.clone(),
            })
        } else {
            None
        };
        Self {
            id: job.id.clone(),
            status: job.status.as_str().to_string(),
            result: None,
            error,
        }
    }

    /// Body for a completed job.
    pub fn for_completed(job: &Job, evaluation: &Evaluation) -> Self {
        Self {
            id: job.id.clone(),
            status: job.status.as_str().to_string(),
            result: Some(ResultPayload::from(evaluation)),
            error: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ErrorEnvelope {
    pub error: ErrorBody,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub components: HashMap<String, String>,
    pub version: String,
}
