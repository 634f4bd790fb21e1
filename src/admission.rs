//! Admission of evaluation requests
//!
//! Validates the request, applies idempotency-key semantics (same key, same
//! job, exactly one queue message), creates the job in `queued` and
//! enqueues the full evaluation context. A job whose enqueue fails is
//! marked failed immediately so clients never poll a zombie.

use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};

use crate::ledger::{FjallLedger, Job, LedgerError, NewJob};
use crate::observability::Metrics;
use crate::queue::{EvalBroker, EvalTask};

#[derive(Debug, Error)]
pub enum AdmissionError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("internal error: {0}")]
    Internal(String),
}

#[derive(Debug, Clone)]
pub struct EnqueueRequest {
    pub cv_id: String,
    pub project_id: String,
    pub job_description: String,
    pub study_case_brief: String,
    pub scoring_rubric: String,
    pub idempotency_key: Option<String>,
    pub request_id: String,
}

pub struct Admission {
    ledger: Arc<FjallLedger>,
    broker: Arc<EvalBroker>,
    metrics: Arc<Metrics>,
}

impl Admission {
    pub fn new(ledger: Arc<FjallLedger>, broker: Arc<EvalBroker>, metrics: Arc<Metrics>) -> Self {
        Self {
            ledger,
            broker,
            metrics,
        }
    }

    /// Admit an evaluation request and return its job. A repeated
    /// idempotency key returns the existing job without enqueuing again.
    pub async fn enqueue(&self, request: EnqueueRequest) -> Result<Job, AdmissionError> {
        if request.cv_id.trim().is_empty() {
            return Err(AdmissionError::InvalidArgument("cv_id is required".into()));
        }
        if request.project_id.trim().is_empty() {
            return Err(AdmissionError::InvalidArgument(
                "project_id is required".into(),
            ));
        }

        if let Some(key) = &request.idempotency_key {
            match self.ledger.find_by_idempotency_key(key) {
                Ok(Some(existing)) => {
                    info!(job_id = %existing.id, "Idempotency key replay, returning existing job");
                    return Ok(existing);
                }
                Ok(None) => {}
                Err(err) => return Err(AdmissionError::Internal(err.to_string())),
            }
        }

        let job = match self.ledger.create_job(NewJob {
            cv_id: request.cv_id.clone(),
            project_id: request.project_id.clone(),
            idempotency_key: request.idempotency_key.clone(),
        }) {
            Ok(job) => job,
            // Lost a creation race on the same key; the winner's job is the
            // answer.
            Err(LedgerError::Conflict(_)) => {
                if let Some(key) = &request.idempotency_key {
                    if let Ok(Some(existing)) = self.ledger.find_by_idempotency_key(key) {
                        return Ok(existing);
                    }
                }
                return Err(AdmissionError::Internal(
                    "idempotency conflict without stored job".into(),
                ));
            }
            Err(LedgerError::InvalidArgument(message)) => {
                return Err(AdmissionError::InvalidArgument(message));
            }
            Err(err) => return Err(AdmissionError::Internal(err.to_string())),
        };

        let task = EvalTask {
            job_id: job.id.clone(),
            cv_id: request.cv_id,
            project_id: request.project_id,
            job_description: request.job_description,
            study_case_brief: request.study_case_brief,
            scoring_rubric: request.scoring_rubric,
            request_id: request.request_id,
        };

        if let Err(err) = self.broker.enqueue(task).await {
            warn!(job_id = %job.id, error = %err, "Enqueue failed, failing job");
            if let Err(update_err) = self.ledger.update_status(
                &job.id,
                crate::ledger::JobStatus::Failed,
                Some(&format!("enqueue failed: {err}")),
            ) {
                warn!(job_id = %job.id, error = %update_err, "Could not mark job failed after enqueue failure");
            }
            return Err(AdmissionError::Internal(format!("enqueue failed: {err}")));
        }

        self.metrics.job_admitted();
        info!(job_id = %job.id, "Job admitted");
        Ok(job)
    }
}
