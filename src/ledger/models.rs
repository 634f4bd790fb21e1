use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of an ingested document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadKind {
    Cv,
    Project,
}

impl UploadKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            UploadKind::Cv => "cv",
            UploadKind::Project => "project",
        }
    }
}

/// An ingested document. Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Upload {
    pub id: String,
    pub kind: UploadKind,
    pub text: String,
    pub filename: String,
    pub mime: String,
    pub size: u64,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub created_at: DateTime<Utc>,
}

/// Fields a caller supplies when ingesting a document; the ledger assigns
/// the id and the timestamp.
#[derive(Debug, Clone)]
pub struct NewUpload {
    pub kind: UploadKind,
    pub text: String,
    pub filename: String,
    pub mime: String,
    pub size: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Allowed transition closure: `queued → processing → {completed,
    /// failed}`, plus `queued → failed` (admission/stale failures) and the
    /// `processing → processing` heartbeat that refreshes `updated_at`
    /// while a redelivered message is in flight.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        match (self, next) {
            (JobStatus::Queued, JobStatus::Processing) => true,
            (JobStatus::Queued, JobStatus::Failed) => true,
            (JobStatus::Processing, JobStatus::Processing) => true,
            (JobStatus::Processing, JobStatus::Completed) => true,
            (JobStatus::Processing, JobStatus::Failed) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A unit of evaluation work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub status: JobStatus,
    /// Free-form failure message; empty unless `status == failed`.
    #[serde(default)]
    pub error: String,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub updated_at: DateTime<Utc>,
    pub cv_id: String,
    pub project_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewJob {
    pub cv_id: String,
    pub project_id: String,
    pub idempotency_key: Option<String>,
}

/// Evaluation output for a completed job (1:1 with the job).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evaluation {
    pub job_id: String,
    pub cv_match_rate: f64,
    pub cv_feedback: String,
    pub project_score: f64,
    pub project_feedback: String,
    pub overall_summary: String,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub created_at: DateTime<Utc>,
}

impl Evaluation {
    /// Range constraints enforced at the storage boundary.
    pub fn validate_ranges(&self) -> Result<(), String> {
        if !(0.0..=1.0).contains(&self.cv_match_rate) {
            return Err(format!(
                "cv_match_rate {} out of range [0, 1]",
                self.cv_match_rate
            ));
        }
        if !(1.0..=10.0).contains(&self.project_score) {
            return Err(format!(
                "project_score {} out of range [1, 10]",
                self.project_score
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_transitions_are_monotonic() {
        use JobStatus::*;
        assert!(Queued.can_transition_to(Processing));
        assert!(Queued.can_transition_to(Failed));
        assert!(Processing.can_transition_to(Completed));
        assert!(Processing.can_transition_to(Failed));
        assert!(Processing.can_transition_to(Processing));

        assert!(!Processing.can_transition_to(Queued));
        assert!(!Completed.can_transition_to(Failed));
        assert!(!Completed.can_transition_to(Completed));
        assert!(!Failed.can_transition_to(Processing));
        assert!(!Failed.can_transition_to(Failed));
        assert!(!Queued.can_transition_to(Completed));
    }

    #[test]
    fn evaluation_range_validation() {
        let mut eval = Evaluation {
            job_id: "job".into(),
            cv_match_rate: 0.82,
            cv_feedback: "Good fit.".into(),
            project_score: 7.5,
            project_feedback: "Solid work.".into(),
            overall_summary: "A capable candidate overall.".into(),
            created_at: Utc::now(),
        };
        assert!(eval.validate_ranges().is_ok());

        eval.cv_match_rate = 1.2;
        assert!(eval.validate_ranges().is_err());

        eval.cv_match_rate = 0.5;
        eval.project_score = 0.5;
        assert!(eval.validate_ranges().is_err());
    }

    #[test]
    fn status_serde_uses_snake_case() {
        assert_eq!(
            serde_json::to_string(&JobStatus::Processing).unwrap(),
            "\"processing\""
        );
        let parsed: JobStatus = serde_json::from_str("\"completed\"").unwrap();
        assert_eq!(parsed, JobStatus::Completed);
    }
}
