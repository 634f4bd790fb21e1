use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Envelope enqueued for each admitted job. Carries the full evaluation
/// context so workers never re-read the admission request; empty context
/// fields mean "use the configured defaults".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvalTask {
    pub job_id: String,
    pub cv_id: String,
    pub project_id: String,
    #[serde(default)]
    pub job_description: String,
    #[serde(default)]
    pub study_case_brief: String,
    #[serde(default)]
    pub scoring_rubric: String,
    /// Correlation id for tracing across admission, queue and worker.
    pub request_id: String,
}

/// A task that exhausted its retries, parked on the dead-letter partition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterTask {
    pub task: EvalTask,
    pub failure_reason: String,
    pub attempts: u32,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub failed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_json_round_trip() {
        let task = EvalTask {
            job_id: "job-1".into(),
            cv_id: "cv-1".into(),
            project_id: "p-1".into(),
            job_description: String::new(),
            study_case_brief: "brief".into(),
            scoring_rubric: String::new(),
            request_id: "req-1".into(),
        };
        let bytes = serde_json::to_vec(&task).unwrap();
        let decoded: EvalTask = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(decoded, task);
    }

    #[test]
    fn omitted_context_fields_default_to_empty() {
        let decoded: EvalTask = serde_json::from_str(
            r#"{"job_id":"j","cv_id":"c","project_id":"p","request_id":"r"}"#,
        )
        .unwrap();
        assert!(decoded.job_description.is_empty());
        assert!(decoded.scoring_rubric.is_empty());
    }
}
