//! Prompt composition for the three scoring calls
//!
//! Prompts instruct the model to answer with a single JSON object and
//! nothing else; the stricter retry suffix is appended when a response
//! fails schema validation.

use serde::{Deserialize, Serialize};

/// Server-side defaults substituted when the client omits the optional
/// evaluation context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptDefaults {
    pub job_description: String,
    pub study_case_brief: String,
    pub scoring_rubric: String,
}

impl Default for PromptDefaults {
    fn default() -> Self {
        Self {
            job_description: DEFAULT_JOB_DESCRIPTION.trim().to_string(),
            study_case_brief: DEFAULT_STUDY_CASE_BRIEF.trim().to_string(),
            scoring_rubric: DEFAULT_SCORING_RUBRIC.trim().to_string(),
        }
    }
}

const DEFAULT_JOB_DESCRIPTION: &str = r#"
Backend engineer for an evaluation platform: designs and operates HTTP
services, asynchronous job processing, data stores and third-party API
integrations. Values reliability engineering (retries, backoff,
idempotency), observability and clear written communication.
"#;

const DEFAULT_STUDY_CASE_BRIEF: &str = r#"
Build a small service that accepts a job, processes it asynchronously
through an external AI provider with retry and failure handling, persists
the outcome and exposes a polling endpoint for the result.
"#;

const DEFAULT_SCORING_RUBRIC: &str = r#"
CV match: technical skill alignment, years and depth of relevant
experience, evidence of ownership and impact, communication quality.
Project: correctness of the async design, resilience (timeouts, retries,
idempotency), code clarity, documentation, and honest trade-off analysis.
"#;

pub const CV_SYSTEM_PROMPT: &str = "You are an experienced technical recruiter evaluating a candidate CV \
against a role. Respond with only a JSON object matching \
{\"cv_match_rate\": number between 0 and 1, \"cv_feedback\": string of 1-3 sentences}. \
Do not include reasoning, step lists, headings or any text outside the JSON object.";

pub const PROJECT_SYSTEM_PROMPT: &str = "You are an experienced engineering reviewer scoring a project report \
against a study-case brief. Respond with only a JSON object matching \
{\"project_score\": number between 1 and 10, \"project_feedback\": string of 1-3 sentences}. \
Do not include reasoning, step lists, headings or any text outside the JSON object.";

pub const SUMMARY_SYSTEM_PROMPT: &str = "You synthesise hiring evaluations. Respond with only a JSON object \
matching {\"overall_summary\": string of 3-5 sentences}. Do not include \
reasoning, step lists, headings or any text outside the JSON object.";

/// Appended to the user prompt when the previous response failed schema
/// validation.
pub const STRICT_RETRY_SUFFIX: &str = "\n\nYour previous answer was rejected: it was not a single valid JSON \
object of the required shape. Answer again with ONLY the JSON object - no \
markdown fences, no explanation, no reasoning.";

pub fn cv_scoring_prompt(
    cv_text: &str,
    job_description: &str,
    jd_context: &str,
    rubric_context: &str,
) -> String {
    format!(
        "Candidate CV:\n{cv_text}\n\nJob description:\n{job_description}\n\n\
Related job-description context:\n{jd_context}\n\n\
Scoring rubric context:\n{rubric_context}\n\n\
Rate how well the candidate matches the role."
    )
}

pub fn project_scoring_prompt(
    project_text: &str,
    study_case_brief: &str,
    rubric_context: &str,
) -> String {
    format!(
        "Project report:\n{project_text}\n\nStudy-case brief:\n{study_case_brief}\n\n\
Scoring rubric context:\n{rubric_context}\n\n\
Score the project against the brief."
    )
}

pub fn summary_prompt(
    cv_match_rate: f64,
    cv_feedback: &str,
    project_score: f64,
    project_feedback: &str,
) -> String {
    format!(
        "CV match rate: {cv_match_rate:.2}\nCV feedback: {cv_feedback}\n\n\
Project score: {project_score:.1}\nProject feedback: {project_feedback}\n\n\
Write an overall hiring summary of 3-5 sentences covering both."
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_non_empty() {
        let defaults = PromptDefaults::default();
        assert!(!defaults.job_description.is_empty());
        assert!(!defaults.study_case_brief.is_empty());
        assert!(!defaults.scoring_rubric.is_empty());
    }

    #[test]
    fn cv_prompt_carries_all_sections() {
        let prompt = cv_scoring_prompt("CV BODY", "JD BODY", "JD CTX", "RUBRIC CTX");
        assert!(prompt.contains("CV BODY"));
        assert!(prompt.contains("JD BODY"));
        assert!(prompt.contains("JD CTX"));
        assert!(prompt.contains("RUBRIC CTX"));
    }

    #[test]
    fn summary_prompt_formats_scores() {
        let prompt = summary_prompt(0.85, "Good fit.", 7.5, "Solid build.");
        assert!(prompt.contains("0.85"));
        assert!(prompt.contains("7.5"));
    }
}
