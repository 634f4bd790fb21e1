/// Multi-stage evaluation pipeline
///
/// Stages, all inside the worker's per-job deadline:
/// 1. Load CV and project texts from the ledger
/// 2. Embed the job description and study-case brief (cached) and retrieve
///    grounding context from the vector collections
/// 3. CV scoring call
/// 4. Project scoring call
/// 5. Refinement call producing the overall summary
///
/// Every model response is parsed as strict JSON, screened for
/// chain-of-thought leakage and range-checked; a non-conformant response
/// is retried with a stricter re-prompt a bounded number of times before
/// the stage surfaces `SchemaInvalid`.
pub mod prompts;
pub mod sanitize;

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, warn};

use crate::ai::{AiError, ChatMessage, ChatOptions, EmbeddingCache, LlmApi};
use crate::ledger::{FjallLedger, LedgerError, UploadKind};
use crate::queue::EvalTask;
use crate::vector::{
    JOB_DESCRIPTION_COLLECTION, SCORING_RUBRIC_COLLECTION, SearchHit, VectorError, VectorIndex,
};

pub use prompts::PromptDefaults;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("schema invalid: {0}")]
    SchemaInvalid(String),

    #[error("{0}")]
    Upstream(#[from] AiError),

    #[error("vector store: {0}")]
    Vector(#[from] VectorError),

    #[error("storage: {0}")]
    Storage(#[from] LedgerError),
}

impl PipelineError {
    /// Retriable failures are handed back to the queue; the rest fail the
    /// job immediately.
    pub fn is_retriable(&self) -> bool {
        match self {
            PipelineError::Upstream(err) => err.is_retriable(),
            PipelineError::Vector(err) => err.is_retriable(),
            PipelineError::InvalidArgument(_) | PipelineError::SchemaInvalid(_) => false,
            PipelineError::Storage(_) => false,
        }
    }
}

/// Validated output of a full pipeline run.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineOutput {
    pub cv_match_rate: f64,
    pub cv_feedback: String,
    pub project_score: f64,
    pub project_feedback: String,
    pub overall_summary: String,
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Hits retrieved per collection.
    pub top_k: usize,
    pub retrieval_timeout: Duration,
    pub embed_timeout: Duration,
    /// Attempts per scoring call before surfacing `SchemaInvalid`.
    pub schema_retries: u32,
    pub temperature: f32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            top_k: 8,
            retrieval_timeout: Duration::from_secs(5),
            embed_timeout: Duration::from_secs(5),
            schema_retries: 3,
            temperature: 0.1,
        }
    }
}

#[derive(Deserialize)]
struct CvScore {
    cv_match_rate: f64,
    cv_feedback: String,
}

#[derive(Deserialize)]
struct ProjectScore {
    project_score: f64,
    project_feedback: String,
}

#[derive(Deserialize)]
struct SummaryOut {
    overall_summary: String,
}

pub struct EvalPipeline {
    ledger: Arc<FjallLedger>,
    llm: Arc<dyn LlmApi>,
    vectors: Arc<dyn VectorIndex>,
    cache: EmbeddingCache,
    defaults: PromptDefaults,
    config: PipelineConfig,
}

impl EvalPipeline {
    pub fn new(
        ledger: Arc<FjallLedger>,
        llm: Arc<dyn LlmApi>,
        vectors: Arc<dyn VectorIndex>,
        cache: EmbeddingCache,
        defaults: PromptDefaults,
        config: PipelineConfig,
    ) -> Self {
        Self {
            ledger,
            llm,
            vectors,
            cache,
            defaults,
            config,
        }
    }

    /// Run all stages for one task. Cancellation propagates from the
    /// caller's deadline: dropping this future aborts in-flight calls.
    pub async fn run(&self, task: &EvalTask) -> Result<PipelineOutput, PipelineError> {
        // Stage 1: load inputs.
        let cv = self.load_upload(&task.cv_id, UploadKind::Cv)?;
        let project = self.load_upload(&task.project_id, UploadKind::Project)?;

        // Context fields fall back to the configured defaults.
        let job_description = non_empty_or(&task.job_description, &self.defaults.job_description);
        let brief = non_empty_or(&task.study_case_brief, &self.defaults.study_case_brief);
        let rubric = non_empty_or(&task.scoring_rubric, &self.defaults.scoring_rubric);

        // Stage 2: embed + retrieve grounding context.
        let (jd_context, rubric_context) = self.retrieve_context(&job_description, &brief).await?;

        // Stage 3: CV scoring.
        let cv_score: CvScore = self
            .scored_call(
                prompts::CV_SYSTEM_PROMPT,
                prompts::cv_scoring_prompt(&cv.text, &job_description, &jd_context, &rubric_context),
                validate_cv_score,
            )
            .await?;
        debug!(job_id = %task.job_id, rate = cv_score.cv_match_rate, "CV scored");

        // Stage 4: project scoring.
        let project_score: ProjectScore = self
            .scored_call(
                prompts::PROJECT_SYSTEM_PROMPT,
                prompts::project_scoring_prompt(&project.text, &brief, &rubric_context),
                validate_project_score,
            )
            .await?;
        debug!(job_id = %task.job_id, score = project_score.project_score, "Project scored");

        // Stage 5: refinement.
        let summary: SummaryOut = self
            .scored_call(
                prompts::SUMMARY_SYSTEM_PROMPT,
                prompts::summary_prompt(
                    cv_score.cv_match_rate,
                    &cv_score.cv_feedback,
                    project_score.project_score,
                    &project_score.project_feedback,
                ),
                validate_summary,
            )
            .await?;

        Ok(PipelineOutput {
            cv_match_rate: cv_score.cv_match_rate,
            cv_feedback: cv_score.cv_feedback,
            project_score: project_score.project_score,
            project_feedback: project_score.project_feedback,
            overall_summary: summary.overall_summary,
        })
    }

    fn load_upload(
        &self,
        id: &str,
        expected: UploadKind,
    ) -> Result<crate::ledger::Upload, PipelineError> {
        let upload = self
            .ledger
            .get_upload(id)?
            .ok_or_else(|| {
                PipelineError::InvalidArgument(format!("{} upload {id} not found", expected.as_str()))
            })?;
        if upload.kind != expected {
            return Err(PipelineError::InvalidArgument(format!(
                "upload {id} is a {}, expected {}",
                upload.kind.as_str(),
                expected.as_str()
            )));
        }
        Ok(upload)
    }

    async fn retrieve_context(
        &self,
        job_description: &str,
        brief: &str,
    ) -> Result<(String, String), PipelineError> {
        let texts = vec![job_description.to_string(), brief.to_string()];
        let embeddings = tokio::time::timeout(
            self.config.embed_timeout,
            self.cache.get_or_embed(self.llm.as_ref(), &texts),
        )
        .await
        .map_err(|_| AiError::Timeout("embedding stage timed out".into()))??;

        let jd_hits = tokio::time::timeout(
            self.config.retrieval_timeout,
            self.vectors
                .search(JOB_DESCRIPTION_COLLECTION, &embeddings[0], self.config.top_k),
        )
        .await
        .map_err(|_| VectorError::Transport("retrieval stage timed out".into()))??;

        let rubric_hits = tokio::time::timeout(
            self.config.retrieval_timeout,
            self.vectors
                .search(SCORING_RUBRIC_COLLECTION, &embeddings[1], self.config.top_k),
        )
        .await
        .map_err(|_| VectorError::Transport("retrieval stage timed out".into()))??;

        Ok((concat_hits(&jd_hits), concat_hits(&rubric_hits)))
    }

    /// One scoring call with schema validation and stricter re-prompts.
    async fn scored_call<T, F>(
        &self,
        system: &str,
        user_prompt: String,
        validate: F,
    ) -> Result<T, PipelineError>
    where
        T: DeserializeOwned,
        F: Fn(&T) -> Result<(), String>,
    {
        let options = ChatOptions {
            temperature: Some(self.config.temperature),
            json_response: true,
            ..ChatOptions::default()
        };

        let mut prompt = user_prompt.clone();
        let mut last_reason = String::new();
        for attempt in 1..=self.config.schema_retries.max(1) {
            let messages = [ChatMessage::system(system), ChatMessage::user(prompt.as_str())];
            let raw = self.llm.chat(&messages, &options).await?;

            match parse_validated(&raw, &validate) {
                Ok(value) => return Ok(value),
                Err(reason) => {
                    warn!(attempt, reason, "Model response failed validation");
                    last_reason = reason;
                    prompt = format!("{user_prompt}{}", prompts::STRICT_RETRY_SUFFIX);
                }
            }
        }
        Err(PipelineError::SchemaInvalid(last_reason))
    }
}

fn parse_validated<T, F>(raw: &str, validate: &F) -> Result<T, String>
where
    T: DeserializeOwned,
    F: Fn(&T) -> Result<(), String>,
{
    if let Some(marker) = sanitize::find_cot_marker(raw) {
        return Err(format!("chain-of-thought leakage ({marker})"));
    }
    let json = sanitize::extract_json(raw)?;
    let value: T =
        serde_json::from_str(&json).map_err(|e| format!("invalid json: {e}"))?;
    validate(&value)?;
    Ok(value)
}

fn validate_cv_score(score: &CvScore) -> Result<(), String> {
    if !(0.0..=1.0).contains(&score.cv_match_rate) {
        return Err(format!("cv_match_rate {} out of range", score.cv_match_rate));
    }
    validate_sentences("cv_feedback", &score.cv_feedback, 1, 3)
}

fn validate_project_score(score: &ProjectScore) -> Result<(), String> {
    if !(1.0..=10.0).contains(&score.project_score) {
        return Err(format!("project_score {} out of range", score.project_score));
    }
    validate_sentences("project_feedback", &score.project_feedback, 1, 3)
}

fn validate_summary(summary: &SummaryOut) -> Result<(), String> {
    validate_sentences("overall_summary", &summary.overall_summary, 3, 5)
}

fn validate_sentences(field: &str, text: &str, min: usize, max: usize) -> Result<(), String> {
    if text.trim().is_empty() {
        return Err(format!("{field} is empty"));
    }
    let count = sanitize::sentence_count(text);
    if count < min || count > max {
        return Err(format!(
            "{field} has {count} sentences, expected {min}-{max}"
        ));
    }
    Ok(())
}

fn non_empty_or(value: &str, default: &str) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        default.to_string()
    } else {
        trimmed.to_string()
    }
}

fn concat_hits(hits: &[SearchHit]) -> String {
    let mut blocks = Vec::with_capacity(hits.len());
    for hit in hits {
        match hit.payload.get("text").and_then(|t| t.as_str()) {
            Some(text) => blocks.push(text.to_string()),
            None if !hit.payload.is_null() => blocks.push(hit.payload.to_string()),
            None => {}
        }
    }
    blocks.join("\n")
}
