use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AiError {
    #[error("upstream timeout: {0}")]
    Timeout(String),

    #[error("upstream rate limit: {message}")]
    RateLimited {
        message: String,
        /// Provider hint from a Retry-After header, when present.
        retry_after: Option<Duration>,
    },

    #[error("provider error (status {status}): {message}")]
    Provider { status: u16, message: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("no models available")]
    NoModelsAvailable,

    #[error("invalid provider response: {0}")]
    InvalidResponse(String),
}

impl AiError {
    /// Transient errors worth retrying with backoff: timeouts, transport
    /// failures, 5xx and rate limits (the latter until the budget runs out).
    pub fn is_retriable(&self) -> bool {
        match self {
            AiError::Timeout(_) | AiError::Transport(_) => true,
            AiError::RateLimited { .. } => true,
            AiError::Provider { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Hard per-model failures that justify falling back to the next model
    /// rather than surfacing: the model is gone, gated or rejecting the
    /// request shape.
    pub fn is_model_fallback(&self) -> bool {
        match self {
            AiError::Provider { status, .. } => (400..500).contains(status) && *status != 429,
            AiError::InvalidResponse(_) => true,
            _ => false,
        }
    }
}
