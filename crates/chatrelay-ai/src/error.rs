//! Error types for the model client

use thiserror::Error;

/// Model client error types
#[derive(Error, Debug)]
pub enum AiError {
    #[error("LLM error: {0}")]
    Llm(String),

    #[error("{provider} returned HTTP {status}: {message}")]
    LlmHttp {
        provider: String,
        status: u16,
        message: String,
    },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl AiError {
    /// Rate limits, server errors and connection failures are worth retrying.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::LlmHttp { status, .. } => *status == 429 || *status >= 500,
            Self::Http(e) => e.is_connect() || e.is_timeout(),
            Self::Llm(_) | Self::Json(_) => false,
        }
    }
}

/// Result type alias for model client operations
pub type Result<T> = std::result::Result<T, AiError>;
