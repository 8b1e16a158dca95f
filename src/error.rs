use thiserror::Error;

use crate::anthropic::AnthropicError;
use crate::state_machine::InvalidTransition;

pub type Result<T> = std::result::Result<T, RcaError>;

#[derive(Debug, Error)]
pub enum RcaError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Queue unavailable: {0}")]
    QueueUnavailable(String),

    #[error("Result store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("{capability} agent failed: {message}")]
    CapabilityFailure { capability: String, message: String },

    #[error("Report generation failed: {0}")]
    GenerationFailure(String),

    #[error("Job not found: {0}")]
    NotFound(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error(transparent)]
    Transition(#[from] InvalidTransition),

    #[error("Anthropic API error: {0}")]
    Anthropic(#[from] AnthropicError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl RcaError {
    pub fn capability(capability: impl Into<String>, message: impl Into<String>) -> Self {
        Self::CapabilityFailure {
            capability: capability.into(),
            message: message.into(),
        }
    }

    /// Infrastructure errors are retried by the worker's outer loop instead of
    /// being recorded on the job.
    pub fn is_infrastructure(&self) -> bool {
        matches!(
            self,
            RcaError::QueueUnavailable(_) | RcaError::StoreUnavailable(_) | RcaError::Sqlite(_)
        )
    }
}
