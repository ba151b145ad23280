//! Error types for penwright-core

use std::time::Duration;

use thiserror::Error;

use crate::request::AttemptRecord;
use crate::validation::FailureReason;

/// Result type alias using penwright-core's error type
pub type Result<T> = std::result::Result<T, LlmError>;

/// Errors surfaced by the reliability layer
#[derive(Debug, Error)]
pub enum LlmError {
    /// Unknown model or provider, missing credential, malformed configuration.
    /// Never retried.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Network, HTTP status or payload decoding failure
    #[error("transport error from {provider}: {message}")]
    Transport { provider: String, message: String },

    /// The call succeeded but carried no usable text
    #[error("empty response from model '{model}'")]
    EmptyResponse { model: String },

    /// The content-quality gate rejected the text
    #[error("response validation failed: {0}")]
    Validation(FailureReason),

    /// The post-processor raised or returned nothing
    #[error("post-processing failed: {0}")]
    PostProcess(String),

    /// Every configured model used up its retry budget
    #[error(
        "all models failed for stage '{stage}' after {attempts_per_model} attempts each; tried models: {models:?}"
    )]
    Exhausted {
        stage: String,
        models: Vec<String>,
        attempts_per_model: u32,
        attempts: Vec<AttemptRecord>,
    },

    /// The caller's deadline elapsed before the invocation finished
    #[error("stage '{stage}' did not finish within {timeout:?}")]
    DeadlineExceeded { stage: String, timeout: Duration },
}

impl LlmError {
    pub(crate) fn transport(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transport {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Whether the orchestrator may try again after this error
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Transport { .. }
                | Self::EmptyResponse { .. }
                | Self::Validation(_)
                | Self::PostProcess(_)
        )
    }

    /// Attempt log attached to a terminal exhaustion, empty otherwise
    pub fn attempts(&self) -> &[AttemptRecord] {
        match self {
            Self::Exhausted { attempts, .. } => attempts,
            _ => &[],
        }
    }
}
