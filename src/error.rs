//! Error types for activity generation.
//!
//! `ApiError` covers the model-provider and configuration plumbing; `GenerationError`
//! is the pipeline taxonomy (configuration failures, per-slot failures, and provider
//! failures bubbling up from the generation loop).

use thiserror::Error;

/// Provider and configuration errors
#[derive(Debug, Clone, Error)]
pub enum ApiError {
    #[error("Provider error: {0}")]
    ProviderError(String),

    #[error("Provider not configured: {0}")]
    ProviderNotConfigured(String),

    #[error("Provider request failed: {0}")]
    ProviderRequestFailed(String),

    #[error("Provider authentication failed: {0}")]
    ProviderAuthFailed(String),

    #[error("Provider rate limit exceeded: {0}")]
    ProviderRateLimit(String),

    #[error("Provider model not found: {0}")]
    ProviderModelNotFound(String),

    #[error("Streaming not supported by provider: {0}")]
    StreamingUnsupported(String),

    #[error("Structured output did not match schema '{schema_name}': {message}")]
    InvalidStructuredOutput { schema_name: String, message: String },

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl From<config::ConfigError> for ApiError {
    fn from(err: config::ConfigError) -> Self {
        ApiError::ConfigError(err.to_string())
    }
}

/// Errors raised by the generation pipeline
#[derive(Debug, Clone, Error)]
pub enum GenerationError {
    /// No registered plugin survives the request's type constraints.
    #[error("{}", no_valid_plugins_message(*slot))]
    NoValidPlugins { slot: Option<usize> },

    #[error("Could not resolve a subject for the generation request: {0}")]
    MissingSubject(String),

    #[error("No activity was generated")]
    NoActivityGenerated,

    #[error("Invalid activity: {0}")]
    InvalidActivity(String),

    #[error("Evaluation failed for '{activity_type}': {message}")]
    Evaluation {
        activity_type: String,
        message: String,
    },

    #[error("Post-processing failed for '{activity_type}': {message}")]
    PostProcess {
        activity_type: String,
        message: String,
    },

    #[error("Grading failed for '{activity_type}': {message}")]
    Grading {
        activity_type: String,
        message: String,
    },

    #[error("Collaborator '{collaborator}' failed: {message}")]
    Collaborator {
        collaborator: &'static str,
        message: String,
    },

    #[error(transparent)]
    Provider(#[from] ApiError),
}

fn no_valid_plugins_message(slot: Option<usize>) -> String {
    match slot {
        Some(index) => format!("No valid activity type plugins for sequence slot {}", index),
        None => "No valid activity type plugins for this request".to_string(),
    }
}

impl GenerationError {
    /// Configuration errors abort the whole request and are never retried.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            GenerationError::NoValidPlugins { .. } | GenerationError::MissingSubject(_)
        )
    }

    pub fn collaborator(collaborator: &'static str, err: impl std::fmt::Display) -> Self {
        GenerationError::Collaborator {
            collaborator,
            message: err.to_string(),
        }
    }
}
