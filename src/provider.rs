//! Model Provider Abstraction
//!
//! Unified chat-completion interface over the supported LLM providers (OpenAI,
//! Anthropic, local OpenAI-compatible servers). The structured generation layer is
//! built on top of this trait and never talks HTTP itself.

use crate::error::ApiError;
use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::sync::Arc;

pub mod clients;
pub mod sse;

pub use clients::{AnthropicClient, OpenAiCompatibleClient};

/// Chat message role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::System => "system",
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        }
    }
}

/// Chat message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }
}

/// Completion options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionOptions {
    pub temperature: Option<f32>, // 0.0-2.0, default: 1.0
    pub max_tokens: Option<u32>,
    pub top_p: Option<f32>,
    pub stop: Option<Vec<String>>,
    /// Ask the provider for a JSON object response where it supports that mode
    #[serde(default)]
    pub json_output: bool,
}

impl Default for CompletionOptions {
    fn default() -> Self {
        Self {
            temperature: Some(1.0),
            max_tokens: None,
            top_p: None,
            stop: None,
            json_output: false,
        }
    }
}

/// Token usage information
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Completion response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionResponse {
    pub content: String,
    pub model: String,
    pub usage: TokenUsage,
    pub finish_reason: Option<String>,
}

/// Streaming completion type; each item is a text delta
pub type CompletionStream = Pin<Box<dyn Stream<Item = Result<String, ApiError>> + Send>>;

/// Model provider client trait
#[async_trait]
pub trait ModelProviderClient: Send + Sync {
    /// Generate a completion from a list of messages
    async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        options: CompletionOptions,
    ) -> Result<CompletionResponse, ApiError>;

    /// Generate a streaming completion.
    ///
    /// Providers without streaming return `ApiError::StreamingUnsupported`.
    async fn stream(
        &self,
        messages: Vec<ChatMessage>,
        options: CompletionOptions,
    ) -> Result<CompletionStream, ApiError>;

    fn provider_name(&self) -> &str;

    fn model_name(&self) -> &str;
}

/// Supported provider kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderType {
    OpenAI,
    Anthropic,
    #[serde(alias = "local_custom")]
    Local,
}

impl ProviderType {
    fn api_key_env_var(&self) -> Option<&'static str> {
        match self {
            ProviderType::OpenAI => Some("OPENAI_API_KEY"),
            ProviderType::Anthropic => Some("ANTHROPIC_API_KEY"),
            ProviderType::Local => None,
        }
    }
}

/// Provider configuration as it appears in the config file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub provider_type: ProviderType,
    pub model: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub default_options: CompletionOptions,
}

impl ProviderConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.model.trim().is_empty() {
            return Err("Model cannot be empty".to_string());
        }
        if let Some(endpoint) = &self.endpoint {
            if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
                return Err(format!(
                    "Endpoint must start with http:// or https://: {}",
                    endpoint
                ));
            }
        }
        if self.provider_type == ProviderType::Local && self.endpoint.is_none() {
            return Err("Local providers require an endpoint".to_string());
        }
        Ok(())
    }

    /// Configured key, else the provider's conventional environment variable.
    pub fn resolve_api_key(&self) -> Option<String> {
        self.api_key.clone().or_else(|| {
            self.provider_type
                .api_key_env_var()
                .and_then(|var| std::env::var(var).ok())
                .filter(|key| !key.trim().is_empty())
        })
    }
}

/// Builds provider clients from configuration
pub struct ProviderFactory;

impl ProviderFactory {
    pub fn create_client(
        config: &ProviderConfig,
    ) -> Result<Arc<dyn ModelProviderClient>, ApiError> {
        config.validate().map_err(ApiError::ConfigError)?;
        let api_key = config.resolve_api_key();
        match config.provider_type {
            ProviderType::OpenAI => {
                let api_key = api_key.ok_or_else(|| {
                    ApiError::ProviderNotConfigured(
                        "OpenAI provider requires api_key or OPENAI_API_KEY".to_string(),
                    )
                })?;
                Ok(Arc::new(OpenAiCompatibleClient::openai(
                    config.model.clone(),
                    api_key,
                    config.endpoint.clone(),
                )?))
            }
            ProviderType::Anthropic => {
                let api_key = api_key.ok_or_else(|| {
                    ApiError::ProviderNotConfigured(
                        "Anthropic provider requires api_key or ANTHROPIC_API_KEY".to_string(),
                    )
                })?;
                Ok(Arc::new(AnthropicClient::new(
                    config.model.clone(),
                    api_key,
                    config.endpoint.clone(),
                )?))
            }
            ProviderType::Local => {
                let endpoint = config.endpoint.clone().ok_or_else(|| {
                    ApiError::ProviderNotConfigured("Local provider requires endpoint".to_string())
                })?;
                Ok(Arc::new(OpenAiCompatibleClient::local(
                    config.model.clone(),
                    endpoint,
                    api_key,
                )?))
            }
        }
    }
}

// Mock provider for testing
#[cfg(test)]
pub struct MockProvider {
    responses: Vec<String>,
    chunks: Option<Vec<String>>,
    current: std::sync::Arc<std::sync::Mutex<usize>>,
    received: std::sync::Arc<std::sync::Mutex<Vec<Vec<ChatMessage>>>>,
}

#[cfg(test)]
impl MockProvider {
    pub fn new(responses: Vec<String>) -> Self {
        Self {
            responses,
            chunks: None,
            current: std::sync::Arc::new(std::sync::Mutex::new(0)),
            received: std::sync::Arc::new(std::sync::Mutex::new(Vec::new())),
        }
    }

    /// Mock that streams the given deltas instead of reporting streaming as unsupported
    pub fn streaming(chunks: Vec<String>) -> Self {
        let mut mock = Self::new(vec![chunks.concat()]);
        mock.chunks = Some(chunks);
        mock
    }

    pub fn received(&self) -> Vec<Vec<ChatMessage>> {
        self.received.lock().unwrap().clone()
    }
}

#[cfg(test)]
#[async_trait]
impl ModelProviderClient for MockProvider {
    async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        _options: CompletionOptions,
    ) -> Result<CompletionResponse, ApiError> {
        self.received.lock().unwrap().push(messages);
        let mut idx = self.current.lock().unwrap();
        let response = if *idx < self.responses.len() {
            self.responses[*idx].clone()
        } else {
            "Mock response".to_string()
        };
        *idx += 1;

        Ok(CompletionResponse {
            content: response,
            model: "mock-model".to_string(),
            usage: TokenUsage {
                prompt_tokens: 10,
                completion_tokens: 20,
                total_tokens: 30,
            },
            finish_reason: Some("stop".to_string()),
        })
    }

    async fn stream(
        &self,
        messages: Vec<ChatMessage>,
        _options: CompletionOptions,
    ) -> Result<CompletionStream, ApiError> {
        self.received.lock().unwrap().push(messages);
        match &self.chunks {
            Some(chunks) => {
                let items: Vec<Result<String, ApiError>> =
                    chunks.iter().cloned().map(Ok).collect();
                Ok(Box::pin(futures::stream::iter(items)))
            }
            None => Err(ApiError::StreamingUnsupported("mock".to_string())),
        }
    }

    fn provider_name(&self) -> &str {
        "mock"
    }

    fn model_name(&self) -> &str {
        "mock-model"
    }
}
