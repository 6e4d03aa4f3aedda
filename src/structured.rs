//! Structured generation
//!
//! The one seam through which the pipeline reaches a model: stream a growing JSON
//! document against a schema, or fetch a single schema-conforming object. Everything
//! above this module is model-agnostic; tests substitute [`StubGenerator`].

use crate::error::ApiError;
use crate::provider::{ChatMessage, CompletionOptions, ModelProviderClient};
use crate::schema::validate_instance;
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde_json::Value;
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use tracing::debug;

pub mod partial_json;
pub mod stub;

pub use stub::StubGenerator;

use partial_json::{parse_complete, parse_partial};

/// One structured generation call
#[derive(Debug, Clone)]
pub struct ObjectRequest {
    /// Opaque model identifier; `None` uses the generator's default
    pub model: Option<String>,
    pub schema_name: String,
    pub schema: Value,
    pub messages: Vec<ChatMessage>,
    pub options: CompletionOptions,
}

impl ObjectRequest {
    pub fn new(schema_name: impl Into<String>, schema: Value, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: None,
            schema_name: schema_name.into(),
            schema,
            messages,
            options: CompletionOptions::default(),
        }
    }

    pub fn with_model(mut self, model: Option<String>) -> Self {
        self.model = model;
        self
    }

    pub fn with_options(mut self, options: CompletionOptions) -> Self {
        self.options = options;
        self
    }
}

/// Progressively more complete snapshots of one JSON document
pub type ObjectStream = Pin<Box<dyn Stream<Item = Result<Value, ApiError>> + Send>>;

#[async_trait]
pub trait StructuredGenerator: Send + Sync {
    /// Stream snapshots; the last item is the strictly parsed document.
    async fn stream_object(&self, request: ObjectRequest) -> Result<ObjectStream, ApiError>;

    /// Generate one object that validates against `request.schema`.
    async fn generate_object(&self, request: ObjectRequest) -> Result<Value, ApiError>;
}

/// Structured generation over plain chat-completion providers
pub struct ProviderStructuredGenerator {
    default_client: Arc<dyn ModelProviderClient>,
    models: HashMap<String, Arc<dyn ModelProviderClient>>,
}

impl ProviderStructuredGenerator {
    pub fn new(client: Arc<dyn ModelProviderClient>) -> Self {
        Self {
            default_client: client,
            models: HashMap::new(),
        }
    }

    /// Route requests naming `model` to `client`.
    pub fn with_model(mut self, model: impl Into<String>, client: Arc<dyn ModelProviderClient>) -> Self {
        self.models.insert(model.into(), client);
        self
    }

    fn client_for(&self, model: Option<&str>) -> Arc<dyn ModelProviderClient> {
        model
            .and_then(|name| self.models.get(name))
            .cloned()
            .unwrap_or_else(|| Arc::clone(&self.default_client))
    }

    fn prepare(request: &ObjectRequest) -> (Vec<ChatMessage>, CompletionOptions) {
        let mut messages = Vec::with_capacity(request.messages.len() + 1);
        messages.push(ChatMessage::system(schema_instruction(
            &request.schema_name,
            &request.schema,
        )));
        messages.extend(request.messages.iter().cloned());
        let options = CompletionOptions {
            json_output: true,
            ..request.options.clone()
        };
        (messages, options)
    }
}

fn schema_instruction(schema_name: &str, schema: &Value) -> String {
    let rendered = serde_json::to_string_pretty(schema).unwrap_or_else(|_| schema.to_string());
    format!(
        "Respond with a single JSON value named `{}` that conforms to this JSON Schema. \
         Output only the JSON, with no commentary.\n\n```json\n{}\n```",
        schema_name, rendered
    )
}

fn parse_final(schema_name: &str, text: &str) -> Result<Value, ApiError> {
    parse_complete(text).map_err(|e| ApiError::InvalidStructuredOutput {
        schema_name: schema_name.to_string(),
        message: format!("response is not valid JSON: {}", e),
    })
}

#[async_trait]
impl StructuredGenerator for ProviderStructuredGenerator {
    async fn stream_object(&self, request: ObjectRequest) -> Result<ObjectStream, ApiError> {
        let client = self.client_for(request.model.as_deref());
        let (messages, options) = Self::prepare(&request);
        let schema_name = request.schema_name;

        match client.stream(messages.clone(), options.clone()).await {
            Ok(mut deltas) => {
                let snapshots = async_stream::stream! {
                    let mut buffer = String::new();
                    let mut last: Option<Value> = None;
                    let mut failed = false;
                    while let Some(delta) = deltas.next().await {
                        match delta {
                            Ok(delta) => {
                                buffer.push_str(&delta);
                                if let Some(snapshot) = parse_partial(&buffer) {
                                    if last.as_ref() != Some(&snapshot) {
                                        last = Some(snapshot.clone());
                                        yield Ok(snapshot);
                                    }
                                }
                            }
                            Err(e) => {
                                failed = true;
                                yield Err(e);
                                break;
                            }
                        }
                    }
                    if !failed {
                        match parse_final(&schema_name, &buffer) {
                            Ok(value) => {
                                if last.as_ref() != Some(&value) {
                                    yield Ok(value);
                                }
                            }
                            Err(e) => yield Err(e),
                        }
                    }
                };
                Ok(Box::pin(snapshots))
            }
            Err(ApiError::StreamingUnsupported(provider)) => {
                debug!(
                    provider = %provider,
                    schema_name = %schema_name,
                    "Streaming unsupported, buffering full completion"
                );
                let response = client.complete(messages, options).await?;
                let value = parse_final(&schema_name, &response.content)?;
                Ok(Box::pin(futures::stream::once(async move { Ok(value) })))
            }
            Err(e) => Err(e),
        }
    }

    async fn generate_object(&self, request: ObjectRequest) -> Result<Value, ApiError> {
        let client = self.client_for(request.model.as_deref());
        let (messages, options) = Self::prepare(&request);
        let response = client.complete(messages, options).await?;
        let value = parse_final(&request.schema_name, &response.content)?;
        validate_instance(&request.schema, &value).map_err(|errors| {
            ApiError::InvalidStructuredOutput {
                schema_name: request.schema_name.clone(),
                message: errors.join("; "),
            }
        })?;
        Ok(value)
    }
}
