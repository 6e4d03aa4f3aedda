//! HTTP clients for the supported providers.

use super::sse::SseDecoder;
use super::{
    ChatMessage, CompletionOptions, CompletionResponse, CompletionStream, MessageRole,
    ModelProviderClient, TokenUsage,
};
use crate::error::ApiError;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;

const PROVIDER_HTTP_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const PROVIDER_HTTP_REQUEST_TIMEOUT: Duration = Duration::from_secs(300);
const ANTHROPIC_DEFAULT_MAX_TOKENS: u32 = 8192;

fn build_provider_http_client() -> Result<Client, ApiError> {
    Client::builder()
        .connect_timeout(PROVIDER_HTTP_CONNECT_TIMEOUT)
        .timeout(PROVIDER_HTTP_REQUEST_TIMEOUT)
        .build()
        .map_err(|e| ApiError::ProviderError(format!("Failed to create HTTP client: {}", e)))
}

// Helper function to map HTTP errors to ApiError
fn map_http_error(error: reqwest::Error) -> ApiError {
    if let Some(status) = error.status() {
        status_error(status.as_u16(), error.to_string())
    } else if error.is_timeout() {
        ApiError::ProviderRequestFailed(format!("Request timeout: {}", error))
    } else if error.is_connect() {
        ApiError::ProviderRequestFailed(format!("Connection error: {}", error))
    } else {
        ApiError::ProviderError(format!("HTTP error: {}", error))
    }
}

fn status_error(status: u16, detail: String) -> ApiError {
    match status {
        401 => ApiError::ProviderAuthFailed(format!("Authentication failed: {}", detail)),
        429 => ApiError::ProviderRateLimit(format!("Rate limit exceeded: {}", detail)),
        404 => ApiError::ProviderModelNotFound(format!("Model not found: {}", detail)),
        _ => ApiError::ProviderRequestFailed(format!(
            "Request failed with status {}: {}",
            status, detail
        )),
    }
}

async fn ensure_success(response: Response) -> Result<Response, ApiError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status().as_u16();
    let error_text = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());
    Err(status_error(status, error_text))
}

// OpenAI-compatible API request/response structures
#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<OpenAIMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<serde_json::Value>,
    stream: bool,
}

#[derive(Serialize, Deserialize)]
struct OpenAIMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    model: String,
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: OpenAIMessage,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

#[derive(Deserialize)]
struct StreamChunk {
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Deserialize)]
struct StreamDelta {
    content: Option<String>,
}

/// Client for OpenAI and OpenAI-compatible local servers
pub struct OpenAiCompatibleClient {
    client: Client,
    provider_name: &'static str,
    model: String,
    api_key: Option<String>,
    base_url: String,
}

impl OpenAiCompatibleClient {
    pub fn openai(
        model: String,
        api_key: String,
        base_url: Option<String>,
    ) -> Result<Self, ApiError> {
        Ok(Self {
            client: build_provider_http_client()?,
            provider_name: "openai",
            model,
            api_key: Some(api_key),
            base_url: base_url.unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
        })
    }

    pub fn local(
        model: String,
        endpoint: String,
        api_key: Option<String>,
    ) -> Result<Self, ApiError> {
        Ok(Self {
            client: build_provider_http_client()?,
            provider_name: "local",
            model,
            api_key,
            base_url: endpoint.trim_end_matches('/').to_string(),
        })
    }

    fn request_body<'a>(
        &'a self,
        messages: Vec<ChatMessage>,
        options: CompletionOptions,
        stream: bool,
    ) -> ChatCompletionRequest<'a> {
        ChatCompletionRequest {
            model: &self.model,
            messages: messages
                .into_iter()
                .map(|msg| OpenAIMessage {
                    role: msg.role.as_str().to_string(),
                    content: msg.content,
                })
                .collect(),
            temperature: options.temperature,
            max_tokens: options.max_tokens,
            top_p: options.top_p,
            stop: options.stop,
            response_format: options
                .json_output
                .then(|| json!({ "type": "json_object" })),
            stream,
        }
    }

    async fn post(&self, body: &ChatCompletionRequest<'_>) -> Result<Response, ApiError> {
        let url = format!("{}/chat/completions", self.base_url);
        let mut request = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(body);
        if let Some(api_key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {}", api_key));
        }
        let response = request.send().await.map_err(map_http_error)?;
        ensure_success(response).await
    }
}

#[async_trait]
impl ModelProviderClient for OpenAiCompatibleClient {
    async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        options: CompletionOptions,
    ) -> Result<CompletionResponse, ApiError> {
        let body = self.request_body(messages, options, false);
        let response = self.post(&body).await?;

        let completion: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| ApiError::ProviderError(format!("Failed to parse response: {}", e)))?;

        let choice = completion
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ApiError::ProviderError("No choices in response".to_string()))?;

        let usage = completion
            .usage
            .map(|u| TokenUsage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
                total_tokens: u.total_tokens,
            })
            .unwrap_or_default();

        Ok(CompletionResponse {
            content: choice.message.content,
            model: completion.model,
            usage,
            finish_reason: choice.finish_reason,
        })
    }

    async fn stream(
        &self,
        messages: Vec<ChatMessage>,
        options: CompletionOptions,
    ) -> Result<CompletionStream, ApiError> {
        let body = self.request_body(messages, options, true);
        let response = self.post(&body).await?;
        let mut bytes = response.bytes_stream();

        let deltas = async_stream::stream! {
            let mut decoder = SseDecoder::default();
            'read: while let Some(chunk) = bytes.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        yield Err(map_http_error(e));
                        break 'read;
                    }
                };
                for data in decoder.push(&chunk) {
                    if data == "[DONE]" {
                        break 'read;
                    }
                    let parsed: StreamChunk = match serde_json::from_str(&data) {
                        Ok(parsed) => parsed,
                        Err(e) => {
                            yield Err(ApiError::ProviderError(format!(
                                "Failed to parse stream chunk: {}",
                                e
                            )));
                            break 'read;
                        }
                    };
                    for choice in parsed.choices {
                        if let Some(content) = choice.delta.content.filter(|c| !c.is_empty()) {
                            yield Ok(content);
                        }
                    }
                }
            }
        };
        Ok(Box::pin(deltas))
    }

    fn provider_name(&self) -> &str {
        self.provider_name
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// Anthropic messages API client
pub struct AnthropicClient {
    client: Client,
    model: String,
    api_key: String,
    base_url: String,
}

impl AnthropicClient {
    pub fn new(model: String, api_key: String, base_url: Option<String>) -> Result<Self, ApiError> {
        Ok(Self {
            client: build_provider_http_client()?,
            model,
            api_key,
            base_url: base_url.unwrap_or_else(|| "https://api.anthropic.com/v1".to_string()),
        })
    }
}

#[async_trait]
impl ModelProviderClient for AnthropicClient {
    async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        options: CompletionOptions,
    ) -> Result<CompletionResponse, ApiError> {
        // System turns travel separately in the Anthropic API
        let system: Vec<String> = messages
            .iter()
            .filter(|m| m.role == MessageRole::System)
            .map(|m| m.content.clone())
            .collect();
        let turns: Vec<serde_json::Value> = messages
            .iter()
            .filter(|m| m.role != MessageRole::System)
            .map(|m| json!({ "role": m.role.as_str(), "content": m.content }))
            .collect();

        let mut body = json!({
            "model": self.model,
            "messages": turns,
            "max_tokens": options.max_tokens.unwrap_or(ANTHROPIC_DEFAULT_MAX_TOKENS),
        });
        if !system.is_empty() {
            body["system"] = json!(system.join("\n\n"));
        }
        if let Some(temperature) = options.temperature {
            body["temperature"] = json!(temperature.min(1.0));
        }
        if let Some(top_p) = options.top_p {
            body["top_p"] = json!(top_p);
        }
        if let Some(stop) = options.stop {
            body["stop_sequences"] = json!(stop);
        }

        let url = format!("{}/messages", self.base_url);
        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(map_http_error)?;
        let response = ensure_success(response).await?;

        #[derive(Deserialize)]
        struct AnthropicResponse {
            model: String,
            content: Vec<AnthropicContent>,
            stop_reason: Option<String>,
            usage: AnthropicUsage,
        }
        #[derive(Deserialize)]
        struct AnthropicContent {
            #[serde(default)]
            text: String,
        }
        #[derive(Deserialize)]
        struct AnthropicUsage {
            input_tokens: u32,
            output_tokens: u32,
        }

        let parsed: AnthropicResponse = response
            .json()
            .await
            .map_err(|e| ApiError::ProviderError(format!("Failed to parse response: {}", e)))?;

        let content: String = parsed.content.into_iter().map(|c| c.text).collect();
        Ok(CompletionResponse {
            content,
            model: parsed.model,
            usage: TokenUsage {
                prompt_tokens: parsed.usage.input_tokens,
                completion_tokens: parsed.usage.output_tokens,
                total_tokens: parsed.usage.input_tokens + parsed.usage.output_tokens,
            },
            finish_reason: parsed.stop_reason,
        })
    }

    async fn stream(
        &self,
        _messages: Vec<ChatMessage>,
        _options: CompletionOptions,
    ) -> Result<CompletionStream, ApiError> {
        Err(ApiError::StreamingUnsupported("anthropic".to_string()))
    }

    fn provider_name(&self) -> &str {
        "anthropic"
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_map_to_specific_errors() {
        assert!(matches!(
            status_error(401, "no".into()),
            ApiError::ProviderAuthFailed(_)
        ));
        assert!(matches!(
            status_error(429, "slow".into()),
            ApiError::ProviderRateLimit(_)
        ));
        assert!(matches!(
            status_error(404, "gone".into()),
            ApiError::ProviderModelNotFound(_)
        ));
        assert!(matches!(
            status_error(500, "boom".into()),
            ApiError::ProviderRequestFailed(_)
        ));
    }

    #[test]
    fn json_output_sets_response_format() {
        let client =
            OpenAiCompatibleClient::openai("gpt-4o".into(), "key".into(), None).unwrap();
        let options = CompletionOptions {
            json_output: true,
            ..CompletionOptions::default()
        };
        let body = client.request_body(vec![ChatMessage::user("hi")], options, true);
        let encoded = serde_json::to_value(&body).unwrap();
        assert_eq!(encoded["response_format"]["type"], "json_object");
        assert_eq!(encoded["stream"], true);
        assert_eq!(encoded["messages"][0]["role"], "user");
    }

    #[test]
    fn local_client_trims_trailing_slash() {
        let client =
            OpenAiCompatibleClient::local("m".into(), "http://localhost:8080/v1/".into(), None)
                .unwrap();
        assert_eq!(client.base_url, "http://localhost:8080/v1");
    }
}
