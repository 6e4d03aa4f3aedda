//! Deterministic structured generator for tests and offline runs.

use crate::error::ApiError;
use crate::structured::partial_json::{parse_complete, snapshots_from_text};
use crate::structured::{ObjectRequest, ObjectStream, StructuredGenerator};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Arc;

/// Computes a `generate_object` response from the request
pub type ObjectResponder = Arc<dyn Fn(&ObjectRequest) -> Result<Value, ApiError> + Send + Sync>;

const DEFAULT_CHUNK_SIZE: usize = 16;

enum StreamScript {
    Text(String),
    FailAfter { text: String, error: ApiError },
}

#[derive(Default)]
struct StubState {
    streams: VecDeque<StreamScript>,
    objects: VecDeque<Result<Value, ApiError>>,
    stream_requests: Vec<ObjectRequest>,
    object_requests: Vec<ObjectRequest>,
}

/// Replays scripted outputs in order and records every call it receives.
///
/// Stream scripts are whole JSON documents; they are cut into fixed-size chunks and
/// replayed as the sequence of partial snapshots a real model stream would produce.
/// Object calls consume scripted responses first, then fall back to the responder.
pub struct StubGenerator {
    state: Mutex<StubState>,
    responder: Option<ObjectResponder>,
    chunk_size: usize,
}

impl Default for StubGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl StubGenerator {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(StubState::default()),
            responder: None,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    pub fn with_stream_output(self, document: Value) -> Self {
        self.with_stream_text(document.to_string())
    }

    pub fn with_stream_text(self, text: impl Into<String>) -> Self {
        self.state.lock().streams.push_back(StreamScript::Text(text.into()));
        self
    }

    /// Stream the snapshots of `partial_text`, then fail with `error`.
    pub fn with_stream_failure(self, partial_text: impl Into<String>, error: ApiError) -> Self {
        self.state.lock().streams.push_back(StreamScript::FailAfter {
            text: partial_text.into(),
            error,
        });
        self
    }

    pub fn with_object(self, value: Value) -> Self {
        self.state.lock().objects.push_back(Ok(value));
        self
    }

    pub fn with_object_error(self, error: ApiError) -> Self {
        self.state.lock().objects.push_back(Err(error));
        self
    }

    pub fn with_responder<F>(mut self, responder: F) -> Self
    where
        F: Fn(&ObjectRequest) -> Result<Value, ApiError> + Send + Sync + 'static,
    {
        self.responder = Some(Arc::new(responder));
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn stream_calls(&self) -> usize {
        self.state.lock().stream_requests.len()
    }

    pub fn object_calls(&self) -> usize {
        self.state.lock().object_requests.len()
    }

    /// Total model calls of either kind
    pub fn model_calls(&self) -> usize {
        let state = self.state.lock();
        state.stream_requests.len() + state.object_requests.len()
    }

    pub fn stream_requests(&self) -> Vec<ObjectRequest> {
        self.state.lock().stream_requests.clone()
    }

    pub fn object_requests(&self) -> Vec<ObjectRequest> {
        self.state.lock().object_requests.clone()
    }

    fn snapshots(&self, text: &str) -> Vec<Result<Value, ApiError>> {
        let mut snapshots: Vec<Value> = snapshots_from_text(text, self.chunk_size);
        if let Ok(complete) = parse_complete(text) {
            if snapshots.last() != Some(&complete) {
                snapshots.push(complete);
            }
        }
        snapshots.into_iter().map(Ok).collect()
    }
}

#[async_trait]
impl StructuredGenerator for StubGenerator {
    async fn stream_object(&self, request: ObjectRequest) -> Result<ObjectStream, ApiError> {
        let script = {
            let mut state = self.state.lock();
            state.stream_requests.push(request);
            state.streams.pop_front()
        };
        let items = match script {
            Some(StreamScript::Text(text)) => self.snapshots(&text),
            Some(StreamScript::FailAfter { text, error }) => {
                let mut items: Vec<Result<Value, ApiError>> = snapshots_from_text(&text, self.chunk_size)
                    .into_iter()
                    .map(Ok)
                    .collect();
                items.push(Err(error));
                items
            }
            None => {
                return Err(ApiError::ProviderError(
                    "stub generator has no scripted stream output".to_string(),
                ))
            }
        };
        Ok(Box::pin(futures::stream::iter(items)))
    }

    async fn generate_object(&self, request: ObjectRequest) -> Result<Value, ApiError> {
        let scripted = {
            let mut state = self.state.lock();
            state.object_requests.push(request.clone());
            state.objects.pop_front()
        };
        match (scripted, &self.responder) {
            (Some(response), _) => response,
            (None, Some(responder)) => responder(&request),
            (None, None) => Err(ApiError::ProviderError(
                "stub generator has no scripted object response".to_string(),
            )),
        }
    }
}
