//! Inbound and outbound transformer contracts
//!
//! An [`Inbound`] speaks the caller's wire format: it parses requests into
//! the unified model and renders unified responses, chunks and errors back.
//! An [`Outbound`] speaks a backend's wire format: it lowers unified
//! requests into [`HttpRequest`]s and lifts backend responses and events.

pub mod anthropic;
pub mod openai;
pub mod openrouter;

use std::sync::Arc;

use bytes::{BufMut, Bytes, BytesMut};
use http::{HeaderValue, StatusCode};
use secrecy::SecretString;
use serde::Serialize;
use serde::de::DeserializeOwned;
use switchyard_config::ChannelConfig;
use url::Url;

pub use anthropic::{AnthropicInbound, AnthropicOutbound};
pub use openai::{OpenAiInbound, OpenAiOutbound};
pub use openrouter::{OpenRouterInbound, OpenRouterOutbound};

use crate::error::LlmError;
use crate::executor::{Executor, HttpRequest, HttpResponse, RawEvent};
use crate::stream::BoxStream;
use crate::types::{ApiFormat, CompletionRequest, CompletionResponse, DONE_MARKER, ResponseError, Usage};

/// One server-sent event to write to the caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    /// `event:` field, omitted when absent
    pub event: Option<String>,
    /// `data:` payload
    pub data: String,
}

impl SseEvent {
    /// Unnamed event
    pub fn data(data: impl Into<String>) -> Self {
        Self {
            event: None,
            data: data.into(),
        }
    }

    /// Named event
    pub fn named(event: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            event: Some(event.into()),
            data: data.into(),
        }
    }

    /// `data: [DONE]`
    pub fn done() -> Self {
        Self::data(DONE_MARKER)
    }

    /// Event whose payload is `value` as JSON
    pub fn json(event: Option<&str>, value: &impl Serialize) -> Result<Self, LlmError> {
        let data = serde_json::to_string(value).map_err(|e| LlmError::Transform(format!("failed to encode event: {e}")))?;
        Ok(Self {
            event: event.map(str::to_owned),
            data,
        })
    }

    /// Whether this is the `[DONE]` terminator
    pub fn is_done(&self) -> bool {
        self.event.is_none() && self.data == DONE_MARKER
    }

    /// Wire encoding, terminated by a blank line
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.data.len() + 32);
        if let Some(event) = &self.event {
            buf.put_slice(b"event: ");
            buf.put_slice(event.as_bytes());
            buf.put_u8(b'\n');
        }
        for line in self.data.split('\n') {
            buf.put_slice(b"data: ");
            buf.put_slice(line.as_bytes());
            buf.put_u8(b'\n');
        }
        buf.put_u8(b'\n');
        buf.freeze()
    }
}

/// Result of folding a captured backend stream
#[derive(Debug, Clone)]
pub struct AggregatedResponse {
    /// JSON of the complete unified response
    pub body: Bytes,
    /// Usage reported by the stream
    pub usage: Option<Usage>,
}

/// Caller-facing side of a pipeline
pub trait Inbound: Send + Sync {
    /// Wire format this transformer speaks
    fn format(&self) -> ApiFormat;

    /// Parse and validate a request body
    ///
    /// Fails with [`LlmError::InvalidRequest`] when the body does not parse,
    /// names no model, carries no messages, or misses a field the format
    /// makes mandatory.
    fn transform_request(&self, body: &[u8]) -> Result<CompletionRequest, LlmError>;

    /// Render a complete response
    fn transform_response(&self, response: &CompletionResponse) -> Result<Bytes, LlmError>;

    /// Render one chunk without regard to the chunks before it
    fn transform_stream_chunk(&self, chunk: &CompletionResponse) -> Result<Vec<SseEvent>, LlmError>;

    /// Render a chunk stream, keeping whatever state the format needs
    fn transform_stream(&self, stream: BoxStream<CompletionResponse>) -> BoxStream<SseEvent>;

    /// Render an error in this format's envelope
    fn transform_error(&self, error: &ResponseError) -> HttpResponse;
}

/// Backend-facing side of a pipeline
pub trait Outbound: Send + Sync {
    /// Wire format of the backend
    fn format(&self) -> ApiFormat;

    /// Name of the channel requests currently go to
    fn channel_name(&self) -> &str;

    /// Lower a unified request into a backend HTTP call
    fn transform_request(&self, request: &CompletionRequest) -> Result<HttpRequest, LlmError>;

    /// Lift a complete backend response
    fn transform_response(&self, response: &HttpResponse) -> Result<CompletionResponse, LlmError>;

    /// Lift backend events into unified chunks
    ///
    /// A stream the backend ends cleanly always finishes with exactly one
    /// done sentinel, whether or not the backend sent its own end marker.
    /// A stream cut by an error gets no sentinel.
    fn transform_stream(&self, stream: BoxStream<RawEvent>) -> BoxStream<CompletionResponse>;

    /// Fold captured backend events into one response
    fn aggregate_stream_chunks(&self, events: &[RawEvent]) -> Result<AggregatedResponse, LlmError>;

    /// Normalize an execution error, reading the backend's error body when there is one
    fn transform_error(&self, error: &LlmError) -> ResponseError;

    /// Executor substitution, when this backend needs one
    fn executor_customizer(&self) -> Option<&dyn CustomizeExecutor> {
        None
    }

    /// Channel failover, when this backend has alternative channels
    fn channel_failover(&self) -> Option<&dyn ChannelFailover> {
        None
    }
}

/// Replaces the pipeline's default executor
pub trait CustomizeExecutor: Send + Sync {
    /// Executor to use instead of `default`
    fn customize_executor(&self, default: Arc<dyn Executor>) -> Arc<dyn Executor>;
}

/// Yields copies of an outbound bound to alternative channels
pub trait ChannelFailover: Send + Sync {
    /// Number of channels
    fn channel_count(&self) -> usize;

    /// Outbound bound to channel `index`, `None` past the last channel
    fn channel(&self, index: usize) -> Option<Arc<dyn Outbound>>;
}

/// A backend endpoint and its credentials
#[derive(Debug, Clone)]
pub struct Channel {
    /// Channel name, used in logs
    pub name: String,
    /// API base URL
    pub base_url: Url,
    /// API key
    pub api_key: Option<SecretString>,
}

impl Channel {
    /// Channel without credentials
    pub fn new(name: impl Into<String>, base_url: Url) -> Self {
        Self {
            name: name.into(),
            base_url,
            api_key: None,
        }
    }

    /// Attach an API key
    #[must_use]
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(SecretString::from(api_key.into()));
        self
    }

    /// Build from configuration, falling back to `default_base_url`
    pub fn from_config(config: &ChannelConfig, default_base_url: &str) -> Result<Self, LlmError> {
        let base_url = match &config.base_url {
            Some(url) => url.clone(),
            None => Url::parse(default_base_url)
                .map_err(|e| LlmError::Internal(anyhow::anyhow!("invalid default base URL '{default_base_url}': {e}")))?,
        };

        Ok(Self {
            name: config.name.clone(),
            base_url,
            api_key: config.api_key.clone(),
        })
    }

    /// `path` appended to the base URL
    pub fn endpoint(&self, path: &str) -> Result<Url, LlmError> {
        let base = self.base_url.as_str().trim_end_matches('/');
        Url::parse(&format!("{base}/{}", path.trim_start_matches('/')))
            .map_err(|e| LlmError::Transform(format!("invalid endpoint for channel '{}': {e}", self.name)))
    }
}

/// Ordered channels of one backend plus the one in use
#[derive(Debug, Clone)]
pub(crate) struct ChannelSet {
    channels: Arc<[Channel]>,
    active: usize,
}

impl ChannelSet {
    pub(crate) fn new(channels: Vec<Channel>) -> Self {
        Self {
            channels: channels.into(),
            active: 0,
        }
    }

    pub(crate) fn from_config(configs: &[ChannelConfig], default_base_url: &str) -> Result<Self, LlmError> {
        let channels = configs
            .iter()
            .map(|config| Channel::from_config(config, default_base_url))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(channels))
    }

    pub(crate) fn current(&self) -> Result<&Channel, LlmError> {
        self.channels
            .get(self.active)
            .ok_or_else(|| LlmError::Internal(anyhow::anyhow!("backend has no channel configured")))
    }

    pub(crate) fn name(&self) -> &str {
        self.channels.get(self.active).map_or("", |channel| channel.name.as_str())
    }

    pub(crate) fn len(&self) -> usize {
        self.channels.len()
    }

    /// Same channels with `index` active
    pub(crate) fn at(&self, index: usize) -> Option<Self> {
        (index < self.channels.len()).then(|| Self {
            channels: Arc::clone(&self.channels),
            active: index,
        })
    }
}

pub(crate) fn parse_body<T: DeserializeOwned>(body: &[u8]) -> Result<T, LlmError> {
    serde_json::from_slice(body).map_err(|e| LlmError::InvalidRequest(format!("malformed request body: {e}")))
}

/// Checks every inbound applies after parsing
pub(crate) fn validate(request: &CompletionRequest) -> Result<(), LlmError> {
    if request.model.trim().is_empty() {
        return Err(LlmError::InvalidRequest("model is required".to_owned()));
    }
    if request.messages.is_empty() {
        return Err(LlmError::InvalidRequest("messages must not be empty".to_owned()));
    }
    Ok(())
}

pub(crate) fn to_json(value: &impl Serialize) -> Result<Bytes, LlmError> {
    serde_json::to_vec(value)
        .map(Bytes::from)
        .map_err(|e| LlmError::Transform(format!("failed to encode body: {e}")))
}

pub(crate) fn parse_response<T: DeserializeOwned>(response: &HttpResponse) -> Result<T, LlmError> {
    serde_json::from_slice(&response.body).map_err(|e| LlmError::Transform(format!("failed to parse response: {e}")))
}

/// Error body rendered with the error's status and request id
pub(crate) fn error_response(error: &ResponseError, envelope: &impl Serialize) -> HttpResponse {
    let status = StatusCode::from_u16(error.status).unwrap_or(StatusCode::BAD_GATEWAY);
    let body = serde_json::to_vec(envelope).map(Bytes::from).unwrap_or_default();
    let mut response = HttpResponse::json(status, body);

    if let Some(id) = error.request_id.as_deref()
        && let Ok(value) = HeaderValue::from_str(id)
    {
        response.headers.insert("request-id", value);
    }

    response
}

/// Unified error for `error`, reading an upstream body with `read_body`
pub(crate) fn normalize_error(error: &LlmError, read_body: fn(&str, ResponseError) -> ResponseError) -> ResponseError {
    let fallback = ResponseError::from_error(error);
    match error {
        LlmError::Upstream { message, .. } => read_body(message, fallback),
        _ => fallback,
    }
}

/// Check that streaming `raw` through `outbound` and folding the chunks
/// gives the same turn as aggregating `raw` directly
#[cfg(test)]
pub(crate) async fn assert_stream_matches_aggregate(outbound: &dyn Outbound, raw: Vec<RawEvent>) {
    use futures_util::{StreamExt, stream};

    let aggregated = outbound.aggregate_stream_chunks(&raw).unwrap();
    let aggregated: CompletionResponse = serde_json::from_slice(&aggregated.body).unwrap();

    let chunks: Vec<CompletionResponse> = outbound
        .transform_stream(Box::pin(stream::iter(raw.into_iter().map(Ok::<_, LlmError>))))
        .map(Result::unwrap)
        .collect()
        .await;
    assert_eq!(chunks.iter().filter(|chunk| chunk.is_done()).count(), 1);
    let streamed = crate::aggregate::aggregate_chunks(&chunks);

    let (left, right) = (&streamed.choices[0], &aggregated.choices[0]);
    assert_eq!(left.finish_reason, right.finish_reason);

    let (left, right) = (left.message.as_ref().unwrap(), right.message.as_ref().unwrap());
    assert_eq!(left.content, right.content);
    assert_eq!(left.reasoning_content, right.reasoning_content);
    assert_eq!(left.tool_calls, right.tool_calls);

    let (left, right) = (streamed.usage.unwrap(), aggregated.usage.unwrap());
    assert_eq!(
        (left.prompt_tokens, left.completion_tokens, left.total_tokens),
        (right.prompt_tokens, right.completion_tokens, right.total_tokens)
    );
}
