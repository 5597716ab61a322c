//! Anthropic Messages transformers

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use http::{HeaderName, HeaderValue};
use switchyard_config::ChannelConfig;

use super::{
    AggregatedResponse, Channel, ChannelFailover, ChannelSet, CustomizeExecutor, Inbound, Outbound, SseEvent,
    error_response, normalize_error, parse_body, parse_response, to_json, validate,
};
use crate::convert::ReasoningBudgets;
use crate::convert::anthropic::{
    self as convert, BlockToDeltaState, DeltaToBlockState, MessageAccumulator, chunk_events,
};
use crate::error::LlmError;
use crate::executor::{Auth, Executor, HttpRequest, HttpResponse, RawEvent};
use crate::protocol::anthropic::{AnthropicRequest, AnthropicResponse, AnthropicStreamEvent};
use crate::stream::{BoxStream, ResultStreamExt};
use crate::types::{ApiFormat, CompletionRequest, CompletionResponse, ResponseError};

/// Default Anthropic API base URL
pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";

/// Anthropic API version header value
const ANTHROPIC_VERSION: &str = "2023-06-01";

const MESSAGES_PATH: &str = "messages";

/// Accepts Anthropic Messages requests
#[derive(Debug, Clone, Copy, Default)]
pub struct AnthropicInbound {
    budgets: ReasoningBudgets,
}

impl AnthropicInbound {
    /// Inbound mapping thinking budgets through `budgets`
    pub const fn new(budgets: ReasoningBudgets) -> Self {
        Self { budgets }
    }
}

impl Inbound for AnthropicInbound {
    fn format(&self) -> ApiFormat {
        ApiFormat::AnthropicMessages
    }

    fn transform_request(&self, body: &[u8]) -> Result<CompletionRequest, LlmError> {
        let wire: AnthropicRequest = parse_body(body)?;
        if !wire.max_tokens.is_some_and(|max| max > 0) {
            return Err(LlmError::InvalidRequest("max_tokens must be a positive integer".to_owned()));
        }

        let mut request = convert::request_to_unified(wire, &self.budgets)?;
        validate(&request)?;
        request.api_format = Some(self.format());
        Ok(request)
    }

    fn transform_response(&self, response: &CompletionResponse) -> Result<Bytes, LlmError> {
        to_json(&AnthropicResponse::from(response))
    }

    fn transform_stream_chunk(&self, chunk: &CompletionResponse) -> Result<Vec<SseEvent>, LlmError> {
        render_events(chunk_events(chunk))
    }

    fn transform_stream(&self, stream: BoxStream<CompletionResponse>) -> BoxStream<SseEvent> {
        let mut state = DeltaToBlockState::new();
        stream.flat_map_items(move |chunk| render_events(state.convert_chunk(&chunk)))
    }

    fn transform_error(&self, error: &ResponseError) -> HttpResponse {
        error_response(error, &convert::error_from_unified(error))
    }
}

fn render_events(events: Vec<AnthropicStreamEvent>) -> Result<Vec<SseEvent>, LlmError> {
    events
        .iter()
        .map(|event| SseEvent::json(Some(event.event_name()), event))
        .collect()
}

/// Sends requests to the Anthropic Messages API
///
/// An executor installed with [`AnthropicOutbound::with_executor`] replaces
/// the pipeline's default one for this backend.
#[derive(Clone)]
pub struct AnthropicOutbound {
    channels: ChannelSet,
    budgets: ReasoningBudgets,
    executor: Option<Arc<dyn Executor>>,
}

impl fmt::Debug for AnthropicOutbound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnthropicOutbound")
            .field("channels", &self.channels)
            .field("budgets", &self.budgets)
            .field("custom_executor", &self.executor.is_some())
            .finish()
    }
}

impl AnthropicOutbound {
    /// Outbound over `channels`, the first one active
    pub fn new(channels: Vec<Channel>) -> Self {
        Self {
            channels: ChannelSet::new(channels),
            budgets: ReasoningBudgets::default(),
            executor: None,
        }
    }

    /// Outbound over configured channels
    pub fn from_config(channels: &[ChannelConfig], budgets: ReasoningBudgets) -> Result<Self, LlmError> {
        Ok(Self {
            channels: ChannelSet::from_config(channels, DEFAULT_BASE_URL)?,
            budgets,
            executor: None,
        })
    }

    /// Thinking budgets used when lowering reasoning effort
    #[must_use]
    pub const fn with_budgets(mut self, budgets: ReasoningBudgets) -> Self {
        self.budgets = budgets;
        self
    }

    /// Execute through `executor` instead of the pipeline default
    #[must_use]
    pub fn with_executor(mut self, executor: Arc<dyn Executor>) -> Self {
        self.executor = Some(executor);
        self
    }
}

impl Outbound for AnthropicOutbound {
    fn format(&self) -> ApiFormat {
        ApiFormat::AnthropicMessages
    }

    fn channel_name(&self) -> &str {
        self.channels.name()
    }

    fn transform_request(&self, request: &CompletionRequest) -> Result<HttpRequest, LlmError> {
        let channel = self.channels.current()?;
        let body = to_json(&convert::request_from_unified(request, &self.budgets))?;
        let auth = channel.api_key.clone().map(|key| Auth::ApiKey {
            header: HeaderName::from_static("x-api-key"),
            key,
        });

        Ok(HttpRequest::post_json(channel.endpoint(MESSAGES_PATH)?, body)
            .with_header(
                HeaderName::from_static("anthropic-version"),
                HeaderValue::from_static(ANTHROPIC_VERSION),
            )
            .with_auth(auth))
    }

    fn transform_response(&self, response: &HttpResponse) -> Result<CompletionResponse, LlmError> {
        parse_response::<AnthropicResponse>(response).map(Into::into)
    }

    fn transform_stream(&self, stream: BoxStream<RawEvent>) -> BoxStream<CompletionResponse> {
        stream.scan_items(
            BlockToDeltaState::new(),
            |state, event| lift_event(state, &event),
            |mut state| Ok(state.on_done_marker()),
        )
    }

    fn aggregate_stream_chunks(&self, events: &[RawEvent]) -> Result<AggregatedResponse, LlmError> {
        let mut accumulator = MessageAccumulator::new();
        for event in events.iter().filter(|event| !event.is_done()) {
            match serde_json::from_str::<AnthropicStreamEvent>(&event.data) {
                Ok(event) => accumulator.push(event)?,
                Err(e) => tracing::debug!(error = %e, "skipping unparseable stream event"),
            }
        }

        let response = accumulator.finish()?;
        Ok(AggregatedResponse {
            body: to_json(&response)?,
            usage: response.usage,
        })
    }

    fn transform_error(&self, error: &LlmError) -> ResponseError {
        normalize_error(error, convert::error_to_unified)
    }

    fn executor_customizer(&self) -> Option<&dyn CustomizeExecutor> {
        self.executor.is_some().then_some(self as &dyn CustomizeExecutor)
    }

    fn channel_failover(&self) -> Option<&dyn ChannelFailover> {
        Some(self)
    }
}

impl CustomizeExecutor for AnthropicOutbound {
    fn customize_executor(&self, default: Arc<dyn Executor>) -> Arc<dyn Executor> {
        self.executor.clone().unwrap_or(default)
    }
}

impl ChannelFailover for AnthropicOutbound {
    fn channel_count(&self) -> usize {
        self.channels.len()
    }

    fn channel(&self, index: usize) -> Option<Arc<dyn Outbound>> {
        self.channels.at(index).map(|channels| {
            Arc::new(Self {
                channels,
                budgets: self.budgets,
                executor: self.executor.clone(),
            }) as Arc<dyn Outbound>
        })
    }
}

fn lift_event(state: &mut BlockToDeltaState, event: &RawEvent) -> Result<Vec<CompletionResponse>, LlmError> {
    if event.is_done() {
        return Ok(state.on_done_marker());
    }

    match serde_json::from_str::<AnthropicStreamEvent>(&event.data) {
        Ok(parsed) => state.convert_event(parsed),
        Err(e) => {
            tracing::debug!(event = event.event.as_deref().unwrap_or("-"), error = %e, "skipping unparseable stream event");
            Ok(Vec::new())
        }
    }
}
