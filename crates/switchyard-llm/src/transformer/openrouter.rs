//! `OpenRouter` transformers
//!
//! `OpenRouter` speaks the `OpenAI` wire format with its own reasoning and
//! usage extensions, so most of the work is shared with the `OpenAI` pair.

use std::sync::Arc;

use bytes::Bytes;
use switchyard_config::ChannelConfig;

use super::openai::{aggregate_events, chat_request, lift_response, lift_stream, render_chunk, render_error};
use super::{
    AggregatedResponse, Channel, ChannelFailover, ChannelSet, Inbound, Outbound, SseEvent, normalize_error,
    parse_body, to_json, validate,
};
use crate::convert::openai::{Dialect, error_to_unified};
use crate::convert::{ReasoningBudgets, openrouter as convert};
use crate::error::LlmError;
use crate::executor::{HttpRequest, HttpResponse, RawEvent};
use crate::protocol::openrouter::OpenRouterRequest;
use crate::stream::{BoxStream, ResultStreamExt};
use crate::types::{ApiFormat, CompletionRequest, CompletionResponse, ResponseError};

/// Default `OpenRouter` API base URL
pub const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";

/// Accepts `OpenRouter` chat completion requests
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenRouterInbound {
    budgets: ReasoningBudgets,
}

impl OpenRouterInbound {
    /// Inbound mapping `reasoning.max_tokens` through `budgets`
    pub const fn new(budgets: ReasoningBudgets) -> Self {
        Self { budgets }
    }
}

impl Inbound for OpenRouterInbound {
    fn format(&self) -> ApiFormat {
        ApiFormat::OpenRouterChatCompletions
    }

    fn transform_request(&self, body: &[u8]) -> Result<CompletionRequest, LlmError> {
        let wire: OpenRouterRequest = parse_body(body)?;
        let mut request = convert::request_to_unified(wire, &self.budgets)?;
        validate(&request)?;
        request.api_format = Some(self.format());
        Ok(request)
    }

    fn transform_response(&self, response: &CompletionResponse) -> Result<Bytes, LlmError> {
        to_json(&convert::response_from_unified(response))
    }

    fn transform_stream_chunk(&self, chunk: &CompletionResponse) -> Result<Vec<SseEvent>, LlmError> {
        render_chunk(chunk, Dialect::OpenRouter)
    }

    fn transform_stream(&self, stream: BoxStream<CompletionResponse>) -> BoxStream<SseEvent> {
        stream.flat_map_items(|chunk| render_chunk(&chunk, Dialect::OpenRouter))
    }

    fn transform_error(&self, error: &ResponseError) -> HttpResponse {
        render_error(error)
    }
}

/// Sends requests to `OpenRouter`
#[derive(Debug, Clone)]
pub struct OpenRouterOutbound {
    channels: ChannelSet,
}

impl OpenRouterOutbound {
    /// Outbound over `channels`, the first one active
    pub fn new(channels: Vec<Channel>) -> Self {
        Self {
            channels: ChannelSet::new(channels),
        }
    }

    /// Outbound over configured channels
    pub fn from_config(channels: &[ChannelConfig]) -> Result<Self, LlmError> {
        Ok(Self {
            channels: ChannelSet::from_config(channels, DEFAULT_BASE_URL)?,
        })
    }
}

impl Outbound for OpenRouterOutbound {
    fn format(&self) -> ApiFormat {
        ApiFormat::OpenRouterChatCompletions
    }

    fn channel_name(&self) -> &str {
        self.channels.name()
    }

    fn transform_request(&self, request: &CompletionRequest) -> Result<HttpRequest, LlmError> {
        let body = to_json(&convert::request_from_unified(request))?;
        chat_request(self.channels.current()?, body)
    }

    fn transform_response(&self, response: &HttpResponse) -> Result<CompletionResponse, LlmError> {
        lift_response(response)
    }

    fn transform_stream(&self, stream: BoxStream<RawEvent>) -> BoxStream<CompletionResponse> {
        lift_stream(stream)
    }

    fn aggregate_stream_chunks(&self, events: &[RawEvent]) -> Result<AggregatedResponse, LlmError> {
        aggregate_events(events)
    }

    fn transform_error(&self, error: &LlmError) -> ResponseError {
        normalize_error(error, error_to_unified)
    }

    fn channel_failover(&self) -> Option<&dyn ChannelFailover> {
        Some(self)
    }
}

impl ChannelFailover for OpenRouterOutbound {
    fn channel_count(&self) -> usize {
        self.channels.len()
    }

    fn channel(&self, index: usize) -> Option<Arc<dyn Outbound>> {
        self.channels
            .at(index)
            .map(|channels| Arc::new(Self { channels }) as Arc<dyn Outbound>)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use url::Url;

    use super::*;
    use crate::types::{Choice, Message, ReasoningEffort, Role};

    #[test]
    fn inbound_maps_reasoning_budget() {
        let body = json!({
            "model": "anthropic/claude-sonnet-4",
            "messages": [{"role": "user", "content": "Think hard"}],
            "reasoning": {"max_tokens": 12000}
        });
        let request = OpenRouterInbound::default()
            .transform_request(body.to_string().as_bytes())
            .unwrap();

        assert_eq!(request.reasoning_effort, Some(ReasoningEffort::Medium));
        assert_eq!(request.api_format, Some(ApiFormat::OpenRouterChatCompletions));
    }

    #[test]
    fn outbound_request_carries_extensions() {
        let outbound = OpenRouterOutbound::new(vec![
            Channel::new("main", Url::parse("https://openrouter.ai/api/v1").unwrap()).with_api_key("sk-or-1"),
        ]);
        let request = CompletionRequest {
            model: "openai/gpt-4o".to_owned(),
            messages: vec![Message::text(Role::User, "Hi")],
            reasoning_effort: Some(ReasoningEffort::High),
            ..CompletionRequest::default()
        };

        let http = outbound.transform_request(&request).unwrap();
        assert_eq!(http.url.as_str(), "https://openrouter.ai/api/v1/chat/completions");

        let body: serde_json::Value = serde_json::from_slice(&http.body).unwrap();
        assert_eq!(body["reasoning"]["effort"], "high");
        assert_eq!(body["usage"]["include"], true);
        assert!(body.get("reasoning_effort").is_none());
    }

    #[test]
    fn inbound_renders_reasoning_field() {
        let chunk = CompletionResponse {
            id: "gen-1".to_owned(),
            object: "chat.completion.chunk".to_owned(),
            choices: vec![Choice {
                delta: Some(Message {
                    role: Role::Assistant,
                    reasoning_content: Some("considering".to_owned()),
                    ..Message::default()
                }),
                ..Choice::default()
            }],
            ..CompletionResponse::default()
        };

        let events = OpenRouterInbound::default().transform_stream_chunk(&chunk).unwrap();
        let payload: serde_json::Value = serde_json::from_str(&events[0].data).unwrap();
        assert_eq!(payload["choices"][0]["delta"]["reasoning"], "considering");
    }
}
