//! `OpenAI` chat completions transformers

use std::sync::Arc;

use bytes::Bytes;
use http::StatusCode;
use switchyard_config::ChannelConfig;

use super::{
    AggregatedResponse, Channel, ChannelFailover, ChannelSet, Inbound, Outbound, SseEvent, error_response,
    normalize_error, parse_body, parse_response, to_json, validate,
};
use crate::aggregate::aggregate_chunks;
use crate::convert::openai::{self as convert, Dialect};
use crate::error::LlmError;
use crate::executor::{Auth, HttpRequest, HttpResponse, RawEvent};
use crate::protocol::openai::{OpenAiErrorResponse, OpenAiRequest, OpenAiResponse, OpenAiStreamChunk};
use crate::stream::{BoxStream, ResultStreamExt};
use crate::types::{ApiFormat, CompletionRequest, CompletionResponse, ResponseError};

/// Default `OpenAI` API base URL
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

const CHAT_COMPLETIONS_PATH: &str = "chat/completions";

/// Accepts `OpenAI` chat completion requests
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenAiInbound;

impl Inbound for OpenAiInbound {
    fn format(&self) -> ApiFormat {
        ApiFormat::OpenAiChatCompletions
    }

    fn transform_request(&self, body: &[u8]) -> Result<CompletionRequest, LlmError> {
        let wire: OpenAiRequest = parse_body(body)?;
        let mut request = CompletionRequest::try_from(wire)?;
        validate(&request)?;
        request.api_format = Some(self.format());
        Ok(request)
    }

    fn transform_response(&self, response: &CompletionResponse) -> Result<Bytes, LlmError> {
        to_json(&convert::response_from_unified(response, Dialect::OpenAi))
    }

    fn transform_stream_chunk(&self, chunk: &CompletionResponse) -> Result<Vec<SseEvent>, LlmError> {
        render_chunk(chunk, Dialect::OpenAi)
    }

    fn transform_stream(&self, stream: BoxStream<CompletionResponse>) -> BoxStream<SseEvent> {
        stream.flat_map_items(|chunk| render_chunk(&chunk, Dialect::OpenAi))
    }

    fn transform_error(&self, error: &ResponseError) -> HttpResponse {
        render_error(error)
    }
}

/// Sends requests to an `OpenAI`-compatible chat completions endpoint
#[derive(Debug, Clone)]
pub struct OpenAiOutbound {
    channels: ChannelSet,
}

impl OpenAiOutbound {
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

impl Outbound for OpenAiOutbound {
    fn format(&self) -> ApiFormat {
        ApiFormat::OpenAiChatCompletions
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
        normalize_error(error, convert::error_to_unified)
    }

    fn channel_failover(&self) -> Option<&dyn ChannelFailover> {
        Some(self)
    }
}

impl ChannelFailover for OpenAiOutbound {
    fn channel_count(&self) -> usize {
        self.channels.len()
    }

    fn channel(&self, index: usize) -> Option<Arc<dyn Outbound>> {
        self.channels
            .at(index)
            .map(|channels| Arc::new(Self { channels }) as Arc<dyn Outbound>)
    }
}

pub(crate) fn render_chunk(chunk: &CompletionResponse, dialect: Dialect) -> Result<Vec<SseEvent>, LlmError> {
    if chunk.is_done() {
        return Ok(vec![SseEvent::done()]);
    }
    Ok(vec![SseEvent::json(None, &convert::chunk_from_unified(chunk, dialect))?])
}

pub(crate) fn render_error(error: &ResponseError) -> HttpResponse {
    error_response(error, &convert::error_from_unified(error))
}

pub(crate) fn chat_request(channel: &Channel, body: Bytes) -> Result<HttpRequest, LlmError> {
    let url = channel.endpoint(CHAT_COMPLETIONS_PATH)?;
    Ok(HttpRequest::post_json(url, body).with_auth(channel.api_key.clone().map(Auth::Bearer)))
}

/// Parse a complete chat completion
///
/// Some `OpenAI`-compatible vendors answer 200 with an error envelope; that
/// is treated like an upstream failure.
pub(crate) fn lift_response(response: &HttpResponse) -> Result<CompletionResponse, LlmError> {
    let wire = parse_response::<OpenAiResponse>(response).map_err(|err| {
        if serde_json::from_slice::<OpenAiErrorResponse>(&response.body).is_ok() {
            LlmError::Upstream {
                status: StatusCode::BAD_GATEWAY.as_u16(),
                message: String::from_utf8_lossy(&response.body).into_owned(),
                request_id: response.request_id().map(str::to_owned),
            }
        } else {
            err
        }
    })?;

    CompletionResponse::try_from(wire)
}

/// Lift raw events into unified chunks, closing with a done sentinel even
/// when the backend ends the stream without `[DONE]`
pub(crate) fn lift_stream(stream: BoxStream<RawEvent>) -> BoxStream<CompletionResponse> {
    stream.scan_items(
        false,
        |seen_done, event| {
            let mut chunks = lift_event(event)?;
            if *seen_done {
                chunks.retain(|chunk| !chunk.is_done());
            }
            *seen_done |= chunks.iter().any(CompletionResponse::is_done);
            Ok(chunks)
        },
        |seen_done| Ok(if seen_done { Vec::new() } else { vec![CompletionResponse::done()] }),
    )
}

pub(crate) fn lift_event(event: RawEvent) -> Result<Vec<CompletionResponse>, LlmError> {
    if event.is_done() {
        return Ok(vec![CompletionResponse::done()]);
    }

    if let Ok(envelope) = serde_json::from_str::<OpenAiErrorResponse>(&event.data) {
        let error_type = envelope.error.error_type.as_deref().unwrap_or("error");
        return Err(LlmError::Streaming(format!("{error_type}: {}", envelope.error.message)));
    }

    match serde_json::from_str::<OpenAiStreamChunk>(&event.data) {
        Ok(chunk) => Ok(vec![chunk.into()]),
        Err(e) => {
            tracing::debug!(error = %e, "skipping unparseable stream event");
            Ok(Vec::new())
        }
    }
}

pub(crate) fn aggregate_events(events: &[RawEvent]) -> Result<AggregatedResponse, LlmError> {
    let chunks: Vec<CompletionResponse> = events
        .iter()
        .filter(|event| !event.is_done())
        .filter_map(|event| match serde_json::from_str::<OpenAiStreamChunk>(&event.data) {
            Ok(chunk) => Some(chunk.into()),
            Err(e) => {
                tracing::debug!(error = %e, "skipping unparseable stream event");
                None
            }
        })
        .collect();

    let response = aggregate_chunks(&chunks);
    Ok(AggregatedResponse {
        body: to_json(&response)?,
        usage: response.usage,
    })
}

#[cfg(test)]
mod tests {
    use futures_util::{StreamExt, stream};
    use serde_json::json;
    use url::Url;

    use super::*;
    use crate::transformer::assert_stream_matches_aggregate;
    use crate::types::{FinishReason, Message, Role};

    fn outbound() -> OpenAiOutbound {
        OpenAiOutbound::new(vec![
            Channel::new("primary", Url::parse("http://127.0.0.1:9001/v1").unwrap()).with_api_key("sk-one"),
            Channel::new("backup", Url::parse("http://127.0.0.1:9002/v1/").unwrap()),
        ])
    }

    fn events(payloads: &[&str]) -> Vec<RawEvent> {
        payloads.iter().map(|data| RawEvent::data(*data)).collect()
    }

    #[test]
    fn inbound_parses_and_tags_format() {
        let body = json!({"model": "gpt-4o-mini", "messages": [{"role": "user", "content": "Hi"}]});
        let request = OpenAiInbound.transform_request(body.to_string().as_bytes()).unwrap();

        assert_eq!(request.model, "gpt-4o-mini");
        assert_eq!(request.api_format, Some(ApiFormat::OpenAiChatCompletions));
    }

    #[test]
    fn inbound_rejects_invalid_bodies() {
        let empty = json!({"model": "gpt-4o-mini", "messages": []});
        assert!(matches!(
            OpenAiInbound.transform_request(empty.to_string().as_bytes()),
            Err(LlmError::InvalidRequest(_))
        ));
        assert!(matches!(
            OpenAiInbound.transform_request(b"{not json"),
            Err(LlmError::InvalidRequest(_))
        ));
    }

    #[test]
    fn sentinel_renders_done() {
        let events = OpenAiInbound.transform_stream_chunk(&CompletionResponse::done()).unwrap();
        assert_eq!(events, vec![SseEvent::done()]);
    }

    #[test]
    fn outbound_request_targets_active_channel() {
        let request = CompletionRequest {
            model: "gpt-4o-mini".to_owned(),
            messages: vec![Message::text(Role::User, "Hi")],
            ..CompletionRequest::default()
        };

        let http = outbound().transform_request(&request).unwrap();
        assert_eq!(http.url.as_str(), "http://127.0.0.1:9001/v1/chat/completions");
        assert!(matches!(http.auth, Some(Auth::Bearer(_))));

        let body: serde_json::Value = serde_json::from_slice(&http.body).unwrap();
        assert_eq!(body["model"], "gpt-4o-mini");

        let backup = outbound().channel(1).unwrap();
        assert_eq!(backup.channel_name(), "backup");
        let http = backup.transform_request(&request).unwrap();
        assert_eq!(http.url.as_str(), "http://127.0.0.1:9002/v1/chat/completions");
        assert!(http.auth.is_none());

        assert!(outbound().channel(2).is_none());
    }

    #[test]
    fn stream_events_lift_and_skip() {
        assert!(lift_event(RawEvent::data("not json")).unwrap().is_empty());
        assert!(lift_event(RawEvent::data("[DONE]")).unwrap()[0].is_done());

        let err = lift_event(RawEvent::data(r#"{"error":{"message":"overloaded","type":"server_error"}}"#)).unwrap_err();
        assert!(matches!(err, LlmError::Streaming(ref msg) if msg == "server_error: overloaded"));
    }

    #[tokio::test]
    async fn outbound_stream_ends_with_sentinel() {
        let raw = events(&[
            r#"{"id":"c1","choices":[{"index":0,"delta":{"role":"assistant","content":"Hel"}}]}"#,
            ": keep-alive",
            r#"{"id":"c1","choices":[{"index":0,"delta":{"content":"lo"},"finish_reason":"stop"}]}"#,
            "[DONE]",
        ]);
        let chunks: Vec<_> = outbound()
            .transform_stream(Box::pin(stream::iter(raw.into_iter().map(Ok::<_, LlmError>))))
            .collect()
            .await;

        assert_eq!(chunks.len(), 3);
        assert!(chunks[2].as_ref().unwrap().is_done());
        let second = chunks[1].as_ref().unwrap();
        assert_eq!(second.choices[0].finish_reason, Some(FinishReason::Stop));
    }

    #[tokio::test]
    async fn outbound_stream_without_done_marker_still_ends() {
        let raw = events(&[
            r#"{"id":"c1","choices":[{"index":0,"delta":{"role":"assistant","content":"Hi"}}]}"#,
            r#"{"id":"c1","choices":[{"index":0,"delta":{},"finish_reason":"stop"}]}"#,
        ]);
        let chunks: Vec<_> = outbound()
            .transform_stream(Box::pin(stream::iter(raw.into_iter().map(Ok::<_, LlmError>))))
            .map(Result::unwrap)
            .collect()
            .await;

        assert_eq!(chunks.len(), 3);
        assert!(chunks[2].is_done());
        assert_eq!(chunks.iter().filter(|chunk| chunk.is_done()).count(), 1);
    }

    #[tokio::test]
    async fn cut_stream_gets_no_sentinel() {
        let first = RawEvent::data(r#"{"id":"c1","choices":[{"index":0,"delta":{"content":"Hi"}}]}"#);
        let source = stream::iter(vec![Ok(first), Err(LlmError::Streaming("connection reset".to_owned()))]);
        let items: Vec<_> = outbound().transform_stream(Box::pin(source)).collect().await;

        assert_eq!(items.len(), 2);
        assert!(!items[0].as_ref().unwrap().is_done());
        assert!(items[1].is_err());
    }

    #[tokio::test]
    async fn streamed_turn_matches_aggregate() {
        let raw = events(&[
            r#"{"id":"c2","model":"o3-mini","choices":[{"index":0,"delta":{"role":"assistant","reasoning_content":"Weather "}}]}"#,
            r#"{"id":"c2","choices":[{"index":0,"delta":{"reasoning_content":"needs a tool."}}]}"#,
            r#"{"id":"c2","choices":[{"index":0,"delta":{"content":"Checking."}}]}"#,
            r#"{"id":"c2","choices":[{"index":0,"delta":{"tool_calls":[{"index":0,"id":"call_a","type":"function","function":{"name":"weather","arguments":"{\"city\":"}}]}}]}"#,
            r#"{"id":"c2","choices":[{"index":0,"delta":{"tool_calls":[{"index":1,"id":"call_b","type":"function","function":{"name":"time","arguments":"{}"}}]}}]}"#,
            r#"{"id":"c2","choices":[{"index":0,"delta":{"tool_calls":[{"index":0,"function":{"arguments":"\"Oslo\"}"}}]}}]}"#,
            r#"{"id":"c2","choices":[{"index":0,"delta":{},"finish_reason":"tool_calls"}]}"#,
            r#"{"id":"c2","choices":[],"usage":{"prompt_tokens":30,"completion_tokens":12,"total_tokens":42}}"#,
        ]);

        assert_stream_matches_aggregate(&outbound(), raw).await;
    }

    #[test]
    fn aggregate_events_into_unified_body() {
        let raw = events(&[
            r#"{"id":"c1","model":"gpt-4o-mini","choices":[{"index":0,"delta":{"content":"Hello!"}}]}"#,
            "garbage",
            r#"{"id":"c1","choices":[],"usage":{"prompt_tokens":9,"completion_tokens":3,"total_tokens":12}}"#,
            "[DONE]",
        ]);

        let aggregated = outbound().aggregate_stream_chunks(&raw).unwrap();
        let body: CompletionResponse = serde_json::from_slice(&aggregated.body).unwrap();
        assert_eq!(body.choices[0].message.as_ref().unwrap().content_text(), "Hello!");
        assert_eq!(aggregated.usage.unwrap().total_tokens, 12);
    }

    #[test]
    fn aggregate_of_nothing_is_empty_response() {
        let aggregated = outbound().aggregate_stream_chunks(&[]).unwrap();
        let body: CompletionResponse = serde_json::from_slice(&aggregated.body).unwrap();
        assert!(body.choices.is_empty());
        assert!(aggregated.usage.is_none());
    }

    #[test]
    fn upstream_error_body_is_normalized() {
        let error = LlmError::Upstream {
            status: 429,
            message: r#"{"error":{"message":"Rate limit reached","type":"requests","code":"rate_limit_exceeded"}}"#
                .to_owned(),
            request_id: Some("req_7".to_owned()),
        };

        let normalized = outbound().transform_error(&error);
        assert_eq!(normalized.status, 429);
        assert_eq!(normalized.error_type, "requests");
        assert_eq!(normalized.code.as_deref(), Some("rate_limit_exceeded"));
        assert_eq!(normalized.message, "Rate limit reached");
        assert_eq!(normalized.request_id.as_deref(), Some("req_7"));

        let rendered = OpenAiInbound.transform_error(&normalized);
        assert_eq!(rendered.status, StatusCode::TOO_MANY_REQUESTS);
        let body: serde_json::Value = serde_json::from_slice(&rendered.body).unwrap();
        assert_eq!(body["error"]["message"], "Rate limit reached");
    }

    #[test]
    fn unreadable_choice_fails_the_response() {
        let response = HttpResponse::json(
            StatusCode::OK,
            Bytes::from(
                json!({
                    "id": "c9",
                    "object": "chat.completion",
                    "created": 1,
                    "model": "gpt-4o-mini",
                    "choices": [{"index": 0, "message": {"role": "narrator", "content": "Once upon a time"}, "finish_reason": "stop"}]
                })
                .to_string(),
            ),
        );

        let err = outbound().transform_response(&response).unwrap_err();
        assert!(matches!(err, LlmError::Transform(ref msg) if msg.contains("narrator")));
        assert!(!err.is_retryable());
    }

    #[test]
    fn ok_status_with_error_envelope_is_upstream_failure() {
        let response = HttpResponse::json(
            StatusCode::OK,
            Bytes::from_static(br#"{"error":{"message":"provider unavailable","code":502}}"#),
        );
        let err = outbound().transform_response(&response).unwrap_err();
        assert!(err.is_retryable());
    }
}
