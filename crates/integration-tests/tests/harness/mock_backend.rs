//! Mock vendor backend for integration tests
//!
//! Serves an OpenAI-style `/v1/chat/completions` and an Anthropic-style
//! `/v1/messages` endpoint with canned replies, complete or streamed.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router, routing};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

use super::GREETING;

const FAILURE_MESSAGE: &str = "mock server intentional failure";
const WEATHER_ARGUMENTS: &str = r#"{"location":"San Francisco"}"#;

/// Mock backend that returns predictable responses
pub struct MockBackend {
    addr: SocketAddr,
    shutdown: CancellationToken,
    state: Arc<MockState>,
}

/// A request the mock received
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub headers: HeaderMap,
    pub body: Value,
}

struct MockState {
    openai_count: AtomicU32,
    anthropic_count: AtomicU32,
    /// Number of requests to fail before succeeding (0 = never fail)
    fail_count: AtomicU32,
    response_content: String,
    last_request: Mutex<Option<RecordedRequest>>,
}

impl MockBackend {
    /// Start the mock server, returning immediately
    pub async fn start() -> anyhow::Result<Self> {
        Self::start_inner(0, GREETING).await
    }

    /// Start a mock server that fails the first `n` requests with 500
    pub async fn start_failing(n: u32) -> anyhow::Result<Self> {
        Self::start_inner(n, GREETING).await
    }

    /// Start a mock server with a custom response content
    pub async fn start_with_response(content: &str) -> anyhow::Result<Self> {
        Self::start_inner(0, content).await
    }

    async fn start_inner(fail_count: u32, content: &str) -> anyhow::Result<Self> {
        let state = Arc::new(MockState {
            openai_count: AtomicU32::new(0),
            anthropic_count: AtomicU32::new(0),
            fail_count: AtomicU32::new(fail_count),
            response_content: content.to_owned(),
            last_request: Mutex::new(None),
        });

        let app = Router::new()
            .route("/v1/chat/completions", routing::post(handle_chat_completions))
            .route("/v1/messages", routing::post(handle_messages))
            .with_state(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let shutdown = CancellationToken::new();
        let shutdown_clone = shutdown.clone();

        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    shutdown_clone.cancelled().await;
                })
                .await
                .ok();
        });

        Ok(Self { addr, shutdown, state })
    }

    /// Base URL for configuring the mock as a channel
    ///
    /// Includes `/v1` since outbounds append `chat/completions` or `messages`
    pub fn base_url(&self) -> String {
        format!("http://{}/v1", self.addr)
    }

    /// Requests received on the `OpenAI`-style endpoint
    pub fn openai_count(&self) -> u32 {
        self.state.openai_count.load(Ordering::Relaxed)
    }

    /// Requests received on the Anthropic-style endpoint
    pub fn anthropic_count(&self) -> u32 {
        self.state.anthropic_count.load(Ordering::Relaxed)
    }

    /// Requests received on either endpoint
    pub fn request_count(&self) -> u32 {
        self.openai_count() + self.anthropic_count()
    }

    /// The most recent request
    pub fn last_request(&self) -> Option<RecordedRequest> {
        self.state.last_request.lock().unwrap().clone()
    }
}

impl Drop for MockBackend {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl MockState {
    fn record(&self, headers: HeaderMap, body: &Value) {
        *self.last_request.lock().unwrap() = Some(RecordedRequest {
            headers,
            body: body.clone(),
        });
    }

    /// Consume one scripted failure, if any remain
    fn should_fail(&self) -> bool {
        self.fail_count
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1))
            .is_ok()
    }

    /// Reply chunks whose concatenation is the full content
    fn words(&self) -> impl Iterator<Item = &str> {
        self.response_content.split_inclusive(' ')
    }
}

fn wants_stream(body: &Value) -> bool {
    body["stream"].as_bool().unwrap_or(false)
}

fn wants_tools(body: &Value) -> bool {
    body["tools"].as_array().is_some_and(|tools| !tools.is_empty())
}

fn model(body: &Value) -> String {
    body["model"].as_str().unwrap_or("mock-model-1").to_owned()
}

fn sse(body: String) -> Response {
    (StatusCode::OK, [(header::CONTENT_TYPE, "text/event-stream")], body).into_response()
}

fn push_data(body: &mut String, payload: &Value) {
    body.push_str(&format!("data: {payload}\n\n"));
}

fn push_event(body: &mut String, payload: &Value) {
    let name = payload["type"].as_str().unwrap_or("message");
    body.push_str(&format!("event: {name}\ndata: {payload}\n\n"));
}

// -- OpenAI-style endpoint --

async fn handle_chat_completions(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Json(req): Json<Value>,
) -> Response {
    state.openai_count.fetch_add(1, Ordering::Relaxed);
    state.record(headers, &req);

    if state.should_fail() {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({
                "error": {
                    "message": FAILURE_MESSAGE,
                    "type": "server_error"
                }
            })),
        )
            .into_response();
    }

    if wants_stream(&req) {
        return sse(openai_stream(&state, &req));
    }

    let message = if wants_tools(&req) {
        json!({
            "role": "assistant",
            "content": null,
            "tool_calls": [{
                "id": "call_test_123",
                "type": "function",
                "function": {"name": "get_weather", "arguments": WEATHER_ARGUMENTS}
            }]
        })
    } else {
        json!({"role": "assistant", "content": state.response_content})
    };
    let finish_reason = if wants_tools(&req) { "tool_calls" } else { "stop" };

    Json(json!({
        "id": "chatcmpl-test-123",
        "object": "chat.completion",
        "created": 1_700_000_000,
        "model": model(&req),
        "choices": [{"index": 0, "message": message, "finish_reason": finish_reason}],
        "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}
    }))
    .into_response()
}

fn openai_stream(state: &MockState, req: &Value) -> String {
    let model = model(req);
    let chunk = |delta: Value, finish_reason: Option<&str>| {
        json!({
            "id": "chatcmpl-test-stream",
            "object": "chat.completion.chunk",
            "created": 1_700_000_000,
            "model": model,
            "choices": [{"index": 0, "delta": delta, "finish_reason": finish_reason}]
        })
    };

    let mut body = String::new();
    if wants_tools(req) {
        push_data(
            &mut body,
            &chunk(
                json!({
                    "role": "assistant",
                    "tool_calls": [{
                        "index": 0,
                        "id": "call_test_stream",
                        "type": "function",
                        "function": {"name": "get_weather", "arguments": ""}
                    }]
                }),
                None,
            ),
        );
        push_data(
            &mut body,
            &chunk(
                json!({"tool_calls": [{"index": 0, "function": {"arguments": WEATHER_ARGUMENTS}}]}),
                None,
            ),
        );
        push_data(&mut body, &chunk(json!({}), Some("tool_calls")));
    } else {
        push_data(&mut body, &chunk(json!({"role": "assistant", "content": ""}), None));
        for word in state.words() {
            push_data(&mut body, &chunk(json!({"content": word}), None));
        }
        push_data(&mut body, &chunk(json!({}), Some("stop")));
    }

    push_data(
        &mut body,
        &json!({
            "id": "chatcmpl-test-stream",
            "object": "chat.completion.chunk",
            "created": 1_700_000_000,
            "model": model,
            "choices": [],
            "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}
        }),
    );
    body.push_str("data: [DONE]\n\n");
    body
}

// -- Anthropic-style endpoint --

async fn handle_messages(State(state): State<Arc<MockState>>, headers: HeaderMap, Json(req): Json<Value>) -> Response {
    state.anthropic_count.fetch_add(1, Ordering::Relaxed);
    state.record(headers, &req);

    if state.should_fail() {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({
                "type": "error",
                "error": {"type": "api_error", "message": FAILURE_MESSAGE}
            })),
        )
            .into_response();
    }

    if wants_stream(&req) {
        return sse(anthropic_stream(&state, &req));
    }

    let (content, stop_reason) = if wants_tools(&req) {
        (
            json!([{
                "type": "tool_use",
                "id": "toolu_test_123",
                "name": "get_weather",
                "input": {"location": "San Francisco"}
            }]),
            "tool_use",
        )
    } else {
        (json!([{"type": "text", "text": state.response_content}]), "end_turn")
    };

    Json(json!({
        "id": "msg_test_123",
        "type": "message",
        "role": "assistant",
        "model": model(&req),
        "content": content,
        "stop_reason": stop_reason,
        "stop_sequence": null,
        "usage": {"input_tokens": 10, "output_tokens": 5}
    }))
    .into_response()
}

fn anthropic_stream(state: &MockState, req: &Value) -> String {
    let mut body = String::new();
    push_event(
        &mut body,
        &json!({
            "type": "message_start",
            "message": {
                "id": "msg_test_stream",
                "type": "message",
                "role": "assistant",
                "model": model(req),
                "content": [],
                "stop_reason": null,
                "stop_sequence": null,
                "usage": {"input_tokens": 10, "output_tokens": 0}
            }
        }),
    );

    let stop_reason = if wants_tools(req) {
        push_event(
            &mut body,
            &json!({
                "type": "content_block_start",
                "index": 0,
                "content_block": {"type": "tool_use", "id": "toolu_test_stream", "name": "get_weather", "input": {}}
            }),
        );
        push_event(
            &mut body,
            &json!({
                "type": "content_block_delta",
                "index": 0,
                "delta": {"type": "input_json_delta", "partial_json": WEATHER_ARGUMENTS}
            }),
        );
        "tool_use"
    } else {
        push_event(
            &mut body,
            &json!({"type": "content_block_start", "index": 0, "content_block": {"type": "text", "text": ""}}),
        );
        for word in state.words() {
            push_event(
                &mut body,
                &json!({"type": "content_block_delta", "index": 0, "delta": {"type": "text_delta", "text": word}}),
            );
        }
        "end_turn"
    };

    push_event(&mut body, &json!({"type": "content_block_stop", "index": 0}));
    push_event(
        &mut body,
        &json!({
            "type": "message_delta",
            "delta": {"stop_reason": stop_reason, "stop_sequence": null},
            "usage": {"output_tokens": 5}
        }),
    );
    push_event(&mut body, &json!({"type": "message_stop"}));
    body
}
