//! Shared fixtures for the integration tests
//!
//! Each test binary uses a different subset of these helpers.

#![allow(dead_code)]

pub mod config;
pub mod mock_backend;

use futures_util::StreamExt;
use serde_json::{Value, json};
use switchyard_llm::{ApiFormat, PipelineOutput, SseEvent};

/// Reply every mock backend gives unless told otherwise
pub const GREETING: &str = "Hello! How can I help you today?";

/// Every caller format
pub const INBOUND_FORMATS: [ApiFormat; 3] = [
    ApiFormat::OpenAiChatCompletions,
    ApiFormat::AnthropicMessages,
    ApiFormat::OpenRouterChatCompletions,
];

/// A one-turn "Hello" request in the caller's wire format
pub fn hello_body(format: ApiFormat, stream: bool) -> Vec<u8> {
    let mut body = json!({
        "model": "mock-model-1",
        "messages": [{"role": "user", "content": "Hello"}],
        "stream": stream
    });
    if format == ApiFormat::AnthropicMessages {
        body["max_tokens"] = json!(256);
    }
    body.to_string().into_bytes()
}

/// A weather tool request in the caller's wire format
pub fn weather_body(format: ApiFormat, stream: bool) -> Vec<u8> {
    let schema = json!({
        "type": "object",
        "properties": {"location": {"type": "string"}}
    });

    let body = if format == ApiFormat::AnthropicMessages {
        json!({
            "model": "mock-model-1",
            "max_tokens": 256,
            "stream": stream,
            "messages": [{"role": "user", "content": "What is the weather?"}],
            "tools": [{"name": "get_weather", "description": "Get current weather", "input_schema": schema}]
        })
    } else {
        json!({
            "model": "mock-model-1",
            "stream": stream,
            "messages": [{"role": "user", "content": "What is the weather?"}],
            "tools": [{
                "type": "function",
                "function": {"name": "get_weather", "description": "Get current weather", "parameters": schema}
            }]
        })
    };
    body.to_string().into_bytes()
}

/// JSON body of a complete response
pub fn response_json(output: PipelineOutput) -> Value {
    match output {
        PipelineOutput::Response(response) => {
            assert_eq!(response.status, 200);
            serde_json::from_slice(&response.body).unwrap()
        }
        PipelineOutput::Stream(_) => panic!("expected a complete response"),
    }
}

/// Every event of a streamed response
pub async fn collect_events(output: PipelineOutput) -> Vec<SseEvent> {
    match output {
        PipelineOutput::Stream(stream) => stream.map(Result::unwrap).collect().await,
        PipelineOutput::Response(_) => panic!("expected a stream"),
    }
}

/// Text of a complete response in the caller's format
pub fn response_text(format: ApiFormat, body: &Value) -> String {
    match format {
        ApiFormat::AnthropicMessages => body["content"]
            .as_array()
            .into_iter()
            .flatten()
            .filter_map(|block| block["text"].as_str())
            .collect(),
        _ => body["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or_default()
            .to_owned(),
    }
}

/// Concatenated text deltas of a streamed response in the caller's format
pub fn streamed_text(format: ApiFormat, events: &[SseEvent]) -> String {
    payloads(events)
        .filter_map(|payload| match format {
            ApiFormat::AnthropicMessages => (payload["type"] == "content_block_delta")
                .then(|| payload["delta"]["text"].as_str().map(str::to_owned))
                .flatten(),
            _ => payload["choices"][0]["delta"]["content"]
                .as_str()
                .map(str::to_owned),
        })
        .collect()
}

/// Parsed JSON payloads, skipping the `[DONE]` sentinel
pub fn payloads(events: &[SseEvent]) -> impl Iterator<Item = Value> + '_ {
    events
        .iter()
        .filter(|event| !event.is_done())
        .map(|event| serde_json::from_str(&event.data).unwrap())
}
