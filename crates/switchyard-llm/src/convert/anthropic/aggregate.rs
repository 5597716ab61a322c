//! Folding a finished Anthropic event stream into one response

use std::collections::BTreeMap;

use crate::convert::unix_now;
use crate::error::LlmError;
use crate::protocol::anthropic::{AnthropicContentBlock, AnthropicStreamDelta, AnthropicStreamEvent};
use crate::types::{Choice, CompletionResponse, FinishReason, Usage, merge_usage};

use super::{AssistantTurn, finish_reason_from_stop, initial_arguments};

#[derive(Debug)]
enum Block {
    Text(String),
    Thinking { thinking: String, signature: Option<String> },
    Redacted(String),
    ToolUse { id: String, name: String, arguments: String },
}

impl Block {
    fn from_start(block: AnthropicContentBlock) -> Option<Self> {
        match block {
            AnthropicContentBlock::Text { text } => Some(Self::Text(text)),
            AnthropicContentBlock::Thinking { thinking, signature } => Some(Self::Thinking { thinking, signature }),
            AnthropicContentBlock::RedactedThinking { data } => Some(Self::Redacted(data)),
            AnthropicContentBlock::ToolUse { id, name, input } => Some(Self::ToolUse {
                id,
                name,
                arguments: initial_arguments(&input),
            }),
            AnthropicContentBlock::Image { .. } | AnthropicContentBlock::ToolResult { .. } => None,
        }
    }

    /// Block implied by a delta whose `content_block_start` never arrived
    fn from_delta(delta: &AnthropicStreamDelta) -> Self {
        match delta {
            AnthropicStreamDelta::TextDelta { .. } => Self::Text(String::new()),
            AnthropicStreamDelta::ThinkingDelta { .. } | AnthropicStreamDelta::SignatureDelta { .. } => {
                Self::Thinking {
                    thinking: String::new(),
                    signature: None,
                }
            }
            AnthropicStreamDelta::InputJsonDelta { .. } => Self::ToolUse {
                id: String::new(),
                name: String::new(),
                arguments: String::new(),
            },
        }
    }

    fn apply(&mut self, delta: AnthropicStreamDelta) {
        match (self, delta) {
            (Self::Text(text), AnthropicStreamDelta::TextDelta { text: fragment }) => text.push_str(&fragment),
            (Self::Thinking { thinking, .. }, AnthropicStreamDelta::ThinkingDelta { thinking: fragment }) => {
                thinking.push_str(&fragment);
            }
            (Self::Thinking { signature, .. }, AnthropicStreamDelta::SignatureDelta { signature: value }) => {
                *signature = Some(value);
            }
            (Self::ToolUse { arguments, .. }, AnthropicStreamDelta::InputJsonDelta { partial_json }) => {
                arguments.push_str(&partial_json);
            }
            (_, delta) => tracing::debug!(?delta, "skipping delta that does not match its content block"),
        }
    }
}

/// Accumulates Anthropic stream events into a unified response
///
/// Blocks are keyed by their content block index, so interleaved deltas
/// land in the right place.
#[derive(Debug, Default)]
pub struct MessageAccumulator {
    id: String,
    model: String,
    blocks: BTreeMap<u32, Block>,
    stop_reason: Option<String>,
    usage: Option<Usage>,
    events: usize,
}

impl MessageAccumulator {
    /// Empty accumulator
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of events folded so far
    pub const fn len(&self) -> usize {
        self.events
    }

    /// Whether no event has been folded
    pub const fn is_empty(&self) -> bool {
        self.events == 0
    }

    /// Fold one event
    ///
    /// # Errors
    ///
    /// Returns [`LlmError::Streaming`] for an in-stream `error` event.
    pub fn push(&mut self, event: AnthropicStreamEvent) -> Result<(), LlmError> {
        self.events += 1;

        match event {
            AnthropicStreamEvent::MessageStart { message } => {
                self.id = message.id;
                self.model = message.model;
                self.usage = merge_usage(self.usage, Some(message.usage.into()));
            }
            AnthropicStreamEvent::ContentBlockStart { index, content_block } => {
                if let Some(block) = Block::from_start(content_block) {
                    self.blocks.insert(index, block);
                }
            }
            AnthropicStreamEvent::ContentBlockDelta { index, delta } => {
                self.blocks
                    .entry(index)
                    .or_insert_with(|| Block::from_delta(&delta))
                    .apply(delta);
            }
            AnthropicStreamEvent::MessageDelta { delta, usage } => {
                if delta.stop_reason.is_some() {
                    self.stop_reason = delta.stop_reason;
                }
                self.usage = merge_usage(self.usage, usage.map(Into::into));
            }
            AnthropicStreamEvent::ContentBlockStop { .. }
            | AnthropicStreamEvent::MessageStop
            | AnthropicStreamEvent::Ping => {}
            AnthropicStreamEvent::Error { error } => {
                return Err(LlmError::Streaming(format!("{}: {}", error.error_type, error.message)));
            }
        }

        Ok(())
    }

    /// Build the response
    ///
    /// # Errors
    ///
    /// Returns [`LlmError::Transform`] when no event was folded.
    pub fn finish(self) -> Result<CompletionResponse, LlmError> {
        if self.events == 0 {
            return Err(LlmError::Transform("no stream events".to_owned()));
        }

        let mut turn = AssistantTurn::default();
        for block in self.blocks.into_values() {
            match block {
                Block::Text(text) => turn.push_text(&text),
                Block::Thinking { thinking, signature } => {
                    turn.push_reasoning(&thinking);
                    if let Some(signature) = signature {
                        turn.set_signature(signature);
                    }
                }
                Block::Redacted(data) => turn.set_signature(data),
                Block::ToolUse { id, name, arguments } => turn.push_tool_call(id, name, arguments),
            }
        }

        let finish_reason = self.stop_reason.as_deref().map_or_else(
            || {
                if turn.has_tool_calls() {
                    FinishReason::ToolCalls
                } else {
                    FinishReason::Stop
                }
            },
            finish_reason_from_stop,
        );

        Ok(CompletionResponse {
            id: self.id,
            object: "chat.completion".to_owned(),
            created: unix_now(),
            model: self.model,
            choices: vec![Choice {
                index: 0,
                message: Some(turn.into_message()),
                finish_reason: Some(finish_reason),
                ..Choice::default()
            }],
            usage: self.usage,
            ..CompletionResponse::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn fold(events: Vec<serde_json::Value>) -> Result<CompletionResponse, LlmError> {
        let mut acc = MessageAccumulator::new();
        for event in events {
            acc.push(serde_json::from_value(event).unwrap())?;
        }
        acc.finish()
    }

    #[test]
    fn folds_text_and_tools_by_block_index() {
        let resp = fold(vec![
            json!({"type": "message_start", "message": {"id": "msg_9", "model": "claude-3-5-haiku", "usage": {"input_tokens": 30, "output_tokens": 1}}}),
            json!({"type": "content_block_start", "index": 0, "content_block": {"type": "text", "text": ""}}),
            json!({"type": "content_block_delta", "index": 0, "delta": {"type": "text_delta", "text": "Let me check"}}),
            json!({"type": "content_block_stop", "index": 0}),
            json!({"type": "content_block_start", "index": 1, "content_block": {"type": "tool_use", "id": "toolu_1", "name": "get_weather", "input": {}}}),
            json!({"type": "content_block_delta", "index": 1, "delta": {"type": "input_json_delta", "partial_json": "{\"city\": "}}),
            json!({"type": "content_block_delta", "index": 1, "delta": {"type": "input_json_delta", "partial_json": "\"Paris\"}"}}),
            json!({"type": "content_block_stop", "index": 1}),
            json!({"type": "message_delta", "delta": {"stop_reason": "tool_use"}, "usage": {"output_tokens": 40}}),
            json!({"type": "message_stop"}),
        ])
        .unwrap();

        assert_eq!(resp.id, "msg_9");
        let choice = resp.first_choice().unwrap();
        let message = choice.message.as_ref().unwrap();
        assert_eq!(message.content_text(), "Let me check");

        let call = &message.tool_calls.as_ref().unwrap()[0];
        assert_eq!(call.id, "toolu_1");
        assert_eq!(call.function.arguments, "{\"city\": \"Paris\"}");
        assert_eq!(choice.finish_reason, Some(FinishReason::ToolCalls));

        let usage = resp.usage.unwrap();
        assert_eq!(usage.prompt_tokens, 30);
        assert_eq!(usage.completion_tokens, 40);
    }

    #[test]
    fn thinking_and_signature() {
        let resp = fold(vec![
            json!({"type": "content_block_start", "index": 0, "content_block": {"type": "thinking", "thinking": ""}}),
            json!({"type": "content_block_delta", "index": 0, "delta": {"type": "thinking_delta", "thinking": "step"}}),
            json!({"type": "content_block_delta", "index": 0, "delta": {"type": "signature_delta", "signature": "EqQB"}}),
            json!({"type": "content_block_delta", "index": 1, "delta": {"type": "text_delta", "text": "42"}}),
        ])
        .unwrap();

        let message = resp.first_choice().unwrap().message.as_ref().unwrap();
        assert_eq!(message.reasoning_content.as_deref(), Some("step"));
        assert_eq!(message.reasoning_signature.as_deref(), Some("EqQB"));
        assert_eq!(message.content_text(), "42");
        assert_eq!(resp.first_choice().unwrap().finish_reason, Some(FinishReason::Stop));
    }

    #[test]
    fn no_events_is_an_error() {
        let err = fold(Vec::new()).unwrap_err();
        assert!(matches!(err, LlmError::Transform(ref msg) if msg == "no stream events"));
    }

    #[test]
    fn error_event_aborts() {
        let err = fold(vec![
            json!({"type": "error", "error": {"type": "overloaded_error", "message": "Overloaded"}}),
        ])
        .unwrap_err();
        assert!(matches!(err, LlmError::Streaming(_)));
    }
}
