//! Streaming state machines between Anthropic content blocks and unified deltas

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde_json::json;

use crate::convert::{generate_id, unix_now};
use crate::error::LlmError;
use crate::protocol::anthropic::{
    AnthropicContentBlock, AnthropicMessageDelta, AnthropicResponse, AnthropicStreamDelta, AnthropicStreamEvent,
    AnthropicUsage,
};
use crate::types::{Choice, CompletionResponse, Content, FinishReason, Message, ToolCall, Usage, merge_usage};

use super::{finish_reason_from_stop, initial_arguments, stop_reason_from_finish};

// -- Anthropic events -> unified chunks --

/// Converts Anthropic stream events into unified chunks
///
/// Anthropic numbers content blocks across all block types, so tool calls
/// get their own sequential index, tracked per content block.
#[derive(Debug, Default)]
pub struct BlockToDeltaState {
    id: String,
    model: String,
    created: u64,
    /// Usage reported by `message_start`, merged with later reports
    usage: Option<Usage>,
    next_tool_call_index: u32,
    /// Content block index -> tool call index
    tool_calls: HashMap<u32, u32>,
    done: bool,
}

impl BlockToDeltaState {
    /// Fresh state for one stream
    pub fn new() -> Self {
        Self {
            created: unix_now(),
            ..Self::default()
        }
    }

    /// Convert one event into zero or more chunks
    ///
    /// # Errors
    ///
    /// Returns [`LlmError::Streaming`] for an in-stream `error` event.
    pub fn convert_event(&mut self, event: AnthropicStreamEvent) -> Result<Vec<CompletionResponse>, LlmError> {
        let chunk = match event {
            AnthropicStreamEvent::MessageStart { message } => {
                self.id = message.id;
                self.model = message.model;
                let usage = Usage::from(message.usage);
                self.usage = (usage.total_tokens > 0).then_some(usage);
                return Ok(Vec::new());
            }

            AnthropicStreamEvent::ContentBlockStart { index, content_block } => match content_block {
                AnthropicContentBlock::ToolUse { id, name, input } => {
                    let call = self.next_tool_call_index;
                    self.next_tool_call_index += 1;
                    self.tool_calls.insert(index, call);

                    let arguments = initial_arguments(&input);
                    self.delta(Message {
                        tool_calls: Some(vec![ToolCall::new(call, id, name, arguments)]),
                        ..Message::default()
                    })
                }
                AnthropicContentBlock::Text { text } if !text.is_empty() => self.delta(Message {
                    content: Some(Content::Text(text)),
                    ..Message::default()
                }),
                AnthropicContentBlock::Thinking { thinking, .. } if !thinking.is_empty() => self.delta(Message {
                    reasoning_content: Some(thinking),
                    ..Message::default()
                }),
                _ => return Ok(Vec::new()),
            },

            AnthropicStreamEvent::ContentBlockDelta { index, delta } => match delta {
                AnthropicStreamDelta::TextDelta { text } => self.delta(Message {
                    content: Some(Content::Text(text)),
                    ..Message::default()
                }),
                AnthropicStreamDelta::ThinkingDelta { thinking } => self.delta(Message {
                    reasoning_content: Some(thinking),
                    ..Message::default()
                }),
                AnthropicStreamDelta::InputJsonDelta { partial_json } => {
                    let Some(&call) = self.tool_calls.get(&index) else {
                        tracing::debug!(index, "skipping input_json_delta for unknown content block");
                        return Ok(Vec::new());
                    };
                    self.delta(Message {
                        tool_calls: Some(vec![ToolCall::new(call, "", "", partial_json)]),
                        ..Message::default()
                    })
                }
                AnthropicStreamDelta::SignatureDelta { .. } => return Ok(Vec::new()),
            },

            AnthropicStreamEvent::MessageDelta { delta, usage } => {
                let finish_reason = delta.stop_reason.as_deref().map(finish_reason_from_stop);
                let reported = usage.map(Usage::from);
                self.usage = merge_usage(self.usage, reported);

                if finish_reason.is_none() && reported.is_none() {
                    return Ok(Vec::new());
                }

                let choices = finish_reason.map_or_else(Vec::new, |reason| {
                    vec![Choice {
                        index: 0,
                        delta: Some(Message::default()),
                        finish_reason: Some(reason),
                        ..Choice::default()
                    }]
                });
                self.chunk(choices, self.usage)
            }

            AnthropicStreamEvent::MessageStop => return Ok(self.on_done_marker()),

            AnthropicStreamEvent::ContentBlockStop { .. } | AnthropicStreamEvent::Ping => return Ok(Vec::new()),

            AnthropicStreamEvent::Error { error } => {
                return Err(LlmError::Streaming(format!("{}: {}", error.error_type, error.message)));
            }
        };

        Ok(vec![chunk])
    }

    /// End of stream; yields the done sentinel exactly once
    pub fn on_done_marker(&mut self) -> Vec<CompletionResponse> {
        if self.done {
            return Vec::new();
        }
        self.done = true;
        vec![CompletionResponse::done()]
    }

    fn delta(&self, delta: Message) -> CompletionResponse {
        self.chunk(
            vec![Choice {
                index: 0,
                delta: Some(delta),
                ..Choice::default()
            }],
            None,
        )
    }

    fn chunk(&self, choices: Vec<Choice>, usage: Option<Usage>) -> CompletionResponse {
        CompletionResponse {
            id: self.id.clone(),
            object: "chat.completion.chunk".to_owned(),
            created: self.created,
            model: self.model.clone(),
            choices,
            usage,
            ..CompletionResponse::default()
        }
    }
}

// -- Unified chunks -> Anthropic events --

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OpenBlock {
    Text(u32),
    Thinking(u32),
}

impl OpenBlock {
    const fn index(self) -> u32 {
        match self {
            Self::Text(index) | Self::Thinking(index) => index,
        }
    }
}

/// Converts unified chunks into Anthropic content-block events
///
/// At most one text or thinking block is open at a time. Tool blocks stay
/// open until the turn finishes, since fragments of different tool calls
/// may interleave and no delta may follow a block's `content_block_stop`.
/// A finish reason is held until usage arrives (possibly in a later
/// usage-only chunk) or the stream ends, then emitted as one
/// `message_delta` followed by `message_stop`.
#[derive(Debug, Default)]
pub struct DeltaToBlockState {
    message_started: bool,
    finished: bool,
    pending_finish: Option<FinishReason>,
    usage: Option<Usage>,
    next_block_index: u32,
    open: Option<OpenBlock>,
    /// Tool call index -> content block index, for every tool seen
    tool_blocks: BTreeMap<u32, u32>,
    /// Tool blocks started and not yet stopped
    open_tools: BTreeSet<u32>,
}

impl DeltaToBlockState {
    /// Fresh state for one stream
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `message_stop` has been emitted
    pub const fn is_finished(&self) -> bool {
        self.finished
    }

    /// Convert one chunk into zero or more events
    pub fn convert_chunk(&mut self, chunk: &CompletionResponse) -> Vec<AnthropicStreamEvent> {
        let mut events = Vec::new();
        if self.finished {
            return events;
        }

        if chunk.is_done() {
            self.finish(&mut events);
            return events;
        }

        self.start(chunk, &mut events);

        if let Some(choice) = chunk.first_choice() {
            if let Some(delta) = choice.delta.as_ref().or(choice.message.as_ref()) {
                self.emit_delta(delta, &mut events);
            }

            if let Some(reason) = &choice.finish_reason {
                self.close_all_blocks(&mut events);
                self.pending_finish = Some(reason.clone());
            }
        }

        if chunk.usage.is_some() {
            self.usage = merge_usage(self.usage, chunk.usage);
            if let Some(reason) = self.pending_finish.take() {
                self.stop(&reason, &mut events);
            }
        }

        events
    }

    fn start(&mut self, chunk: &CompletionResponse, events: &mut Vec<AnthropicStreamEvent>) {
        if self.message_started {
            return;
        }
        self.message_started = true;

        events.push(AnthropicStreamEvent::MessageStart {
            message: AnthropicResponse {
                id: if chunk.id.is_empty() {
                    generate_id("msg_")
                } else {
                    chunk.id.clone()
                },
                response_type: "message".to_owned(),
                role: "assistant".to_owned(),
                content: Vec::new(),
                model: chunk.model.clone(),
                stop_reason: None,
                stop_sequence: None,
                usage: AnthropicUsage::default(),
            },
        });
    }

    fn emit_delta(&mut self, delta: &Message, events: &mut Vec<AnthropicStreamEvent>) {
        if let Some(thinking) = delta.reasoning_content.as_ref().filter(|r| !r.is_empty()) {
            let index = self.open_thinking(events);
            events.push(AnthropicStreamEvent::ContentBlockDelta {
                index,
                delta: AnthropicStreamDelta::ThinkingDelta {
                    thinking: thinking.clone(),
                },
            });
        }

        if let Some(signature) = delta.reasoning_signature.as_ref().filter(|s| !s.is_empty()) {
            let index = self.open_thinking(events);
            events.push(AnthropicStreamEvent::ContentBlockDelta {
                index,
                delta: AnthropicStreamDelta::SignatureDelta {
                    signature: signature.clone(),
                },
            });
        }

        let text = delta.content_text();
        if !text.is_empty() {
            let index = self.open_text(events);
            events.push(AnthropicStreamEvent::ContentBlockDelta {
                index,
                delta: AnthropicStreamDelta::TextDelta { text },
            });
        }

        for call in delta.tool_calls.iter().flatten() {
            self.emit_tool_call(call, events);
        }
    }

    fn open_text(&mut self, events: &mut Vec<AnthropicStreamEvent>) -> u32 {
        if let Some(OpenBlock::Text(index)) = self.open {
            return index;
        }
        let index = self.open_block(AnthropicContentBlock::Text { text: String::new() }, events);
        self.open = Some(OpenBlock::Text(index));
        index
    }

    fn open_thinking(&mut self, events: &mut Vec<AnthropicStreamEvent>) -> u32 {
        if let Some(OpenBlock::Thinking(index)) = self.open {
            return index;
        }
        let block = AnthropicContentBlock::Thinking {
            thinking: String::new(),
            signature: None,
        };
        let index = self.open_block(block, events);
        self.open = Some(OpenBlock::Thinking(index));
        index
    }

    fn emit_tool_call(&mut self, call: &ToolCall, events: &mut Vec<AnthropicStreamEvent>) {
        let index = match self.tool_blocks.get(&call.index).copied() {
            Some(block) if self.open_tools.contains(&block) => block,
            Some(block) => {
                tracing::debug!(tool_call = call.index, block, "skipping tool call fragment after its block stopped");
                return;
            }
            None => {
                let id = if call.id.is_empty() {
                    generate_id("toolu_")
                } else {
                    call.id.clone()
                };
                let block = AnthropicContentBlock::ToolUse {
                    id,
                    name: call.function.name.clone(),
                    input: json!({}),
                };
                let index = self.open_block(block, events);
                self.tool_blocks.insert(call.index, index);
                self.open_tools.insert(index);
                index
            }
        };

        if !call.function.arguments.is_empty() {
            events.push(AnthropicStreamEvent::ContentBlockDelta {
                index,
                delta: AnthropicStreamDelta::InputJsonDelta {
                    partial_json: call.function.arguments.clone(),
                },
            });
        }
    }

    /// Close the open text or thinking block and start a new block
    fn open_block(&mut self, content_block: AnthropicContentBlock, events: &mut Vec<AnthropicStreamEvent>) -> u32 {
        self.close_open_block(events);
        let index = self.next_block_index;
        self.next_block_index += 1;
        events.push(AnthropicStreamEvent::ContentBlockStart { index, content_block });
        index
    }

    fn close_open_block(&mut self, events: &mut Vec<AnthropicStreamEvent>) {
        if let Some(open) = self.open.take() {
            events.push(AnthropicStreamEvent::ContentBlockStop { index: open.index() });
        }
    }

    fn close_all_blocks(&mut self, events: &mut Vec<AnthropicStreamEvent>) {
        self.close_open_block(events);
        for index in std::mem::take(&mut self.open_tools) {
            events.push(AnthropicStreamEvent::ContentBlockStop { index });
        }
    }

    fn finish(&mut self, events: &mut Vec<AnthropicStreamEvent>) {
        self.start(&CompletionResponse::default(), events);
        let reason = self.pending_finish.take().unwrap_or_else(|| {
            if self.tool_blocks.is_empty() {
                FinishReason::Stop
            } else {
                FinishReason::ToolCalls
            }
        });
        self.stop(&reason, events);
    }

    fn stop(&mut self, reason: &FinishReason, events: &mut Vec<AnthropicStreamEvent>) {
        self.close_all_blocks(events);
        events.push(AnthropicStreamEvent::MessageDelta {
            delta: AnthropicMessageDelta {
                stop_reason: Some(stop_reason_from_finish(reason)),
                stop_sequence: None,
            },
            usage: Some(self.usage.map(Into::into).unwrap_or_default()),
        });
        events.push(AnthropicStreamEvent::MessageStop);
        self.finished = true;
    }
}

/// Render one chunk without cross-chunk state
///
/// Text and reasoning land in block 0 and each tool call in the block after
/// its index; no `message_start` or block boundaries are produced.
pub fn chunk_events(chunk: &CompletionResponse) -> Vec<AnthropicStreamEvent> {
    if chunk.is_done() {
        return vec![AnthropicStreamEvent::MessageStop];
    }

    let mut events = Vec::new();
    let Some(choice) = chunk.first_choice() else {
        return events;
    };

    if let Some(delta) = choice.delta.as_ref().or(choice.message.as_ref()) {
        if let Some(thinking) = delta.reasoning_content.clone().filter(|r| !r.is_empty()) {
            events.push(AnthropicStreamEvent::ContentBlockDelta {
                index: 0,
                delta: AnthropicStreamDelta::ThinkingDelta { thinking },
            });
        }

        let text = delta.content_text();
        if !text.is_empty() {
            events.push(AnthropicStreamEvent::ContentBlockDelta {
                index: 0,
                delta: AnthropicStreamDelta::TextDelta { text },
            });
        }

        for call in delta.tool_calls.iter().flatten() {
            events.push(AnthropicStreamEvent::ContentBlockDelta {
                index: call.index + 1,
                delta: AnthropicStreamDelta::InputJsonDelta {
                    partial_json: call.function.arguments.clone(),
                },
            });
        }
    }

    if let Some(reason) = &choice.finish_reason {
        events.push(AnthropicStreamEvent::MessageDelta {
            delta: AnthropicMessageDelta {
                stop_reason: Some(stop_reason_from_finish(reason)),
                stop_sequence: None,
            },
            usage: chunk.usage.map(Into::into),
        });
    }

    events
}
