//! Conversion between the unified model and the `OpenAI` wire format
//!
//! The functions take a [`Dialect`] so that `OpenRouter`, which differs only
//! in where reasoning text lives, reuses them. Reading accepts both
//! reasoning fields; writing uses the dialect's own.

use crate::error::LlmError;
use crate::protocol::openai::{
    OpenAiChoice, OpenAiCompletionTokensDetails, OpenAiContent, OpenAiContentPart, OpenAiDelta, OpenAiDeltaFunction,
    OpenAiDeltaToolCall, OpenAiErrorDetail, OpenAiErrorResponse, OpenAiFunction, OpenAiFunctionCall, OpenAiImageUrl,
    OpenAiInputAudio, OpenAiMessage, OpenAiPromptTokensDetails, OpenAiRequest, OpenAiResponse, OpenAiStreamChoice,
    OpenAiStreamChunk, OpenAiStreamOptions, OpenAiTool, OpenAiToolCall, OpenAiUsage,
};
use crate::types::{
    Choice, CompletionParams, CompletionRequest, CompletionResponse, CompletionTokensDetails, Content, ContentPart,
    FinishReason, FunctionCall, FunctionDefinition, Message, PromptTokensDetails, ResponseError, Role, StreamOptions,
    ToolCall, ToolChoice, ToolDefinition, Usage,
};

use super::{effort_str, generate_id, parse_effort, unix_now};

/// Chat-completions dialect
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Dialect {
    /// Reasoning in `reasoning_content`
    OpenAi,
    /// Reasoning in `reasoning`
    OpenRouter,
}

// -- Inbound: OpenAI wire format -> unified --

impl TryFrom<OpenAiRequest> for CompletionRequest {
    type Error = LlmError;

    fn try_from(req: OpenAiRequest) -> Result<Self, Self::Error> {
        request_to_unified(req)
    }
}

pub(crate) fn request_to_unified(req: OpenAiRequest) -> Result<CompletionRequest, LlmError> {
    let messages = req
        .messages
        .into_iter()
        .map(message_to_unified)
        .collect::<Result<Vec<_>, _>>()?;

    let tool_choice = req
        .tool_choice
        .map(serde_json::from_value::<ToolChoice>)
        .transpose()
        .map_err(|e| LlmError::InvalidRequest(format!("invalid tool_choice: {e}")))?;

    let reasoning_effort = req
        .reasoning_effort
        .as_deref()
        .map(|effort| {
            parse_effort(effort).ok_or_else(|| LlmError::InvalidRequest(format!("unsupported reasoning_effort '{effort}'")))
        })
        .transpose()?;

    Ok(CompletionRequest {
        model: req.model,
        messages,
        params: CompletionParams {
            temperature: req.temperature,
            top_p: req.top_p,
            top_k: None,
            max_tokens: req.max_tokens,
            max_completion_tokens: req.max_completion_tokens,
            frequency_penalty: req.frequency_penalty,
            presence_penalty: req.presence_penalty,
            seed: req.seed,
        },
        stop: req.stop,
        stream: req.stream.unwrap_or(false),
        stream_options: req.stream_options.map(|o| StreamOptions {
            include_usage: o.include_usage,
        }),
        tools: req.tools.map(|tools| tools.into_iter().map(Into::into).collect()),
        tool_choice,
        response_format: req.response_format,
        reasoning_effort,
        metadata: req.metadata.unwrap_or_default(),
        user: req.user,
        api_format: None,
    })
}

fn message_to_unified(msg: OpenAiMessage) -> Result<Message, LlmError> {
    let role = match msg.role.as_str() {
        "system" | "developer" => Role::System,
        "user" => Role::User,
        "assistant" => Role::Assistant,
        "tool" | "function" => Role::Tool,
        other => return Err(LlmError::InvalidRequest(format!("unsupported message role '{other}'"))),
    };

    let content = msg.content.map(content_to_unified).or_else(|| msg.refusal.map(Content::Text));

    let tool_calls = msg.tool_calls.map(|calls| {
        calls
            .into_iter()
            .zip(0u32..)
            .map(|(call, index)| ToolCall {
                index,
                id: call.id,
                call_type: call.call_type,
                function: FunctionCall {
                    name: call.function.name,
                    arguments: call.function.arguments,
                },
            })
            .collect()
    });

    Ok(Message {
        role,
        content,
        name: msg.name,
        tool_calls,
        tool_call_id: msg.tool_call_id,
        tool_call_is_error: None,
        reasoning_content: msg.reasoning_content.or(msg.reasoning),
        reasoning_signature: None,
    })
}

fn content_to_unified(content: OpenAiContent) -> Content {
    match content {
        OpenAiContent::Text(text) => Content::Text(text),
        OpenAiContent::Parts(parts) => Content::from_parts(
            parts
                .into_iter()
                .map(|part| match part {
                    OpenAiContentPart::Text { text } => ContentPart::Text { text },
                    OpenAiContentPart::ImageUrl { image_url } => ContentPart::ImageUrl {
                        url: image_url.url,
                        detail: image_url.detail,
                    },
                    OpenAiContentPart::InputAudio { input_audio } => ContentPart::InputAudio {
                        data: input_audio.data,
                        format: input_audio.format,
                    },
                })
                .collect(),
        ),
    }
}

impl From<OpenAiTool> for ToolDefinition {
    fn from(tool: OpenAiTool) -> Self {
        Self {
            tool_type: tool.tool_type,
            function: FunctionDefinition {
                name: tool.function.name,
                description: tool.function.description,
                parameters: tool.function.parameters,
                strict: tool.function.strict,
            },
        }
    }
}

impl TryFrom<OpenAiResponse> for CompletionResponse {
    type Error = LlmError;

    fn try_from(resp: OpenAiResponse) -> Result<Self, Self::Error> {
        let choices = resp
            .choices
            .into_iter()
            .map(|choice: OpenAiChoice| {
                let finish_reason = choice.finish_reason.map(FinishReason::from);
                // A refusal without content is surfaced as filtered text
                let refused = choice.message.content.is_none() && choice.message.refusal.is_some();
                let message = message_to_unified(choice.message)
                    .map_err(|e| LlmError::Transform(format!("choice {}: {e}", choice.index)))?;

                Ok(Choice {
                    index: choice.index,
                    message: Some(Message {
                        role: Role::Assistant,
                        ..message
                    }),
                    delta: None,
                    finish_reason: if refused && finish_reason.is_none() {
                        Some(FinishReason::ContentFilter)
                    } else {
                        finish_reason
                    },
                    logprobs: choice.logprobs,
                })
            })
            .collect::<Result<Vec<_>, LlmError>>()?;

        Ok(Self {
            id: resp.id,
            object: resp.object,
            created: resp.created,
            model: resp.model,
            choices,
            usage: resp.usage.map(Into::into),
            system_fingerprint: resp.system_fingerprint,
            service_tier: resp.service_tier,
            error: None,
        })
    }
}

impl From<OpenAiStreamChunk> for CompletionResponse {
    fn from(chunk: OpenAiStreamChunk) -> Self {
        let choices = chunk
            .choices
            .into_iter()
            .map(|choice| Choice {
                index: choice.index,
                message: None,
                delta: Some(delta_to_unified(choice.delta)),
                finish_reason: choice.finish_reason.map(FinishReason::from),
                logprobs: choice.logprobs,
            })
            .collect();

        Self {
            id: chunk.id,
            object: chunk.object,
            created: chunk.created,
            model: chunk.model,
            choices,
            usage: chunk.usage.map(Into::into),
            system_fingerprint: chunk.system_fingerprint,
            service_tier: chunk.service_tier,
            error: None,
        }
    }
}

fn delta_to_unified(delta: OpenAiDelta) -> Message {
    let role = match delta.role.as_deref() {
        Some("user") => Role::User,
        Some("tool") => Role::Tool,
        Some("system") => Role::System,
        _ => Role::Assistant,
    };

    let tool_calls = delta.tool_calls.map(|calls| {
        calls
            .into_iter()
            .map(|call| {
                let function = call.function.unwrap_or_default();
                ToolCall {
                    index: call.index,
                    id: call.id.unwrap_or_default(),
                    call_type: call.call_type.unwrap_or_else(crate::types::message::function_type),
                    function: FunctionCall {
                        name: function.name.unwrap_or_default(),
                        arguments: function.arguments.unwrap_or_default(),
                    },
                }
            })
            .collect()
    });

    Message {
        role,
        content: delta.content.or(delta.refusal).map(Content::Text),
        tool_calls,
        reasoning_content: delta.reasoning_content.or(delta.reasoning),
        ..Message::default()
    }
}

impl From<OpenAiUsage> for Usage {
    fn from(usage: OpenAiUsage) -> Self {
        let total_tokens = if usage.total_tokens > 0 {
            usage.total_tokens
        } else {
            usage.prompt_tokens.saturating_add(usage.completion_tokens)
        };

        Self {
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
            total_tokens,
            prompt_tokens_details: usage.prompt_tokens_details.map(|d| PromptTokensDetails {
                cached_tokens: d.cached_tokens,
                cache_write_tokens: d.cache_write_tokens,
            }),
            completion_tokens_details: usage.completion_tokens_details.map(|d| CompletionTokensDetails {
                reasoning_tokens: d.reasoning_tokens,
            }),
        }
    }
}

// -- Outbound: unified -> OpenAI wire format --

impl From<&CompletionRequest> for OpenAiRequest {
    fn from(req: &CompletionRequest) -> Self {
        request_from_unified(req)
    }
}

pub(crate) fn request_from_unified(req: &CompletionRequest) -> OpenAiRequest {
    let tools = req.tools.as_ref().map(|tools| {
        tools
            .iter()
            .map(|tool| OpenAiTool {
                tool_type: tool.tool_type.clone(),
                function: OpenAiFunction {
                    name: tool.function.name.clone(),
                    description: tool.function.description.clone(),
                    parameters: tool.function.parameters.clone(),
                    strict: tool.function.strict,
                },
            })
            .collect()
    });

    OpenAiRequest {
        model: req.model.clone(),
        messages: req.messages.iter().map(message_from_unified).collect(),
        temperature: req.params.temperature,
        top_p: req.params.top_p,
        max_tokens: req.params.max_tokens,
        max_completion_tokens: req.params.max_completion_tokens,
        stop: req.stop.clone(),
        frequency_penalty: req.params.frequency_penalty,
        presence_penalty: req.params.presence_penalty,
        seed: req.params.seed,
        stream: req.stream.then_some(true),
        stream_options: req
            .stream_options
            .filter(|_| req.stream)
            .map(|o| OpenAiStreamOptions {
                include_usage: o.include_usage,
            }),
        tools,
        tool_choice: req.tool_choice.as_ref().and_then(|tc| serde_json::to_value(tc).ok()),
        response_format: req.response_format.clone(),
        reasoning_effort: req.reasoning_effort.map(|e| effort_str(e).to_owned()),
        metadata: (!req.metadata.is_empty()).then(|| req.metadata.clone()),
        user: req.user.clone(),
    }
}

/// Request-side message; reasoning text is not sent back to backends
fn message_from_unified(msg: &Message) -> OpenAiMessage {
    let role = match msg.role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    };

    OpenAiMessage {
        role: role.to_owned(),
        content: msg.content.as_ref().map(content_from_unified),
        name: msg.name.clone(),
        tool_calls: msg.tool_calls.as_ref().map(|calls| calls.iter().map(tool_call_from_unified).collect()),
        tool_call_id: msg.tool_call_id.clone(),
        ..OpenAiMessage::default()
    }
}

fn tool_call_from_unified(call: &ToolCall) -> OpenAiToolCall {
    OpenAiToolCall {
        id: call.id.clone(),
        call_type: call.call_type.clone(),
        function: OpenAiFunctionCall {
            name: call.function.name.clone(),
            arguments: call.function.arguments.clone(),
        },
    }
}

fn content_from_unified(content: &Content) -> OpenAiContent {
    match content {
        Content::Text(text) => OpenAiContent::Text(text.clone()),
        Content::Parts(parts) => match parts.as_slice() {
            [ContentPart::Text { text }] => OpenAiContent::Text(text.clone()),
            _ => OpenAiContent::Parts(
                parts
                    .iter()
                    .map(|part| match part {
                        ContentPart::Text { text } => OpenAiContentPart::Text { text: text.clone() },
                        ContentPart::ImageUrl { url, detail } => OpenAiContentPart::ImageUrl {
                            image_url: OpenAiImageUrl {
                                url: url.clone(),
                                detail: detail.clone(),
                            },
                        },
                        ContentPart::InputAudio { data, format } => OpenAiContentPart::InputAudio {
                            input_audio: OpenAiInputAudio {
                                data: data.clone(),
                                format: format.clone(),
                            },
                        },
                    })
                    .collect(),
            ),
        },
    }
}

impl From<&CompletionResponse> for OpenAiResponse {
    fn from(resp: &CompletionResponse) -> Self {
        response_from_unified(resp, Dialect::OpenAi)
    }
}

pub(crate) fn response_from_unified(resp: &CompletionResponse, dialect: Dialect) -> OpenAiResponse {
    let choices = resp
        .choices
        .iter()
        .map(|choice| {
            let message = choice.message.as_ref().or(choice.delta.as_ref());
            OpenAiChoice {
                index: choice.index,
                message: message.map_or_else(
                    || OpenAiMessage {
                        role: "assistant".to_owned(),
                        ..OpenAiMessage::default()
                    },
                    |m| assistant_message_from_unified(m, dialect),
                ),
                finish_reason: choice.finish_reason.as_ref().map(|r| r.as_str().to_owned()),
                logprobs: choice.logprobs.clone(),
            }
        })
        .collect();

    OpenAiResponse {
        id: non_empty_id(&resp.id),
        object: "chat.completion".to_owned(),
        created: if resp.created > 0 { resp.created } else { unix_now() },
        model: resp.model.clone(),
        choices,
        usage: resp.usage.map(Into::into),
        system_fingerprint: resp.system_fingerprint.clone(),
        service_tier: resp.service_tier.clone(),
    }
}

fn assistant_message_from_unified(msg: &Message, dialect: Dialect) -> OpenAiMessage {
    let reasoning = msg.reasoning_content.clone().filter(|r| !r.is_empty());
    let (reasoning_content, reasoning) = match dialect {
        Dialect::OpenAi => (reasoning, None),
        Dialect::OpenRouter => (None, reasoning),
    };

    let tool_calls: Option<Vec<_>> = msg
        .tool_calls
        .as_ref()
        .filter(|calls| !calls.is_empty())
        .map(|calls| calls.iter().map(tool_call_from_unified).collect());
    let text = msg.content_text();
    // Tool-only turns carry `null` content
    let content = (!text.is_empty() || tool_calls.is_none()).then_some(OpenAiContent::Text(text));

    OpenAiMessage {
        role: "assistant".to_owned(),
        content,
        tool_calls,
        reasoning_content,
        reasoning,
        ..OpenAiMessage::default()
    }
}

impl From<&CompletionResponse> for OpenAiStreamChunk {
    fn from(chunk: &CompletionResponse) -> Self {
        chunk_from_unified(chunk, Dialect::OpenAi)
    }
}

pub(crate) fn chunk_from_unified(chunk: &CompletionResponse, dialect: Dialect) -> OpenAiStreamChunk {
    let choices = chunk
        .choices
        .iter()
        .map(|choice| OpenAiStreamChoice {
            index: choice.index,
            delta: choice
                .delta
                .as_ref()
                .or(choice.message.as_ref())
                .map(|delta| delta_from_unified(delta, dialect))
                .unwrap_or_default(),
            finish_reason: choice.finish_reason.as_ref().map(|r| r.as_str().to_owned()),
            logprobs: choice.logprobs.clone(),
        })
        .collect();

    OpenAiStreamChunk {
        id: chunk.id.clone(),
        object: "chat.completion.chunk".to_owned(),
        created: chunk.created,
        model: chunk.model.clone(),
        choices,
        usage: chunk.usage.map(Into::into),
        system_fingerprint: chunk.system_fingerprint.clone(),
        service_tier: chunk.service_tier.clone(),
    }
}

fn delta_from_unified(delta: &Message, dialect: Dialect) -> OpenAiDelta {
    let reasoning = delta.reasoning_content.clone();
    let (reasoning_content, reasoning) = match dialect {
        Dialect::OpenAi => (reasoning, None),
        Dialect::OpenRouter => (None, reasoning),
    };

    let tool_calls = delta.tool_calls.as_ref().filter(|calls| !calls.is_empty()).map(|calls| {
        calls
            .iter()
            .map(|call| OpenAiDeltaToolCall {
                index: call.index,
                id: (!call.id.is_empty()).then(|| call.id.clone()),
                call_type: (!call.id.is_empty()).then(|| call.call_type.clone()),
                function: Some(OpenAiDeltaFunction {
                    name: (!call.function.name.is_empty()).then(|| call.function.name.clone()),
                    arguments: Some(call.function.arguments.clone()),
                }),
            })
            .collect()
    });

    OpenAiDelta {
        role: Some("assistant".to_owned()),
        content: delta.content.as_ref().map(Content::as_text),
        reasoning_content,
        reasoning,
        refusal: None,
        tool_calls,
    }
}

impl From<Usage> for OpenAiUsage {
    fn from(usage: Usage) -> Self {
        Self {
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
            total_tokens: usage.total_tokens,
            prompt_tokens_details: usage.prompt_tokens_details.map(|d| OpenAiPromptTokensDetails {
                cached_tokens: d.cached_tokens,
                cache_write_tokens: d.cache_write_tokens,
            }),
            completion_tokens_details: usage.completion_tokens_details.map(|d| OpenAiCompletionTokensDetails {
                reasoning_tokens: d.reasoning_tokens,
            }),
        }
    }
}

fn non_empty_id(id: &str) -> String {
    if id.is_empty() {
        generate_id("chatcmpl-")
    } else {
        id.to_owned()
    }
}

// -- Errors --

/// Normalize an `OpenAI`-style error body
///
/// `fallback` already carries the status, request id and a type derived
/// from the status; fields found in the body override it.
pub(crate) fn error_to_unified(body: &str, mut fallback: ResponseError) -> ResponseError {
    if let Ok(parsed) = serde_json::from_str::<OpenAiErrorResponse>(body) {
        fallback.message = parsed.error.message;
        if let Some(error_type) = parsed.error.error_type {
            fallback.error_type = error_type;
        }
        fallback.code = parsed.error.code.map(|code| match code {
            serde_json::Value::String(code) => code,
            other => other.to_string(),
        });
    } else if !body.trim().is_empty() {
        fallback.message = body.trim().to_owned();
    }

    fallback
}

/// Render a unified error in `OpenAI`'s envelope
pub(crate) fn error_from_unified(error: &ResponseError) -> OpenAiErrorResponse {
    OpenAiErrorResponse {
        error: OpenAiErrorDetail {
            message: error.message.clone(),
            error_type: Some(error.error_type.clone()),
            param: None,
            code: error.code.clone().map(serde_json::Value::String),
        },
    }
}
