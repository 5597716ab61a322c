//! Conversion between the unified model and the Anthropic Messages format

mod aggregate;
mod stream;

pub use aggregate::MessageAccumulator;
pub use stream::{BlockToDeltaState, DeltaToBlockState, chunk_events};

use serde_json::json;

use crate::error::LlmError;
use crate::protocol::anthropic::{
    AnthropicContent, AnthropicContentBlock, AnthropicErrorDetail, AnthropicErrorResponse, AnthropicImageSource,
    AnthropicMessage, AnthropicMetadata, AnthropicRequest, AnthropicResponse, AnthropicSystem, AnthropicThinking,
    AnthropicTool, AnthropicToolChoice, AnthropicToolResultContent, AnthropicUsage,
};
use crate::types::{
    Choice, CompletionParams, CompletionRequest, CompletionResponse, Content, ContentPart, FinishReason, Message,
    PromptTokensDetails, ResponseError, Role, Stop, ToolCall, ToolChoice, ToolChoiceMode, ToolDefinition, Usage,
};

use super::{ReasoningBudgets, generate_id, unix_now};

/// `max_tokens` sent when the caller gave none
pub const DEFAULT_MAX_TOKENS: u32 = 4096;

// -- Request: Anthropic -> unified --

/// Parse an Anthropic request
///
/// The top-level system prompt becomes a leading system message and each
/// `tool_result` block becomes its own tool message.
pub fn request_to_unified(req: AnthropicRequest, budgets: &ReasoningBudgets) -> Result<CompletionRequest, LlmError> {
    let mut messages = Vec::with_capacity(req.messages.len() + 1);

    if let Some(system) = req.system.as_ref().map(AnthropicSystem::as_text).filter(|s| !s.is_empty()) {
        messages.push(Message::text(Role::System, system));
    }

    for msg in req.messages {
        messages.extend(message_to_unified(msg)?);
    }

    let reasoning_effort = match req.thinking {
        Some(AnthropicThinking::Enabled { budget_tokens }) => Some(budgets.effort_for(budget_tokens)),
        Some(AnthropicThinking::Disabled) | None => None,
    };

    Ok(CompletionRequest {
        model: req.model,
        messages,
        params: CompletionParams {
            temperature: req.temperature,
            top_p: req.top_p,
            top_k: req.top_k,
            max_tokens: req.max_tokens,
            ..CompletionParams::default()
        },
        stop: req.stop_sequences.and_then(Stop::from_vec),
        stream: req.stream.unwrap_or(false),
        tools: req.tools.map(|tools| tools.into_iter().map(Into::into).collect()),
        tool_choice: req.tool_choice.map(tool_choice_to_unified),
        reasoning_effort,
        user: req.metadata.and_then(|m| m.user_id),
        ..CompletionRequest::default()
    })
}

fn message_to_unified(msg: AnthropicMessage) -> Result<Vec<Message>, LlmError> {
    let role = match msg.role.as_str() {
        "user" => Role::User,
        "assistant" => Role::Assistant,
        other => return Err(LlmError::InvalidRequest(format!("unsupported message role '{other}'"))),
    };

    let blocks = match msg.content {
        AnthropicContent::Text(text) => return Ok(vec![Message::text(role, text)]),
        AnthropicContent::Blocks(blocks) => blocks,
    };

    let mut tool_results = Vec::new();
    let mut parts = Vec::new();
    let mut turn = AssistantTurn::default();

    for block in blocks {
        match block {
            AnthropicContentBlock::Text { text } => parts.push(ContentPart::Text { text }),
            AnthropicContentBlock::Image { source } => parts.push(ContentPart::ImageUrl {
                url: image_url(source),
                detail: None,
            }),
            AnthropicContentBlock::ToolUse { id, name, input } => turn.push_tool_call(id, name, input.to_string()),
            AnthropicContentBlock::ToolResult {
                tool_use_id,
                content,
                is_error,
            } => tool_results.push(Message {
                role: Role::Tool,
                content: Some(Content::Text(
                    content.as_ref().map(AnthropicToolResultContent::as_text).unwrap_or_default(),
                )),
                tool_call_id: Some(tool_use_id),
                tool_call_is_error: is_error,
                ..Message::default()
            }),
            AnthropicContentBlock::Thinking { thinking, signature } => {
                turn.push_reasoning(&thinking);
                if let Some(signature) = signature {
                    turn.set_signature(signature);
                }
            }
            AnthropicContentBlock::RedactedThinking { data } => turn.set_signature(data),
        }
    }

    let has_rest = !parts.is_empty() || !turn.is_empty();
    if has_rest || tool_results.is_empty() {
        let mut message = turn.into_message();
        message.role = role;
        if !parts.is_empty() {
            message.content = Some(Content::from_parts(parts));
        }
        tool_results.push(message);
    }

    Ok(tool_results)
}

fn image_url(source: AnthropicImageSource) -> String {
    match source {
        AnthropicImageSource::Base64 { media_type, data } => format!("data:{media_type};base64,{data}"),
        AnthropicImageSource::Url { url } => url,
    }
}

fn tool_choice_to_unified(choice: AnthropicToolChoice) -> ToolChoice {
    match choice {
        AnthropicToolChoice::Auto => ToolChoice::Mode(ToolChoiceMode::Auto),
        AnthropicToolChoice::Any => ToolChoice::Mode(ToolChoiceMode::Required),
        AnthropicToolChoice::None => ToolChoice::Mode(ToolChoiceMode::None),
        AnthropicToolChoice::Tool { name } => ToolChoice::function(name),
    }
}

impl From<AnthropicTool> for ToolDefinition {
    fn from(tool: AnthropicTool) -> Self {
        Self::function(tool.name, tool.description, tool.input_schema)
    }
}

// -- Request: unified -> Anthropic --

/// Build an Anthropic request
///
/// System messages are joined into the top-level prompt and consecutive
/// tool results share one user turn.
pub fn request_from_unified(req: &CompletionRequest, budgets: &ReasoningBudgets) -> AnthropicRequest {
    let system = req
        .messages
        .iter()
        .filter(|m| m.role == Role::System)
        .map(Message::content_text)
        .collect::<Vec<_>>();

    let mut messages: Vec<AnthropicMessage> = Vec::with_capacity(req.messages.len());
    for msg in req.messages.iter().filter(|m| m.role != Role::System) {
        if msg.role != Role::Tool {
            messages.push(message_from_unified(msg));
            continue;
        }

        let block = tool_result_block(msg);
        if let Some(AnthropicMessage {
            role,
            content: AnthropicContent::Blocks(blocks),
        }) = messages.last_mut()
            && *role == "user"
            && blocks.iter().all(|b| matches!(b, AnthropicContentBlock::ToolResult { .. }))
        {
            blocks.push(block);
        } else {
            messages.push(AnthropicMessage {
                role: "user".to_owned(),
                content: AnthropicContent::Blocks(vec![block]),
            });
        }
    }

    let thinking = req.reasoning_effort.map(|effort| AnthropicThinking::Enabled {
        budget_tokens: budgets.budget_for(effort),
    });

    let mut max_tokens = req.effective_max_tokens().unwrap_or(DEFAULT_MAX_TOKENS);
    if let Some(AnthropicThinking::Enabled { budget_tokens }) = thinking
        && max_tokens <= budget_tokens
    {
        max_tokens = budget_tokens.saturating_add(DEFAULT_MAX_TOKENS);
    }

    // Sampling overrides are rejected alongside extended thinking
    let (temperature, top_k) = if thinking.is_some() {
        (None, None)
    } else {
        (req.params.temperature, req.params.top_k)
    };

    AnthropicRequest {
        model: req.model.clone(),
        max_tokens: Some(max_tokens),
        system: (!system.is_empty()).then(|| AnthropicSystem::Text(system.join("\n"))),
        messages,
        temperature,
        top_p: req.params.top_p,
        top_k,
        stop_sequences: req.stop.as_ref().map(Stop::to_vec),
        stream: req.stream.then_some(true),
        tools: req.tools.as_ref().map(|tools| tools.iter().map(tool_from_unified).collect()),
        tool_choice: req.tool_choice.as_ref().map(tool_choice_from_unified),
        thinking,
        metadata: req.user.clone().map(|user_id| AnthropicMetadata { user_id: Some(user_id) }),
    }
}

fn message_from_unified(msg: &Message) -> AnthropicMessage {
    let (role, blocks) = if msg.role == Role::Assistant {
        ("assistant", assistant_blocks(msg))
    } else {
        let blocks = msg
            .content
            .clone()
            .map(Content::into_parts)
            .unwrap_or_default()
            .into_iter()
            .filter_map(part_to_block)
            .collect();
        ("user", blocks)
    };

    let content = match <[AnthropicContentBlock; 1]>::try_from(blocks) {
        Ok([AnthropicContentBlock::Text { text }]) => AnthropicContent::Text(text),
        Ok([block]) => AnthropicContent::Blocks(vec![block]),
        Err(blocks) if blocks.is_empty() => AnthropicContent::Text(String::new()),
        Err(blocks) => AnthropicContent::Blocks(blocks),
    };

    AnthropicMessage {
        role: role.to_owned(),
        content,
    }
}

/// Thinking, text and tool-use blocks of an assistant message, in that order
fn assistant_blocks(msg: &Message) -> Vec<AnthropicContentBlock> {
    let mut blocks = Vec::new();

    match (msg.reasoning_content.as_ref(), msg.reasoning_signature.as_ref()) {
        (Some(thinking), signature) if !thinking.is_empty() => blocks.push(AnthropicContentBlock::Thinking {
            thinking: thinking.clone(),
            signature: signature.cloned(),
        }),
        (_, Some(data)) => blocks.push(AnthropicContentBlock::RedactedThinking { data: data.clone() }),
        _ => {}
    }

    let text = msg.content_text();
    if !text.is_empty() {
        blocks.push(AnthropicContentBlock::Text { text });
    }

    for call in msg.tool_calls.iter().flatten() {
        blocks.push(AnthropicContentBlock::ToolUse {
            id: call.id.clone(),
            name: call.function.name.clone(),
            input: serde_json::from_str(&call.function.arguments).unwrap_or_else(|_| json!({})),
        });
    }

    blocks
}

fn part_to_block(part: ContentPart) -> Option<AnthropicContentBlock> {
    match part {
        ContentPart::Text { text } => Some(AnthropicContentBlock::Text { text }),
        ContentPart::ImageUrl { url, .. } => Some(AnthropicContentBlock::Image {
            source: image_source(&url),
        }),
        ContentPart::InputAudio { format, .. } => {
            tracing::debug!(format = %format, "dropping audio part unsupported by anthropic");
            None
        }
    }
}

fn image_source(url: &str) -> AnthropicImageSource {
    if let Some(rest) = url.strip_prefix("data:")
        && let Some((mime_and_encoding, data)) = rest.split_once(',')
    {
        let media_type = mime_and_encoding.strip_suffix(";base64").unwrap_or(mime_and_encoding);
        AnthropicImageSource::Base64 {
            media_type: media_type.to_owned(),
            data: data.to_owned(),
        }
    } else {
        AnthropicImageSource::Url { url: url.to_owned() }
    }
}

fn tool_result_block(msg: &Message) -> AnthropicContentBlock {
    AnthropicContentBlock::ToolResult {
        tool_use_id: msg.tool_call_id.clone().unwrap_or_default(),
        content: Some(AnthropicToolResultContent::Text(msg.content_text())),
        is_error: msg.tool_call_is_error,
    }
}

fn tool_from_unified(tool: &ToolDefinition) -> AnthropicTool {
    AnthropicTool {
        name: tool.function.name.clone(),
        description: tool.function.description.clone(),
        input_schema: tool
            .function
            .parameters
            .clone()
            .unwrap_or_else(|| json!({"type": "object", "properties": {}})),
    }
}

fn tool_choice_from_unified(choice: &ToolChoice) -> AnthropicToolChoice {
    match choice {
        ToolChoice::Mode(ToolChoiceMode::None) => AnthropicToolChoice::None,
        ToolChoice::Mode(ToolChoiceMode::Auto) => AnthropicToolChoice::Auto,
        ToolChoice::Mode(ToolChoiceMode::Required) => AnthropicToolChoice::Any,
        ToolChoice::Function(function) => AnthropicToolChoice::Tool {
            name: function.function.name.clone(),
        },
    }
}

// -- Response --

/// Map an Anthropic stop reason onto a finish reason
pub fn finish_reason_from_stop(stop_reason: &str) -> FinishReason {
    match stop_reason {
        "end_turn" | "stop_sequence" | "pause_turn" => FinishReason::Stop,
        "max_tokens" => FinishReason::Length,
        "tool_use" => FinishReason::ToolCalls,
        "refusal" => FinishReason::ContentFilter,
        other => FinishReason::Other(other.to_owned()),
    }
}

/// Map a finish reason onto an Anthropic stop reason
pub fn stop_reason_from_finish(reason: &FinishReason) -> String {
    match reason {
        FinishReason::Stop => "end_turn".to_owned(),
        FinishReason::Length => "max_tokens".to_owned(),
        FinishReason::ToolCalls => "tool_use".to_owned(),
        FinishReason::ContentFilter => "refusal".to_owned(),
        FinishReason::Other(other) => other.clone(),
    }
}

/// Arguments carried by a `tool_use` block start
///
/// The empty input object that precedes streamed `input_json_delta`
/// fragments contributes nothing.
pub(crate) fn initial_arguments(input: &serde_json::Value) -> String {
    let empty = input.is_null() || input.as_object().is_some_and(serde_json::Map::is_empty);
    if empty { String::new() } else { input.to_string() }
}

/// Assistant output collected block by block
#[derive(Debug, Default)]
pub(crate) struct AssistantTurn {
    text: String,
    reasoning: Option<String>,
    signature: Option<String>,
    tool_calls: Vec<ToolCall>,
}

impl AssistantTurn {
    pub(crate) fn push_text(&mut self, text: &str) {
        self.text.push_str(text);
    }

    pub(crate) fn push_reasoning(&mut self, text: &str) {
        self.reasoning.get_or_insert_with(String::new).push_str(text);
    }

    pub(crate) fn set_signature(&mut self, signature: String) {
        self.signature = Some(signature);
    }

    pub(crate) fn push_tool_call(&mut self, id: String, name: String, arguments: String) {
        let index = self.tool_calls.last().map_or(0, |last| last.index + 1);
        self.tool_calls.push(ToolCall::new(index, id, name, arguments));
    }

    pub(crate) fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    fn is_empty(&self) -> bool {
        self.text.is_empty() && self.reasoning.is_none() && self.signature.is_none() && self.tool_calls.is_empty()
    }

    /// Assistant message; text content is omitted only when tools were called
    pub(crate) fn into_message(self) -> Message {
        let content = (!self.text.is_empty() || self.tool_calls.is_empty()).then_some(Content::Text(self.text));

        Message {
            role: Role::Assistant,
            content,
            tool_calls: (!self.tool_calls.is_empty()).then_some(self.tool_calls),
            reasoning_content: self.reasoning,
            reasoning_signature: self.signature,
            ..Message::default()
        }
    }
}

impl From<AnthropicResponse> for CompletionResponse {
    fn from(resp: AnthropicResponse) -> Self {
        let mut turn = AssistantTurn::default();

        for block in resp.content {
            match block {
                AnthropicContentBlock::Text { text } => turn.push_text(&text),
                AnthropicContentBlock::Thinking { thinking, signature } => {
                    turn.push_reasoning(&thinking);
                    if let Some(signature) = signature {
                        turn.set_signature(signature);
                    }
                }
                AnthropicContentBlock::RedactedThinking { data } => turn.set_signature(data),
                AnthropicContentBlock::ToolUse { id, name, input } => turn.push_tool_call(id, name, input.to_string()),
                AnthropicContentBlock::Image { .. } | AnthropicContentBlock::ToolResult { .. } => {}
            }
        }

        Self {
            id: resp.id,
            object: "chat.completion".to_owned(),
            created: unix_now(),
            model: resp.model,
            choices: vec![Choice {
                index: 0,
                message: Some(turn.into_message()),
                finish_reason: resp.stop_reason.as_deref().map(finish_reason_from_stop),
                ..Choice::default()
            }],
            usage: Some(resp.usage.into()),
            ..Self::default()
        }
    }
}

impl From<&CompletionResponse> for AnthropicResponse {
    fn from(resp: &CompletionResponse) -> Self {
        let choice = resp.first_choice();
        let content = choice
            .and_then(|c| c.message.as_ref().or(c.delta.as_ref()))
            .map(assistant_blocks)
            .unwrap_or_default();

        let stop_reason = choice.and_then(|c| c.finish_reason.as_ref()).map_or_else(
            || {
                let called_tools = content.iter().any(|b| matches!(b, AnthropicContentBlock::ToolUse { .. }));
                let reason = if called_tools { "tool_use" } else { "end_turn" };
                reason.to_owned()
            },
            stop_reason_from_finish,
        );

        Self {
            id: if resp.id.is_empty() {
                generate_id("msg_")
            } else {
                resp.id.clone()
            },
            response_type: "message".to_owned(),
            role: "assistant".to_owned(),
            content,
            model: resp.model.clone(),
            stop_reason: Some(stop_reason),
            stop_sequence: None,
            usage: resp.usage.map(Into::into).unwrap_or_default(),
        }
    }
}

impl From<AnthropicUsage> for Usage {
    fn from(usage: AnthropicUsage) -> Self {
        let cached = usage.cache_read_input_tokens.unwrap_or(0);
        let written = usage.cache_creation_input_tokens.unwrap_or(0);
        let prompt = usage.input_tokens.saturating_add(cached).saturating_add(written);

        Self {
            prompt_tokens_details: (cached > 0 || written > 0).then_some(PromptTokensDetails {
                cached_tokens: cached,
                cache_write_tokens: (written > 0).then_some(written),
            }),
            ..Self::new(prompt, usage.output_tokens)
        }
    }
}

impl From<Usage> for AnthropicUsage {
    fn from(usage: Usage) -> Self {
        let cached = usage.cached_tokens();
        let written = usage.cache_write_tokens();
        Self {
            input_tokens: usage.prompt_tokens.saturating_sub(cached).saturating_sub(written),
            output_tokens: usage.completion_tokens,
            cache_creation_input_tokens: (written > 0).then_some(written),
            cache_read_input_tokens: (cached > 0).then_some(cached),
        }
    }
}

// -- Errors --

/// Normalize an Anthropic error body over `fallback`
pub(crate) fn error_to_unified(body: &str, mut fallback: ResponseError) -> ResponseError {
    if let Ok(parsed) = serde_json::from_str::<AnthropicErrorResponse>(body) {
        fallback.error_type = parsed.error.error_type;
        fallback.message = parsed.error.message;
    } else if !body.trim().is_empty() {
        fallback.message = body.trim().to_owned();
    }

    fallback
}

/// Render a unified error in Anthropic's envelope
pub(crate) fn error_from_unified(error: &ResponseError) -> AnthropicErrorResponse {
    AnthropicErrorResponse {
        response_type: "error".to_owned(),
        error: AnthropicErrorDetail {
            error_type: error.error_type.clone(),
            message: error.message.clone(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ReasoningEffort;

    fn parse(value: serde_json::Value) -> CompletionRequest {
        let req: AnthropicRequest = serde_json::from_value(value).unwrap();
        request_to_unified(req, &ReasoningBudgets::default()).unwrap()
    }

    #[test]
    fn system_prompt_becomes_leading_message() {
        let req = parse(json!({
            "model": "claude-sonnet-4-20250514",
            "max_tokens": 1024,
            "system": [{"type": "text", "text": "Be brief."}, {"type": "text", "text": "Be kind."}],
            "messages": [{"role": "user", "content": "Hi"}]
        }));

        assert_eq!(req.messages.len(), 2);
        assert_eq!(req.messages[0].role, Role::System);
        assert_eq!(req.messages[0].content_text(), "Be brief.\nBe kind.");
        assert_eq!(req.params.max_tokens, Some(1024));
    }

    #[test]
    fn tool_results_split_into_tool_messages() {
        let req = parse(json!({
            "model": "m",
            "max_tokens": 100,
            "messages": [
                {"role": "assistant", "content": [
                    {"type": "text", "text": "Checking"},
                    {"type": "tool_use", "id": "toolu_1", "name": "get_weather", "input": {"city": "Paris"}},
                    {"type": "tool_use", "id": "toolu_2", "name": "get_time", "input": {}}
                ]},
                {"role": "user", "content": [
                    {"type": "tool_result", "tool_use_id": "toolu_1", "content": "Sunny"},
                    {"type": "tool_result", "tool_use_id": "toolu_2", "content": [{"type": "text", "text": "noon"}], "is_error": true},
                    {"type": "text", "text": "Thanks"}
                ]}
            ]
        }));

        let assistant = &req.messages[0];
        let calls = assistant.tool_calls.as_ref().unwrap();
        assert_eq!(calls[0].index, 0);
        assert_eq!(calls[1].index, 1);
        assert_eq!(calls[0].function.arguments, r#"{"city":"Paris"}"#);
        assert_eq!(assistant.content_text(), "Checking");

        assert_eq!(req.messages[1].role, Role::Tool);
        assert_eq!(req.messages[1].tool_call_id.as_deref(), Some("toolu_1"));
        assert_eq!(req.messages[2].content_text(), "noon");
        assert_eq!(req.messages[2].tool_call_is_error, Some(true));
        assert_eq!(req.messages[3].role, Role::User);
        assert_eq!(req.messages[3].content_text(), "Thanks");
    }

    #[test]
    fn thinking_maps_to_effort_and_back() {
        let req = parse(json!({
            "model": "m",
            "max_tokens": 64000,
            "thinking": {"type": "enabled", "budget_tokens": 10000},
            "metadata": {"user_id": "u-1"},
            "messages": [{"role": "user", "content": "Hi"}]
        }));
        assert_eq!(req.reasoning_effort, Some(ReasoningEffort::Medium));
        assert_eq!(req.user.as_deref(), Some("u-1"));

        let back = request_from_unified(&req, &ReasoningBudgets::default());
        assert_eq!(back.thinking, Some(AnthropicThinking::Enabled { budget_tokens: 15_000 }));
        assert_eq!(back.max_tokens, Some(64_000));
        assert_eq!(back.metadata.and_then(|m| m.user_id).as_deref(), Some("u-1"));
    }

    #[test]
    fn thinking_raises_small_max_tokens() {
        let req = CompletionRequest {
            model: "m".to_owned(),
            messages: vec![Message::text(Role::User, "Hi")],
            params: CompletionParams {
                max_tokens: Some(1000),
                temperature: Some(0.2),
                ..CompletionParams::default()
            },
            reasoning_effort: Some(ReasoningEffort::Low),
            ..CompletionRequest::default()
        };

        let out = request_from_unified(&req, &ReasoningBudgets::default());
        assert_eq!(out.max_tokens, Some(5_000 + DEFAULT_MAX_TOKENS));
        assert!(out.temperature.is_none());
    }

    #[test]
    fn default_max_tokens_and_system_join() {
        let req = CompletionRequest {
            model: "m".to_owned(),
            messages: vec![
                Message::text(Role::System, "One."),
                Message::text(Role::System, "Two."),
                Message::text(Role::User, "Hi"),
            ],
            ..CompletionRequest::default()
        };

        let out = request_from_unified(&req, &ReasoningBudgets::default());
        assert_eq!(out.max_tokens, Some(DEFAULT_MAX_TOKENS));
        assert_eq!(out.system.unwrap().as_text(), "One.\nTwo.");
        assert_eq!(out.messages.len(), 1);
        assert!(matches!(&out.messages[0].content, AnthropicContent::Text(t) if t == "Hi"));
    }

    #[test]
    fn consecutive_tool_results_share_a_user_turn() {
        let req = CompletionRequest {
            model: "m".to_owned(),
            messages: vec![
                Message::text(Role::User, "Weather?"),
                Message {
                    tool_calls: Some(vec![
                        ToolCall::new(0, "toolu_1", "get_weather", r#"{"city":"Paris"}"#),
                        ToolCall::new(1, "toolu_2", "get_time", "not json"),
                    ]),
                    ..Message::default()
                },
                Message {
                    tool_call_id: Some("toolu_1".to_owned()),
                    ..Message::text(Role::Tool, "Sunny")
                },
                Message {
                    tool_call_id: Some("toolu_2".to_owned()),
                    tool_call_is_error: Some(true),
                    ..Message::text(Role::Tool, "boom")
                },
            ],
            ..CompletionRequest::default()
        };

        let out = request_from_unified(&req, &ReasoningBudgets::default());
        assert_eq!(out.messages.len(), 3);

        let AnthropicContent::Blocks(assistant) = &out.messages[1].content else {
            panic!("expected blocks");
        };
        assert_eq!(
            assistant[1],
            AnthropicContentBlock::ToolUse {
                id: "toolu_2".to_owned(),
                name: "get_time".to_owned(),
                input: json!({}),
            }
        );

        let AnthropicContent::Blocks(results) = &out.messages[2].content else {
            panic!("expected blocks");
        };
        assert_eq!(results.len(), 2);
        assert!(matches!(
            &results[1],
            AnthropicContentBlock::ToolResult { is_error: Some(true), .. }
        ));
    }

    #[test]
    fn data_uri_becomes_base64_source() {
        assert_eq!(
            image_source("data:image/png;base64,iVBOR"),
            AnthropicImageSource::Base64 {
                media_type: "image/png".to_owned(),
                data: "iVBOR".to_owned(),
            }
        );
        assert_eq!(
            image_source("https://example.com/cat.png"),
            AnthropicImageSource::Url {
                url: "https://example.com/cat.png".to_owned()
            }
        );
    }

    #[test]
    fn tool_choice_modes() {
        assert!(matches!(
            tool_choice_from_unified(&ToolChoice::Mode(ToolChoiceMode::None)),
            AnthropicToolChoice::None
        ));
        assert!(matches!(
            tool_choice_from_unified(&ToolChoice::Mode(ToolChoiceMode::Required)),
            AnthropicToolChoice::Any
        ));
        assert_eq!(
            tool_choice_to_unified(AnthropicToolChoice::Tool { name: "f".to_owned() }),
            ToolChoice::function("f")
        );
    }

    #[test]
    fn response_to_unified_collects_blocks() {
        let resp: AnthropicResponse = serde_json::from_value(json!({
            "id": "msg_01",
            "type": "message",
            "role": "assistant",
            "model": "claude-sonnet-4-20250514",
            "content": [
                {"type": "thinking", "thinking": "Let me see.", "signature": "sig"},
                {"type": "text", "text": "Hello!"},
                {"type": "tool_use", "id": "toolu_1", "name": "lookup", "input": {"q": 1}}
            ],
            "stop_reason": "tool_use",
            "usage": {"input_tokens": 10, "output_tokens": 5, "cache_read_input_tokens": 4}
        }))
        .unwrap();

        let unified = CompletionResponse::from(resp);
        let choice = unified.first_choice().unwrap();
        let message = choice.message.as_ref().unwrap();

        assert_eq!(message.content_text(), "Hello!");
        assert_eq!(message.reasoning_content.as_deref(), Some("Let me see."));
        assert_eq!(message.reasoning_signature.as_deref(), Some("sig"));
        assert_eq!(message.tool_calls.as_ref().unwrap()[0].function.arguments, r#"{"q":1}"#);
        assert_eq!(choice.finish_reason, Some(FinishReason::ToolCalls));

        let usage = unified.usage.unwrap();
        assert_eq!(usage.prompt_tokens, 14);
        assert_eq!(usage.cached_tokens(), 4);
        assert_eq!(usage.total_tokens, 19);
    }

    #[test]
    fn cache_usage_survives_the_round_trip() {
        let wire = AnthropicUsage {
            input_tokens: 10,
            output_tokens: 5,
            cache_creation_input_tokens: Some(6),
            cache_read_input_tokens: Some(4),
        };

        let unified = Usage::from(wire);
        assert_eq!(unified.prompt_tokens, 20);
        assert_eq!(unified.cached_tokens(), 4);
        assert_eq!(unified.cache_write_tokens(), 6);

        let back = AnthropicUsage::from(unified);
        assert_eq!(back.input_tokens, 10);
        assert_eq!(back.output_tokens, 5);
        assert_eq!(back.cache_creation_input_tokens, Some(6));
        assert_eq!(back.cache_read_input_tokens, Some(4));

        let plain = AnthropicUsage::from(Usage::new(9, 3));
        assert_eq!(plain.input_tokens, 9);
        assert_eq!(plain.cache_creation_input_tokens, None);
        assert_eq!(plain.cache_read_input_tokens, None);
    }

    #[test]
    fn unified_to_response_maps_stop_reason() {
        let unified = CompletionResponse {
            id: "chatcmpl-1".to_owned(),
            model: "gpt-4o".to_owned(),
            choices: vec![Choice {
                message: Some(Message::text(Role::Assistant, "Hello!")),
                finish_reason: Some(FinishReason::Length),
                ..Choice::default()
            }],
            usage: Some(Usage::new(9, 3)),
            ..CompletionResponse::default()
        };

        let resp = AnthropicResponse::from(&unified);
        assert_eq!(resp.stop_reason.as_deref(), Some("max_tokens"));
        assert_eq!(resp.content, vec![AnthropicContentBlock::Text { text: "Hello!".to_owned() }]);
        assert_eq!(resp.usage.input_tokens, 9);
        assert_eq!(resp.usage.output_tokens, 3);
    }

    #[test]
    fn stop_reasons_roundtrip() {
        for reason in ["end_turn", "max_tokens", "tool_use", "refusal", "custom_reason"] {
            assert_eq!(stop_reason_from_finish(&finish_reason_from_stop(reason)), reason);
        }
        assert_eq!(finish_reason_from_stop("stop_sequence"), FinishReason::Stop);
    }

    #[test]
    fn error_body_parsed() {
        let fallback = ResponseError {
            status: 429,
            error_type: "rate_limit_error".to_owned(),
            code: None,
            message: "raw".to_owned(),
            request_id: Some("req_1".to_owned()),
        };
        let body = r#"{"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#;

        let err = error_to_unified(body, fallback.clone());
        assert_eq!(err.error_type, "overloaded_error");
        assert_eq!(err.message, "Overloaded");
        assert_eq!(err.request_id.as_deref(), Some("req_1"));

        let plain = error_to_unified("  upstream down \n", fallback);
        assert_eq!(plain.message, "upstream down");
        assert_eq!(plain.error_type, "rate_limit_error");
    }
}
