//! Folding unified stream chunks into one response

use std::collections::BTreeMap;

use crate::types::{Choice, CompletionResponse, Content, FinishReason, Message, Role, ToolCall, Usage, merge_usage};

#[derive(Debug, Default)]
struct ChoiceState {
    content: String,
    reasoning: Option<String>,
    signature: Option<String>,
    tool_calls: BTreeMap<u32, ToolCall>,
    finish_reason: Option<FinishReason>,
}

impl ChoiceState {
    fn apply(&mut self, delta: &Message) {
        if let Some(content) = &delta.content {
            self.content.push_str(&content.as_text());
        }
        if let Some(reasoning) = &delta.reasoning_content {
            self.reasoning.get_or_insert_with(String::new).push_str(reasoning);
        }
        if let Some(signature) = delta.reasoning_signature.as_ref().filter(|s| !s.is_empty()) {
            self.signature = Some(signature.clone());
        }

        for call in delta.tool_calls.iter().flatten() {
            let entry = self
                .tool_calls
                .entry(call.index)
                .or_insert_with(|| ToolCall::new(call.index, "", "", ""));
            if entry.id.is_empty() && !call.id.is_empty() {
                entry.id.clone_from(&call.id);
            }
            if entry.function.name.is_empty() && !call.function.name.is_empty() {
                entry.function.name.clone_from(&call.function.name);
            }
            entry.function.arguments.push_str(&call.function.arguments);
        }
    }

    fn into_choice(self, index: u32) -> Choice {
        let tool_calls: Vec<ToolCall> = self.tool_calls.into_values().collect();
        let finish_reason = self.finish_reason.unwrap_or(if tool_calls.is_empty() {
            FinishReason::Stop
        } else {
            FinishReason::ToolCalls
        });
        let content = (!self.content.is_empty() || tool_calls.is_empty()).then_some(Content::Text(self.content));

        Choice {
            index,
            message: Some(Message {
                role: Role::Assistant,
                content,
                tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
                reasoning_content: self.reasoning,
                reasoning_signature: self.signature,
                ..Message::default()
            }),
            finish_reason: Some(finish_reason),
            ..Choice::default()
        }
    }
}

/// Fold stream chunks into a single non-streaming response
///
/// Text and reasoning concatenate per choice, tool-call fragments join by
/// tool-call index with the first non-empty id and name kept, and the last
/// finish reason wins. Usage merges across reports. No chunks yields an empty
/// response with no choices.
pub fn aggregate_chunks<'a, I>(chunks: I) -> CompletionResponse
where
    I: IntoIterator<Item = &'a CompletionResponse>,
{
    let mut response = CompletionResponse {
        object: "chat.completion".to_owned(),
        ..CompletionResponse::default()
    };
    let mut choices: BTreeMap<u32, ChoiceState> = BTreeMap::new();
    let mut usage: Option<Usage> = None;

    for chunk in chunks {
        if chunk.is_done() {
            continue;
        }

        if response.id.is_empty() {
            response.id.clone_from(&chunk.id);
        }
        if response.model.is_empty() {
            response.model.clone_from(&chunk.model);
        }
        if response.created == 0 {
            response.created = chunk.created;
        }
        if chunk.system_fingerprint.is_some() {
            response.system_fingerprint.clone_from(&chunk.system_fingerprint);
        }
        if chunk.service_tier.is_some() {
            response.service_tier.clone_from(&chunk.service_tier);
        }
        usage = merge_usage(usage, chunk.usage);

        for choice in &chunk.choices {
            let state = choices.entry(choice.index).or_default();
            if let Some(delta) = choice.delta.as_ref().or(choice.message.as_ref()) {
                state.apply(delta);
            }
            if let Some(reason) = choice.finish_reason.as_ref().filter(|r| !r.as_str().is_empty()) {
                state.finish_reason = Some(reason.clone());
            }
        }
    }

    response.choices = choices
        .into_iter()
        .map(|(index, state)| state.into_choice(index))
        .collect();
    response.usage = usage;
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delta_chunk(delta: Message, finish: Option<FinishReason>) -> CompletionResponse {
        CompletionResponse {
            id: "chatcmpl-7".to_owned(),
            object: "chat.completion.chunk".to_owned(),
            created: 1_700_000_000,
            model: "gpt-4o-mini".to_owned(),
            choices: vec![Choice {
                delta: Some(delta),
                finish_reason: finish,
                ..Choice::default()
            }],
            ..CompletionResponse::default()
        }
    }

    #[test]
    fn empty_input_yields_empty_response() {
        let resp = aggregate_chunks(std::iter::empty());
        assert!(resp.choices.is_empty());
        assert!(resp.usage.is_none());
        assert_eq!(resp.object, "chat.completion");
    }

    #[test]
    fn concatenates_text_and_merges_usage() {
        let chunks = vec![
            delta_chunk(Message::text(Role::Assistant, "Hello"), None),
            delta_chunk(Message::text(Role::Assistant, "! How can I help?"), None),
            delta_chunk(Message::default(), Some(FinishReason::Stop)),
            CompletionResponse {
                choices: Vec::new(),
                usage: Some(Usage::new(10, 8)),
                ..delta_chunk(Message::default(), None)
            },
            CompletionResponse::done(),
        ];

        let resp = aggregate_chunks(&chunks);
        assert_eq!(resp.id, "chatcmpl-7");
        assert_eq!(resp.created, 1_700_000_000);
        let choice = resp.first_choice().unwrap();
        assert_eq!(choice.message.as_ref().unwrap().content_text(), "Hello! How can I help?");
        assert_eq!(choice.finish_reason, Some(FinishReason::Stop));
        assert_eq!(resp.usage.unwrap().total_tokens, 18);
    }

    #[test]
    fn joins_tool_fragments_by_index() {
        let call = |index, id: &str, name: &str, args: &str| Message {
            tool_calls: Some(vec![ToolCall::new(index, id, name, args)]),
            ..Message::default()
        };
        let chunks = vec![
            delta_chunk(call(0, "call_a", "get_weather", ""), None),
            delta_chunk(call(1, "call_b", "get_time", "{}"), None),
            delta_chunk(call(0, "", "", "{\"city\":"), None),
            delta_chunk(call(0, "", "", "\"Oslo\"}"), None),
        ];

        let resp = aggregate_chunks(&chunks);
        let choice = resp.first_choice().unwrap();
        let message = choice.message.as_ref().unwrap();
        let calls = message.tool_calls.as_ref().unwrap();

        assert!(message.content.is_none());
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].id, "call_a");
        assert_eq!(calls[0].function.name, "get_weather");
        assert_eq!(calls[0].function.arguments, "{\"city\":\"Oslo\"}");
        assert_eq!(calls[1].function.arguments, "{}");
        assert_eq!(choice.finish_reason, Some(FinishReason::ToolCalls));
    }

    #[test]
    fn last_finish_reason_wins() {
        let chunks = vec![
            delta_chunk(Message::default(), Some(FinishReason::Stop)),
            delta_chunk(Message::default(), Some(FinishReason::Length)),
        ];
        let resp = aggregate_chunks(&chunks);
        assert_eq!(resp.first_choice().unwrap().finish_reason, Some(FinishReason::Length));
    }
}
