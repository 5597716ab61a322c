//! Conversion between the unified model and the `OpenRouter` wire format

use crate::error::LlmError;
use crate::protocol::openai::{OpenAiResponse, OpenAiStreamChunk};
use crate::protocol::openrouter::{OpenRouterReasoning, OpenRouterRequest, OpenRouterUsageOptions};
use crate::types::{CompletionRequest, CompletionResponse, StreamOptions};

use super::openai::{self, Dialect};
use super::{ReasoningBudgets, effort_str, parse_effort};

/// Parse an `OpenRouter` request
///
/// `reasoning.effort` wins over the top-level `reasoning_effort`; an explicit
/// `reasoning.max_tokens` budget maps to the nearest effort level.
pub fn request_to_unified(req: OpenRouterRequest, budgets: &ReasoningBudgets) -> Result<CompletionRequest, LlmError> {
    let OpenRouterRequest { base, reasoning, usage } = req;
    let mut unified = openai::request_to_unified(base)?;

    if let Some(reasoning) = reasoning {
        if let Some(effort) = reasoning.effort.as_deref() {
            unified.reasoning_effort = Some(
                parse_effort(effort)
                    .ok_or_else(|| LlmError::InvalidRequest(format!("unsupported reasoning effort '{effort}'")))?,
            );
        } else if let Some(budget) = reasoning.max_tokens {
            unified.reasoning_effort = Some(budgets.effort_for(budget));
        }
    }

    if unified.stream && usage.is_some_and(|u| u.include) {
        unified.stream_options = Some(StreamOptions { include_usage: true });
    }

    Ok(unified)
}

/// Build an `OpenRouter` request
pub fn request_from_unified(req: &CompletionRequest) -> OpenRouterRequest {
    let mut base = openai::request_from_unified(req);
    base.reasoning_effort = None;

    OpenRouterRequest {
        base,
        reasoning: req.reasoning_effort.map(|effort| OpenRouterReasoning {
            effort: Some(effort_str(effort).to_owned()),
            ..OpenRouterReasoning::default()
        }),
        usage: Some(OpenRouterUsageOptions { include: true }),
    }
}

/// Render a unified response with reasoning in the `reasoning` field
pub fn response_from_unified(resp: &CompletionResponse) -> OpenAiResponse {
    openai::response_from_unified(resp, Dialect::OpenRouter)
}

/// Render a unified chunk with reasoning in the `reasoning` field
pub fn chunk_from_unified(chunk: &CompletionResponse) -> OpenAiStreamChunk {
    openai::chunk_from_unified(chunk, Dialect::OpenRouter)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::types::{Choice, Message, ReasoningEffort, Role};

    fn parse(value: serde_json::Value) -> CompletionRequest {
        let req: OpenRouterRequest = serde_json::from_value(value).unwrap();
        request_to_unified(req, &ReasoningBudgets::default()).unwrap()
    }

    #[test]
    fn reasoning_object_sets_effort() {
        let req = parse(json!({
            "model": "anthropic/claude-sonnet-4",
            "messages": [{"role": "user", "content": "Hi"}],
            "reasoning": {"effort": "high"}
        }));
        assert_eq!(req.reasoning_effort, Some(ReasoningEffort::High));
    }

    #[test]
    fn reasoning_budget_maps_to_effort() {
        let req = parse(json!({
            "model": "m",
            "messages": [{"role": "user", "content": "Hi"}],
            "reasoning": {"max_tokens": 12000}
        }));
        assert_eq!(req.reasoning_effort, Some(ReasoningEffort::Medium));
    }

    #[test]
    fn usage_include_requests_stream_usage() {
        let req = parse(json!({
            "model": "m",
            "messages": [{"role": "user", "content": "Hi"}],
            "stream": true,
            "usage": {"include": true}
        }));
        assert!(req.include_usage());
    }

    #[test]
    fn unknown_effort_is_rejected() {
        let req: OpenRouterRequest = serde_json::from_value(json!({
            "model": "m",
            "messages": [],
            "reasoning": {"effort": "extreme"}
        }))
        .unwrap();
        let err = request_to_unified(req, &ReasoningBudgets::default()).unwrap_err();
        assert!(matches!(err, LlmError::InvalidRequest(_)));
    }

    #[test]
    fn request_moves_effort_into_reasoning_object() {
        let unified = CompletionRequest {
            model: "openai/o3".to_owned(),
            messages: vec![Message::text(Role::User, "Hi")],
            reasoning_effort: Some(ReasoningEffort::Low),
            ..CompletionRequest::default()
        };

        let body = serde_json::to_value(request_from_unified(&unified)).unwrap();
        assert_eq!(body["reasoning"]["effort"], "low");
        assert_eq!(body["usage"]["include"], true);
        assert!(body.get("reasoning_effort").is_none());
        assert_eq!(body["model"], "openai/o3");
    }

    #[test]
    fn response_uses_reasoning_field() {
        let resp = CompletionResponse {
            id: "gen-1".to_owned(),
            choices: vec![Choice {
                message: Some(Message {
                    reasoning_content: Some("thinking".to_owned()),
                    ..Message::text(Role::Assistant, "answer")
                }),
                ..Choice::default()
            }],
            ..CompletionResponse::default()
        };

        let body = serde_json::to_value(response_from_unified(&resp)).unwrap();
        assert_eq!(body["choices"][0]["message"]["reasoning"], "thinking");
        assert!(body["choices"][0]["message"].get("reasoning_content").is_none());
    }
}
