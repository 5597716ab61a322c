use std::fmt;

use serde::{Deserialize, Serialize};

use super::error::ResponseError;
use super::message::Message;

/// `object` value of the sentinel that terminates every unified stream
pub const DONE_MARKER: &str = "[DONE]";

/// Unified completion response, also used for each streamed chunk
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompletionResponse {
    /// Response identifier
    #[serde(default)]
    pub id: String,
    /// Object type ("chat.completion", "chat.completion.chunk" or the done marker)
    #[serde(default)]
    pub object: String,
    /// Unix timestamp of creation
    #[serde(default)]
    pub created: u64,
    /// Model that produced the response
    #[serde(default)]
    pub model: String,
    /// Generated choices
    #[serde(default)]
    pub choices: Vec<Choice>,
    /// Token usage; on streams only the final chunk carries it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    /// Backend configuration fingerprint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_fingerprint: Option<String>,
    /// Service tier that handled the request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_tier: Option<String>,
    /// Error reported in place of a completion
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ResponseError>,
}

impl CompletionResponse {
    /// Stream-terminating sentinel
    pub fn done() -> Self {
        Self {
            object: DONE_MARKER.to_owned(),
            ..Self::default()
        }
    }

    /// Whether this is the stream-terminating sentinel
    pub fn is_done(&self) -> bool {
        self.object == DONE_MARKER
    }

    /// First choice, if any
    pub fn first_choice(&self) -> Option<&Choice> {
        self.choices.first()
    }
}

/// One completion alternative
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Choice {
    /// Choice index
    #[serde(default)]
    pub index: u32,
    /// Complete message (non-streaming)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<Message>,
    /// Message fragment (streaming)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<Message>,
    /// Why generation stopped
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<FinishReason>,
    /// Log-probability detail, passed through untouched
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logprobs: Option<serde_json::Value>,
}

/// Why the model stopped generating
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum FinishReason {
    /// Natural stop or stop sequence
    Stop,
    /// Token bound reached
    Length,
    /// Model called tools
    ToolCalls,
    /// Output withheld by a content filter
    ContentFilter,
    /// Vendor-specific reason, kept verbatim
    Other(String),
}

impl FinishReason {
    /// Wire spelling
    pub fn as_str(&self) -> &str {
        match self {
            Self::Stop => "stop",
            Self::Length => "length",
            Self::ToolCalls => "tool_calls",
            Self::ContentFilter => "content_filter",
            Self::Other(other) => other,
        }
    }
}

impl From<String> for FinishReason {
    fn from(value: String) -> Self {
        match value.as_str() {
            "stop" => Self::Stop,
            "length" => Self::Length,
            "tool_calls" | "function_call" => Self::ToolCalls,
            "content_filter" => Self::ContentFilter,
            _ => Self::Other(value),
        }
    }
}

impl From<&str> for FinishReason {
    fn from(value: &str) -> Self {
        Self::from(value.to_owned())
    }
}

impl From<FinishReason> for String {
    fn from(value: FinishReason) -> Self {
        match value {
            FinishReason::Other(other) => other,
            known => known.as_str().to_owned(),
        }
    }
}

impl fmt::Display for FinishReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Token usage statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    /// Tokens in the prompt
    #[serde(default)]
    pub prompt_tokens: u32,
    /// Tokens in the completion
    #[serde(default)]
    pub completion_tokens: u32,
    /// Total tokens used
    #[serde(default)]
    pub total_tokens: u32,
    /// Prompt-side breakdown
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_tokens_details: Option<PromptTokensDetails>,
    /// Completion-side breakdown
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_tokens_details: Option<CompletionTokensDetails>,
}

/// Prompt token breakdown
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptTokensDetails {
    /// Tokens served from the prompt cache
    #[serde(default)]
    pub cached_tokens: u32,
    /// Tokens written to the prompt cache
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_write_tokens: Option<u32>,
}

/// Completion token breakdown
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionTokensDetails {
    /// Tokens spent on reasoning
    #[serde(default)]
    pub reasoning_tokens: u32,
}

impl Usage {
    /// Usage with a computed total
    pub const fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens.saturating_add(completion_tokens),
            prompt_tokens_details: None,
            completion_tokens_details: None,
        }
    }

    /// Combine usage seen earlier in a stream with usage seen later
    ///
    /// Prompt figures come from the earlier report and completion figures
    /// from the later one; a zero on either side falls back to the other.
    #[must_use]
    pub fn merge(&self, later: &Self) -> Self {
        let prompt_tokens = if self.prompt_tokens > 0 {
            self.prompt_tokens
        } else {
            later.prompt_tokens
        };
        let completion_tokens = if later.completion_tokens > 0 {
            later.completion_tokens
        } else {
            self.completion_tokens
        };

        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens.saturating_add(completion_tokens),
            prompt_tokens_details: self.prompt_tokens_details.or(later.prompt_tokens_details),
            completion_tokens_details: later.completion_tokens_details.or(self.completion_tokens_details),
        }
    }

    /// Cached prompt tokens, zero when not reported
    pub fn cached_tokens(&self) -> u32 {
        self.prompt_tokens_details.map_or(0, |d| d.cached_tokens)
    }

    /// Prompt tokens written to the cache, zero when not reported
    pub fn cache_write_tokens(&self) -> u32 {
        self.prompt_tokens_details
            .and_then(|d| d.cache_write_tokens)
            .unwrap_or(0)
    }
}

/// Merge an optional later usage report into an optional earlier one
pub fn merge_usage(earlier: Option<Usage>, later: Option<Usage>) -> Option<Usage> {
    match (earlier, later) {
        (Some(a), Some(b)) => Some(a.merge(&b)),
        (a, b) => a.or(b),
    }
}
