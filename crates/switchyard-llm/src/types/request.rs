use serde::{Deserialize, Serialize};

use super::format::ApiFormat;
use super::message::Message;
use super::tool::{ToolChoice, ToolDefinition};

/// Sampling and length controls
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompletionParams {
    /// Sampling temperature (0.0 to 2.0)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    /// Nucleus sampling threshold
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    /// Top-k sampling
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    /// Legacy token bound
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Token bound including reasoning tokens
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_completion_tokens: Option<u32>,
    /// Frequency penalty (-2.0 to 2.0)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f64>,
    /// Presence penalty (-2.0 to 2.0)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f64>,
    /// Random seed for deterministic generation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

/// Stop condition
///
/// Deserialization tries `Single` first, then `Multiple`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Stop {
    /// One stop sequence
    Single(String),
    /// Several stop sequences
    Multiple(Vec<String>),
}

impl Stop {
    /// Stop sequences as a list
    pub fn to_vec(&self) -> Vec<String> {
        match self {
            Self::Single(stop) => vec![stop.clone()],
            Self::Multiple(stops) => stops.clone(),
        }
    }

    /// Build from a list, preferring the single-string arm for one entry
    pub fn from_vec(mut stops: Vec<String>) -> Option<Self> {
        match stops.len() {
            0 => None,
            1 => stops.pop().map(Self::Single),
            _ => Some(Self::Multiple(stops)),
        }
    }
}

/// Streaming options
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamOptions {
    /// Report usage in a final chunk without choices
    #[serde(default)]
    pub include_usage: bool,
}

/// Vendor-neutral reasoning effort hint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningEffort {
    /// Small thinking budget
    Low,
    /// Medium thinking budget
    Medium,
    /// Large thinking budget
    High,
}

/// Unified completion request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompletionRequest {
    /// Model identifier
    pub model: String,
    /// Conversation messages
    pub messages: Vec<Message>,
    /// Generation parameters
    #[serde(default)]
    pub params: CompletionParams,
    /// Stop condition
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop: Option<Stop>,
    /// Whether to stream the response
    #[serde(default)]
    pub stream: bool,
    /// Streaming options
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_options: Option<StreamOptions>,
    /// Tools available to the model
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolDefinition>>,
    /// How the model should select tools
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ToolChoice>,
    /// Response format hint, passed through untouched
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_format: Option<serde_json::Value>,
    /// Reasoning effort hint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_effort: Option<ReasoningEffort>,
    /// Free-form metadata
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
    /// End-user identifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    /// Wire format the request was received in
    #[serde(skip)]
    pub api_format: Option<ApiFormat>,
}

impl CompletionRequest {
    /// Token bound to send to a backend
    ///
    /// The larger value wins when both the legacy and the completion
    /// variant are set.
    pub fn effective_max_tokens(&self) -> Option<u32> {
        match (self.params.max_tokens, self.params.max_completion_tokens) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        }
    }

    /// Whether the final stream chunk should carry usage
    pub fn include_usage(&self) -> bool {
        self.stream_options.is_some_and(|o| o.include_usage)
    }
}
