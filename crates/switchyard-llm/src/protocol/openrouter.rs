//! `OpenRouter` chat completion extensions
//!
//! Responses, chunks and errors use the `OpenAI` types unchanged; reasoning
//! text travels in their `reasoning` field.

use serde::{Deserialize, Serialize};

use super::openai::OpenAiRequest;

/// `OpenRouter` chat completion request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OpenRouterRequest {
    /// Fields shared with `OpenAI`
    #[serde(flatten)]
    pub base: OpenAiRequest,
    /// Unified reasoning configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<OpenRouterReasoning>,
    /// Usage accounting options
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<OpenRouterUsageOptions>,
}

/// Reasoning configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OpenRouterReasoning {
    /// Effort level ("low", "medium", "high")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effort: Option<String>,
    /// Explicit thinking budget
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Hide reasoning text from the response
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exclude: Option<bool>,
}

/// Usage accounting options
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct OpenRouterUsageOptions {
    /// Include usage in the response
    #[serde(default)]
    pub include: bool,
}
