use std::fmt;

/// External wire format a request arrived in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApiFormat {
    /// `OpenAI` chat completions
    OpenAiChatCompletions,
    /// Anthropic messages
    AnthropicMessages,
    /// `OpenRouter` chat completions
    OpenRouterChatCompletions,
}

impl ApiFormat {
    /// Stable identifier used in logs and error messages
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::OpenAiChatCompletions => "openai/chat_completions",
            Self::AnthropicMessages => "anthropic/messages",
            Self::OpenRouterChatCompletions => "openrouter/chat_completions",
        }
    }
}

impl fmt::Display for ApiFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
