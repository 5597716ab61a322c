use std::time::Duration;

use indexmap::IndexMap;
use secrecy::SecretString;
use serde::Deserialize;
use url::Url;

/// Top-level LLM configuration
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LlmConfig {
    /// Backends keyed by name, in declaration order
    #[serde(default)]
    pub backends: IndexMap<String, BackendConfig>,
    /// Retry and failover policy
    #[serde(default)]
    pub pipeline: PipelineConfig,
    /// Built-in request decorators
    #[serde(default)]
    pub decorators: DecoratorsConfig,
    /// Reasoning effort to thinking budget table
    #[serde(default)]
    pub reasoning: ReasoningConfig,
}

/// A backend is one vendor wire format reachable through one or more channels
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BackendConfig {
    /// Wire format spoken by every channel of this backend
    pub format: BackendFormat,
    /// Channels tried in order when failing over
    #[serde(default)]
    pub channels: Vec<ChannelConfig>,
}

/// Supported backend wire formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendFormat {
    /// OpenAI chat completions
    Openai,
    /// Anthropic messages
    Anthropic,
    /// OpenRouter chat completions
    Openrouter,
}

/// A credentialed route to one vendor endpoint
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChannelConfig {
    /// Name used in logs
    pub name: String,
    /// Base URL override; the vendor default is used when absent
    #[serde(default)]
    pub base_url: Option<Url>,
    /// API key sent with every request on this channel
    #[serde(default)]
    pub api_key: Option<SecretString>,
}

/// Retry policy of the pipeline
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfig {
    /// Additional attempts after the first one
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Pause between attempts (e.g. "250ms", "1s")
    #[serde(default = "default_retry_delay")]
    pub retry_delay: String,
    /// Error message substrings that allow a retry; empty retries everything
    #[serde(default)]
    pub retryable_errors: Vec<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retry_delay: default_retry_delay(),
            retryable_errors: Vec::new(),
        }
    }
}

impl PipelineConfig {
    /// Parsed `retry_delay`
    ///
    /// # Errors
    ///
    /// Returns an error if the duration string is malformed
    pub fn retry_delay(&self) -> anyhow::Result<Duration> {
        duration_str::parse(&self.retry_delay)
            .map_err(|e| anyhow::anyhow!("invalid retry_delay '{}': {e}", self.retry_delay))
    }
}

/// Settings for the built-in decorators
///
/// A decorator whose value is absent is not registered.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DecoratorsConfig {
    /// `max_tokens` applied when the caller sets none
    #[serde(default)]
    pub default_max_tokens: Option<u32>,
    /// Upper bound on `max_tokens`
    #[serde(default)]
    pub max_tokens_cap: Option<u32>,
    /// Temperature applied when the caller sets none
    #[serde(default)]
    pub default_temperature: Option<f64>,
    /// Ask backends for usage in the final chunk of every stream
    #[serde(default = "default_true")]
    pub force_stream_usage: bool,
}

impl Default for DecoratorsConfig {
    fn default() -> Self {
        Self {
            default_max_tokens: None,
            max_tokens_cap: None,
            default_temperature: None,
            force_stream_usage: true,
        }
    }
}

/// Thinking token budget per reasoning effort level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReasoningConfig {
    /// Budget for `low`
    #[serde(default = "default_low_budget")]
    pub low: u32,
    /// Budget for `medium`
    #[serde(default = "default_medium_budget")]
    pub medium: u32,
    /// Budget for `high`
    #[serde(default = "default_high_budget")]
    pub high: u32,
}

impl Default for ReasoningConfig {
    fn default() -> Self {
        Self {
            low: default_low_budget(),
            medium: default_medium_budget(),
            high: default_high_budget(),
        }
    }
}

const fn default_max_retries() -> u32 {
    2
}

fn default_retry_delay() -> String {
    "0s".to_owned()
}

const fn default_true() -> bool {
    true
}

const fn default_low_budget() -> u32 {
    5_000
}

const fn default_medium_budget() -> u32 {
    15_000
}

const fn default_high_budget() -> u32 {
    30_000
}
