//! Programmatic configuration builder for integration tests

use secrecy::SecretString;
use switchyard_config::{BackendConfig, BackendFormat, ChannelConfig, LlmConfig};
use switchyard_llm::Gateway;

/// Builder for constructing test configurations
pub struct ConfigBuilder {
    config: LlmConfig,
}

impl ConfigBuilder {
    /// Create a new builder with no backends and no retry delay
    pub fn new() -> Self {
        Self {
            config: LlmConfig::default(),
        }
    }

    /// Add a backend whose channels point at the given base URLs, in order
    pub fn with_backend(mut self, name: &str, format: BackendFormat, base_urls: &[String]) -> Self {
        let channels = base_urls
            .iter()
            .enumerate()
            .map(|(index, base_url)| ChannelConfig {
                name: format!("channel-{index}"),
                base_url: Some(base_url.parse().expect("valid URL")),
                api_key: Some(SecretString::from("test-key")),
            })
            .collect();

        self.config
            .backends
            .insert(name.to_owned(), BackendConfig { format, channels });
        self
    }

    /// Set the number of retries after the first attempt
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.config.pipeline.max_retries = max_retries;
        self
    }

    /// Only retry failures whose message contains one of `substrings`
    pub fn with_retryable_errors(mut self, substrings: &[&str]) -> Self {
        self.config.pipeline.retryable_errors = substrings.iter().map(|s| (*s).to_owned()).collect();
        self
    }

    /// Apply `max_tokens` to requests that carry none
    pub fn with_default_max_tokens(mut self, max_tokens: u32) -> Self {
        self.config.decorators.default_max_tokens = Some(max_tokens);
        self
    }

    /// Build the final config
    pub fn build(self) -> LlmConfig {
        self.config
    }

    /// Build a gateway executing over HTTP
    pub fn gateway(self) -> Gateway {
        Gateway::from_config(&self.config).expect("valid gateway config")
    }
}
