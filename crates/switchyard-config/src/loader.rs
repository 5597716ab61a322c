use std::collections::HashSet;
use std::path::Path;

use crate::Config;

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Reads the file, expands `{{ env.VAR }}` placeholders, then
    /// deserializes and validates the result.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, environment variable
    /// expansion fails, TOML parsing fails, or validation fails
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("failed to read config file {}: {e}", path.display()))?;

        Self::parse(&raw)
    }

    /// Parse configuration from TOML text
    ///
    /// # Errors
    ///
    /// Returns an error if expansion, parsing or validation fails
    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        let expanded =
            crate::env::expand_env(raw).map_err(|e| anyhow::anyhow!("config variable expansion failed: {e}"))?;

        let config: Self = toml::from_str(&expanded).map_err(|e| anyhow::anyhow!("failed to parse config: {e}"))?;

        config.validate()?;

        Ok(config)
    }

    /// Validate that the configuration is internally consistent
    ///
    /// # Errors
    ///
    /// Returns an error if no backend is configured or any backend,
    /// pipeline, decorator or reasoning setting is invalid
    pub fn validate(&self) -> anyhow::Result<()> {
        self.validate_backends()?;
        self.validate_pipeline()?;
        self.validate_decorators()?;
        self.validate_reasoning()?;
        Ok(())
    }

    fn validate_backends(&self) -> anyhow::Result<()> {
        if self.llm.backends.is_empty() {
            anyhow::bail!("at least one backend must be configured under [llm.backends]");
        }

        for (name, backend) in &self.llm.backends {
            if backend.channels.is_empty() {
                anyhow::bail!("backend '{name}' must define at least one channel");
            }

            let mut seen = HashSet::new();
            for channel in &backend.channels {
                if !seen.insert(channel.name.as_str()) {
                    anyhow::bail!("backend '{name}' has duplicate channel '{}'", channel.name);
                }
            }
        }

        Ok(())
    }

    fn validate_pipeline(&self) -> anyhow::Result<()> {
        self.llm.pipeline.retry_delay()?;

        if self.llm.pipeline.retryable_errors.iter().any(String::is_empty) {
            anyhow::bail!("pipeline.retryable_errors must not contain empty strings");
        }

        Ok(())
    }

    fn validate_decorators(&self) -> anyhow::Result<()> {
        let decorators = &self.llm.decorators;

        if let (Some(default), Some(cap)) = (decorators.default_max_tokens, decorators.max_tokens_cap)
            && cap < default
        {
            anyhow::bail!("decorators.max_tokens_cap ({cap}) is below decorators.default_max_tokens ({default})");
        }

        if decorators.max_tokens_cap == Some(0) || decorators.default_max_tokens == Some(0) {
            anyhow::bail!("decorator token bounds must be greater than 0");
        }

        Ok(())
    }

    fn validate_reasoning(&self) -> anyhow::Result<()> {
        let reasoning = &self.llm.reasoning;

        if !(reasoning.low < reasoning.medium && reasoning.medium < reasoning.high) {
            anyhow::bail!(
                "reasoning budgets must strictly increase (low {}, medium {}, high {})",
                reasoning.low,
                reasoning.medium,
                reasoning.high
            );
        }

        Ok(())
    }
}
