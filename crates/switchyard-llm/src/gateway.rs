//! Configuration-driven assembly of pipelines

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use switchyard_config::{BackendConfig, BackendFormat, LlmConfig};

use crate::convert::ReasoningBudgets;
use crate::decorator::DecoratorChain;
use crate::error::LlmError;
use crate::executor::{Executor, HttpExecutor};
use crate::pipeline::{Pipeline, RetryPolicy};
use crate::transformer::{
    AnthropicInbound, AnthropicOutbound, Inbound, OpenAiInbound, OpenAiOutbound, OpenRouterInbound,
    OpenRouterOutbound, Outbound,
};
use crate::types::ApiFormat;

/// Shared transformers, executor and policies for every pipeline
///
/// Cheap to clone; clones share the decorator chain, so decorators
/// registered through one handle apply to pipelines built from any other.
#[derive(Clone)]
pub struct Gateway {
    inner: Arc<GatewayInner>,
}

struct GatewayInner {
    inbounds: HashMap<ApiFormat, Arc<dyn Inbound>>,
    backends: IndexMap<String, Arc<dyn Outbound>>,
    executor: Arc<dyn Executor>,
    decorators: Arc<DecoratorChain>,
    retry: RetryPolicy,
}

impl fmt::Debug for Gateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Gateway")
            .field("backends", &self.backends().collect::<Vec<_>>())
            .field("decorators", &self.inner.decorators)
            .field("retry", &self.inner.retry)
            .finish_non_exhaustive()
    }
}

impl Gateway {
    /// Build the gateway from configuration, executing over HTTP
    ///
    /// # Errors
    ///
    /// Returns an error if a channel URL or the retry policy is invalid
    pub fn from_config(config: &LlmConfig) -> Result<Self, LlmError> {
        Self::with_executor(config, Arc::new(HttpExecutor::new()))
    }

    /// Build the gateway from configuration with a custom executor
    ///
    /// # Errors
    ///
    /// Returns an error if a channel URL or the retry policy is invalid
    pub fn with_executor(config: &LlmConfig, executor: Arc<dyn Executor>) -> Result<Self, LlmError> {
        let budgets = ReasoningBudgets::from(&config.reasoning);

        let mut inbounds: HashMap<ApiFormat, Arc<dyn Inbound>> = HashMap::new();
        inbounds.insert(ApiFormat::OpenAiChatCompletions, Arc::new(OpenAiInbound));
        inbounds.insert(ApiFormat::AnthropicMessages, Arc::new(AnthropicInbound::new(budgets)));
        inbounds.insert(
            ApiFormat::OpenRouterChatCompletions,
            Arc::new(OpenRouterInbound::new(budgets)),
        );

        let mut backends = IndexMap::with_capacity(config.backends.len());
        for (name, backend) in &config.backends {
            let outbound = build_outbound(backend, budgets)?;
            tracing::debug!(backend = %name, format = %outbound.format(), "backend configured");
            backends.insert(name.clone(), outbound);
        }

        let retry = RetryPolicy::from_config(&config.pipeline)?;

        Ok(Self {
            inner: Arc::new(GatewayInner {
                inbounds,
                backends,
                executor,
                decorators: Arc::new(DecoratorChain::from_config(&config.decorators)),
                retry,
            }),
        })
    }

    /// Pipeline accepting `format` and sending to the backend named `backend`
    ///
    /// # Errors
    ///
    /// Returns [`LlmError::UnknownBackend`] if no backend has that name
    pub fn pipeline(&self, format: ApiFormat, backend: &str) -> Result<Pipeline, LlmError> {
        let inbound = self
            .inner
            .inbounds
            .get(&format)
            .ok_or_else(|| LlmError::UnsupportedFormat(format.to_string()))?;
        let outbound = self
            .inner
            .backends
            .get(backend)
            .ok_or_else(|| LlmError::UnknownBackend(backend.to_owned()))?;

        Ok(Pipeline::new(Arc::clone(inbound), Arc::clone(outbound), Arc::clone(&self.inner.executor))
            .with_decorators(Arc::clone(&self.inner.decorators))
            .with_retry_policy(self.inner.retry.clone()))
    }

    /// Backend names in configuration order
    pub fn backends(&self) -> impl Iterator<Item = &str> {
        self.inner.backends.keys().map(String::as_str)
    }

    /// Decorator chain shared by every pipeline
    pub fn decorators(&self) -> &DecoratorChain {
        &self.inner.decorators
    }

    /// Retry policy handed to every pipeline
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.inner.retry
    }
}

fn build_outbound(backend: &BackendConfig, budgets: ReasoningBudgets) -> Result<Arc<dyn Outbound>, LlmError> {
    let outbound: Arc<dyn Outbound> = match backend.format {
        BackendFormat::Openai => Arc::new(OpenAiOutbound::from_config(&backend.channels)?),
        BackendFormat::Anthropic => Arc::new(AnthropicOutbound::from_config(&backend.channels, budgets)?),
        BackendFormat::Openrouter => Arc::new(OpenRouterOutbound::from_config(&backend.channels)?),
    };
    Ok(outbound)
}
