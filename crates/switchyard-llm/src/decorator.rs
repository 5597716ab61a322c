//! Request and response decorators
//!
//! Decorators adjust the unified request before it is lowered for a backend
//! and the unified response before it is rendered for the caller. The chain
//! is shared by every pipeline; registering or removing a decorator swaps in
//! a new list, so requests in flight keep the list they started with.

use std::fmt;
use std::sync::Arc;

use arc_swap::ArcSwap;
use switchyard_config::DecoratorsConfig;

use crate::error::LlmError;
use crate::types::{CompletionRequest, CompletionResponse, StreamOptions};

/// A named transformation of requests and responses
pub trait Decorator: Send + Sync {
    /// Name, unique within a chain
    fn name(&self) -> &str;

    /// Adjust a request
    fn decorate_request(&self, request: &CompletionRequest) -> Result<CompletionRequest, LlmError> {
        Ok(request.clone())
    }

    /// Adjust a non-streaming response
    fn decorate_response(&self, response: &CompletionResponse) -> Result<CompletionResponse, LlmError> {
        Ok(response.clone())
    }
}

/// A decorator failed part way through the chain
#[derive(Debug)]
pub struct DecoratorFailure<T> {
    /// Name of the failing decorator
    pub decorator: String,
    /// Output of the last decorator that succeeded, or the input
    pub last: T,
    /// The failure
    pub error: LlmError,
}

/// Ordered, process-wide decorator registry
pub struct DecoratorChain {
    decorators: ArcSwap<Vec<Arc<dyn Decorator>>>,
}

impl Default for DecoratorChain {
    fn default() -> Self {
        Self {
            decorators: ArcSwap::from_pointee(Vec::new()),
        }
    }
}

impl fmt::Debug for DecoratorChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

impl DecoratorChain {
    /// Empty chain
    pub fn new() -> Self {
        Self::default()
    }

    /// Chain holding the built-in decorators the configuration enables
    pub fn from_config(config: &DecoratorsConfig) -> Self {
        let chain = Self::new();

        if let Some(max_tokens) = config.default_max_tokens {
            chain.register(Arc::new(DefaultMaxTokens(max_tokens)));
        }
        if let Some(cap) = config.max_tokens_cap {
            chain.register(Arc::new(MaxTokensCap(cap)));
        }
        if let Some(temperature) = config.default_temperature {
            chain.register(Arc::new(DefaultTemperature(temperature)));
        }
        if config.force_stream_usage {
            chain.register(Arc::new(StreamUsage));
        }

        chain
    }

    /// Add a decorator
    ///
    /// A decorator with the same name is replaced in place; otherwise the new
    /// one runs last.
    pub fn register(&self, decorator: Arc<dyn Decorator>) {
        self.decorators.rcu(|current| {
            let mut next = Vec::clone(current);
            match next.iter_mut().find(|existing| existing.name() == decorator.name()) {
                Some(slot) => *slot = Arc::clone(&decorator),
                None => next.push(Arc::clone(&decorator)),
            }
            next
        });
    }

    /// Remove a decorator by name, returning whether it was registered
    pub fn remove(&self, name: &str) -> bool {
        let mut removed = false;
        self.decorators.rcu(|current| {
            let mut next = Vec::clone(current);
            let before = next.len();
            next.retain(|existing| existing.name() != name);
            removed = next.len() != before;
            next
        });
        removed
    }

    /// Names in execution order
    pub fn names(&self) -> Vec<String> {
        self.decorators
            .load()
            .iter()
            .map(|decorator| decorator.name().to_owned())
            .collect()
    }

    /// Number of registered decorators
    pub fn len(&self) -> usize {
        self.decorators.load().len()
    }

    /// Whether no decorator is registered
    pub fn is_empty(&self) -> bool {
        self.decorators.load().is_empty()
    }

    /// Run every decorator over a request, in order
    pub fn apply_request(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionRequest, DecoratorFailure<CompletionRequest>> {
        apply(&self.decorators.load(), request, |decorator, value| decorator.decorate_request(value))
    }

    /// Run every decorator over a response, in order
    pub fn apply_response(
        &self,
        response: &CompletionResponse,
    ) -> Result<CompletionResponse, DecoratorFailure<CompletionResponse>> {
        apply(&self.decorators.load(), response, |decorator, value| decorator.decorate_response(value))
    }
}

fn apply<T, F>(decorators: &[Arc<dyn Decorator>], input: &T, step: F) -> Result<T, DecoratorFailure<T>>
where
    T: Clone,
    F: Fn(&dyn Decorator, &T) -> Result<T, LlmError>,
{
    let mut value = input.clone();
    for decorator in decorators {
        match step(decorator.as_ref(), &value) {
            Ok(next) => value = next,
            Err(error) => {
                tracing::debug!(decorator = decorator.name(), error = %error, "decorator failed");
                return Err(DecoratorFailure {
                    decorator: decorator.name().to_owned(),
                    last: value,
                    error,
                });
            }
        }
    }
    Ok(value)
}

/// Sets `max_tokens` when the caller gave no token bound
#[derive(Debug, Clone, Copy)]
pub struct DefaultMaxTokens(pub u32);

impl Decorator for DefaultMaxTokens {
    fn name(&self) -> &'static str {
        "default_max_tokens"
    }

    fn decorate_request(&self, request: &CompletionRequest) -> Result<CompletionRequest, LlmError> {
        let mut request = request.clone();
        if request.effective_max_tokens().is_none() {
            request.params.max_tokens = Some(self.0);
        }
        Ok(request)
    }
}

/// Caps both token bounds
#[derive(Debug, Clone, Copy)]
pub struct MaxTokensCap(pub u32);

impl Decorator for MaxTokensCap {
    fn name(&self) -> &'static str {
        "max_tokens_cap"
    }

    fn decorate_request(&self, request: &CompletionRequest) -> Result<CompletionRequest, LlmError> {
        let mut request = request.clone();
        let params = &mut request.params;
        params.max_tokens = params.max_tokens.map(|value| value.min(self.0));
        params.max_completion_tokens = params.max_completion_tokens.map(|value| value.min(self.0));
        Ok(request)
    }
}

/// Sets `temperature` when the caller gave none
#[derive(Debug, Clone, Copy)]
pub struct DefaultTemperature(pub f64);

impl Decorator for DefaultTemperature {
    fn name(&self) -> &'static str {
        "default_temperature"
    }

    fn decorate_request(&self, request: &CompletionRequest) -> Result<CompletionRequest, LlmError> {
        let mut request = request.clone();
        if request.params.temperature.is_none() {
            request.params.temperature = Some(self.0);
        }
        Ok(request)
    }
}

/// Asks for usage in the final chunk of streaming requests
#[derive(Debug, Clone, Copy, Default)]
pub struct StreamUsage;

impl Decorator for StreamUsage {
    fn name(&self) -> &'static str {
        "stream_usage"
    }

    fn decorate_request(&self, request: &CompletionRequest) -> Result<CompletionRequest, LlmError> {
        let mut request = request.clone();
        if request.stream {
            request.stream_options = Some(StreamOptions { include_usage: true });
        }
        Ok(request)
    }
}
