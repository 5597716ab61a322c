//! Request pipeline: parse, decorate, execute with retry, render
//!
//! A pipeline pairs one caller format with one backend. Each call to
//! [`Pipeline::process`] runs the request through:
//!
//! 1. inbound parsing and validation
//! 2. the request direction of the decorator chain
//! 3. outbound lowering into an HTTP call
//! 4. execution, streaming or not, retried per [`RetryPolicy`]
//! 5. outbound lifting of the response or event stream
//! 6. the response direction of the decorator chain (non-streaming only)
//! 7. inbound rendering
//!
//! Every surfaced error is normalized by the outbound and rendered by the
//! inbound, so the caller always receives its own format's error envelope.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use http::StatusCode;
use switchyard_config::PipelineConfig;
use thiserror::Error;

use crate::decorator::DecoratorChain;
use crate::error::LlmError;
use crate::executor::{Executor, HttpResponse};
use crate::stream::EventStream;
use crate::transformer::{Inbound, Outbound, SseEvent};
use crate::types::{CompletionRequest, ResponseError};

/// Which execution failures may be retried
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Retryable {
    /// Every retryable execution failure
    All,
    /// Only failures whose message contains one of these substrings
    Substrings(Vec<String>),
}

/// Bounds on retrying a failed execution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts allowed after the first one
    pub max_retries: u32,
    /// Pause between attempts
    pub delay: Duration,
    /// Failures eligible for another attempt
    pub retryable: Retryable,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            delay: Duration::ZERO,
            retryable: Retryable::All,
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no retries
    pub const fn never() -> Self {
        Self {
            max_retries: 0,
            delay: Duration::ZERO,
            retryable: Retryable::All,
        }
    }

    /// Policy from configuration
    ///
    /// # Errors
    ///
    /// Returns an error if `retry_delay` is not a valid duration
    pub fn from_config(config: &PipelineConfig) -> anyhow::Result<Self> {
        let retryable = if config.retryable_errors.is_empty() {
            Retryable::All
        } else {
            Retryable::Substrings(config.retryable_errors.clone())
        };

        Ok(Self {
            max_retries: config.max_retries,
            delay: config.retry_delay()?,
            retryable,
        })
    }

    /// Whether `error` allows another attempt, ignoring the attempt bound
    pub fn should_retry(&self, error: &LlmError) -> bool {
        if !error.is_retryable() {
            return false;
        }

        match &self.retryable {
            Retryable::All => true,
            Retryable::Substrings(substrings) => {
                let message = error.to_string();
                substrings.iter().any(|substring| message.contains(substring.as_str()))
            }
        }
    }
}

/// Successful pipeline result
#[derive(Debug)]
pub enum PipelineOutput {
    /// Complete response in the caller's format
    Response(HttpResponse),
    /// Server-sent events in the caller's format
    Stream(EventStream<SseEvent>),
}

/// Failed pipeline result, already rendered for the caller
#[derive(Debug, Error)]
#[error("{error}")]
pub struct PipelineError {
    /// Error response in the caller's format
    pub response: HttpResponse,
    /// Normalized error
    pub error: ResponseError,
}

/// One inbound format wired to one backend
#[derive(Clone)]
pub struct Pipeline {
    inbound: Arc<dyn Inbound>,
    outbound: Arc<dyn Outbound>,
    executor: Arc<dyn Executor>,
    decorators: Arc<DecoratorChain>,
    retry: RetryPolicy,
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("inbound", &self.inbound.format())
            .field("outbound", &self.outbound.format())
            .field("decorators", &self.decorators)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    /// Pipeline with no decorators and the default retry policy
    pub fn new(inbound: Arc<dyn Inbound>, outbound: Arc<dyn Outbound>, executor: Arc<dyn Executor>) -> Self {
        Self {
            inbound,
            outbound,
            executor,
            decorators: Arc::new(DecoratorChain::new()),
            retry: RetryPolicy::default(),
        }
    }

    /// Use a shared decorator chain
    #[must_use]
    pub fn with_decorators(mut self, decorators: Arc<DecoratorChain>) -> Self {
        self.decorators = decorators;
        self
    }

    /// Replace the retry policy
    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Caller-facing transformer
    pub fn inbound(&self) -> &Arc<dyn Inbound> {
        &self.inbound
    }

    /// Backend-facing transformer
    pub fn outbound(&self) -> &Arc<dyn Outbound> {
        &self.outbound
    }

    /// Process one request body
    ///
    /// # Errors
    ///
    /// Returns a [`PipelineError`] carrying the error response to send
    /// back when validation, transformation or every allowed attempt fails.
    pub async fn process(&self, body: &[u8]) -> Result<PipelineOutput, PipelineError> {
        let request = self
            .inbound
            .transform_request(body)
            .map_err(|e| self.fail(self.outbound.as_ref(), &e))?;

        let request = self
            .decorators
            .apply_request(&request)
            .map_err(|failure| self.fail(self.outbound.as_ref(), &failure.error))?;

        let mut outbound = Arc::clone(&self.outbound);
        let mut channel = 0;
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;

            let error = match self.attempt(outbound.as_ref(), &request).await {
                Ok(output) => return Ok(output),
                Err(error) => error,
            };

            if attempt > self.retry.max_retries || !self.retry.should_retry(&error) {
                return Err(self.fail(outbound.as_ref(), &error));
            }

            if let Some(failover) = self.outbound.channel_failover() {
                let Some(next) = failover.channel(channel + 1) else {
                    tracing::warn!(
                        channel = outbound.channel_name(),
                        attempt,
                        error = %error,
                        "all channels failed"
                    );
                    return Err(self.fail(outbound.as_ref(), &error));
                };

                tracing::warn!(
                    from_channel = outbound.channel_name(),
                    to_channel = next.channel_name(),
                    attempt,
                    error = %error,
                    "channel failed, failing over"
                );
                channel += 1;
                outbound = next;
            } else {
                tracing::warn!(
                    backend = %outbound.format(),
                    attempt,
                    error = %error,
                    "attempt failed, retrying"
                );
            }

            if !self.retry.delay.is_zero() {
                tokio::time::sleep(self.retry.delay).await;
            }
        }
    }

    async fn attempt(&self, outbound: &dyn Outbound, request: &CompletionRequest) -> Result<PipelineOutput, LlmError> {
        let http_request = outbound.transform_request(request)?;
        let executor = match outbound.executor_customizer() {
            Some(customizer) => customizer.customize_executor(Arc::clone(&self.executor)),
            None => Arc::clone(&self.executor),
        };

        if request.stream {
            let events = executor.execute_stream(http_request).await?;
            let chunks = outbound.transform_stream(events);
            return Ok(PipelineOutput::Stream(EventStream::new(self.inbound.transform_stream(chunks))));
        }

        let response = executor.execute(http_request).await?;
        let unified = outbound.transform_response(&response)?;
        let unified = self
            .decorators
            .apply_response(&unified)
            .map_err(|failure| failure.error)?;
        let body = self.inbound.transform_response(&unified)?;

        Ok(PipelineOutput::Response(HttpResponse::json(StatusCode::OK, body)))
    }

    fn fail(&self, outbound: &dyn Outbound, error: &LlmError) -> PipelineError {
        let normalized = outbound.transform_error(error);
        PipelineError {
            response: self.inbound.transform_error(&normalized),
            error: normalized,
        }
    }
}
