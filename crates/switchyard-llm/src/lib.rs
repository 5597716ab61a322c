//! Protocol translation and execution core of Switchyard
//!
//! Requests arrive in one vendor's wire format (`OpenAI`, Anthropic,
//! `OpenRouter`), are lifted into a unified model, decorated, lowered into
//! the wire format of a possibly different backend, executed, and the
//! result (complete or streamed) is rendered back into the caller's format.

#![allow(clippy::must_use_candidate, clippy::missing_errors_doc)]

pub mod aggregate;
pub mod convert;
pub mod decorator;
pub mod error;
pub mod executor;
pub mod gateway;
pub mod pipeline;
pub mod protocol;
pub mod stream;
pub mod transformer;
pub mod types;

pub use convert::ReasoningBudgets;
pub use decorator::{Decorator, DecoratorChain, DecoratorFailure};
pub use error::LlmError;
pub use executor::{Auth, Executor, HttpExecutor, HttpRequest, HttpResponse, RawEvent};
pub use gateway::Gateway;
pub use pipeline::{Pipeline, PipelineError, PipelineOutput, RetryPolicy, Retryable};
pub use stream::{BoxStream, EventStream, ResultStreamExt};
pub use transformer::{
    AggregatedResponse, AnthropicInbound, AnthropicOutbound, Channel, ChannelFailover, CustomizeExecutor, Inbound,
    OpenAiInbound, OpenAiOutbound, OpenRouterInbound, OpenRouterOutbound, Outbound, SseEvent,
};
pub use types::{ApiFormat, CompletionRequest, CompletionResponse, ResponseError};
