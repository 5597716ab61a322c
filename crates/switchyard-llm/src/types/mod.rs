//! Unified request/response model
//!
//! Every vendor wire format converts to and from these types. Their JSON
//! shape follows the chat-completions layout, which is also the body of an
//! aggregated stream.

pub mod error;
pub mod format;
pub mod message;
pub mod request;
pub mod response;
pub mod tool;

pub use error::ResponseError;
pub use format::ApiFormat;
pub use message::{Content, ContentPart, FunctionCall, Message, Role, ToolCall};
pub use request::{CompletionParams, CompletionRequest, ReasoningEffort, Stop, StreamOptions};
pub use response::{
    Choice, CompletionResponse, CompletionTokensDetails, DONE_MARKER, FinishReason, PromptTokensDetails, Usage, merge_usage,
};
pub use tool::{FunctionDefinition, ToolChoice, ToolChoiceFunction, ToolChoiceFunctionName, ToolChoiceMode, ToolDefinition};
