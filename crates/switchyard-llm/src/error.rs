use http::StatusCode;
use switchyard_core::HttpError;
use thiserror::Error;

/// Errors raised while translating or executing a completion
#[derive(Debug, Error)]
pub enum LlmError {
    /// Caller input is malformed or incomplete
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Backend answered with a non-success HTTP status
    #[error("upstream returned {status}: {message}")]
    Upstream {
        /// HTTP status returned by the backend
        status: u16,
        /// Raw error body or message
        message: String,
        /// Backend request id, when the response carried one
        request_id: Option<String>,
    },

    /// Backend could not be reached
    #[error("transport error: {0}")]
    Transport(String),

    /// Backend response did not match its expected schema
    #[error("transform error: {0}")]
    Transform(String),

    /// Error reported in the middle of a stream
    #[error("streaming error: {0}")]
    Streaming(String),

    /// No transformer is registered for the requested wire format
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    /// No backend is configured under the requested name
    #[error("unknown backend: {0}")]
    UnknownBackend(String),

    /// Unexpected internal error
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl LlmError {
    /// Whether another attempt could succeed
    ///
    /// Only execution failures qualify. Validation and transformation
    /// failures would fail identically on every attempt.
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Upstream { .. } | Self::Transport(_))
    }
}

impl HttpError for LlmError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidRequest(_) | Self::UnsupportedFormat(_) => StatusCode::BAD_REQUEST,
            Self::UnknownBackend(_) => StatusCode::NOT_FOUND,
            Self::Upstream { status, .. } => StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY),
            Self::Transport(_) | Self::Transform(_) => StatusCode::BAD_GATEWAY,
            Self::Streaming(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_type(&self) -> &str {
        match self {
            Self::InvalidRequest(_) | Self::UnsupportedFormat(_) => "invalid_request_error",
            Self::UnknownBackend(_) => "not_found_error",
            Self::Upstream { status, .. } => upstream_error_type(*status),
            Self::Transport(_) => "api_connection_error",
            Self::Transform(_) => "upstream_error",
            Self::Streaming(_) => "streaming_error",
            Self::Internal(_) => "internal_error",
        }
    }

    fn client_message(&self) -> String {
        match self {
            Self::Internal(_) => "an internal error occurred".to_owned(),
            other => other.to_string(),
        }
    }

    fn request_id(&self) -> Option<&str> {
        match self {
            Self::Upstream { request_id, .. } => request_id.as_deref(),
            _ => None,
        }
    }
}

const fn upstream_error_type(status: u16) -> &'static str {
    match status {
        400 | 422 => "invalid_request_error",
        401 => "authentication_error",
        403 => "permission_error",
        404 => "not_found_error",
        429 => "rate_limit_error",
        529 => "overloaded_error",
        _ => "upstream_error",
    }
}
