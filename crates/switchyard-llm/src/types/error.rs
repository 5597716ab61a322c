use serde::{Deserialize, Serialize};
use switchyard_core::HttpError;
use thiserror::Error;

/// Vendor-neutral error, the shape every backend error is normalized into
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{error_type} ({status}): {message}")]
pub struct ResponseError {
    /// HTTP-equivalent status code
    pub status: u16,
    /// Machine-readable error type
    #[serde(rename = "type")]
    pub error_type: String,
    /// Vendor error code, when one was given
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// Human-readable message
    pub message: String,
    /// Request id for support correlation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl ResponseError {
    /// Normalize any domain error
    pub fn from_error(error: &impl HttpError) -> Self {
        Self {
            status: error.status_code().as_u16(),
            error_type: error.error_type().to_owned(),
            code: None,
            message: error.client_message(),
            request_id: error.request_id().map(str::to_owned),
        }
    }
}
