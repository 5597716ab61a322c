//! Backend execution contract
//!
//! Outbound transformers describe an HTTP call as an [`HttpRequest`]; an
//! [`Executor`] performs it and hands back either the whole response or the
//! raw server-sent events.

mod client;

use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, header};
use secrecy::SecretString;
use url::Url;

pub use client::HttpExecutor;

use crate::error::LlmError;
use crate::stream::BoxStream;
use crate::types::DONE_MARKER;

/// Credentials attached to an outgoing request
#[derive(Clone)]
pub enum Auth {
    /// `Authorization: Bearer <token>`
    Bearer(SecretString),
    /// Key sent in a dedicated header
    ApiKey {
        /// Header carrying the key
        header: HeaderName,
        /// The key
        key: SecretString,
    },
}

impl fmt::Debug for Auth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bearer(_) => f.write_str("Bearer(***)"),
            Self::ApiKey { header, .. } => write!(f, "ApiKey({header}: ***)"),
        }
    }
}

/// Outgoing backend request
#[derive(Debug, Clone)]
pub struct HttpRequest {
    /// HTTP method
    pub method: Method,
    /// Absolute URL
    pub url: Url,
    /// Extra headers
    pub headers: HeaderMap,
    /// Serialized body
    pub body: Bytes,
    /// Credentials, if any
    pub auth: Option<Auth>,
}

impl HttpRequest {
    /// JSON `POST`
    pub fn post_json(url: Url, body: Bytes) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));

        Self {
            method: Method::POST,
            url,
            headers,
            body,
            auth: None,
        }
    }

    /// Attach credentials
    #[must_use]
    pub fn with_auth(mut self, auth: Option<Auth>) -> Self {
        self.auth = auth;
        self
    }

    /// Add a header
    #[must_use]
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }
}

/// Backend response, or a rendered client-facing response
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// Status code
    pub status: StatusCode,
    /// Response headers
    pub headers: HeaderMap,
    /// Body bytes
    pub body: Bytes,
}

impl HttpResponse {
    /// JSON response with the given status
    pub fn json(status: StatusCode, body: Bytes) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Self { status, headers, body }
    }

    /// Request id from `request-id` or `x-request-id`
    pub fn request_id(&self) -> Option<&str> {
        request_id(&self.headers)
    }
}

pub(crate) fn request_id(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("request-id")
        .or_else(|| headers.get("x-request-id"))
        .and_then(|value| value.to_str().ok())
}

/// One server-sent event as read off the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    /// `event:` field, absent for unnamed events
    pub event: Option<String>,
    /// `data:` payload
    pub data: String,
}

impl RawEvent {
    /// Unnamed event
    pub fn data(data: impl Into<String>) -> Self {
        Self {
            event: None,
            data: data.into(),
        }
    }

    /// Named event
    pub fn named(event: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            event: Some(event.into()),
            data: data.into(),
        }
    }

    /// Whether this is the `[DONE]` terminator
    pub fn is_done(&self) -> bool {
        self.data.trim() == DONE_MARKER
    }
}

/// Performs backend HTTP calls
#[async_trait]
pub trait Executor: Send + Sync {
    /// Send a request and read the whole response
    ///
    /// A non-2xx status is an [`LlmError::Upstream`]; a connection failure
    /// is an [`LlmError::Transport`].
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, LlmError>;

    /// Send a request and stream the response as server-sent events
    async fn execute_stream(&self, request: HttpRequest) -> Result<BoxStream<RawEvent>, LlmError>;
}
