//! Executor over a shared `reqwest` client

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures_util::StreamExt;
use reqwest::Client;
use secrecy::ExposeSecret;

use super::{Auth, Executor, HttpRequest, HttpResponse, RawEvent, request_id};
use crate::error::LlmError;
use crate::stream::BoxStream;

/// Default executor, one connection pool for every backend
#[derive(Debug, Clone, Default)]
pub struct HttpExecutor {
    client: Client,
}

impl HttpExecutor {
    /// Executor with a default client
    pub fn new() -> Self {
        Self::default()
    }

    /// Executor over a preconfigured client
    pub const fn with_client(client: Client) -> Self {
        Self { client }
    }

    /// Send the request; non-2xx statuses become [`LlmError::Upstream`]
    async fn send(&self, request: HttpRequest) -> Result<reqwest::Response, LlmError> {
        let HttpRequest {
            method,
            url,
            headers,
            body,
            auth,
        } = request;

        let mut builder = self.client.request(method, url.clone()).headers(headers).body(body);
        builder = match auth {
            Some(Auth::Bearer(token)) => builder.bearer_auth(token.expose_secret()),
            Some(Auth::ApiKey { header, key }) => builder.header(header, key.expose_secret()),
            None => builder,
        };

        let response = builder.send().await.map_err(|e| {
            tracing::error!(url = %url, error = %e, "upstream request failed");
            LlmError::Transport(e.to_string())
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let request_id = request_id(response.headers()).map(str::to_owned);
        let message = response.text().await.unwrap_or_default();
        tracing::warn!(
            url = %url,
            status = %status,
            request_id = request_id.as_deref().unwrap_or("-"),
            "upstream returned error"
        );

        Err(LlmError::Upstream {
            status: status.as_u16(),
            message,
            request_id,
        })
    }
}

#[async_trait]
impl Executor for HttpExecutor {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, LlmError> {
        let response = self.send(request).await?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .bytes()
            .await
            .map_err(|e| LlmError::Transport(format!("failed to read response body: {e}")))?;

        Ok(HttpResponse { status, headers, body })
    }

    async fn execute_stream(&self, request: HttpRequest) -> Result<BoxStream<RawEvent>, LlmError> {
        let response = self.send(request).await?;

        let events = response.bytes_stream().eventsource().map(|result| match result {
            Ok(event) => Ok(RawEvent {
                event: (!event.event.is_empty() && event.event != "message").then_some(event.event),
                data: event.data,
            }),
            Err(e) => Err(LlmError::Streaming(e.to_string())),
        });

        Ok(Box::pin(events))
    }
}
