//! Connections to the server-push endpoint.

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use log::debug;
use reqwest::header::{ACCEPT, AUTHORIZATION, CACHE_CONTROL, CONTENT_TYPE, HeaderValue};
use reqwest::{Client, Response};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use super::sse::{SseDecoder, SseMessage};
use crate::http::resolve_url;
use crate::storage::{TokenStore, bearer_token};

/// Path of the auth event stream.
pub const AUTH_EVENTS_PATH: &str = "/api/auth/events";

/// How long to wait for the response headers of a new connection.
pub const DEFAULT_RESPONSE_TIMEOUT_MS: u64 = 10_000;

/// A live connection. Dropping it closes the connection.
#[async_trait]
pub trait EventStream: Send {
    /// The next event; `Ok(None)` once the server closed the stream.
    async fn next_message(&mut self) -> Result<Option<SseMessage>>;
}

/// Opens connections to a server-push endpoint.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Connects, resuming after `last_event_id` when the server supports it.
    async fn connect(&self, last_event_id: Option<String>) -> Result<Box<dyn EventStream>>;
}

/// [`EventSource`] over a streaming HTTP `GET`.
pub struct HttpEventSource {
    client: Client,
    base_url: String,
    path: String,
    tokens: Arc<dyn TokenStore>,
    response_timeout: Duration,
}

impl HttpEventSource {
    /// `client` must not carry a total request timeout, or long-lived
    /// streams are cut off when it fires.
    pub fn new(
        client: Client,
        base_url: impl Into<String>,
        path: impl Into<String>,
        tokens: Arc<dyn TokenStore>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            path: path.into(),
            tokens,
            response_timeout: Duration::from_millis(DEFAULT_RESPONSE_TIMEOUT_MS),
        }
    }

    /// Bounds the wait for response headers. The stream body is not
    /// affected.
    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }
}

#[async_trait]
impl EventSource for HttpEventSource {
    #[tracing::instrument(skip(self))]
    async fn connect(&self, last_event_id: Option<String>) -> Result<Box<dyn EventStream>> {
        let url = resolve_url(&self.base_url, &self.path)?;
        debug!("Connecting to auth event stream at {}...", url);

        let mut request = self
            .client
            .get(url.clone())
            .header(ACCEPT, "text/event-stream")
            .header(CACHE_CONTROL, "no-cache");
        if let Some(token) = bearer_token(self.tokens.as_ref()) {
            let mut value = HeaderValue::from_str(&format!("Bearer {}", token))
                .context("Stored auth token is not a valid header value")?;
            value.set_sensitive(true);
            request = request.header(AUTHORIZATION, value);
        }
        if let Some(id) = last_event_id {
            request = request.header("Last-Event-ID", id);
        }

        let response = tokio::time::timeout(self.response_timeout, request.send())
            .await
            .map_err(|_| {
                anyhow!(
                    "No response from {} within {}ms",
                    url,
                    self.response_timeout.as_millis()
                )
            })?
            .with_context(|| format!("Failed to connect to {}", url))?;

        let status = response.status();
        if !status.is_success() {
            bail!("Auth event stream at {} returned HTTP {}", url, status.as_u16());
        }
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        if !content_type.starts_with("text/event-stream") {
            bail!(
                "Auth event stream at {} has unexpected content type {:?}",
                url,
                content_type
            );
        }

        Ok(Box::new(HttpEventStream {
            response,
            decoder: SseDecoder::new(),
            pending: VecDeque::new(),
        }))
    }
}

struct HttpEventStream {
    response: Response,
    decoder: SseDecoder,
    pending: VecDeque<SseMessage>,
}

#[async_trait]
impl EventStream for HttpEventStream {
    async fn next_message(&mut self) -> Result<Option<SseMessage>> {
        loop {
            if let Some(message) = self.pending.pop_front() {
                return Ok(Some(message));
            }
            match self
                .response
                .chunk()
                .await
                .context("Failed to read from auth event stream")?
            {
                Some(chunk) => self.pending.extend(self.decoder.feed(&chunk)?),
                None => return Ok(None),
            }
        }
    }
}
