//! The seam between the pipeline and the network.

use async_trait::async_trait;
use log::debug;
use reqwest::Client;
use reqwest::header::{HeaderName, HeaderValue};
use serde::Deserialize;
use std::fmt;

use super::request::{RequestDescriptor, resolve_url};

/// A received response, whatever its status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

#[derive(Deserialize)]
struct ServerMessage {
    message: Option<String>,
}

impl TransportResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// The `message` field of a JSON error body, if any.
    pub fn server_message(&self) -> Option<String> {
        serde_json::from_slice::<ServerMessage>(&self.body)
            .ok()
            .and_then(|m| m.message)
            .filter(|m| !m.is_empty())
    }
}

/// A failure before any response arrived.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportError {
    pub message: String,
    pub code: Option<String>,
}

impl TransportError {
    pub fn new(message: impl Into<String>, code: Option<&str>) -> Self {
        Self {
            message: message.into(),
            code: code.map(str::to_string),
        }
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for TransportError {}

/// Error code the transport attaches to a non-success response.
pub fn response_error_code(status: u16) -> Option<String> {
    match status {
        400..=499 => Some("ERR_BAD_REQUEST".to_string()),
        500..=599 => Some("ERR_BAD_RESPONSE".to_string()),
        _ => None,
    }
}

/// Sends a single prepared request. Implementations must not retry.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &RequestDescriptor) -> Result<TransportResponse, TransportError>;
}

/// [`Transport`] over a shared reqwest client.
#[derive(Clone)]
pub struct ReqwestTransport {
    client: Client,
    base_url: String,
}

impl ReqwestTransport {
    /// `client` carries the transport-level timeout and default headers.
    pub fn new(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    pub fn inner(&self) -> &Client {
        &self.client
    }

    fn build(
        &self,
        request: &RequestDescriptor,
    ) -> Result<reqwest::RequestBuilder, TransportError> {
        let url = resolve_url(&self.base_url, &request.url)
            .map_err(|e| TransportError::new(format!("{:#}", e), Some("ERR_INVALID_URL")))?;

        let mut builder = self.client.request(request.method.into(), url);
        if !request.config.query.is_empty() {
            builder = builder.query(&request.config.query);
        }
        for (name, value) in &request.config.headers {
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
                TransportError::new(
                    format!("Invalid header name {:?}: {}", name, e),
                    Some("ERR_BAD_OPTION_VALUE"),
                )
            })?;
            let mut value = HeaderValue::from_str(value).map_err(|e| {
                TransportError::new(
                    format!("Invalid value for header {}: {}", name, e),
                    Some("ERR_BAD_OPTION_VALUE"),
                )
            })?;
            if name == reqwest::header::AUTHORIZATION {
                value.set_sensitive(true);
            }
            builder = builder.header(name, value);
        }
        if let Some(payload) = &request.payload {
            builder = builder.json(payload);
        }
        Ok(builder)
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    #[tracing::instrument(skip(self, request), fields(method = %request.method, url = %request.url))]
    async fn send(&self, request: &RequestDescriptor) -> Result<TransportResponse, TransportError> {
        let builder = self.build(request)?;

        debug!("{} {} (retry {})", request.method, request.url, request.retry_count());
        let response = builder.send().await.map_err(|e| transport_error(&e))?;
        let status = response.status().as_u16();
        let body = response.bytes().await.map_err(|e| transport_error(&e))?;
        debug!("{} {} -> {} ({} bytes)", request.method, request.url, status, body.len());

        Ok(TransportResponse {
            status,
            body: body.to_vec(),
        })
    }
}

fn transport_error(error: &reqwest::Error) -> TransportError {
    let code = if error.is_timeout() {
        Some("ETIMEDOUT")
    } else if error.is_connect() || error.is_request() {
        Some("ERR_NETWORK")
    } else if error.is_body() || error.is_decode() {
        Some("ERR_BAD_RESPONSE")
    } else {
        None
    };
    TransportError::new(error.to_string(), code)
}
