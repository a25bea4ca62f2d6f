//! JSON API client with auth injection, deadlines and retry.

use anyhow::{Context, anyhow};
use log::{debug, warn};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use super::error::{ApiError, EnhancedError};
use super::request::{HttpMethod, RequestConfig, RequestDescriptor};
use super::retry::RetryPolicy;
use super::transport::{Transport, TransportResponse};
use crate::storage::{TokenStore, bearer_token, mask_token};

/// Default wrapper deadline for a single attempt in milliseconds.
pub const DEFAULT_DEADLINE_MS: u64 = 10_000;

/// HTTP client for a JSON API.
///
/// Every attempt reads the bearer token from storage, runs under a wrapper
/// deadline, and responses with a transient status are retried with
/// exponential backoff. Failures are normalized into [`ApiError`].
#[derive(Clone)]
pub struct ApiClient {
    transport: Arc<dyn Transport>,
    tokens: Arc<dyn TokenStore>,
    retry: RetryPolicy,
    deadline: Duration,
}

impl ApiClient {
    pub fn new(transport: Arc<dyn Transport>, tokens: Arc<dyn TokenStore>) -> Self {
        Self {
            transport,
            tokens,
            retry: RetryPolicy::default(),
            deadline: Duration::from_millis(DEFAULT_DEADLINE_MS),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    pub fn token_store(&self) -> Arc<dyn TokenStore> {
        Arc::clone(&self.tokens)
    }

    #[tracing::instrument(skip(self, config))]
    pub async fn get<T: DeserializeOwned>(
        &self,
        url: &str,
        config: Option<RequestConfig>,
    ) -> Result<T, ApiError> {
        self.request(RequestDescriptor::new(HttpMethod::Get, url).with_config(config))
            .await
    }

    #[tracing::instrument(skip(self, payload, config))]
    pub async fn post<T, P>(
        &self,
        url: &str,
        payload: Option<&P>,
        config: Option<RequestConfig>,
    ) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
        P: Serialize + ?Sized,
    {
        self.send_with_payload(HttpMethod::Post, url, payload, config)
            .await
    }

    #[tracing::instrument(skip(self, payload, config))]
    pub async fn put<T, P>(
        &self,
        url: &str,
        payload: Option<&P>,
        config: Option<RequestConfig>,
    ) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
        P: Serialize + ?Sized,
    {
        self.send_with_payload(HttpMethod::Put, url, payload, config)
            .await
    }

    #[tracing::instrument(skip(self, payload, config))]
    pub async fn patch<T, P>(
        &self,
        url: &str,
        payload: Option<&P>,
        config: Option<RequestConfig>,
    ) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
        P: Serialize + ?Sized,
    {
        self.send_with_payload(HttpMethod::Patch, url, payload, config)
            .await
    }

    #[tracing::instrument(skip(self, config))]
    pub async fn delete<T: DeserializeOwned>(
        &self,
        url: &str,
        config: Option<RequestConfig>,
    ) -> Result<T, ApiError> {
        self.request(RequestDescriptor::new(HttpMethod::Delete, url).with_config(config))
            .await
    }

    /// Runs a descriptor through the pipeline and decodes the body.
    ///
    /// The wrapper deadline bounds the whole call, retries and backoff
    /// included. When it fires the in-flight send is dropped, which
    /// cancels it.
    pub async fn request<T: DeserializeOwned>(
        &self,
        request: RequestDescriptor,
    ) -> Result<T, ApiError> {
        let deadline = request.config.deadline.unwrap_or(self.deadline);
        let method = request.method;
        let url = request.url.clone();

        match tokio::time::timeout(deadline, self.execute(request)).await {
            Ok(response) => decode_body(&response?),
            Err(_) => {
                warn!("{} {}: no response within {}ms", method, url, deadline.as_millis());
                Err(ApiError::Timeout { after: deadline })
            }
        }
    }

    async fn send_with_payload<T, P>(
        &self,
        method: HttpMethod,
        url: &str,
        payload: Option<&P>,
        config: Option<RequestConfig>,
    ) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
        P: Serialize + ?Sized,
    {
        let payload = payload
            .map(serde_json::to_value)
            .transpose()
            .context("Failed to encode request payload")?;
        self.request(
            RequestDescriptor::new(method, url)
                .with_payload(payload)
                .with_config(config),
        )
        .await
    }

    /// Attempts `request` until it succeeds, fails without a response, or
    /// exhausts the retry policy.
    async fn execute(&self, mut request: RequestDescriptor) -> Result<TransportResponse, ApiError> {
        loop {
            let response = self.attempt(&request).await?;
            if response.is_success() {
                return Ok(response);
            }

            let status = response.status;
            if !self.retry.should_retry(&request, status) {
                if RetryPolicy::is_retryable_status(status) {
                    warn!(
                        "{} {}: giving up after {} retries (HTTP {})",
                        request.method,
                        request.url,
                        request.retry_count(),
                        status
                    );
                }
                return Err(EnhancedError::from_response(&response).into());
            }

            request = request.next_attempt();
            let delay = self.retry.backoff(request.retry_count());
            warn!(
                "{} {}: HTTP {}, retry {}/{} in {}ms...",
                request.method,
                request.url,
                status,
                request.retry_count(),
                self.retry.max_retries,
                delay.as_millis()
            );
            tokio::time::sleep(delay).await;
        }
    }

    /// One trip through the transport.
    async fn attempt(&self, request: &RequestDescriptor) -> Result<TransportResponse, ApiError> {
        let prepared = self.authorize(request);
        self.transport.send(&prepared).await.map_err(|error| {
            debug!("{} {}: transport error: {}", request.method, request.url, error);
            EnhancedError::from_transport(&error).into()
        })
    }

    /// Copies `request` with the bearer token attached, if one is stored.
    fn authorize(&self, request: &RequestDescriptor) -> RequestDescriptor {
        let mut prepared = request.clone();
        if let Some(token) = bearer_token(self.tokens.as_ref()) {
            debug!("Attaching bearer token {}", mask_token(&token));
            prepared
                .config
                .set_header("Authorization", format!("Bearer {}", token));
        }
        prepared
    }
}

/// Decodes a JSON body. An empty body decodes as `null`.
fn decode_body<T: DeserializeOwned>(response: &TransportResponse) -> Result<T, ApiError> {
    let body = if response.body.iter().all(u8::is_ascii_whitespace) {
        Value::Null
    } else {
        serde_json::from_slice(&response.body).context("Failed to parse JSON response")?
    };
    serde_json::from_value(body)
        .map_err(|e| anyhow!(e).context("Response body does not match the expected type"))
        .map_err(ApiError::Other)
}
