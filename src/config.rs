use anyhow::{Context, Result};
use log::debug;
use reqwest::Client;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::{
    auth::{AUTH_EVENTS_PATH, AuthApi, HttpEventSource, ReconnectPolicy},
    http::{ApiClient, DEFAULT_DEADLINE_MS, ReqwestTransport, RetryPolicy},
    runtime::Runtime,
    storage::{FileTokenStore, TokenStore},
};

/// Default API base URL.
pub const DEFAULT_BASE_URL: &str = "http://localhost:3000/";

/// Default transport timeout in milliseconds.
pub const DEFAULT_TIMEOUT_MS: u64 = 10_000;

const USER_AGENT: &str = concat!("rapi/", env!("RAPI_VERSION"));

/// Everything needed to build the clients.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    pub base_url: String,
    /// Timeout enforced by the HTTP transport itself.
    pub timeout: Duration,
    /// Wrapper deadline enforced around every attempt, independent of `timeout`.
    pub deadline: Duration,
    /// Token storage file; the platform default when unset.
    pub storage_path: Option<PathBuf>,
    pub events_path: String,
    pub retry: RetryPolicy,
    pub reconnect: ReconnectPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            deadline: Duration::from_millis(DEFAULT_DEADLINE_MS),
            storage_path: None,
            events_path: AUTH_EVENTS_PATH.to_string(),
            retry: RetryPolicy::default(),
            reconnect: ReconnectPolicy::default(),
        }
    }
}

impl ClientConfig {
    /// Client for regular calls: JSON content type and the transport timeout.
    pub fn build_http_client(&self) -> Result<Client> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        Client::builder()
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .timeout(self.timeout)
            .build()
            .context("Failed to build HTTP client")
    }

    /// Client for the event stream. Only connecting is bounded, the stream
    /// itself stays open indefinitely.
    pub fn build_stream_client(&self) -> Result<Client> {
        Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(self.timeout)
            .build()
            .context("Failed to build event stream client")
    }

    pub fn open_token_store<R: Runtime + 'static>(&self, runtime: R) -> Result<Arc<dyn TokenStore>> {
        let store = FileTokenStore::open(runtime, self.storage_path.clone())?;
        Ok(Arc::new(store))
    }

    pub fn api_client(&self, tokens: Arc<dyn TokenStore>) -> Result<ApiClient> {
        debug!(
            "API client for {} (timeout {}ms, deadline {}ms)",
            self.base_url,
            self.timeout.as_millis(),
            self.deadline.as_millis()
        );
        let transport = ReqwestTransport::new(self.build_http_client()?, self.base_url.clone());
        Ok(ApiClient::new(Arc::new(transport), tokens)
            .with_retry_policy(self.retry.clone())
            .with_deadline(self.deadline))
    }

    pub fn auth_api(&self, client: ApiClient) -> Result<AuthApi> {
        let events = HttpEventSource::new(
            self.build_stream_client()?,
            self.base_url.clone(),
            self.events_path.clone(),
            client.token_store(),
        )
        .with_response_timeout(self.timeout);
        Ok(AuthApi::new(client, Arc::new(events)).with_reconnect_policy(self.reconnect.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::MockRuntime;
    use mockall::predicate::eq;
    use mockito::{Matcher, Server};
    use serde_json::Value;

    /// Helper function to verify Authorization header behavior
    /// - `token`: Some(token) to test with a stored token, None to test without
    async fn verify_authorization_header(token: Option<&'static str>) {
        // --- Setup MockRuntime ---

        let storage = PathBuf::from("/home/user/.config/rapi/storage.json");
        let mut runtime = MockRuntime::new();
        runtime
            .expect_config_dir()
            .returning(|| Some(PathBuf::from("/home/user/.config")));
        runtime
            .expect_exists()
            .with(eq(storage.clone()))
            .returning(move |_| token.is_some());
        runtime
            .expect_read_to_string()
            .with(eq(storage))
            .returning(move |_| Ok(format!(r#"{{"authToken":"{}"}}"#, token.unwrap_or_default())));

        // --- Create Mock Server ---

        let mut server = Server::new_async().await;

        let expected_header = match token {
            Some(t) => Matcher::Exact(format!("Bearer {}", t)),
            None => Matcher::Missing,
        };

        let mock = server
            .mock("GET", "/auth/profile")
            .match_header("Authorization", expected_header)
            .match_header("user-agent", Matcher::Regex("^rapi/".to_string()))
            .with_status(200)
            .with_body("{}")
            .create_async()
            .await;

        // --- Execute ---

        let config = ClientConfig {
            base_url: server.url(),
            ..ClientConfig::default()
        };
        let tokens = config.open_token_store(runtime).unwrap();
        let client = config.api_client(tokens).unwrap();
        let _: Value = client.get("/auth/profile", None).await.unwrap();

        // --- Verify ---

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_config_with_stored_token() {
        verify_authorization_header(Some("test_token_1234")).await;
    }

    #[tokio::test]
    async fn test_config_without_stored_token() {
        verify_authorization_header(None).await;
    }

    #[test]
    fn test_default_config() {
        let config = ClientConfig::default();
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.timeout, Duration::from_millis(10_000));
        assert_eq!(config.deadline, Duration::from_millis(10_000));
        assert_eq!(config.events_path, "/api/auth/events");
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.reconnect.max_retries, 3);
        assert_eq!(config.reconnect.delay, Duration::from_millis(5000));
    }

    #[test]
    fn test_build_clients() {
        let config = ClientConfig::default();
        assert!(config.build_http_client().is_ok());
        assert!(config.build_stream_client().is_ok());
    }
}
