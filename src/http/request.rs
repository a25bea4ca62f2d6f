//! Request descriptors threaded through the pipeline.

use anyhow::{Context, Result};
use reqwest::{Method, Url};
use serde_json::Value;
use std::fmt;
use std::time::Duration;

/// HTTP verbs exposed by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<HttpMethod> for Method {
    fn from(method: HttpMethod) -> Self {
        match method {
            HttpMethod::Get => Method::GET,
            HttpMethod::Post => Method::POST,
            HttpMethod::Put => Method::PUT,
            HttpMethod::Patch => Method::PATCH,
            HttpMethod::Delete => Method::DELETE,
        }
    }
}

/// Per-call options: extra headers, query parameters and a deadline override.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestConfig {
    pub headers: Vec<(String, String)>,
    pub query: Vec<(String, String)>,
    /// Overrides the client's wrapper deadline for this call.
    pub deadline: Option<Duration>,
}

impl RequestConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    pub fn deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Sets `name`, replacing any existing header with the same name
    /// (compared case-insensitively).
    pub fn set_header(&mut self, name: &str, value: String) {
        self.headers.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
        self.headers.push((name.to_string(), value));
    }

    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// One outbound call. The retry counter starts unset and each retry works
/// on a fresh descriptor produced by [`RequestDescriptor::next_attempt`], so
/// concurrent requests never share retry state.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestDescriptor {
    pub method: HttpMethod,
    pub url: String,
    pub payload: Option<Value>,
    pub config: RequestConfig,
    retry_count: Option<u32>,
}

impl RequestDescriptor {
    pub fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            payload: None,
            config: RequestConfig::default(),
            retry_count: None,
        }
    }

    pub fn with_payload(mut self, payload: Option<Value>) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_config(mut self, config: Option<RequestConfig>) -> Self {
        self.config = config.unwrap_or_default();
        self
    }

    /// Retries performed so far; an unset counter counts as zero.
    pub fn retry_count(&self) -> u32 {
        self.retry_count.unwrap_or(0)
    }

    pub fn is_retry(&self) -> bool {
        self.retry_count.is_some()
    }

    /// The same request with its retry counter incremented.
    pub fn next_attempt(&self) -> Self {
        Self {
            retry_count: Some(self.retry_count() + 1),
            ..self.clone()
        }
    }
}

/// Joins `url` onto `base` the way browser HTTP clients do: absolute URLs
/// win, otherwise exactly one `/` separates the base path and the URL.
pub fn resolve_url(base: &str, url: &str) -> Result<Url> {
    if let Ok(absolute) = Url::parse(url) {
        return Ok(absolute);
    }
    let joined = if url.is_empty() {
        base.to_string()
    } else {
        format!(
            "{}/{}",
            base.trim_end_matches('/'),
            url.trim_start_matches('/')
        )
    };
    Url::parse(&joined).with_context(|| format!("Invalid request URL: {}", joined))
}
