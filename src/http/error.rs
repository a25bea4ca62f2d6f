//! Error types surfaced by the request pipeline.

use std::fmt;
use std::time::Duration;

use super::transport::{TransportError, TransportResponse, response_error_code};

/// A normalized pipeline failure.
///
/// `status` is set only when the server answered; `code` only when the
/// transport classified the failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnhancedError {
    pub message: String,
    pub status: Option<u16>,
    pub code: Option<String>,
}

impl EnhancedError {
    /// A failure where no response was received.
    pub fn from_transport(error: &TransportError) -> Self {
        Self {
            message: error.message.clone(),
            status: None,
            code: error.code.clone(),
        }
    }

    /// A response with a non-success status. Prefers the server's own
    /// `message` over the generic status text.
    pub fn from_response(response: &TransportResponse) -> Self {
        let message = response.server_message().unwrap_or_else(|| {
            format!("Request failed with status code {}", response.status)
        });
        Self {
            message,
            status: Some(response.status),
            code: response_error_code(response.status),
        }
    }
}

impl fmt::Display for EnhancedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(status) = self.status {
            write!(f, " (HTTP {})", status)?;
        }
        if let Some(code) = &self.code {
            write!(f, " [{}]", code)?;
        }
        Ok(())
    }
}

impl std::error::Error for EnhancedError {}

/// Everything an [`ApiClient`](super::ApiClient) call can fail with.
#[derive(Debug)]
pub enum ApiError {
    /// Transport failure or HTTP error status, normalized.
    Request(EnhancedError),
    /// The wrapper deadline elapsed before the transport resolved.
    Timeout { after: Duration },
    /// Failure outside the pipeline, such as encoding the payload or
    /// decoding the body. Passed through untouched.
    Other(anyhow::Error),
}

impl ApiError {
    pub fn enhanced(&self) -> Option<&EnhancedError> {
        match self {
            ApiError::Request(e) => Some(e),
            _ => None,
        }
    }

    pub fn status(&self) -> Option<u16> {
        self.enhanced().and_then(|e| e.status)
    }

    pub fn code(&self) -> Option<&str> {
        self.enhanced().and_then(|e| e.code.as_deref())
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, ApiError::Timeout { .. })
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiError::Request(e) => write!(f, "{}", e),
            ApiError::Timeout { after } => {
                write!(f, "Request timed out after {}ms", after.as_millis())
            }
            ApiError::Other(e) => write!(f, "{:#}", e),
        }
    }
}

impl std::error::Error for ApiError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ApiError::Request(e) => Some(e),
            ApiError::Timeout { .. } => None,
            ApiError::Other(e) => Some(e.as_ref()),
        }
    }
}

impl From<EnhancedError> for ApiError {
    fn from(error: EnhancedError) -> Self {
        ApiError::Request(error)
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(error: anyhow::Error) -> Self {
        ApiError::Other(error)
    }
}
