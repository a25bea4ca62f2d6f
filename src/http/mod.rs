//! HTTP client module: request pipeline with auth injection, deadlines,
//! retry and error normalization.

mod client;
mod error;
mod request;
mod retry;
mod transport;

pub use client::{ApiClient, DEFAULT_DEADLINE_MS};
pub use error::{ApiError, EnhancedError};
pub use request::{HttpMethod, RequestConfig, RequestDescriptor, resolve_url};
pub use retry::{BASE_DELAY_MS, MAX_DELAY_MS, MAX_RETRIES, RETRYABLE_STATUSES, RetryPolicy};
pub use transport::{ReqwestTransport, Transport, TransportError, TransportResponse};

#[cfg(test)]
pub use transport::MockTransport;
