//! Outbound HTTP Transport
//!
//! One-shot requests go through the [`HttpClient`] trait; [`RetryingTransport`]
//! wraps any client with a bounded retry policy. Response bodies are exposed
//! as a stream of chunks and are never buffered by this layer.

use futures_util::stream::{self, BoxStream, StreamExt};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// User agent sent with every request
pub const USER_AGENT: &str = concat!("picosense-ota/", env!("CARGO_PKG_VERSION"));

/// Headers for release API and contents listing calls
pub const API_HEADERS: &[(&str, &str)] = &[
    ("Accept", "application/vnd.github.v3+json"),
    ("Accept-Encoding", "identity"),
];

/// Headers for raw file content
pub const RAW_HEADERS: &[(&str, &str)] = &[("Accept", "*/*"), ("Accept-Encoding", "identity")];

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("network error: {0}")]
    Network(String),

    #[error("server error (HTTP {status})")]
    Server { status: u16 },

    /// 4xx responses. Never retried.
    #[error("request rejected (HTTP {status})")]
    Rejected { status: u16 },

    #[error("failed reading response body: {0}")]
    Body(String),
}

impl TransportError {
    /// Network failures and 5xx responses are worth another attempt
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Server { .. })
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Server { status } | Self::Rejected { status } => Some(*status),
            _ => None,
        }
    }
}

pub type BodyStream = BoxStream<'static, Result<Vec<u8>, TransportError>>;

/// A response whose body has not been read yet
pub struct Response {
    status: u16,
    body: BodyStream,
}

impl Response {
    pub fn new(status: u16, body: BodyStream) -> Self {
        Self { status, body }
    }

    /// Response with a body delivered as a single chunk
    pub fn from_bytes(status: u16, bytes: impl Into<Vec<u8>>) -> Self {
        let bytes = bytes.into();
        if bytes.is_empty() {
            return Self::new(status, stream::empty().boxed());
        }
        Self::new(status, stream::once(async move { Ok(bytes) }).boxed())
    }

    /// Response with a body delivered as the given sequence of chunks
    pub fn from_chunks(status: u16, chunks: Vec<Vec<u8>>) -> Self {
        Self::new(status, stream::iter(chunks.into_iter().map(Ok)).boxed())
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Next body chunk, `None` once the body is exhausted
    pub async fn next_chunk(&mut self) -> Option<Result<Vec<u8>, TransportError>> {
        self.body.next().await
    }

    /// Read the whole body. Only for small payloads (API JSON, version marker).
    pub async fn bytes(mut self) -> Result<Vec<u8>, TransportError> {
        let mut out = Vec::new();
        while let Some(chunk) = self.next_chunk().await {
            out.extend_from_slice(&chunk?);
        }
        Ok(out)
    }

    pub async fn text(self) -> Result<String, TransportError> {
        let bytes = self.bytes().await?;
        String::from_utf8(bytes).map_err(|e| TransportError::Body(e.to_string()))
    }
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Response")
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

/// A single request attempt
pub trait HttpClient: Send + Sync {
    fn get(
        &self,
        url: &str,
        headers: &[(&str, &str)],
    ) -> impl Future<Output = Result<Response, TransportError>> + Send;
}

impl<C: HttpClient> HttpClient for Arc<C> {
    fn get(
        &self,
        url: &str,
        headers: &[(&str, &str)],
    ) -> impl Future<Output = Result<Response, TransportError>> + Send {
        (**self).get(url, headers)
    }
}

/// Production client backed by reqwest
#[derive(Clone)]
pub struct ReqwestClient {
    client: reqwest::Client,
}

impl ReqwestClient {
    /// Build a client with the device user agent and a per-request timeout
    pub fn new(timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Network(e.to_string()))?;
        Ok(Self { client })
    }
}

impl HttpClient for ReqwestClient {
    async fn get(&self, url: &str, headers: &[(&str, &str)]) -> Result<Response, TransportError> {
        let mut request = self.client.get(url);
        for (name, value) in headers {
            request = request.header(*name, *value);
        }

        let response = request
            .send()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;
        let status = response.status().as_u16();

        let body = response
            .bytes_stream()
            .map(|chunk| {
                chunk
                    .map(|b| b.to_vec())
                    .map_err(|e| TransportError::Body(e.to_string()))
            })
            .boxed();

        Ok(Response::new(status, body))
    }
}

/// Attempt count and fixed delay between attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    /// No sleeping between attempts (tests, CLI one-shots)
    pub fn immediate(max_attempts: u32) -> Self {
        Self::new(max_attempts, Duration::ZERO)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(2))
    }
}

/// Wraps an [`HttpClient`] with bounded retries
#[derive(Clone)]
pub struct RetryingTransport<C> {
    client: C,
    policy: RetryPolicy,
}

impl<C: HttpClient> RetryingTransport<C> {
    pub fn new(client: C, policy: RetryPolicy) -> Self {
        Self { client, policy }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    /// Issue a GET, retrying network failures and 5xx responses.
    ///
    /// A 4xx is returned at once as [`TransportError::Rejected`]. Unsuccessful
    /// responses are dropped before the next attempt so their connection is
    /// released while we sleep.
    pub async fn request(
        &self,
        url: &str,
        headers: &[(&str, &str)],
    ) -> Result<Response, TransportError> {
        let mut last_error = TransportError::Network("no attempt made".to_string());

        for attempt in 1..=self.policy.max_attempts {
            debug!(url, attempt, "HTTP GET");
            match self.client.get(url, headers).await {
                Ok(response) if response.is_success() => return Ok(response),
                Ok(response) => {
                    let status = response.status();
                    drop(response);
                    if (500..600).contains(&status) {
                        warn!(url, attempt, status, "Server error");
                        last_error = TransportError::Server { status };
                    } else {
                        warn!(url, status, "Request rejected, not retrying");
                        return Err(TransportError::Rejected { status });
                    }
                }
                Err(e) if e.is_retryable() => {
                    warn!(url, attempt, error = %e, "Request failed");
                    last_error = e;
                }
                Err(e) => return Err(e),
            }

            if attempt < self.policy.max_attempts && !self.policy.delay.is_zero() {
                tokio::time::sleep(self.policy.delay).await;
            }
        }

        Err(last_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::updater::testing::{FakeClient, Scripted};

    const URL: &str = "https://api.test/repos/o/r/releases/latest";

    #[tokio::test]
    async fn test_success_first_attempt() {
        let client = Arc::new(FakeClient::new().with(URL, Scripted::ok("{}")));
        let transport = RetryingTransport::new(client.clone(), RetryPolicy::immediate(3));

        let response = transport.request(URL, API_HEADERS).await.unwrap();
        assert_eq!(response.status(), 200);
        assert_eq!(response.text().await.unwrap(), "{}");
        assert_eq!(client.calls_to(URL), 1);
    }

    #[tokio::test]
    async fn test_retries_server_errors_then_succeeds() {
        let client = Arc::new(
            FakeClient::new()
                .with(URL, Scripted::status(503))
                .with(URL, Scripted::network("connection reset"))
                .with(URL, Scripted::ok("done")),
        );
        let transport = RetryingTransport::new(client.clone(), RetryPolicy::immediate(3));

        let response = transport.request(URL, API_HEADERS).await.unwrap();
        assert_eq!(response.text().await.unwrap(), "done");
        assert_eq!(client.calls_to(URL), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let client = Arc::new(FakeClient::new().with(URL, Scripted::status(500)));
        let transport = RetryingTransport::new(client.clone(), RetryPolicy::immediate(3));

        let err = transport.request(URL, API_HEADERS).await.unwrap_err();
        assert_eq!(err, TransportError::Server { status: 500 });
        assert_eq!(client.calls_to(URL), 3);
    }

    #[tokio::test]
    async fn test_client_error_not_retried() {
        let client = Arc::new(FakeClient::new().with(URL, Scripted::status(404)));
        let transport = RetryingTransport::new(client.clone(), RetryPolicy::immediate(3));

        let err = transport.request(URL, API_HEADERS).await.unwrap_err();
        assert_eq!(err, TransportError::Rejected { status: 404 });
        assert!(!err.is_retryable());
        assert_eq!(client.calls_to(URL), 1);
    }

    #[test]
    fn test_retry_policy_needs_one_attempt() {
        assert_eq!(RetryPolicy::immediate(0).max_attempts, 1);
        assert_eq!(RetryPolicy::default().delay, Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_empty_body_has_no_chunks() {
        let mut response = Response::from_bytes(200, Vec::new());
        assert!(response.next_chunk().await.is_none());
    }
}
