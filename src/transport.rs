//! HTTP transport.

use std::{fmt, future::Future, pin::Pin, time::Duration};

use reqwest::header::{CONTENT_TYPE, HeaderValue};

use crate::{
    error::{Error, Result},
    sign::{HttpMethod, SignedRequest},
};

/// Boxed future returned by [`Transport::send`].
pub type TransportFuture<'a> = Pin<Box<dyn Future<Output = Result<RawResponse>> + Send + 'a>>;

/// Raw HTTP answer: status code and body bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response body.
    pub body: Vec<u8>,
}

impl RawResponse {
    /// Create a response.
    #[must_use]
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// Whether the status is in the 2xx range.
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Performs the network call for a signed request.
///
/// Implementations know nothing about the API: they must not retry, and must
/// report failures as [`Error::Network`] or [`Error::Timeout`]. Any HTTP
/// status, including 4xx/5xx, is a successful send.
pub trait Transport: Send + Sync {
    /// Send `request`, giving up after `timeout`.
    fn send<'a>(&'a self, request: &'a SignedRequest, timeout: Duration) -> TransportFuture<'a>;
}

/// [`Transport`] backed by a pooled `reqwest` client.
#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Create a transport with a fresh connection pool.
    pub fn new(verify_tls: bool) -> Result<Self> {
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(!verify_tls)
            .build()
            .map_err(|e| Error::config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }

    /// Wrap an existing `reqwest` client (and its pool).
    #[must_use]
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn send_inner(&self, request: &SignedRequest, timeout: Duration) -> Result<RawResponse> {
        let builder = match request.method() {
            HttpMethod::Get => self.client.get(request.url()),
            HttpMethod::Post => self
                .client
                .post(request.url())
                .header(
                    CONTENT_TYPE,
                    HeaderValue::from_static("application/x-www-form-urlencoded"),
                )
                .body(request.body().unwrap_or_default().to_string()),
        };

        let response = builder
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| map_reqwest_error(e, timeout))?;

        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|e| map_reqwest_error(e, timeout))?;

        Ok(RawResponse::new(status, body.to_vec()))
    }
}

impl Transport for HttpTransport {
    fn send<'a>(&'a self, request: &'a SignedRequest, timeout: Duration) -> TransportFuture<'a> {
        Box::pin(self.send_inner(request, timeout))
    }
}

impl fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpTransport").finish_non_exhaustive()
    }
}

fn map_reqwest_error(err: reqwest::Error, timeout: Duration) -> Error {
    if err.is_timeout() {
        return Error::Timeout { timeout };
    }

    // The reqwest error text includes the URL, which carries the API key
    // and signature.
    let err = err.without_url();
    let message = if err.is_connect() {
        "failed to connect"
    } else if err.is_body() || err.is_decode() {
        "failed to read response body"
    } else {
        "request failed"
    };
    Error::network(message, Some(Box::new(err)))
}
