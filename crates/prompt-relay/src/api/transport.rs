//! HTTP transports.
//!
//! A [`Transport`] performs exactly one HTTP exchange for a prepared
//! [`WireRequest`]. Two implementations behave identically from the
//! caller's point of view:
//!
//! - [`BufferedTransport`] sends the request and reads the whole body with
//!   one `text()` call.
//! - [`StreamingTransport`] reads the body chunk by chunk and races every
//!   read against the cancellation token, so a cancelled turn stops network
//!   I/O immediately instead of waiting for the server to finish.
//!
//! Timeouts are applied by the caller around the whole attempt; transports
//! only report what `reqwest` tells them.

use crate::config::TransportKind;
use futures::future::BoxFuture;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Future returned by [`Transport::execute`].
pub type TransportFuture<'a> = BoxFuture<'a, Result<RawResponse, TransportError>>;

/// A fully prepared request: URL, headers, serialized JSON body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl WireRequest {
    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Status and body of a completed exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    pub status: u16,
    pub body: String,
}

/// Failure below the HTTP status level.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("request timed out")]
    Timeout,
    #[error("request cancelled")]
    Cancelled,
    #[error("request failed: {0}")]
    Other(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        // A connect failure can also report is_timeout(); it is still a
        // connect failure.
        if e.is_connect() {
            TransportError::Connect(error_chain(&e))
        } else if e.is_timeout() {
            TransportError::Timeout
        } else {
            TransportError::Other(error_chain(&e))
        }
    }
}

/// Render an error with its sources, e.g. `"error sending request: dns error: ..."`.
fn error_chain(e: &(dyn std::error::Error + 'static)) -> String {
    let mut out = e.to_string();
    let mut source = e.source();
    while let Some(s) = source {
        out.push_str(": ");
        out.push_str(&s.to_string());
        source = s.source();
    }
    out
}

/// One HTTP exchange.
pub trait Transport: Send + Sync {
    fn kind(&self) -> TransportKind;

    /// POST `request` and return the status and body.
    fn execute<'a>(
        &'a self,
        request: &'a WireRequest,
        cancel: &'a CancellationToken,
    ) -> TransportFuture<'a>;
}

/// Build the shared `reqwest` client used by both transports.
///
/// No client-level timeouts are set: the per-attempt timeout from the
/// settings is the only deadline, applied by the caller.
pub fn http_client() -> Result<reqwest::Client, TransportError> {
    reqwest::Client::builder()
        .pool_idle_timeout(Duration::from_secs(90))
        .build()
        .map_err(|e| TransportError::Other(format!("failed to build HTTP client: {e}")))
}

fn prepare(client: &reqwest::Client, request: &WireRequest) -> reqwest::RequestBuilder {
    let mut builder = client.post(&request.url);
    for (name, value) in &request.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    builder.body(request.body.clone())
}

// ── Buffered ───────────────────────────────────────────────────────

/// Reads the full response body in one call.
#[derive(Clone)]
pub struct BufferedTransport {
    client: reqwest::Client,
}

impl BufferedTransport {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Transport for BufferedTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Buffered
    }

    fn execute<'a>(
        &'a self,
        request: &'a WireRequest,
        _cancel: &'a CancellationToken,
    ) -> TransportFuture<'a> {
        Box::pin(async move {
            trace!("Buffered POST {} ({} bytes)", request.url, request.body.len());
            let resp = prepare(&self.client, request).send().await?;
            let status = resp.status().as_u16();
            let body = resp.text().await?;
            Ok(RawResponse { status, body })
        })
    }
}

// ── Streaming ──────────────────────────────────────────────────────

/// Reads the response body incrementally, stopping as soon as the
/// cancellation token fires.
#[derive(Clone)]
pub struct StreamingTransport {
    client: reqwest::Client,
}

impl StreamingTransport {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Transport for StreamingTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Streaming
    }

    fn execute<'a>(
        &'a self,
        request: &'a WireRequest,
        cancel: &'a CancellationToken,
    ) -> TransportFuture<'a> {
        Box::pin(async move {
            trace!("Streaming POST {} ({} bytes)", request.url, request.body.len());

            let mut resp = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(TransportError::Cancelled),
                sent = prepare(&self.client, request).send() => sent?,
            };
            let status = resp.status().as_u16();

            let mut body: Vec<u8> = Vec::new();
            let mut chunks = 0usize;
            loop {
                let next = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        debug!("Stream cancelled after {chunks} chunk(s)");
                        return Err(TransportError::Cancelled);
                    }
                    chunk = resp.chunk() => chunk?,
                };
                match next {
                    Some(bytes) => {
                        chunks += 1;
                        body.extend_from_slice(&bytes);
                    }
                    None => break,
                }
            }

            trace!("Stream completed: HTTP {status}, {chunks} chunk(s), {} bytes", body.len());
            Ok(RawResponse {
                status,
                body: String::from_utf8_lossy(&body).into_owned(),
            })
        })
    }
}
