//! The transport client: request construction, dispatch, classification,
//! and retry.
//!
//! [`TransportClient::send_with`] is the entry point the orchestrator uses,
//! with the snapshot its turn already read. It never returns a raw
//! transport error: every failure is classified into an [`ErrorKind`] by
//! [`classify_response`] or [`classify_transport_error`] before it leaves
//! this module.

use crate::agent::events::{EventHandler, RelayEvent};
use crate::api::retry::RetryConfig;
use crate::api::tracing::{elapsed_ms, generate_request_id};
use crate::api::transport::{
    BufferedTransport, StreamingTransport, Transport, TransportError, WireRequest, http_client,
};
use crate::config::{
    AuthConfig, AuthType, RelayConfig, SettingsStore, TransportConfig, TransportKind,
};
use crate::error::{EnhanceError, EnhancementResult, ErrorKind};
use crate::{EnhancementData, OutgoingRequest, RawEnvelope};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Sends [`OutgoingRequest`]s to the enhancement endpoint.
///
/// Reads one settings snapshot per logical request, so all attempts of a
/// request use the same endpoint, auth, timeout, and transport even if the
/// settings change meanwhile.
pub struct TransportClient {
    settings: SettingsStore,
    buffered: Arc<dyn Transport>,
    streaming: Arc<dyn Transport>,
    handler: Arc<dyn EventHandler>,
}

impl TransportClient {
    /// Create a client with the default `reqwest`-backed transports.
    pub fn new(
        settings: SettingsStore,
        handler: Arc<dyn EventHandler>,
    ) -> Result<Self, EnhanceError> {
        let client = http_client().map_err(|e| EnhanceError::configuration(e.to_string()))?;
        Ok(Self::with_transports(
            settings,
            Arc::new(BufferedTransport::new(client.clone())),
            Arc::new(StreamingTransport::new(client)),
            handler,
        ))
    }

    /// Create a client with custom transports.
    pub fn with_transports(
        settings: SettingsStore,
        buffered: Arc<dyn Transport>,
        streaming: Arc<dyn Transport>,
        handler: Arc<dyn EventHandler>,
    ) -> Self {
        Self {
            settings,
            buffered,
            streaming,
            handler,
        }
    }

    fn transport_for(&self, kind: TransportKind) -> &dyn Transport {
        match kind {
            TransportKind::Buffered => self.buffered.as_ref(),
            TransportKind::Streaming => self.streaming.as_ref(),
        }
    }

    /// Send a request, passing the prompt through untouched when the relay
    /// is disabled.
    pub async fn send(
        &self,
        request: &OutgoingRequest,
        cancel: &CancellationToken,
    ) -> EnhancementResult {
        let config = self.settings.snapshot();
        self.send_with(&config, request, cancel).await
    }

    /// Like [`send`](Self::send), but against a snapshot the caller already
    /// holds. A turn that read its flags from `config` must send with it too.
    pub async fn send_with(
        &self,
        config: &RelayConfig,
        request: &OutgoingRequest,
        cancel: &CancellationToken,
    ) -> EnhancementResult {
        if !config.features.enabled {
            self.handler.on_event(&RelayEvent::Passthrough {
                prompt: &request.prompt,
            });
            return EnhancementResult::Success(EnhancementData::passthrough(&request.prompt));
        }
        self.dispatch_with(config, request, cancel).await
    }

    /// Send a request regardless of the feature switch.
    pub async fn dispatch(
        &self,
        request: &OutgoingRequest,
        cancel: &CancellationToken,
    ) -> EnhancementResult {
        let config = self.settings.snapshot();
        self.dispatch_with(&config, request, cancel).await
    }

    /// Send against `config` regardless of the feature switch.
    pub async fn dispatch_with(
        &self,
        config: &RelayConfig,
        request: &OutgoingRequest,
        cancel: &CancellationToken,
    ) -> EnhancementResult {
        let request_id = generate_request_id();
        let operation = if request.is_test_connection() {
            "test_connection"
        } else {
            "enhance"
        };

        let wire = match build_wire_request(&config.transport, request, &request_id) {
            Ok(w) => w,
            Err(e) => return EnhancementResult::Failure(e),
        };

        let retry = RetryConfig::with_retries(config.transport.retries);
        let transport = self.transport_for(config.transport.transport);
        let timeout = config.transport.timeout();
        let started = Instant::now();
        let mut attempt = 0u32;

        let outcome = loop {
            attempt += 1;
            if cancel.is_cancelled() {
                self.handler.on_event(&RelayEvent::Cancelled {
                    request_id: &request_id,
                    attempt,
                });
                break EnhancementResult::Cancelled;
            }

            self.handler.on_event(&RelayEvent::AttemptStarted {
                request_id: &request_id,
                attempt,
                max_attempts: retry.max_attempts(),
                transport: transport.kind(),
                request,
            });

            let attempt_start = Instant::now();
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(TransportError::Cancelled),
                r = tokio::time::timeout(timeout, transport.execute(&wire, cancel)) => {
                    r.unwrap_or(Err(TransportError::Timeout))
                }
            };
            let duration_ms = elapsed_ms(attempt_start);

            let error = match result {
                Err(TransportError::Cancelled) => {
                    self.handler.on_event(&RelayEvent::Cancelled {
                        request_id: &request_id,
                        attempt,
                    });
                    break EnhancementResult::Cancelled;
                }
                Err(e) => classify_transport_error(&e),
                Ok(raw) => match classify_response(raw.status, &raw.body) {
                    Ok(data) => {
                        self.handler.on_event(&RelayEvent::AttemptSucceeded {
                            request_id: &request_id,
                            attempt,
                            status: raw.status,
                            duration_ms,
                        });
                        break EnhancementResult::Success(data);
                    }
                    Err(e) => e,
                },
            };

            self.handler.on_event(&RelayEvent::AttemptFailed {
                request_id: &request_id,
                attempt,
                error: &error,
                duration_ms,
            });

            if !retry.should_retry(attempt) {
                break EnhancementResult::Failure(error);
            }

            let delay = retry.delay_after_attempt(attempt);
            self.handler.on_event(&RelayEvent::RetryScheduled {
                request_id: &request_id,
                next_attempt: attempt + 1,
                delay,
            });
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    self.handler.on_event(&RelayEvent::Cancelled {
                        request_id: &request_id,
                        attempt,
                    });
                    break EnhancementResult::Cancelled;
                }
                _ = tokio::time::sleep(delay) => {}
            }
        };

        self.handler.on_event(&RelayEvent::Outcome {
            operation,
            duration_ms: elapsed_ms(started),
            success: outcome.is_success(),
            kind: outcome.error().map(|e| e.kind),
            attempts: attempt,
        });
        outcome
    }
}

// ── Request construction ───────────────────────────────────────────

/// The authentication header for `auth`, if any.
pub fn auth_header(auth: &AuthConfig) -> Option<(String, String)> {
    let name = if auth.header_name.trim().is_empty() {
        "Authorization".to_string()
    } else {
        auth.header_name.clone()
    };
    let value = match auth.auth_type {
        AuthType::None => return None,
        AuthType::Bearer => format!("Bearer {}", auth.token),
        AuthType::ApiKey => auth.token.clone(),
        AuthType::Basic => format!("Basic {}", STANDARD.encode(auth.token.as_bytes())),
    };
    Some((name, value))
}

/// Serialize `request` and attach headers for `config`.
pub fn build_wire_request(
    config: &TransportConfig,
    request: &OutgoingRequest,
    request_id: &str,
) -> Result<WireRequest, EnhanceError> {
    let body = serde_json::to_string(request).map_err(|e| {
        EnhanceError::new(ErrorKind::ServerError, format!("failed to serialize request: {e}"))
    })?;

    let mut headers = vec![
        ("Content-Type".to_string(), "application/json".to_string()),
        ("User-Agent".to_string(), config.user_agent.clone()),
        (
            "X-Extension-Version".to_string(),
            request.metadata.extension_version.clone(),
        ),
        (
            "X-Host-Version".to_string(),
            request.metadata.host_version.clone(),
        ),
        ("X-Request-Id".to_string(), request_id.to_string()),
    ];
    headers.extend(auth_header(&config.auth));

    Ok(WireRequest {
        url: config.endpoint.clone(),
        headers,
        body,
    })
}

// ── Classification ─────────────────────────────────────────────────

/// Classify an HTTP response.
///
/// Status-level classification runs first; the body's `success` flag is
/// only consulted for 2xx responses.
pub fn classify_response(status: u16, body: &str) -> Result<EnhancementData, EnhanceError> {
    let parsed = serde_json::from_str::<RawEnvelope>(body);
    let (server_code, server_message) = match &parsed {
        Ok(env) => env
            .error
            .as_ref()
            .map_or((None, None), |e| (e.code.clone(), e.message.clone())),
        Err(_) => (None, None),
    };

    if !(200..300).contains(&status) {
        let kind = match status {
            401 | 403 => ErrorKind::AuthenticationError,
            429 => ErrorKind::RateLimited,
            408 | 504 => ErrorKind::TimeoutError,
            _ => ErrorKind::ServerError,
        };
        let message = server_message.unwrap_or_else(|| format!("HTTP {status}"));
        debug!("HTTP {status} classified as {kind}");
        let err = EnhanceError::new(kind, message).with_status(status);
        return Err(match server_code {
            Some(code) => err.with_code(code),
            None => err,
        });
    }

    let envelope = parsed.map_err(|e| {
        EnhanceError::new(
            ErrorKind::InvalidResponse,
            format!("response body is not a valid enhancement envelope: {e}"),
        )
        .with_status(status)
    })?;

    if !envelope.success {
        let kind = server_code
            .as_deref()
            .and_then(ErrorKind::from_code)
            .unwrap_or(ErrorKind::ServerError);
        let message =
            server_message.unwrap_or_else(|| "server reported failure without details".to_string());
        let err = EnhanceError::new(kind, message).with_status(status);
        return Err(match server_code {
            Some(code) => err.with_code(code),
            None => err,
        });
    }

    Ok(envelope.data.unwrap_or_default())
}

/// Classify a failure that produced no HTTP response.
pub fn classify_transport_error(error: &TransportError) -> EnhanceError {
    let kind = match error {
        TransportError::Connect(_) => ErrorKind::ConnectionError,
        TransportError::Timeout => ErrorKind::TimeoutError,
        TransportError::Cancelled | TransportError::Other(_) => ErrorKind::ServerError,
    };
    EnhanceError::new(kind, error.to_string())
}
