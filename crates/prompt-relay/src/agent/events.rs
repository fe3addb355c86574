//! Events and handlers for relay observability.
//!
//! The transport client and the orchestrator report what they do through
//! [`RelayEvent`] values: every attempt with its duration, retries, final
//! outcomes, session lifecycle, and settings changes. Reporting is a side
//! effect only; handlers cannot change the outcome of a request.
//!
//! # Choosing an event handler
//!
//! | Handler | Use case |
//! |---------|----------|
//! | [`NoopHandler`] | Tests or fire-and-forget runs |
//! | [`LoggingHandler`] | Structured logging via `tracing` |
//! | [`FnEventHandler`] | Quick closures for simple callbacks |
//! | [`CompositeEventHandler`] | Compose multiple handlers in order |
//! | Custom `impl EventHandler` | Output channels, metrics, status bars |

use crate::OutgoingRequest;
use crate::api::tracing::attempt_id;
use crate::config::{RelayConfig, TransportKind};
use crate::error::{EnhanceError, ErrorKind};
use std::time::Duration;
use tracing::{debug, info, trace, warn};

// ── Events ─────────────────────────────────────────────────────────

/// Events emitted while relaying a prompt.
#[derive(Debug)]
pub enum RelayEvent<'a> {
    /// An attempt is about to be dispatched.
    AttemptStarted {
        request_id: &'a str,
        attempt: u32,
        max_attempts: u32,
        transport: TransportKind,
        request: &'a OutgoingRequest,
    },
    /// An attempt produced a usable enhancement.
    AttemptSucceeded {
        request_id: &'a str,
        attempt: u32,
        status: u16,
        duration_ms: u64,
    },
    /// An attempt failed and was classified.
    AttemptFailed {
        request_id: &'a str,
        attempt: u32,
        error: &'a EnhanceError,
        duration_ms: u64,
    },
    /// The client will wait `delay` before attempt `next_attempt`.
    RetryScheduled {
        request_id: &'a str,
        next_attempt: u32,
        delay: Duration,
    },
    /// The caller cancelled the request; no further attempts are made.
    Cancelled { request_id: &'a str, attempt: u32 },
    /// The feature switch is off; the prompt was passed through.
    Passthrough { prompt: &'a str },
    /// A logical operation finished.
    Outcome {
        operation: &'a str,
        duration_ms: u64,
        success: bool,
        kind: Option<ErrorKind>,
        attempts: u32,
    },
    /// A new session was created for a conversation.
    SessionCreated {
        session_id: &'a str,
        conversation_id: &'a str,
    },
    /// Idle sessions were removed.
    SessionsSwept { removed: usize, remaining: usize },
    /// A new settings snapshot was swapped in.
    ConfigReplaced { config: &'a RelayConfig },
}

/// Handler for relay events.
///
/// The default implementation ignores every event.
pub trait EventHandler: Send + Sync {
    fn on_event(&self, event: &RelayEvent<'_>) {
        let _ = event;
    }
}

/// A handler that ignores all events.
pub struct NoopHandler;
impl EventHandler for NoopHandler {}

/// An event handler backed by a closure.
///
/// ```ignore
/// let handler = FnEventHandler::new(|event| {
///     if let RelayEvent::RetryScheduled { delay, .. } = event {
///         eprintln!("retrying in {delay:?}");
///     }
/// });
/// ```
pub struct FnEventHandler<F>(F)
where
    F: Fn(&RelayEvent<'_>) + Send + Sync;

impl<F> FnEventHandler<F>
where
    F: Fn(&RelayEvent<'_>) + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> EventHandler for FnEventHandler<F>
where
    F: Fn(&RelayEvent<'_>) + Send + Sync,
{
    fn on_event(&self, event: &RelayEvent<'_>) {
        (self.0)(event)
    }
}

/// An event handler that delegates to multiple inner handlers in
/// registration order.
///
/// ```ignore
/// let handler = CompositeEventHandler::new()
///     .with(LoggingHandler)
///     .with_if(verbose, status_bar_handler);
/// ```
pub struct CompositeEventHandler {
    handlers: Vec<Box<dyn EventHandler>>,
}

impl CompositeEventHandler {
    pub fn new() -> Self {
        Self {
            handlers: Vec::new(),
        }
    }

    /// Add a handler to the chain.
    pub fn with(mut self, handler: impl EventHandler + 'static) -> Self {
        self.handlers.push(Box::new(handler));
        self
    }

    /// Add a handler only when `condition` holds.
    pub fn with_if(self, condition: bool, handler: impl EventHandler + 'static) -> Self {
        if condition { self.with(handler) } else { self }
    }

    /// Add a handler from an `Option`. `None` is a no-op.
    pub fn with_opt(self, handler: Option<impl EventHandler + 'static>) -> Self {
        match handler {
            Some(h) => self.with(h),
            None => self,
        }
    }
}

impl Default for CompositeEventHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl EventHandler for CompositeEventHandler {
    fn on_event(&self, event: &RelayEvent<'_>) {
        for handler in &self.handlers {
            handler.on_event(event);
        }
    }
}

/// Forwards events to `tracing`.
pub struct LoggingHandler;

impl EventHandler for LoggingHandler {
    fn on_event(&self, event: &RelayEvent<'_>) {
        match event {
            RelayEvent::AttemptStarted {
                request_id,
                attempt,
                max_attempts,
                transport,
                request,
            } => {
                debug!(
                    "[{}] attempt {attempt}/{max_attempts} via {transport:?}: session={}, prompt={} chars",
                    attempt_id(request_id, *attempt),
                    request.session_id,
                    request.prompt.chars().count(),
                );
                trace!(
                    "[{request_id}] payload: {}",
                    serde_json::to_string(request).unwrap_or_default()
                );
            }
            RelayEvent::AttemptSucceeded {
                request_id,
                attempt,
                status,
                duration_ms,
            } => {
                debug!(
                    "[{}] HTTP {status} in {duration_ms}ms",
                    attempt_id(request_id, *attempt)
                );
            }
            RelayEvent::AttemptFailed {
                request_id,
                attempt,
                error,
                duration_ms,
            } => {
                warn!(
                    "[{}] failed after {duration_ms}ms: {error}",
                    attempt_id(request_id, *attempt)
                );
            }
            RelayEvent::RetryScheduled {
                request_id,
                next_attempt,
                delay,
            } => {
                info!(
                    "[{request_id}] retrying in {}ms (attempt {next_attempt})",
                    delay.as_millis()
                );
            }
            RelayEvent::Cancelled {
                request_id,
                attempt,
            } => {
                debug!("[{request_id}] cancelled during attempt {attempt}");
            }
            RelayEvent::Passthrough { prompt } => {
                debug!("Relay disabled; passing through {} chars", prompt.len());
            }
            RelayEvent::Outcome {
                operation,
                duration_ms,
                success,
                kind,
                attempts,
            } => {
                if *success {
                    info!("{operation} succeeded in {duration_ms}ms ({attempts} attempt(s))");
                } else {
                    let kind = kind.map_or("CANCELLED", |k| k.code());
                    warn!(
                        "{operation} failed with {kind} in {duration_ms}ms ({attempts} attempt(s))"
                    );
                }
            }
            RelayEvent::SessionCreated {
                session_id,
                conversation_id,
            } => {
                debug!("Session {session_id} created for conversation {conversation_id}");
            }
            RelayEvent::SessionsSwept { removed, remaining } => {
                if *removed > 0 {
                    info!("Swept {removed} idle session(s); {remaining} remaining");
                } else {
                    trace!("Session sweep: nothing to remove ({remaining} active)");
                }
            }
            RelayEvent::ConfigReplaced { config } => {
                info!(
                    "Settings updated: endpoint={}, transport={:?}, enabled={}",
                    config.transport.endpoint,
                    config.transport.transport,
                    config.features.enabled,
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn composite_dispatches_to_all_handlers() {
        let count = Arc::new(AtomicUsize::new(0));
        let c1 = count.clone();
        let c2 = count.clone();
        let handler = CompositeEventHandler::new()
            .with(FnEventHandler::new(move |_| {
                c1.fetch_add(1, Ordering::SeqCst);
            }))
            .with_if(false, NoopHandler)
            .with_opt(Some(FnEventHandler::new(move |_| {
                c2.fetch_add(10, Ordering::SeqCst);
            })));

        handler.on_event(&RelayEvent::SessionsSwept {
            removed: 0,
            remaining: 0,
        });
        assert_eq!(count.load(Ordering::SeqCst), 11);
    }

    #[test]
    fn logging_handler_accepts_every_event_shape() {
        let err = EnhanceError::new(ErrorKind::RateLimited, "slow down");
        let config = RelayConfig::default();
        LoggingHandler.on_event(&RelayEvent::AttemptFailed {
            request_id: "rq-1",
            attempt: 1,
            error: &err,
            duration_ms: 12,
        });
        LoggingHandler.on_event(&RelayEvent::Outcome {
            operation: "enhance",
            duration_ms: 5,
            success: false,
            kind: None,
            attempts: 1,
        });
        LoggingHandler.on_event(&RelayEvent::ConfigReplaced { config: &config });
    }
}
