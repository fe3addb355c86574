//! API interaction layer: request construction, HTTP transports, retry, and
//! correlation ids.
//!
//! These modules handle everything between the
//! [`Orchestrator`](crate::agent::orchestrator::Orchestrator) and the
//! enhancement endpoint:
//!
//! - [`client`]: [`TransportClient`]: headers and auth, the attempt loop,
//!   timeout and cancellation racing, and failure classification.
//! - [`transport`]: the [`Transport`] trait with buffered and streaming
//!   `reqwest` implementations.
//! - [`retry`]: exponential backoff schedule (1s doubling, 10s cap).
//! - [`tracing`]: request and attempt ids used in logs and headers.

pub mod client;
pub mod retry;
pub mod tracing;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

// Re-export commonly used items at the module level.
pub use client::{TransportClient, auth_header, classify_response, classify_transport_error};
pub use retry::RetryConfig;
pub use transport::{BufferedTransport, StreamingTransport, Transport, TransportError, WireRequest};
