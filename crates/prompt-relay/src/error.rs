//! Error taxonomy for the relay.
//!
//! Every failure the core can observe is classified into one [`ErrorKind`]
//! before it leaves the transport layer. [`EnhanceError`] carries the kind
//! together with the server- or transport-supplied detail message, and
//! [`EnhancementResult`] is the tagged outcome of one logical request.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::EnhancementData;

/// Classified failure categories.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// Host unreachable, DNS failure, connection refused.
    ConnectionError,
    /// HTTP 401 / 403.
    AuthenticationError,
    /// The attempt exceeded the configured timeout.
    TimeoutError,
    /// HTTP 429.
    RateLimited,
    /// Body could not be parsed into the expected shape.
    InvalidResponse,
    /// Any other non-2xx status or unclassified transport failure.
    ServerError,
    /// Settings rejected by validation.
    ConfigurationError,
}

impl ErrorKind {
    /// Every kind, in declaration order.
    pub const ALL: [ErrorKind; 7] = [
        ErrorKind::ConnectionError,
        ErrorKind::AuthenticationError,
        ErrorKind::TimeoutError,
        ErrorKind::RateLimited,
        ErrorKind::InvalidResponse,
        ErrorKind::ServerError,
        ErrorKind::ConfigurationError,
    ];

    /// Wire code, e.g. `"RATE_LIMITED"`.
    pub fn code(self) -> &'static str {
        match self {
            ErrorKind::ConnectionError => "CONNECTION_ERROR",
            ErrorKind::AuthenticationError => "AUTHENTICATION_ERROR",
            ErrorKind::TimeoutError => "TIMEOUT_ERROR",
            ErrorKind::RateLimited => "RATE_LIMITED",
            ErrorKind::InvalidResponse => "INVALID_RESPONSE",
            ErrorKind::ServerError => "SERVER_ERROR",
            ErrorKind::ConfigurationError => "CONFIGURATION_ERROR",
        }
    }

    /// Parse a wire code. Unknown codes return `None`.
    pub fn from_code(code: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.code().eq_ignore_ascii_case(code))
    }

    /// Fixed sentence shown to the user when a turn fails with this kind.
    pub fn user_message(self) -> &'static str {
        match self {
            ErrorKind::ConnectionError => {
                "Unable to connect to MCP server. Please check your configuration."
            }
            ErrorKind::AuthenticationError => {
                "Authentication failed. Please check your MCP server credentials."
            }
            ErrorKind::TimeoutError => "The MCP server did not respond in time. Please try again.",
            ErrorKind::RateLimited => {
                "Rate limit exceeded. Please wait a moment before trying again."
            }
            ErrorKind::InvalidResponse => "The MCP server returned an unexpected response.",
            ErrorKind::ServerError => {
                "The MCP server encountered an error while enhancing your prompt."
            }
            ErrorKind::ConfigurationError => {
                "MCP configuration is invalid. Please review your settings."
            }
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// A classified failure.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct EnhanceError {
    pub kind: ErrorKind,
    /// Detail from the server body or the transport.
    pub message: String,
    /// Server-supplied error code, when the body carried one.
    pub code: Option<String>,
    /// HTTP status, when a response was received.
    pub status: Option<u16>,
}

impl EnhanceError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            code: None,
            status: None,
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ConfigurationError, message)
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// The fixed template for this error's kind.
    pub fn user_message(&self) -> &'static str {
        self.kind.user_message()
    }
}

/// Outcome of one logical request.
#[derive(Debug, Clone, PartialEq)]
pub enum EnhancementResult {
    Success(EnhancementData),
    Failure(EnhanceError),
    /// Cancelled by the caller. Hosts show nothing for this outcome.
    Cancelled,
}

impl EnhancementResult {
    pub fn is_success(&self) -> bool {
        matches!(self, EnhancementResult::Success(_))
    }

    /// The error, if this is a failure.
    pub fn error(&self) -> Option<&EnhanceError> {
        match self {
            EnhancementResult::Failure(e) => Some(e),
            _ => None,
        }
    }
}
