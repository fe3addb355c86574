//! Convenience re-exports for common `prompt-relay` types.
//!
//! Meant to be glob-imported by hosts:
//!
//! ```ignore
//! use prompt_relay::prelude::*;
//! ```
//!
//! Transport internals (wire requests, scripted transports, request ids)
//! are not included; import those from [`crate::api`] directly.

// ── Core types ──────────────────────────────────────────────────────
pub use crate::{
    ActiveFile, ContextBundle, EnhancementData, OutgoingRequest, Position, RequestMetadata,
    Selection, TEST_CONNECTION_PROMPT,
};

// ── Errors ──────────────────────────────────────────────────────────
pub use crate::error::{EnhanceError, EnhancementResult, ErrorKind};

// ── Settings ────────────────────────────────────────────────────────
pub use crate::config::{
    AuthConfig, AuthType, FeatureFlags, LogLevel, RelayConfig, SettingsStore, TransportConfig,
    TransportKind,
};

// ── Context ─────────────────────────────────────────────────────────
pub use crate::context::{ContextHarvester, NoContext, StaticContext};

// ── Runtime ─────────────────────────────────────────────────────────
pub use crate::agent::{
    CompositeEventHandler, ConnectionStatus, ConversationContext, EventHandler, FnEventHandler,
    LoggingHandler, NoopHandler, Orchestrator, OutputSegment, RelayEvent, render_segments,
};
pub use crate::api::TransportClient;
