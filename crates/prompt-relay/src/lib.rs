//! Prompt enhancement relay for editor chat surfaces.
//!
//! `prompt-relay` takes a chat prompt plus context harvested from the editor
//! (workspace root, active file, selection, open files), sends it to a remote
//! enhancement server over HTTP, and turns the server's answer into output
//! segments the chat surface can render. Any failure degrades to the original
//! prompt with a fixed explanation; nothing in the core is fatal to the host.
//!
//! # Getting started
//!
//! ```ignore
//! use prompt_relay::prelude::*;
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), EnhanceError> {
//!     let config = RelayConfig::default()
//!         .with_endpoint("http://localhost:3000/enhance")
//!         .with_retries(2)
//!         .with_auth(AuthConfig::bearer("secret"));
//!     let settings = SettingsStore::new(config)?;
//!
//!     let mut orchestrator = Orchestrator::new(
//!         settings,
//!         Arc::new(NoContext),
//!         Arc::new(LoggingHandler),
//!     )?;
//!     orchestrator.start();
//!
//!     let segments = orchestrator
//!         .handle_prompt(
//!             "explain this function",
//!             &ConversationContext::new("chat-1"),
//!             &CancellationToken::new(),
//!         )
//!         .await;
//!     println!("{}", render_segments(&segments));
//!
//!     orchestrator.stop().await;
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`api`] | [`TransportClient`](api::client::TransportClient), buffered and streaming transports, retry policy, request ids |
//! | [`agent`] | [`Orchestrator`](agent::orchestrator::Orchestrator), sessions, output segments, events |
//! | [`config`] | [`RelayConfig`](config::RelayConfig) snapshot, validation, [`SettingsStore`](config::SettingsStore) |
//! | [`context`] | [`ContextHarvester`](context::ContextHarvester) trait and bundle assembly |
//! | [`error`] | [`ErrorKind`](error::ErrorKind) taxonomy and user-facing templates |

pub mod agent;
pub mod api;
pub mod config;
pub mod context;
pub mod error;
pub mod prelude;

use serde::{Deserialize, Deserializer, Serialize};

pub use error::{EnhanceError, EnhancementResult, ErrorKind};

// ── Constants ──────────────────────────────────────────────────────

/// Endpoint used when no configuration overrides it.
pub const DEFAULT_ENDPOINT: &str = "http://localhost:3000/api/enhance";

/// Reserved prompt that asks the server for a connectivity check.
pub const TEST_CONNECTION_PROMPT: &str = "__TEST_CONNECTION__";

/// Version of this crate, sent as the extension version.
pub const EXTENSION_VERSION: &str = env!("CARGO_PKG_VERSION");

// ── Request types ──────────────────────────────────────────────────

/// The JSON body POSTed to the enhancement endpoint.
///
/// Built once per logical request. Retries borrow the same value, so the
/// `timestamp` never moves between attempts.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OutgoingRequest {
    pub prompt: String,
    pub session_id: String,
    pub user_id: String,
    /// Milliseconds since the Unix epoch, fixed at build time.
    pub timestamp: i64,
    pub context: ContextBundle,
    pub metadata: RequestMetadata,
}

impl OutgoingRequest {
    pub fn new(
        prompt: impl Into<String>,
        session_id: impl Into<String>,
        user_id: impl Into<String>,
        context: ContextBundle,
        metadata: RequestMetadata,
    ) -> Self {
        Self {
            prompt: prompt.into(),
            session_id: session_id.into(),
            user_id: user_id.into(),
            timestamp: chrono::Utc::now().timestamp_millis(),
            context,
            metadata,
        }
    }

    /// Whether this is the connectivity-check sentinel.
    pub fn is_test_connection(&self) -> bool {
        self.prompt == TEST_CONNECTION_PROMPT
    }
}

/// Editor context attached to a request. Every field is optional.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ContextBundle {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace_root: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_file: Option<ActiveFile>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selection: Option<Selection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub open_files: Option<Vec<String>>,
}

impl ContextBundle {
    pub fn is_empty(&self) -> bool {
        self.workspace_root.is_none()
            && self.active_file.is_none()
            && self.selection.is_none()
            && self.open_files.is_none()
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ActiveFile {
    pub path: String,
    pub language: String,
    pub content: String,
}

/// Zero-based line/character position.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Position {
    pub line: u32,
    pub character: u32,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub start: Position,
    pub end: Position,
    pub text: String,
}

/// Static version tags sent with every request.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RequestMetadata {
    pub extension_version: String,
    pub host_version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assistant_version: Option<String>,
}

impl Default for RequestMetadata {
    fn default() -> Self {
        Self {
            extension_version: EXTENSION_VERSION.to_string(),
            host_version: "unknown".to_string(),
            assistant_version: None,
        }
    }
}

// ── Response types ─────────────────────────────────────────────────

/// Enhancement returned by the server on success.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EnhancementData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enhanced_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_context: Option<String>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub suggestions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl EnhancementData {
    /// Data that echoes the prompt back unchanged.
    pub fn passthrough(prompt: impl Into<String>) -> Self {
        Self {
            enhanced_prompt: Some(prompt.into()),
            ..Default::default()
        }
    }
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<String>>::deserialize(deserializer)?.unwrap_or_default())
}

/// Raw response envelope (internal deserialization target).
#[derive(Deserialize, Debug)]
pub(crate) struct RawEnvelope {
    pub(crate) success: bool,
    #[serde(default)]
    pub(crate) data: Option<EnhancementData>,
    #[serde(default)]
    pub(crate) error: Option<RawServerError>,
}

#[derive(Deserialize, Debug)]
pub(crate) struct RawServerError {
    #[serde(default)]
    pub(crate) code: Option<String>,
    #[serde(default)]
    pub(crate) message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_serializes_camel_case_and_skips_missing_context() {
        let req = OutgoingRequest::new(
            "hi",
            "session-1",
            "user-1",
            ContextBundle {
                workspace_root: Some("/ws".into()),
                ..Default::default()
            },
            RequestMetadata::default(),
        );
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["sessionId"], "session-1");
        assert_eq!(json["userId"], "user-1");
        assert_eq!(json["context"]["workspaceRoot"], "/ws");
        assert!(json["context"].get("activeFile").is_none());
        assert!(json["context"].get("openFiles").is_none());
        assert_eq!(json["metadata"]["extensionVersion"], EXTENSION_VERSION);
        assert!(json["metadata"].get("assistantVersion").is_none());
        assert!(json["timestamp"].as_i64().unwrap() > 0);
    }

    #[test]
    fn selection_uses_start_and_end() {
        let bundle = ContextBundle {
            selection: Some(Selection {
                start: Position { line: 1, character: 2 },
                end: Position { line: 3, character: 0 },
                text: "fn main()".into(),
            }),
            ..Default::default()
        };
        let json = serde_json::to_value(&bundle).unwrap();
        assert_eq!(json["selection"]["start"]["line"], 1);
        assert_eq!(json["selection"]["end"]["line"], 3);
        assert_eq!(json["selection"]["text"], "fn main()");
    }

    #[test]
    fn enhancement_data_tolerates_null_and_missing_suggestions() {
        let data: EnhancementData =
            serde_json::from_str(r#"{"enhancedPrompt":"x","suggestions":null}"#).unwrap();
        assert!(data.suggestions.is_empty());
        assert_eq!(data.enhanced_prompt.as_deref(), Some("x"));

        let data: EnhancementData = serde_json::from_str("{}").unwrap();
        assert_eq!(data, EnhancementData::default());
    }

    #[test]
    fn sentinel_detected() {
        let req = OutgoingRequest::new(
            TEST_CONNECTION_PROMPT,
            "s",
            "u",
            ContextBundle::default(),
            RequestMetadata::default(),
        );
        assert!(req.is_test_connection());
        assert!(req.context.is_empty());
    }
}
