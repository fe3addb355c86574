//! Relay configuration and the settings store.
//!
//! [`RelayConfig`] is an immutable snapshot: transport settings, feature
//! flags, and static request metadata. The [`SettingsStore`] holds the
//! current snapshot behind an `Arc` and replaces it wholesale on every
//! update, so a request that already took a snapshot keeps seeing the same
//! values for all of its attempts.
//!
//! # Examples
//!
//! ```ignore
//! let config = RelayConfig::default()
//!     .with_endpoint("https://relay.example.com/enhance")
//!     .with_timeout(Duration::from_secs(10))
//!     .with_retries(3)
//!     .with_auth(AuthConfig::api_key("k1").with_header_name("X-API-Key"))
//!     .with_transport(TransportKind::Streaming);
//! let store = SettingsStore::new(config)?;
//! ```

use crate::api::client::auth_header;
use crate::error::EnhanceError;
use crate::{DEFAULT_ENDPOINT, EXTENSION_VERSION, RequestMetadata};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::debug;

/// Upper bound on the per-attempt timeout.
pub const MAX_TIMEOUT_MS: u64 = 300_000;
/// Upper bound on the retry count.
pub const MAX_RETRIES: u32 = 10;

// ── Auth ───────────────────────────────────────────────────────────

/// How the request is authenticated.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum AuthType {
    #[default]
    None,
    Bearer,
    ApiKey,
    /// Token is expected pre-formatted as `user:pass`.
    Basic,
}

impl FromStr for AuthType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(AuthType::None),
            "bearer" => Ok(AuthType::Bearer),
            "api-key" | "apikey" | "api_key" => Ok(AuthType::ApiKey),
            "basic" => Ok(AuthType::Basic),
            other => Err(format!(
                "unknown auth type '{other}' (expected none, bearer, api-key, basic)"
            )),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct AuthConfig {
    #[serde(rename = "type")]
    pub auth_type: AuthType,
    pub token: String,
    /// Header carrying the credential. Default: `Authorization`.
    pub header_name: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            auth_type: AuthType::None,
            token: String::new(),
            header_name: "Authorization".to_string(),
        }
    }
}

impl AuthConfig {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn bearer(token: impl Into<String>) -> Self {
        Self {
            auth_type: AuthType::Bearer,
            token: token.into(),
            ..Default::default()
        }
    }

    pub fn api_key(token: impl Into<String>) -> Self {
        Self {
            auth_type: AuthType::ApiKey,
            token: token.into(),
            ..Default::default()
        }
    }

    pub fn basic(user_pass: impl Into<String>) -> Self {
        Self {
            auth_type: AuthType::Basic,
            token: user_pass.into(),
            ..Default::default()
        }
    }

    pub fn with_header_name(mut self, name: impl Into<String>) -> Self {
        self.header_name = name.into();
        self
    }
}

// ── Transport ──────────────────────────────────────────────────────

/// Which HTTP transport performs each attempt.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Reads the whole body in one call.
    #[default]
    Buffered,
    /// Reads the body chunk by chunk, watching the cancellation token.
    Streaming,
}

impl FromStr for TransportKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "buffered" => Ok(TransportKind::Buffered),
            "streaming" => Ok(TransportKind::Streaming),
            other => Err(format!(
                "unknown transport '{other}' (expected buffered or streaming)"
            )),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct TransportConfig {
    pub endpoint: String,
    /// Per-attempt timeout in milliseconds.
    pub timeout_ms: u64,
    /// Retries after the first attempt (0 = single attempt).
    pub retries: u32,
    pub auth: AuthConfig,
    pub transport: TransportKind,
    pub user_agent: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            timeout_ms: 30_000,
            retries: 3,
            auth: AuthConfig::default(),
            transport: TransportKind::default(),
            user_agent: format!("prompt-relay/{EXTENSION_VERSION}"),
        }
    }
}

impl TransportConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

// ── Feature flags ──────────────────────────────────────────────────

/// Log verbosity requested by the settings. Mirrors tracing levels.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Whether debug output (raw response metadata) should be shown.
    pub fn is_verbose(self) -> bool {
        self <= LogLevel::Debug
    }

    /// Directive string for `tracing_subscriber::EnvFilter`.
    pub fn as_directive(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

/// Switches controlling what the relay does and which context it sends.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct FeatureFlags {
    /// Master switch. When off, prompts pass through untouched.
    pub enabled: bool,
    pub include_workspace: bool,
    pub include_active_file: bool,
    pub include_selection: bool,
    pub include_open_files: bool,
    pub log_level: LogLevel,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            enabled: true,
            include_workspace: true,
            include_active_file: true,
            include_selection: true,
            include_open_files: false,
            log_level: LogLevel::Info,
        }
    }
}

// ── RelayConfig ────────────────────────────────────────────────────

/// Complete settings snapshot.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct RelayConfig {
    pub transport: TransportConfig,
    pub features: FeatureFlags,
    pub metadata: RequestMetadata,
    /// Stable user id. Generated per orchestrator when absent.
    pub user_id: Option<String>,
}

impl RelayConfig {
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.transport.endpoint = endpoint.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.transport.timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.transport.retries = retries;
        self
    }

    pub fn with_auth(mut self, auth: AuthConfig) -> Self {
        self.transport.auth = auth;
        self
    }

    pub fn with_transport(mut self, kind: TransportKind) -> Self {
        self.transport.transport = kind;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.features.enabled = enabled;
        self
    }

    pub fn with_log_level(mut self, level: LogLevel) -> Self {
        self.features.log_level = level;
        self
    }

    /// Load a JSON settings file. Missing keys take their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, EnhanceError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            EnhanceError::configuration(format!(
                "failed to read settings file {}: {e}",
                path.display()
            ))
        })?;
        serde_json::from_str(&json).map_err(|e| {
            EnhanceError::configuration(format!(
                "failed to parse settings file {}: {e}",
                path.display()
            ))
        })
    }

    /// Check the snapshot for values the transport cannot work with.
    pub fn validate(&self) -> Result<(), EnhanceError> {
        let t = &self.transport;

        let url = reqwest::Url::parse(&t.endpoint).map_err(|e| {
            EnhanceError::configuration(format!("invalid endpoint '{}': {e}", t.endpoint))
        })?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(EnhanceError::configuration(format!(
                "endpoint must use http or https, got '{}'",
                url.scheme()
            )));
        }

        if t.timeout_ms == 0 || t.timeout_ms > MAX_TIMEOUT_MS {
            return Err(EnhanceError::configuration(format!(
                "timeout must be between 1 and {MAX_TIMEOUT_MS} ms, got {}",
                t.timeout_ms
            )));
        }

        if t.retries > MAX_RETRIES {
            return Err(EnhanceError::configuration(format!(
                "retries must be at most {MAX_RETRIES}, got {}",
                t.retries
            )));
        }

        if t.auth.auth_type != AuthType::None {
            if t.auth.token.trim().is_empty() {
                return Err(EnhanceError::configuration(
                    "auth token is required when an auth type is set",
                ));
            }
            reqwest::header::HeaderName::from_bytes(t.auth.header_name.as_bytes()).map_err(
                |e| {
                    EnhanceError::configuration(format!(
                        "invalid auth header name '{}': {e}",
                        t.auth.header_name
                    ))
                },
            )?;
            if let Some((_, value)) = auth_header(&t.auth) {
                reqwest::header::HeaderValue::from_str(&value).map_err(|_| {
                    EnhanceError::configuration(
                        "auth token contains characters not allowed in an HTTP header",
                    )
                })?;
            }
        }

        if t.user_agent.trim().is_empty() {
            return Err(EnhanceError::configuration("user agent must not be empty"));
        }
        reqwest::header::HeaderValue::from_str(&t.user_agent).map_err(|e| {
            EnhanceError::configuration(format!("invalid user agent '{}': {e}", t.user_agent))
        })?;

        Ok(())
    }
}

// ── SettingsStore ──────────────────────────────────────────────────

/// Holds the current [`RelayConfig`] and notifies subscribers on change.
///
/// Cloning the store shares the same underlying snapshot.
#[derive(Clone)]
pub struct SettingsStore {
    tx: Arc<watch::Sender<Arc<RelayConfig>>>,
}

impl SettingsStore {
    /// Create a store from a validated config.
    pub fn new(config: RelayConfig) -> Result<Self, EnhanceError> {
        config.validate()?;
        let (tx, _rx) = watch::channel(Arc::new(config));
        Ok(Self { tx: Arc::new(tx) })
    }

    /// The current snapshot.
    pub fn snapshot(&self) -> Arc<RelayConfig> {
        self.tx.borrow().clone()
    }

    /// Validate and swap in a new snapshot. On error the old one stays.
    pub fn update(&self, config: RelayConfig) -> Result<(), EnhanceError> {
        config.validate()?;
        debug!(
            "Settings replaced: endpoint={}, transport={:?}, retries={}, enabled={}",
            config.transport.endpoint,
            config.transport.transport,
            config.transport.retries,
            config.features.enabled,
        );
        self.tx.send_replace(Arc::new(config));
        Ok(())
    }

    /// Apply `f` to a copy of the current snapshot and store the result.
    pub fn modify(&self, f: impl FnOnce(&mut RelayConfig)) -> Result<(), EnhanceError> {
        let mut next = (*self.snapshot()).clone();
        f(&mut next);
        self.update(next)
    }

    /// Receiver that wakes on every replacement.
    pub fn subscribe(&self) -> watch::Receiver<Arc<RelayConfig>> {
        self.tx.subscribe()
    }
}
