//! The enhancement orchestrator: one chat turn from prompt to output.
//!
//! [`Orchestrator::handle_prompt`] resolves the conversation's session,
//! harvests editor context, sends the request through the
//! [`TransportClient`], and maps the result to [`OutputSegment`]s. Failures
//! never escape as errors: they become a fixed explanation followed by the
//! original prompt.
//!
//! Background housekeeping (hourly session sweep, settings watcher) runs
//! between [`Orchestrator::start`] and [`Orchestrator::stop`].

use crate::agent::events::{EventHandler, RelayEvent};
use crate::agent::output::{OutputSegment, failure_segments, success_segments};
use crate::agent::session::{Session, SessionStore};
use crate::api::client::TransportClient;
use crate::config::SettingsStore;
use crate::context::ContextHarvester;
use crate::error::{EnhanceError, EnhancementResult};
use crate::{ContextBundle, OutgoingRequest, TEST_CONNECTION_PROMPT};
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// How often idle sessions are swept once started.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Identifies the chat conversation a prompt belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationContext {
    pub id: String,
}

impl ConversationContext {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

/// Result of [`Orchestrator::test_connection`].
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionStatus {
    pub reachable: bool,
    pub latency: Duration,
    pub message: String,
}

/// Drives chat turns through the relay.
pub struct Orchestrator {
    settings: SettingsStore,
    client: TransportClient,
    harvester: Arc<dyn ContextHarvester>,
    handler: Arc<dyn EventHandler>,
    sessions: Arc<Mutex<SessionStore>>,
    /// Fallback user id when the settings carry none.
    user_id: String,
    shutdown: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl Orchestrator {
    /// Create an orchestrator with the default HTTP transports.
    pub fn new(
        settings: SettingsStore,
        harvester: Arc<dyn ContextHarvester>,
        handler: Arc<dyn EventHandler>,
    ) -> Result<Self, EnhanceError> {
        let client = TransportClient::new(settings.clone(), handler.clone())?;
        Ok(Self::with_client(settings, client, harvester, handler))
    }

    /// Create an orchestrator around an existing client. The client should
    /// share `settings` so both see the same snapshots.
    pub fn with_client(
        settings: SettingsStore,
        client: TransportClient,
        harvester: Arc<dyn ContextHarvester>,
        handler: Arc<dyn EventHandler>,
    ) -> Self {
        Self {
            settings,
            client,
            harvester,
            handler,
            sessions: Arc::new(Mutex::new(SessionStore::new())),
            user_id: format!("user-{}", uuid::Uuid::new_v4()),
            shutdown: CancellationToken::new(),
            tasks: Vec::new(),
        }
    }

    fn lock_sessions(&self) -> MutexGuard<'_, SessionStore> {
        lock(&self.sessions)
    }

    /// Handle one chat turn.
    ///
    /// Returns no segments when `cancel` fires before or during the request.
    pub async fn handle_prompt(
        &self,
        prompt: &str,
        conversation: &ConversationContext,
        cancel: &CancellationToken,
    ) -> Vec<OutputSegment> {
        let config = self.settings.snapshot();
        if !config.features.enabled {
            self.handler.on_event(&RelayEvent::Passthrough { prompt });
            return vec![OutputSegment::Passthrough {
                prompt: prompt.to_string(),
            }];
        }

        let user_id = config.user_id.as_deref().unwrap_or(&self.user_id);
        let (session, created) = self
            .lock_sessions()
            .get_or_create(&conversation.id, user_id, Utc::now());
        // The guard is released above; handlers may call back into us.
        if created {
            self.handler.on_event(&RelayEvent::SessionCreated {
                session_id: &session.id,
                conversation_id: &conversation.id,
            });
        }

        let context = if prompt == TEST_CONNECTION_PROMPT {
            ContextBundle::default()
        } else {
            ContextBundle::harvest(self.harvester.as_ref(), &config.features)
        };
        let request = OutgoingRequest::new(
            prompt,
            &session.id,
            user_id,
            context,
            config.metadata.clone(),
        );

        if cancel.is_cancelled() {
            debug!("Turn for {} cancelled before dispatch", conversation.id);
            return Vec::new();
        }

        let result = self.client.send_with(&config, &request, cancel).await;
        if cancel.is_cancelled() {
            debug!("Turn for {} cancelled; discarding result", conversation.id);
            return Vec::new();
        }

        let segments = match &result {
            EnhancementResult::Success(data) => {
                success_segments(prompt, data, config.features.log_level.is_verbose())
            }
            EnhancementResult::Failure(error) => failure_segments(prompt, error),
            EnhancementResult::Cancelled => return Vec::new(),
        };

        if let Some(count) = self
            .lock_sessions()
            .record_exchange(&conversation.id, Utc::now())
        {
            debug!("Session {} now at {count} message(s)", session.id);
        }
        segments
    }

    /// Send the connectivity-check sentinel, ignoring the feature switch.
    pub async fn test_connection(&self, cancel: &CancellationToken) -> ConnectionStatus {
        let config = self.settings.snapshot();
        let user_id = config.user_id.as_deref().unwrap_or(&self.user_id);
        let request = OutgoingRequest::new(
            TEST_CONNECTION_PROMPT,
            format!("session-{}", uuid::Uuid::new_v4()),
            user_id,
            ContextBundle::default(),
            config.metadata.clone(),
        );

        let started = Instant::now();
        let result = self.client.dispatch_with(&config, &request, cancel).await;
        let latency = started.elapsed();

        let (reachable, message) = match result {
            EnhancementResult::Success(_) => (
                true,
                format!("Connected to {}", config.transport.endpoint),
            ),
            EnhancementResult::Failure(e) => {
                (false, format!("{} ({})", e.user_message(), e.message))
            }
            EnhancementResult::Cancelled => (false, "Connection test cancelled".to_string()),
        };
        ConnectionStatus {
            reachable,
            latency,
            message,
        }
    }

    /// Remove sessions idle for longer than the TTL.
    pub fn sweep_sessions(&self) -> usize {
        self.sweep_sessions_at(Utc::now())
    }

    pub(crate) fn sweep_sessions_at(&self, now: DateTime<Utc>) -> usize {
        sweep(&self.sessions, self.handler.as_ref(), now)
    }

    pub fn session_count(&self) -> usize {
        self.lock_sessions().len()
    }

    /// Snapshot of the session for `conversation`, if any.
    pub fn session(&self, conversation: &ConversationContext) -> Option<Session> {
        self.lock_sessions().get(&conversation.id).cloned()
    }

    // ── Background tasks ───────────────────────────────────────────

    /// Spawn the periodic sweep and the settings watcher. Calling it again
    /// while running is a no-op. Must be called inside a Tokio runtime.
    pub fn start(&mut self) {
        if !self.tasks.is_empty() {
            return;
        }
        if self.shutdown.is_cancelled() {
            self.shutdown = CancellationToken::new();
        }

        let sessions = self.sessions.clone();
        let handler = self.handler.clone();
        let shutdown = self.shutdown.clone();
        self.tasks.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
            // The first tick fires immediately.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        sweep(&sessions, handler.as_ref(), Utc::now());
                    }
                }
            }
        }));

        let mut rx = self.settings.subscribe();
        let handler = self.handler.clone();
        let shutdown = self.shutdown.clone();
        self.tasks.push(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    changed = rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let config = rx.borrow_and_update().clone();
                        handler.on_event(&RelayEvent::ConfigReplaced { config: &config });
                    }
                }
            }
        }));
        debug!("Orchestrator background tasks started");
    }

    /// Cancel the background tasks and wait for them to finish.
    pub async fn stop(&mut self) {
        self.shutdown.cancel();
        for task in self.tasks.drain(..) {
            let _ = task.await;
        }
        debug!("Orchestrator background tasks stopped");
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

fn lock(sessions: &Mutex<SessionStore>) -> MutexGuard<'_, SessionStore> {
    sessions.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn sweep(sessions: &Mutex<SessionStore>, handler: &dyn EventHandler, now: DateTime<Utc>) -> usize {
    let (removed, remaining) = {
        let mut store = lock(sessions);
        let removed = store.sweep(now);
        (removed, store.len())
    };
    handler.on_event(&RelayEvent::SessionsSwept { removed, remaining });
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::events::{FnEventHandler, NoopHandler};
    use crate::api::testing::{OK_BODY, ScriptedTransport, Step};
    use crate::config::{LogLevel, RelayConfig, TransportKind};
    use crate::context::{NoContext, StaticContext};
    use crate::error::ErrorKind;
    use chrono::TimeDelta;

    fn config() -> RelayConfig {
        RelayConfig::default()
            .with_endpoint("http://relay.test/enhance")
            .with_retries(0)
    }

    fn orchestrator_with(
        config: RelayConfig,
        transport: Arc<ScriptedTransport>,
        harvester: Arc<dyn ContextHarvester>,
        handler: Arc<dyn EventHandler>,
    ) -> (Orchestrator, SettingsStore) {
        let settings = SettingsStore::new(config).unwrap();
        let client = TransportClient::with_transports(
            settings.clone(),
            transport.clone(),
            transport,
            handler.clone(),
        );
        (
            Orchestrator::with_client(settings.clone(), client, harvester, handler),
            settings,
        )
    }

    fn orchestrator(config: RelayConfig, transport: Arc<ScriptedTransport>) -> Orchestrator {
        orchestrator_with(config, transport, Arc::new(NoContext), Arc::new(NoopHandler)).0
    }

    fn body(request: &crate::api::transport::WireRequest) -> serde_json::Value {
        serde_json::from_str(&request.body).unwrap()
    }

    #[tokio::test]
    async fn disabled_passes_through_without_session_or_network() {
        let transport = Arc::new(ScriptedTransport::always(200, OK_BODY));
        let orch = orchestrator(config().with_enabled(false), transport.clone());

        let segments = orch
            .handle_prompt("raw prompt", &ConversationContext::new("c"), &CancellationToken::new())
            .await;

        assert_eq!(
            segments,
            vec![OutputSegment::Passthrough {
                prompt: "raw prompt".into()
            }]
        );
        assert_eq!(transport.attempts(), 0);
        assert_eq!(orch.session_count(), 0);
    }

    #[tokio::test]
    async fn success_produces_segments_in_order() {
        let transport = Arc::new(ScriptedTransport::always(200, OK_BODY));
        let orch = orchestrator(config(), transport);

        let segments = orch
            .handle_prompt("prompt", &ConversationContext::new("c"), &CancellationToken::new())
            .await;

        assert_eq!(
            segments,
            vec![
                OutputSegment::EnhancedPrompt {
                    text: "better prompt".into()
                },
                OutputSegment::AdditionalContext { text: "ctx".into() },
                OutputSegment::Suggestions {
                    items: vec!["a".into(), "b".into()]
                },
            ]
        );
    }

    #[tokio::test]
    async fn metadata_segment_only_at_debug_level() {
        let body = r#"{"success":true,"data":{"enhancedPrompt":"x","metadata":{"model":"m"}}}"#;
        let transport = Arc::new(ScriptedTransport::always(200, body));
        let quiet = orchestrator(config(), transport.clone());
        let segments = quiet
            .handle_prompt("p", &ConversationContext::new("c"), &CancellationToken::new())
            .await;
        assert!(!segments.iter().any(|s| matches!(s, OutputSegment::Metadata { .. })));

        let verbose = orchestrator(config().with_log_level(LogLevel::Debug), transport);
        let segments = verbose
            .handle_prompt("p", &ConversationContext::new("c"), &CancellationToken::new())
            .await;
        assert!(matches!(segments.last(), Some(OutputSegment::Metadata { .. })));
    }

    #[tokio::test]
    async fn success_without_data_shows_prompt_unchanged() {
        let transport = Arc::new(ScriptedTransport::always(200, r#"{"success":true}"#));
        let orch = orchestrator(config(), transport);

        let segments = orch
            .handle_prompt("keep me", &ConversationContext::new("c"), &CancellationToken::new())
            .await;

        assert_eq!(
            segments,
            vec![OutputSegment::Unchanged {
                prompt: "keep me".into()
            }]
        );
    }

    #[tokio::test]
    async fn every_failure_kind_falls_back_to_original_prompt() {
        for kind in ErrorKind::ALL {
            let body = format!(
                r#"{{"success":false,"error":{{"code":"{}","message":"boom"}}}}"#,
                kind.code()
            );
            let transport = Arc::new(ScriptedTransport::always(200, &body));
            let orch = orchestrator(config(), transport);

            let segments = orch
                .handle_prompt(
                    "original",
                    &ConversationContext::new("c"),
                    &CancellationToken::new(),
                )
                .await;

            assert_eq!(segments.len(), 2, "{kind}");
            match &segments[0] {
                OutputSegment::Error {
                    kind: got,
                    message,
                    detail,
                } => {
                    assert_eq!(*got, kind);
                    assert_eq!(message, kind.user_message());
                    assert_eq!(detail, "boom");
                }
                other => panic!("expected error segment, got {other:?}"),
            }
            assert_eq!(
                segments[1],
                OutputSegment::Fallback {
                    prompt: "original".into()
                }
            );
        }
    }

    #[tokio::test]
    async fn session_is_reused_and_count_increases() {
        let transport = Arc::new(ScriptedTransport::always(200, OK_BODY));
        let orch = orchestrator(config(), transport.clone());
        let conv = ConversationContext::new("conv-1");

        for expected in 1..=3u64 {
            orch.handle_prompt("p", &conv, &CancellationToken::new()).await;
            assert_eq!(orch.session(&conv).unwrap().message_count, expected);
        }

        let ids: Vec<serde_json::Value> = transport
            .requests()
            .iter()
            .map(|r| body(r)["sessionId"].clone())
            .collect();
        assert_eq!(ids.len(), 3);
        assert!(ids.iter().all(|id| *id == ids[0]));
        assert_eq!(orch.session_count(), 1);
    }

    #[tokio::test]
    async fn failed_turn_still_counts_as_exchange() {
        let transport = Arc::new(ScriptedTransport::always(500, "oops"));
        let orch = orchestrator(config(), transport);
        let conv = ConversationContext::new("c");
        orch.handle_prompt("p", &conv, &CancellationToken::new()).await;
        assert_eq!(orch.session(&conv).unwrap().message_count, 1);
    }

    #[tokio::test]
    async fn cancelled_before_dispatch_yields_nothing() {
        let transport = Arc::new(ScriptedTransport::always(200, OK_BODY));
        let orch = orchestrator(config(), transport.clone());
        let conv = ConversationContext::new("c");
        let cancel = CancellationToken::new();
        cancel.cancel();

        let segments = orch.handle_prompt("p", &conv, &cancel).await;

        assert!(segments.is_empty());
        assert_eq!(transport.attempts(), 0);
        assert_eq!(orch.session(&conv).unwrap().message_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_mid_flight_yields_nothing() {
        let transport = Arc::new(ScriptedTransport::new(TransportKind::Buffered, vec![Step::Hang]));
        let orch = orchestrator(config(), transport.clone());
        let conv = ConversationContext::new("c");
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let segments = orch.handle_prompt("p", &conv, &cancel).await;

        assert!(segments.is_empty());
        assert_eq!(transport.attempts(), 1);
        assert_eq!(orch.session(&conv).unwrap().message_count, 0);
    }

    #[tokio::test]
    async fn context_is_harvested_except_for_sentinel() {
        let transport = Arc::new(ScriptedTransport::always(200, OK_BODY));
        let harvester = Arc::new(StaticContext::new().with_workspace_root("/work"));
        let (orch, _) =
            orchestrator_with(config(), transport.clone(), harvester, Arc::new(NoopHandler));
        let conv = ConversationContext::new("c");

        orch.handle_prompt("p", &conv, &CancellationToken::new()).await;
        orch.handle_prompt(TEST_CONNECTION_PROMPT, &conv, &CancellationToken::new())
            .await;

        let requests = transport.requests();
        assert_eq!(body(&requests[0])["context"]["workspaceRoot"], "/work");
        assert_eq!(body(&requests[1])["context"], serde_json::json!({}));
    }

    #[tokio::test]
    async fn configured_user_id_is_sent() {
        let transport = Arc::new(ScriptedTransport::always(200, OK_BODY));
        let mut cfg = config();
        cfg.user_id = Some("alice".into());
        let orch = orchestrator(cfg, transport.clone());

        orch.handle_prompt("p", &ConversationContext::new("c"), &CancellationToken::new())
            .await;

        assert_eq!(body(&transport.requests()[0])["userId"], "alice");
        assert_eq!(orch.session(&ConversationContext::new("c")).unwrap().user_id, "alice");
    }

    /// Flips the feature switch off while the turn is harvesting.
    struct DisablingHarvester {
        settings: SettingsStore,
    }

    impl ContextHarvester for DisablingHarvester {
        fn workspace_root(&self) -> Option<String> {
            self.settings
                .modify(|c| c.features.enabled = false)
                .unwrap();
            Some("/work".into())
        }
    }

    #[tokio::test]
    async fn turn_uses_one_settings_snapshot_throughout() {
        let transport = Arc::new(ScriptedTransport::always(200, OK_BODY));
        let settings = SettingsStore::new(config()).unwrap();
        let client = TransportClient::with_transports(
            settings.clone(),
            transport.clone(),
            transport.clone(),
            Arc::new(NoopHandler),
        );
        let harvester = Arc::new(DisablingHarvester {
            settings: settings.clone(),
        });
        let orch =
            Orchestrator::with_client(settings.clone(), client, harvester, Arc::new(NoopHandler));

        let segments = orch
            .handle_prompt("p", &ConversationContext::new("c"), &CancellationToken::new())
            .await;

        assert_eq!(transport.attempts(), 1);
        assert!(matches!(segments[0], OutputSegment::EnhancedPrompt { .. }));
        assert!(!settings.snapshot().features.enabled);

        // The next turn sees the new snapshot.
        let segments = orch
            .handle_prompt("p", &ConversationContext::new("c"), &CancellationToken::new())
            .await;
        assert!(matches!(segments[0], OutputSegment::Passthrough { .. }));
        assert_eq!(transport.attempts(), 1);
    }

    #[tokio::test]
    async fn sweep_removes_only_idle_sessions() {
        let transport = Arc::new(ScriptedTransport::always(200, OK_BODY));
        let orch = orchestrator(config(), transport);
        orch.handle_prompt("p", &ConversationContext::new("a"), &CancellationToken::new())
            .await;
        orch.handle_prompt("p", &ConversationContext::new("b"), &CancellationToken::new())
            .await;

        assert_eq!(orch.sweep_sessions(), 0);
        assert_eq!(orch.sweep_sessions_at(Utc::now() + TimeDelta::hours(25)), 2);
        assert_eq!(orch.session_count(), 0);
    }

    #[tokio::test]
    async fn test_connection_ignores_feature_switch() {
        let transport = Arc::new(ScriptedTransport::always(200, r#"{"success":true}"#));
        let orch = orchestrator(config().with_enabled(false), transport.clone());

        let status = orch.test_connection(&CancellationToken::new()).await;

        assert!(status.reachable);
        assert!(status.message.contains("http://relay.test/enhance"));
        assert_eq!(body(&transport.requests()[0])["prompt"], TEST_CONNECTION_PROMPT);
        assert_eq!(orch.session_count(), 0);
    }

    #[tokio::test]
    async fn test_connection_reports_failure() {
        let transport = Arc::new(ScriptedTransport::always(401, "nope"));
        let orch = orchestrator(config(), transport);

        let status = orch.test_connection(&CancellationToken::new()).await;

        assert!(!status.reachable);
        assert!(
            status
                .message
                .contains(ErrorKind::AuthenticationError.user_message())
        );
    }

    #[tokio::test]
    async fn watcher_reports_settings_changes_until_stopped() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let handler = Arc::new(FnEventHandler::new(move |event| {
            if let RelayEvent::ConfigReplaced { config } = event {
                sink.lock().unwrap().push(config.transport.endpoint.clone());
            }
        }));
        let transport = Arc::new(ScriptedTransport::always(200, OK_BODY));
        let (mut orch, settings) =
            orchestrator_with(config(), transport, Arc::new(NoContext), handler);

        orch.start();
        settings
            .modify(|c| c.transport.endpoint = "http://other.test/enhance".into())
            .unwrap();
        for _ in 0..50 {
            if !seen.lock().unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        orch.stop().await;

        assert_eq!(*seen.lock().unwrap(), vec!["http://other.test/enhance".to_string()]);
    }

    #[tokio::test]
    async fn stop_without_start_is_harmless() {
        let transport = Arc::new(ScriptedTransport::always(200, OK_BODY));
        let mut orch = orchestrator(config(), transport);
        orch.stop().await;
        orch.start();
        orch.stop().await;
    }
}
