//! Enhance a prompt through a relay server and print the result.
//!
//! Settings come from an optional JSON file, overridden by flags. The auth
//! token may also be supplied through the `PROMPT_RELAY_TOKEN` environment
//! variable.
//!
//! # Examples
//!
//! ```sh
//! # Basic request against the default endpoint
//! prompt-relay --prompt "explain this function"
//!
//! # Bearer auth, streaming transport, editor context
//! PROMPT_RELAY_TOKEN=secret prompt-relay --prompt "add tests" \
//!   --endpoint https://relay.example.com/api/enhance --auth-type bearer \
//!   --transport streaming --workspace . --file src/lib.rs
//!
//! # Pipe the prompt from stdin
//! cat question.md | prompt-relay --stdin
//!
//! # Check that the server is reachable
//! prompt-relay --config relay.json --test-connection
//! ```

use clap::Parser;
use prompt_relay::prelude::*;
use std::io::{self, Read};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

/// Environment variable consulted when `--token` is absent.
const TOKEN_ENV: &str = "PROMPT_RELAY_TOKEN";

/// Enhance a prompt through a relay server and print the result.
#[derive(Parser)]
#[command(name = "prompt-relay", version)]
struct Cli {
    // ── Prompt ─────────────────────────────────────────────────
    /// Prompt to enhance
    #[arg(long)]
    prompt: Option<String>,

    /// Read the prompt from stdin (appended after --prompt)
    #[arg(long)]
    stdin: bool,

    /// Conversation id used to group prompts into a session
    #[arg(long, default_value = "cli")]
    conversation: String,

    // ── Settings ───────────────────────────────────────────────
    /// JSON settings file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Enhancement endpoint URL
    #[arg(long)]
    endpoint: Option<String>,

    /// Auth scheme: none, bearer, api-key, basic
    #[arg(long)]
    auth_type: Option<AuthType>,

    /// Auth token (falls back to PROMPT_RELAY_TOKEN)
    #[arg(long)]
    token: Option<String>,

    /// Header carrying the credential (default Authorization)
    #[arg(long)]
    header_name: Option<String>,

    /// HTTP transport: buffered or streaming
    #[arg(long)]
    transport: Option<TransportKind>,

    /// Per-attempt timeout in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Retries after the first attempt
    #[arg(long)]
    retries: Option<u32>,

    // ── Context ────────────────────────────────────────────────
    /// Workspace root sent as context
    #[arg(long)]
    workspace: Option<String>,

    /// File sent as the active file
    #[arg(long)]
    file: Option<PathBuf>,

    /// Additional open file paths
    #[arg(long = "open-file")]
    open_files: Vec<String>,

    // ── Mode ───────────────────────────────────────────────────
    /// Pass the prompt through without contacting the server
    #[arg(long)]
    disable: bool,

    /// Send the connectivity check instead of a prompt
    #[arg(long)]
    test_connection: bool,

    /// Print output segments as JSON instead of Markdown
    #[arg(long)]
    json: bool,

    /// Debug logging and response metadata
    #[arg(long)]
    verbose: bool,
}

// ── Helpers ────────────────────────────────────────────────────────

fn read_stdin_content() -> Result<String, String> {
    let mut buf = String::new();
    io::stdin()
        .read_to_string(&mut buf)
        .map_err(|e| format!("failed to read stdin: {e}"))?;
    Ok(buf)
}

fn build_prompt(cli: &Cli) -> Result<String, String> {
    let stdin_text = if cli.stdin {
        Some(read_stdin_content()?)
    } else {
        None
    };

    match (&cli.prompt, stdin_text) {
        (Some(msg), Some(piped)) => Ok(format!("{msg}\n\n{piped}")),
        (Some(msg), None) => Ok(msg.clone()),
        (None, Some(piped)) => Ok(piped),
        (None, None) => Err("provide --prompt, --stdin, or both".to_string()),
    }
}

/// Load the settings file (if any) and layer the flags over it.
fn build_config(cli: &Cli) -> Result<RelayConfig, String> {
    let mut config = match &cli.config {
        Some(path) => RelayConfig::from_json_file(path).map_err(|e| e.to_string())?,
        None => RelayConfig::default(),
    };

    if let Some(endpoint) = &cli.endpoint {
        config.transport.endpoint = endpoint.clone();
    }
    if let Some(kind) = cli.transport {
        config.transport.transport = kind;
    }
    if let Some(ms) = cli.timeout_ms {
        config = config.with_timeout(Duration::from_millis(ms));
    }
    if let Some(retries) = cli.retries {
        config = config.with_retries(retries);
    }

    let token = cli
        .token
        .clone()
        .or_else(|| std::env::var(TOKEN_ENV).ok().filter(|t| !t.is_empty()));
    if let Some(auth_type) = cli.auth_type {
        config.transport.auth.auth_type = auth_type;
    } else if token.is_some() && config.transport.auth.auth_type == AuthType::None {
        config.transport.auth.auth_type = AuthType::Bearer;
    }
    if let Some(token) = token {
        config.transport.auth.token = token;
    }
    if let Some(name) = &cli.header_name {
        config.transport.auth.header_name = name.clone();
    }

    if !cli.open_files.is_empty() {
        config.features.include_open_files = true;
    }
    if cli.disable {
        config.features.enabled = false;
    }
    if cli.verbose {
        config.features.log_level = LogLevel::Debug;
    }

    config.validate().map_err(|e| e.to_string())?;
    Ok(config)
}

fn init_tracing(level: LogLevel) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("prompt_relay={}", level.as_directive())));
    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(io::stderr))
        .with(filter)
        .try_init();
}

fn build_harvester(cli: &Cli) -> StaticContext {
    let mut harvester = StaticContext::new();
    if let Some(root) = &cli.workspace {
        harvester = harvester.with_workspace_root(root.clone());
    }
    if let Some(path) = &cli.file {
        harvester = harvester.with_active_file_from_disk(path);
    }
    if !cli.open_files.is_empty() {
        harvester = harvester.with_open_files(cli.open_files.clone());
    }
    harvester
}

/// Cancel `token` on Ctrl-C.
fn cancel_on_interrupt(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            debug!("Interrupted; cancelling request");
            token.cancel();
        }
    });
}

// ── Request ────────────────────────────────────────────────────────

async fn send_request(cli: &Cli) -> Result<String, String> {
    let config = build_config(cli)?;
    init_tracing(config.features.log_level);

    let settings = SettingsStore::new(config).map_err(|e| e.to_string())?;
    let mut orchestrator = Orchestrator::new(
        settings,
        Arc::new(build_harvester(cli)),
        Arc::new(LoggingHandler),
    )
    .map_err(|e| e.to_string())?;

    let cancel = CancellationToken::new();
    cancel_on_interrupt(cancel.clone());

    if cli.test_connection {
        let status = orchestrator.test_connection(&cancel).await;
        return if status.reachable {
            Ok(format!(
                "{} ({}ms)\n",
                status.message,
                status.latency.as_millis()
            ))
        } else {
            Err(status.message)
        };
    }

    let prompt = build_prompt(cli)?;
    orchestrator.start();
    let segments = orchestrator
        .handle_prompt(
            &prompt,
            &ConversationContext::new(cli.conversation.clone()),
            &cancel,
        )
        .await;
    orchestrator.stop().await;

    if cancel.is_cancelled() {
        return Err("request cancelled".to_string());
    }

    if cli.json {
        serde_json::to_string_pretty(&segments)
            .map(|s| format!("{s}\n"))
            .map_err(|e| format!("failed to serialize output: {e}"))
    } else {
        Ok(format!("{}\n", render_segments(&segments)))
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match send_request(&cli).await {
        Ok(output) => print!("{output}"),
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(1);
        }
    }
}
