//! Chat Conductor Daemon
//!
//! Serves session-scoped streaming chat over a Unix socket. Clients send
//! framed `chat`, `stop`, `clear` and `history` requests and receive the
//! answer as a sequence of `event` frames.
//!
//! # Usage
//!
//! ```bash
//! # Start with defaults (config from $XDG_CONFIG_HOME/chat-conductor/conductor.toml)
//! DASHSCOPE_API_KEY=sk-... chat-conductor-daemon
//!
//! # Custom socket path and model
//! chat-conductor-daemon --socket-path /tmp/conductor.sock --model qwen-max
//!
//! # Verbose logging
//! RUST_LOG=debug chat-conductor-daemon
//! ```
//!
//! # Signals
//!
//! - `SIGTERM` / `SIGINT`: Graceful shutdown (in-flight generations are cancelled)

mod server;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info, warn};

use chat_conductor::{
    default_config_path, load_config_from_path, ConfigOverrides, FileStore, InferenceBackend,
    LocalFileStore, OpenAiCompatBackend, StreamOrchestrator,
};
use server::{DaemonServer, ServerConfig};

/// Chat Conductor Daemon - streaming chat sessions over a Unix socket
#[derive(Parser, Debug)]
#[command(name = "chat-conductor-daemon")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Unix socket path for client connections
    #[arg(short = 's', long, value_name = "PATH")]
    socket_path: Option<PathBuf>,

    /// Configuration file path
    #[arg(short = 'c', long, env = "CONDUCTOR_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Model name sent to the backend
    #[arg(short = 'm', long, value_name = "NAME")]
    model: Option<String>,

    /// Base URL of the OpenAI-compatible backend
    #[arg(long, value_name = "URL")]
    base_url: Option<String>,

    /// Directory for per-session uploaded files
    #[arg(long, value_name = "DIR")]
    upload_dir: Option<PathBuf>,

    /// History token budget per session
    #[arg(long, value_name = "TOKENS")]
    max_history_tokens: Option<usize>,

    /// Maximum concurrent client connections
    #[arg(long, default_value_t = 100)]
    max_connections: usize,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, env = "CONDUCTOR_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

impl Args {
    fn overrides(&self) -> ConfigOverrides {
        let mut overrides = ConfigOverrides::new();
        if let Some(path) = &self.socket_path {
            overrides = overrides.with_socket_path(path.clone());
        }
        if let Some(model) = &self.model {
            overrides = overrides.with_model(model.clone());
        }
        if let Some(url) = &self.base_url {
            overrides = overrides.with_base_url(url.clone());
        }
        if let Some(dir) = &self.upload_dir {
            overrides = overrides.with_upload_dir(dir.clone());
        }
        if let Some(tokens) = self.max_history_tokens {
            overrides = overrides.with_max_history_tokens(tokens);
        }
        overrides
    }
}

/// Initialize logging with the specified level
fn init_logging(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!(
            "chat_conductor_daemon={level},chat_conductor={level}"
        ))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();
}

/// Resolves on the first SIGTERM or SIGINT
async fn shutdown_signal() {
    let (mut sigterm, mut sigint) = match (
        signal(SignalKind::terminate()),
        signal(SignalKind::interrupt()),
    ) {
        (Ok(term), Ok(int)) => (term, int),
        (Err(e), _) | (_, Err(e)) => {
            error!(error = %e, "Failed to install signal handlers, falling back to Ctrl+C");
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to wait for Ctrl+C");
            }
            return;
        }
    };

    tokio::select! {
        _ = sigterm.recv() => info!("Received SIGTERM, initiating shutdown"),
        _ = sigint.recv() => info!("Received SIGINT, initiating shutdown"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level);

    info!("Chat Conductor Daemon starting");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!("PID: {}", std::process::id());

    let config_path = args.config.clone().or_else(default_config_path);
    let mut settings =
        load_config_from_path(config_path).context("Failed to load configuration")?;
    let overrides = args.overrides();
    if !overrides.is_empty() {
        overrides
            .apply(&mut settings)
            .context("Invalid command-line overrides")?;
    }

    info!(
        source = %settings.source(),
        config_file = ?settings.config_file_path,
        socket_path = ?settings.socket_path,
        upload_dir = ?settings.upload_dir,
        model = %settings.conductor.model.model,
        base_url = %settings.backend.base_url,
        "Configuration loaded"
    );

    let backend = OpenAiCompatBackend::new(settings.backend.clone())
        .context("Failed to create inference backend")?;
    if !backend.health_check().await {
        warn!(base_url = %settings.backend.base_url, "Inference backend is not reachable yet");
    }

    let files: Arc<dyn FileStore> = Arc::new(LocalFileStore::new(settings.upload_dir.clone()));
    let conductor = StreamOrchestrator::builder(Arc::new(backend))
        .config(settings.conductor.clone())
        .file_store(files)
        .build();

    let server = DaemonServer::new(
        settings.socket_path.clone(),
        conductor,
        ServerConfig {
            max_connections: args.max_connections,
            max_frame_size: settings.max_frame_size,
        },
    );

    match server.run(shutdown_signal()).await {
        Ok(()) => {
            info!("Chat conductor daemon stopped cleanly");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Daemon stopped with error");
            Err(e)
        }
    }
}
