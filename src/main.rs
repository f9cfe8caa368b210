#![forbid(unsafe_code)]

//! `mcp-switchboard`: MCP tool server binary.
//!
//! Loads configuration, builds the shared session registry and dispatcher,
//! and serves the stream and call endpoints until ctrl-c or SIGTERM.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use mcp_switchboard::config::ServerConfig;
use mcp_switchboard::mcp::handler::AppState;
use mcp_switchboard::mcp::http;
use mcp_switchboard::mcp::tools::ToolRegistry;
use mcp_switchboard::{AppError, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "mcp-switchboard", about = "MCP tool server", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file. Defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the configured HTTP port.
    #[arg(long)]
    port: Option<u16>,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("mcp-switchboard bootstrap");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    // ── Load configuration ──────────────────────────────
    let mut config = match args.config {
        Some(path) => ServerConfig::load_from_path(path)?,
        None => ServerConfig::default(),
    };
    if let Some(port) = args.port {
        config.http_port = port;
    }
    info!(
        bind = %config.bind_host,
        port = config.http_port,
        "configuration loaded"
    );

    // ── Build shared application state ──────────────────
    let ct = CancellationToken::new();
    let tools = ToolRegistry::with_builtin();
    info!(tools = tools.len(), "tool provider ready");
    let state = AppState::new(config, tools, ct.clone());

    // ── Start transport ─────────────────────────────────
    let http_ct = ct.clone();
    let http_handle = tokio::spawn(async move {
        if let Err(err) = http::serve_http(state, http_ct.clone()).await {
            error!(%err, "http transport failed");
            http_ct.cancel();
        }
    });

    info!("MCP server ready");

    // ── Wait for shutdown signal ────────────────────────
    tokio::select! {
        () = shutdown_signal() => info!("shutdown signal received"),
        () = ct.cancelled() => {}
    }
    ct.cancel();

    if let Err(err) = http_handle.await {
        error!(%err, "http transport task panicked");
    }
    info!("mcp-switchboard shut down");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                tracing::warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
