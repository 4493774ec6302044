//! minio-mcp - authenticated MinIO REST bridge with a live event stream
//!
//! Loads the configuration, logs in the optional service account, and serves
//! server-sent events, connection stats and health over HTTP until Ctrl-C.

mod exit_code;
mod server;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use minio_mcp_client::{ReqwestTransport, RequestEngine, TokenManager};
use minio_mcp_core::{Config, ConfigManager, Error, HttpTransport, LoggingConfig};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use crate::exit_code::ExitCode;
use crate::server::{AppState, router, run_health_monitor};

#[derive(Parser, Debug)]
#[command(name = "minio-mcp", version, about)]
struct Cli {
    /// Configuration file (default: ~/.config/minio-mcp/config.toml)
    #[arg(long, env = "MINIO_MCP_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Log level, overrides the configuration file (RUST_LOG wins over both)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Emit JSON log lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Serve the event stream (default)
    Serve(ServeArgs),

    /// Validate the configuration and print it with secrets redacted
    CheckConfig,
}

#[derive(Args, Debug, Default)]
struct ServeArgs {
    /// Listen address, overrides server.bind_addr
    #[arg(long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    let cli = Cli::parse();

    let code = match run(cli).await {
        Ok(()) => ExitCode::Success,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::from_error(&e)
        }
    };
    code.into()
}

async fn run(cli: Cli) -> Result<()> {
    let manager = match &cli.config {
        Some(path) => ConfigManager::with_path(path),
        None => ConfigManager::new()?,
    };
    let mut config = manager
        .load()
        .with_context(|| format!("Failed to load {}", manager.path().display()))?;

    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    init_logging(&config.logging, cli.json_logs);

    match cli.command.unwrap_or(Commands::Serve(ServeArgs::default())) {
        Commands::CheckConfig => {
            println!("{}", serde_json::to_string_pretty(&config.redacted())?);
            Ok(())
        }
        Commands::Serve(args) => serve(config, args).await,
    }
}

fn init_logging(config: &LoggingConfig, json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    if json || config.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn serve(mut config: Config, args: ServeArgs) -> Result<()> {
    if let Some(bind) = args.bind {
        config.server.bind_addr = bind;
    }

    let timeout = Duration::from_secs(config.storage.timeout_secs);
    let storage: Arc<dyn HttpTransport> =
        Arc::new(ReqwestTransport::new(timeout, config.storage.verify_tls)?);
    let identity: Arc<dyn HttpTransport> =
        Arc::new(ReqwestTransport::new(timeout, config.identity.verify_tls)?);

    let tokens = Arc::new(TokenManager::new(identity, config.identity.clone()));
    if let Some((username, password)) = config.identity.service_account() {
        tokens
            .login(username, password)
            .await
            .map_err(Error::from)
            .context("Service account login failed")?;
    } else {
        tracing::warn!("No service account configured, storage requests are unauthenticated");
    }

    let engine = Arc::new(RequestEngine::new(storage, tokens, &config));
    let shutdown = CancellationToken::new();
    let health_interval = config.server.health_interval_secs;
    let bind_addr = config.server.bind_addr.clone();
    let state = AppState::new(config, engine, shutdown.clone());

    if health_interval > 0 {
        tokio::spawn(run_health_monitor(
            state.clone(),
            Duration::from_secs(health_interval),
            shutdown.clone(),
        ));
    }

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind {bind_addr}"))?;
    tracing::info!(addr = %bind_addr, name = %state.config.server.name, "Listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            }
            tracing::info!("Shutting down");
            shutdown.cancel();
        })
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_default_command_is_serve() {
        let cli = Cli::try_parse_from(["minio-mcp", "--log-level", "debug"]).unwrap();
        assert!(cli.command.is_none());
        assert_eq!(cli.log_level.as_deref(), Some("debug"));

        let cli = Cli::try_parse_from(["minio-mcp", "serve", "--bind", "0.0.0.0:9000"]).unwrap();
        assert!(matches!(
            cli.command,
            Some(Commands::Serve(ServeArgs { bind: Some(ref b) })) if b == "0.0.0.0:9000"
        ));

        let cli = Cli::try_parse_from(["minio-mcp", "check-config", "--config", "/tmp/c.toml"])
            .unwrap();
        assert!(matches!(cli.command, Some(Commands::CheckConfig)));
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/c.toml")));
    }
}
