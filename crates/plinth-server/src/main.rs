//! Plinth server - hosts the demo application over HTTP and WebSocket.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use plinth_core::Shutdown;
use plinth_server::{config::Config, demo, gateway, logging};

use logging::{LogConfig, LogFormat};

#[derive(Parser, Debug)]
#[command(name = "plinth-server")]
#[command(about = "HTTP/WebSocket gateway for the Plinth dispatch core")]
#[command(version)]
struct Cli {
    /// Path to config file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Override host from config
    #[arg(long)]
    host: Option<String>,

    /// Override port from config
    #[arg(short, long)]
    port: Option<u16>,

    /// Redis URL for cross-worker fanout (local queue when unset)
    #[arg(long, value_name = "URL")]
    redis_url: Option<String>,

    /// Log one line per handled request
    #[arg(long)]
    monitoring: bool,

    /// Enable verbose logging (INFO level for all plinth targets)
    #[arg(short, long)]
    verbose: bool,

    /// Enable debug logging (DEBUG level for plinth targets)
    #[arg(short, long)]
    debug: bool,

    /// Enable trace logging (TRACE level for everything)
    #[arg(long)]
    trace: bool,

    /// Quiet mode (WARN and ERROR only)
    #[arg(short, long)]
    quiet: bool,

    /// Set log level for specific targets (e.g., "fanout=debug").
    /// Targets are prefixed with "plinth::" automatically.
    #[arg(long = "log", value_name = "TARGET=LEVEL")]
    log_overrides: Vec<String>,

    /// Log output format
    #[arg(long = "log-format", value_name = "FORMAT", default_value = "text")]
    log_format: LogFormat,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_config = LogConfig::from_cli(
        cli.verbose,
        cli.debug,
        cli.trace,
        cli.quiet,
        cli.log_overrides,
        cli.log_format,
    );
    logging::init(&log_config);

    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    if let Some(host) = cli.host {
        config.host = host;
    }
    if let Some(port) = cli.port {
        config.port = port;
    }
    if cli.redis_url.is_some() {
        config.app.fanout.redis_url = cli.redis_url;
    }
    if cli.monitoring {
        config.app.monitoring = true;
    }

    tracing::info!(
        target: "plinth::startup",
        "Loaded configuration (bind: {}, fanout: {})",
        config.bind_address(),
        config.app.fanout.redis_url.as_deref().unwrap_or("local")
    );

    // One cooperative event loop per worker process.
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("building tokio runtime")?;
    runtime.block_on(serve(config))
}

async fn serve(config: Config) -> Result<()> {
    let addr: SocketAddr = config
        .bind_address()
        .parse()
        .with_context(|| format!("invalid bind address {}", config.bind_address()))?;

    let app = demo::build(config.app)?;
    let shutdown = Shutdown::new();
    let bridge = app
        .spawn_fanout_bridge(shutdown.clone())
        .context("starting fanout listener")?;
    tracing::info!(target: "plinth::startup", "Started fanout listener");

    let lifespan = gateway::run_lifespan(&app).await?;

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(target: "plinth::startup", "Starting server on {}", addr);

    let router = gateway::router(app.clone());
    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
    .await?;

    lifespan.shutdown().await?;
    shutdown.trigger();
    tokio::task::spawn_blocking(move || bridge.stop())
        .await
        .context("stopping fanout listener")?;
    tracing::info!(target: "plinth::startup", "Server stopped");
    Ok(())
}

async fn shutdown_signal(shutdown: Shutdown) {
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                tracing::error!(target: "plinth::startup", "Failed to listen for ctrl-c: {}", e);
            }
            tracing::info!(target: "plinth::startup", "Shutdown requested");
        }
        _ = shutdown.wait() => {}
    }
    shutdown.trigger();
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
    fn test_every_flag_is_documented() {
        let command = Cli::command();
        for arg in command
            .get_arguments()
            .filter(|arg| !matches!(arg.get_id().as_str(), "help" | "version"))
        {
            assert!(
                arg.get_help().is_some(),
                "--{} has no help text",
                arg.get_id()
            );
        }
    }
}
