//! Telemetry Relay Daemon
//!
//! Serves the instrument cluster page and fans the upstream telemetry stream
//! out to every connected viewer over WebSocket.
//!
//! # Usage
//!
//! ```bash
//! # Start with defaults (0.0.0.0:8000, ./var/sensorgrabber.fifo)
//! telemetry-relay
//!
//! # Custom upstream and port
//! telemetry-relay --source /run/sensors.fifo --bind 127.0.0.1:9000
//!
//! # With config file
//! telemetry-relay --config /etc/telemetry-relay/relay.toml
//!
//! # Verbose logging
//! RUST_LOG=debug telemetry-relay
//! ```
//!
//! # Signals
//!
//! - `SIGTERM` / `SIGINT`: Graceful shutdown

mod server;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};

use relay_core::{default_config_path, load_config_from_path, ConfigOverrides, FileSource};

use server::RelayServer;

/// How long to wait for blocked upstream opens when exiting
const RUNTIME_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

/// Telemetry relay - streams live telemetry to instrument cluster viewers
#[derive(Parser, Debug)]
#[command(name = "telemetry-relay")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Address to listen on
    #[arg(short = 'b', long, value_name = "ADDR")]
    bind: Option<SocketAddr>,

    /// Upstream file or named pipe
    #[arg(short = 's', long, value_name = "PATH")]
    source: Option<PathBuf>,

    /// Directory served under /assets
    #[arg(long, value_name = "DIR")]
    assets_dir: Option<PathBuf>,

    /// Maximum concurrent viewers
    #[arg(long, value_name = "N")]
    max_viewers: Option<usize>,

    /// Configuration file path
    #[arg(short = 'c', long, env = "RELAY_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, env = "RELAY_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

impl Args {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            bind: self.bind,
            upstream_path: self.source.clone(),
            assets_dir: self.assets_dir.clone(),
            max_viewers: self.max_viewers,
        }
    }
}

/// Initialize logging with the specified level
fn init_logging(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!("relay_daemon={level},relay_core={level}"))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level);

    // Built by hand so shutdown can abandon an upstream open that is still
    // blocked waiting for a FIFO writer.
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;

    let result = runtime.block_on(run(args));
    runtime.shutdown_timeout(RUNTIME_SHUTDOWN_TIMEOUT);

    match result {
        Ok(()) => {
            info!("Telemetry relay stopped cleanly");
            Ok(())
        }
        Err(e) => {
            error!(error = %format!("{e:#}"), "Telemetry relay stopped with error");
            Err(e)
        }
    }
}

async fn run(args: Args) -> Result<()> {
    info!("Telemetry relay starting");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config_path = args.config.clone().or_else(default_config_path);
    let mut config = load_config_from_path(config_path).context("Failed to load configuration")?;
    args.overrides().apply(&mut config);
    config.validate().context("Invalid configuration")?;

    info!(
        bind = %config.bind,
        upstream = %config.upstream_path.display(),
        max_viewers = config.max_viewers,
        send_timeout_ms = config.send_timeout.as_millis() as u64,
        source = %config.source(),
        "Configuration resolved"
    );

    let source = FileSource::new(config.upstream_path.clone());
    let server = RelayServer::new(config);
    let listener = server.bind().await?;

    spawn_signal_handler(server.shutdown_handle());

    server.run(listener, source).await
}

/// Flip the shutdown signal on SIGINT or SIGTERM
fn spawn_signal_handler(shutdown: std::sync::Arc<tokio::sync::watch::Sender<bool>>) {
    tokio::spawn(async move {
        let ctrl_c = async {
            tokio::signal::ctrl_c()
                .await
                .expect("Failed to install Ctrl+C handler");
        };

        #[cfg(unix)]
        let terminate = async {
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("Failed to install SIGTERM handler")
                .recv()
                .await;
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            () = ctrl_c => info!("Received SIGINT, initiating shutdown"),
            () = terminate => info!("Received SIGTERM, initiating shutdown"),
        }

        shutdown.send_replace(true);
    });
}
