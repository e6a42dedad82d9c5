//! mesh-client: stays subscribed to a mesh server and logs what arrives.
//!
//! # Usage
//!
//! ```text
//! mesh-client [OPTIONS]
//!
//! Options:
//!   --config    <PATH>   Config file [default: platform config dir]
//!   --host      <HOST>   Mesh server host (overrides [server] host)
//!   --port      <PORT>   Mesh server port (overrides [server] port)
//!   --log-level <LEVEL>  Log level (overrides [logging] level)
//! ```
//!
//! | Variable    | Overrides     |
//! |-------------|---------------|
//! | `MESH_HOST` | `--host`      |
//! | `MESH_PORT` | `--port`      |
//! | `RUST_LOG`  | any log level |
//!
//! Ctrl+C stops the client and prints per-event counters.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use mesh_client::application::observe::{LoggingHandler, ObjectStats};
use mesh_client::infrastructure::network::Supervisor;
use mesh_client::infrastructure::storage::config::{self, AppConfig, ConfigError};

// ── CLI argument definitions ──────────────────────────────────────────────────

#[derive(Debug, Parser)]
#[command(
    name = "mesh-client",
    about = "Resilient mesh object bus client",
    version
)]
struct Cli {
    /// Path to the TOML config file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Hostname or IP address of the mesh server.
    #[arg(long, env = "MESH_HOST")]
    host: Option<String>,

    /// TCP port of the mesh server.
    #[arg(long, env = "MESH_PORT")]
    port: Option<u16>,

    /// `tracing` level used when `RUST_LOG` is unset.
    #[arg(long)]
    log_level: Option<String>,
}

impl Cli {
    /// Loads the config file and applies the command-line overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be read or
    /// parsed.
    fn into_app_config(self) -> anyhow::Result<AppConfig> {
        let mut cfg = match &self.config {
            Some(path) => config::load_config_from(path)
                .with_context(|| format!("failed to load config from {}", path.display()))?,
            None => match config::load_config() {
                Ok(cfg) => cfg,
                Err(ConfigError::NoPlatformConfigDir) => AppConfig::default(),
                Err(e) => return Err(e).context("failed to load config"),
            },
        };

        if let Some(host) = self.host {
            cfg.server.host = host;
        }
        if let Some(port) = self.port {
            cfg.server.port = port;
        }
        if let Some(level) = self.log_level {
            cfg.logging.level = level;
        }
        Ok(cfg)
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = Cli::parse().into_app_config()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cfg.logging.level)),
        )
        .init();

    let connector = cfg.connector();
    info!(
        "mesh client starting: server={}:{}, backoff={}s",
        connector.host, connector.port, cfg.reconnect.backoff_secs
    );

    let cancel = CancellationToken::new();
    let stopper = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("received Ctrl+C, shutting down");
                stopper.cancel();
            }
            Err(e) => error!("failed to listen for Ctrl+C signal: {e}"),
        }
    });

    let mut supervisor = Supervisor::new(connector, cfg.supervisor_config());
    let stats = supervisor
        .run(&mut LoggingHandler, ObjectStats::default(), &cancel)
        .await;

    info!(attempts = supervisor.attempts(), "mesh client stopped");
    println!("{stats}");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
