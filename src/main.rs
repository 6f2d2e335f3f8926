//! scanwire server
//!
//! ```text
//!                 ┌──────────────────────────────────────────────────────┐
//!   request  ───▶ │ request id ─▶ trace ─▶ timeout ─▶ detach ─▶ instrument │
//!                 │                                         │            │
//!                 │        ┌────────────────┬───────────────┼──────────┐ │
//!                 │        ▼                ▼               ▼          ▼ │
//!                 │    indexer          matcher         notifier   openapi│
//!                 │   (limited)       (compressed)    (compressed)       │
//!                 │        └──────── services (memory backend) ────────┘ │
//!                 └──────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;

use scanwire::config::{load_config, Mode, ScanwireConfig};
use scanwire::lifecycle::{signals, Shutdown};
use scanwire::observability::{logging, metrics};
use scanwire::{HttpServer, MemoryBackend, Services};

#[derive(Debug, Parser)]
#[command(name = "scanwire", version, about = "Container vulnerability scanner API server")]
struct Cli {
    /// Path to a TOML config file; defaults apply when absent.
    #[arg(short, long, env = "SCANWIRE_CONFIG")]
    config: Option<PathBuf>,

    /// Override the configured service mode.
    #[arg(short, long, value_enum)]
    mode: Option<Mode>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ScanwireConfig::default(),
    };
    if let Some(mode) = cli.mode {
        config.mode = mode;
    }

    logging::init(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), mode = %config.mode, "scanwire starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        request_timeout_secs = config.timeouts.request_secs,
        index_report_request_concurrency = config.indexer.index_report_request_concurrency,
        "configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "failed to parse metrics address"
            ),
        }
    }

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "listening for connections");

    let backend = Arc::new(MemoryBackend::new());
    backend.set_initialized();
    let server = HttpServer::new(config, Services::memory(backend))?;

    let shutdown = Shutdown::new();
    let rx = shutdown.subscribe();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            signals::wait().await;
            shutdown.trigger();
        }
    });

    server.run(listener, rx).await?;
    tracing::info!("shutdown complete");
    Ok(())
}
