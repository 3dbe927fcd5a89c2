//! s3deck -- management console backend for S3-compatible object storage.
//!
//! On SIGTERM/SIGINT the listener stops accepting connections and the
//! process waits for in-flight operations (bounded by the drain deadline)
//! before exiting.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Command-line arguments for the s3deck server.
#[derive(Parser, Debug)]
#[command(
    name = "s3deck",
    version,
    about = "Management console backend for S3-compatible object storage"
)]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long, default_value = "s3deck.yaml")]
    config: String,

    /// Override the bind address (host:port).
    #[arg(short, long)]
    bind: Option<String>,
}

fn init_logging(config: &s3deck::config::LoggingConfig) {
    // RUST_LOG takes precedence over the configured level.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_str()));

    if config.format.eq_ignore_ascii_case("json") {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_found = std::path::Path::new(&cli.config).exists();
    let config = s3deck::config::load_config_or_default(&cli.config)?;
    init_logging(&config.logging);

    if config_found {
        info!("Loaded configuration from {}", cli.config);
    } else {
        warn!("Config file {} not found, using defaults", cli.config);
    }

    let bind_addr = cli
        .bind
        .unwrap_or_else(|| format!("{}:{}", config.server.host, config.server.port));

    if config.observability.metrics {
        s3deck::metrics::init_metrics()?;
        s3deck::metrics::describe_metrics();
        info!("Prometheus metrics initialized");
    }

    let sweep_every = Duration::from_secs(config.auth.sweep_interval_secs.max(1));
    let state = Arc::new(s3deck::AppState::from_config(config)?);
    info!(
        "Storage backend '{}' with {} regions (default {})",
        state.config.storage.backend,
        state.regions.list_regions().len(),
        state.regions.default_region().id
    );

    s3deck::shutdown::install_panic_hook(state.operations.clone());
    let sweeper = state.sessions.clone().spawn_sweeper(sweep_every);

    let app = s3deck::server::app(state.clone());
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("s3deck listening on {}", bind_addr);

    let coordinator = state.shutdown.clone();
    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { coordinator.draining().await })
            .await
    });

    shutdown_signal().await;
    state.shutdown.begin_drain();

    let outcome = state.shutdown.drain().await;
    sweeper.abort();
    if server.is_finished() {
        if let Ok(Err(e)) = server.await {
            warn!("Listener stopped with error: {}", e);
        }
    }

    info!("s3deck shut down ({:?})", outcome);
    std::process::exit(outcome.exit_code());
}

/// Wait for SIGTERM or SIGINT (Ctrl+C).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT, shutting down");
        },
        _ = terminate => {
            info!("Received SIGTERM, shutting down");
        },
    }
}
