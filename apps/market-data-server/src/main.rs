//! Market Data Server Binary
//!
//! Starts the historical query and live streaming server.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin market-data-server
//! ```
//!
//! # Environment Variables
//!
//! ## Optional
//! - `DATABENTO_API_KEY`: Use Databento; synthetic data when unset
//! - `DATABENTO_DATASET`: Dataset code (default: GLBX.MDP3)
//! - `DATABENTO_STYPE_IN`: Live symbology (default: parent)
//! - `HOST`: Listen address (default: 127.0.0.1)
//! - `PORT`: Listen port (default: 3001)
//! - `STREAM_QUEUE_CAPACITY`: Per-subscriber queue (default: 1024)
//! - `SYNTHETIC_SEED`: Fixed seed for the synthetic source
//! - `OTEL_ENABLED`: Enable OpenTelemetry (default: false)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: <http://localhost:4317>)
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use market_data_server::infrastructure::telemetry;
use market_data_server::{
    AppState, DataSourceMode, DatabentoConfig, DatabentoSource, HttpServer, MultiplexerConfig,
    QueryGateway, ServerConfig, SharedDataSource, StreamMultiplexer, SyntheticConfig,
    SyntheticSource, init_metrics,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv();

    // Initialize telemetry (OpenTelemetry + tracing)
    let _telemetry_guard = telemetry::init();

    tracing::info!("Starting Market Data Server");

    // Initialize Prometheus metrics
    if let Err(e) = init_metrics() {
        tracing::warn!(error = %e, "Metrics recorder not installed");
    }

    let config = ServerConfig::from_env().context("invalid configuration")?;
    log_config(&config);

    let source = build_source(&config)?;
    let shutdown_token = CancellationToken::new();

    let gateway = QueryGateway::new(Arc::clone(&source));
    let multiplexer = StreamMultiplexer::new(
        Arc::clone(&source),
        MultiplexerConfig {
            queue_capacity: config.stream.queue_capacity,
        },
    );

    let state = AppState::new(&source, gateway, multiplexer, shutdown_token.clone());
    let addr = config.server.socket_addr()?;
    let server = HttpServer::new(addr, state, shutdown_token.clone());

    let mut server_handle = tokio::spawn(server.run());

    tokio::select! {
        () = await_shutdown(shutdown_token.clone()) => {}
        result = &mut server_handle => {
            shutdown_token.cancel();
            result.context("HTTP server task panicked")??;
            return Ok(());
        }
    }

    match tokio::time::timeout(SHUTDOWN_TIMEOUT, server_handle).await {
        Ok(result) => result.context("HTTP server task panicked")??,
        Err(_) => tracing::warn!("Graceful shutdown timed out"),
    }

    tracing::info!("Market Data Server stopped");
    Ok(())
}

/// Pick the data source for the configured mode.
fn build_source(config: &ServerConfig) -> anyhow::Result<SharedDataSource> {
    match (config.mode, &config.credentials) {
        (DataSourceMode::Vendor, Some(credentials)) => {
            let databento = DatabentoConfig::new(credentials, &config.vendor);
            let source: SharedDataSource = Arc::new(
                DatabentoSource::new(databento).context("failed to build Databento client")?,
            );
            Ok(source)
        }
        _ => {
            let source = SyntheticSource::new(SyntheticConfig::from(config.synthetic.clone()));
            tracing::info!(seed = source.seed(), "Using synthetic data source");
            let source: SharedDataSource = Arc::new(source);
            Ok(source)
        }
    }
}

/// Load .env file from current or ancestor directories.
fn load_dotenv() {
    if dotenvy::dotenv().is_err() {
        load_dotenv_from_ancestors();
    }
}

/// Log the parsed configuration.
fn log_config(config: &ServerConfig) {
    tracing::info!(
        mode = %config.mode,
        host = %config.server.host,
        port = config.server.port,
        queue_capacity = config.stream.queue_capacity,
        "Configuration loaded"
    );
    if config.mode == DataSourceMode::Vendor {
        tracing::debug!(
            dataset = %config.vendor.dataset,
            heartbeat_timeout = ?config.vendor.heartbeat_timeout,
            request_timeout = ?config.vendor.request_timeout,
            stype_in = %config.vendor.stype_in,
            "Databento settings"
        );
    }
}

/// Load .env file from any ancestor directory.
fn load_dotenv_from_ancestors() {
    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
#[allow(clippy::expect_used)]
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );
}
