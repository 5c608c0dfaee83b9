//! HTTP and WebSocket Server
//!
//! # Endpoints
//!
//! - `POST /api/historical` - Historical query, JSON in and out
//! - `GET /ws/live` - Live stream over WebSocket
//! - `GET /api/health` - Plain `ok`
//! - `GET /health` - JSON status
//! - `GET /healthz` - Liveness probe
//! - `GET /readyz` - Readiness probe
//! - `GET /metrics` - Prometheus metrics in text format

pub mod handlers;
pub mod messages;

use std::net::SocketAddr;
use std::time::Instant;

use axum::{
    Router,
    routing::{get, post},
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};

use crate::application::ports::{DataSourceMode, SharedDataSource};
use crate::application::services::{QueryGateway, StreamMultiplexer};

pub use handlers::{ApiError, HealthResponse, LiveParams};
pub use messages::{ErrorResponse, HistoricalResponse, LiveMessage, OhlcvRecord, TradeRecord};

// =============================================================================
// State
// =============================================================================

/// State shared by every handler.
#[derive(Clone)]
pub struct AppState {
    gateway: QueryGateway,
    multiplexer: StreamMultiplexer,
    mode: DataSourceMode,
    source_name: &'static str,
    version: String,
    started_at: Instant,
    shutdown: CancellationToken,
}

impl AppState {
    /// Build handler state over one data source.
    #[must_use]
    pub fn new(
        source: &SharedDataSource,
        gateway: QueryGateway,
        multiplexer: StreamMultiplexer,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            gateway,
            multiplexer,
            mode: source.kind(),
            source_name: source.name(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            started_at: Instant::now(),
            shutdown,
        }
    }

    /// The stream multiplexer.
    #[must_use]
    pub const fn multiplexer(&self) -> &StreamMultiplexer {
        &self.multiplexer
    }
}

/// Create the router with all endpoints.
#[must_use]
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/historical", post(handlers::historical))
        .route("/ws/live", get(handlers::live))
        .route("/api/health", get(handlers::api_health))
        .route("/health", get(handlers::health))
        .route("/healthz", get(handlers::liveness))
        .route("/readyz", get(handlers::readiness))
        .route("/metrics", get(handlers::metrics))
        .layer(cors)
        .with_state(state)
}

// =============================================================================
// Server
// =============================================================================

/// HTTP server bound to one address.
pub struct HttpServer {
    addr: SocketAddr,
    state: AppState,
    cancel: CancellationToken,
}

impl HttpServer {
    /// Create a new server.
    #[must_use]
    pub const fn new(addr: SocketAddr, state: AppState, cancel: CancellationToken) -> Self {
        Self {
            addr,
            state,
            cancel,
        }
    }

    /// Run until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `HttpServerError` if binding fails or the server hits a
    /// fatal error while running.
    pub async fn run(self) -> Result<(), HttpServerError> {
        let listener = TcpListener::bind(self.addr)
            .await
            .map_err(|e| HttpServerError::BindFailed(self.addr, e.to_string()))?;
        self.serve(listener).await
    }

    /// Run on an already bound listener until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `HttpServerError::ServerFailed` on a fatal server error.
    pub async fn serve(self, listener: TcpListener) -> Result<(), HttpServerError> {
        let local = listener.local_addr().unwrap_or(self.addr);
        tracing::info!(addr = %local, "HTTP server listening");

        let app = create_router(self.state);
        axum::serve(listener, app)
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| HttpServerError::ServerFailed(e.to_string()))?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

// =============================================================================
// Errors
// =============================================================================

/// HTTP server errors.
#[derive(Debug, thiserror::Error)]
pub enum HttpServerError {
    /// Failed to bind.
    #[error("failed to bind to {0}: {1}")]
    BindFailed(SocketAddr, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}
