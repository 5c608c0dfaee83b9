#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::needless_collect,
        clippy::option_if_let_else,
        clippy::default_trait_access,
        clippy::items_after_statements,
        clippy::or_fun_call
    )
)]

//! Market Data Server - Historical Queries and Live Fan-out
//!
//! Serves futures market data from a single active source: the Databento
//! API when credentials are configured, otherwise a seeded synthetic
//! generator. Historical requests are answered over HTTP; live
//! subscriptions are multiplexed over WebSocket so that any number of
//! clients share one upstream feed per (schema, symbol).
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Record model and bookkeeping
//!   - `market_data`: Fixed-point trades and bars, schemas
//!   - `aggregation`: Trade to OHLCV bar rollup
//!   - `query`: Validated historical queries
//!   - `subscription`: Subscription lifecycle and feed reference counts
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: The `DataSource` contract
//!   - `services`: Query gateway and stream multiplexer
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `synthetic`: Random-walk data source
//!   - `vendor`: Databento historical and live clients
//!   - `http`: REST and WebSocket endpoints, health
//!   - `config`: Environment configuration
//!   - `metrics`, `telemetry`: Observability
//!
//! # Data Flow
//!
//! ```text
//!                      ┌──────────────┐    ┌─────────────┐
//! Databento / ────────►│ DataSource   │───►│   Query     │──► POST /api/historical
//! Synthetic            │              │    │  Gateway    │
//!                      │              │    └─────────────┘
//!                      │              │    ┌─────────────┐
//!                      │              │───►│   Stream    │──► WS client 1
//!                      └──────────────┘    │ Multiplexer │──► WS client 2
//!                       one feed per       └─────────────┘──► WS client N
//!                       (schema, symbol)
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Market data types with no external I/O.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::aggregation::{AggregationError, BarAggregator};
pub use domain::market_data::{
    Bar, MarketRecord, PRICE_SCALE, PriceTick, Schema, Symbol, UnixNanos,
};
pub use domain::query::{HistoricalQuery, InvalidQuery, SymbologyType};
pub use domain::subscription::{SubscriptionId, SubscriptionManager, SubscriptionState};

// Ports and services
pub use application::ports::{
    DataSource, DataSourceMode, LiveFeed, SharedDataSource, SourceError,
};
pub use application::services::{
    HistoricalRequest, HistoricalResult, MultiplexerConfig, QueryError, QueryGateway,
    StreamError, StreamEvent, StreamMultiplexer, SubscriptionHandle,
};

// Data sources
pub use infrastructure::synthetic::{SyntheticConfig, SyntheticSource};
pub use infrastructure::vendor::{DatabentoConfig, DatabentoSource, VendorError};

// Infrastructure config
pub use infrastructure::config::{
    ConfigError, Credentials, ServerConfig, ServerSettings, StreamSettings, SyntheticSettings,
    VendorSettings,
};

// HTTP server
pub use infrastructure::http::{AppState, HttpServer, HttpServerError, create_router};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
