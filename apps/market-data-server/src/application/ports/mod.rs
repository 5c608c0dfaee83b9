//! Port Interfaces
//!
//! Defines the contract every market data source implements, following
//! the Hexagonal Architecture pattern. The query gateway and the stream
//! multiplexer only ever talk to a `dyn DataSource`.
//!
//! ## Driven Ports (Outbound)
//!
//! - [`DataSource`]: historical fetches and live streams from a vendor or
//!   the synthetic generator

use std::fmt;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::Stream;

use crate::domain::market_data::{MarketRecord, Schema, Symbol, UnixNanos};
use crate::domain::query::HistoricalQuery;

// =============================================================================
// Errors
// =============================================================================

/// Errors reported by a data source.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SourceError {
    /// The requested window is empty or inverted.
    #[error("invalid range: start ({start}) must be before end ({end})")]
    InvalidRange {
        /// Requested start.
        start: UnixNanos,
        /// Requested end.
        end: UnixNanos,
    },

    /// The source does not recognize a symbol.
    #[error("invalid symbol: {0}")]
    InvalidSymbol(Symbol),

    /// The schema/symbol combination cannot be served.
    #[error("unsupported request: {0}")]
    Unsupported(String),

    /// The underlying feed failed.
    #[error("upstream failure: {0}")]
    Upstream(String),
}

impl SourceError {
    /// Whether the error was caused by the request rather than the source.
    #[must_use]
    pub const fn is_client_error(&self) -> bool {
        !matches!(self, Self::Upstream(_))
    }

    /// Short label for metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::InvalidRange { .. } => "invalid_range",
            Self::InvalidSymbol(_) => "invalid_symbol",
            Self::Unsupported(_) => "unsupported",
            Self::Upstream(_) => "upstream",
        }
    }
}

// =============================================================================
// Source Mode
// =============================================================================

/// Which data source backs the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataSourceMode {
    /// Seeded random-walk generator.
    Synthetic,
    /// Databento market data.
    Vendor,
}

impl DataSourceMode {
    /// Mode name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Synthetic => "synthetic",
            Self::Vendor => "vendor",
        }
    }
}

impl fmt::Display for DataSourceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Data Source
// =============================================================================

/// A live, infinite sequence of records. An `Err` item is terminal.
/// Dropping the feed releases the underlying resources.
pub type LiveFeed = Pin<Box<dyn Stream<Item = Result<MarketRecord, SourceError>> + Send>>;

/// Shared handle to the active data source.
pub type SharedDataSource = Arc<dyn DataSource>;

/// Uniform contract for market data providers.
#[async_trait]
pub trait DataSource: Send + Sync {
    /// Which kind of source this is.
    fn kind(&self) -> DataSourceMode;

    /// Human-readable name for logs and health output.
    fn name(&self) -> &'static str;

    /// Fetch records in `[query.start(), query.end())`, ordered by event
    /// time ascending and truncated to `query.limit()` when set.
    ///
    /// # Errors
    ///
    /// - `SourceError::Unsupported` if the schema/symbol combination cannot
    ///   be served
    /// - `SourceError::Upstream` if the underlying feed fails
    async fn fetch_historical(
        &self,
        query: &HistoricalQuery,
    ) -> Result<Vec<MarketRecord>, SourceError>;

    /// Open a live stream of `schema` records for `symbols`.
    ///
    /// Event times are non-decreasing per symbol.
    ///
    /// # Errors
    ///
    /// Returns `SourceError::InvalidSymbol` if any symbol is unknown to the
    /// source, or `SourceError::Upstream` if the feed cannot be opened.
    async fn open_live_stream(
        &self,
        symbols: &[Symbol],
        schema: Schema,
    ) -> Result<LiveFeed, SourceError>;
}

// =============================================================================
// Tests
// =============================================================================
