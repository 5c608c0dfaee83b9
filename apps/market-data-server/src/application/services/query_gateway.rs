//! Query Gateway
//!
//! Validates historical requests, delegates them to the active data source
//! and shapes the result into a schema-tagged envelope. Holds no state
//! besides the source handle, so one instance serves concurrent requests.

use std::num::NonZeroUsize;
use std::time::Instant;

use chrono::DateTime;
use serde::Deserialize;

use crate::application::ports::{SharedDataSource, SourceError};
use crate::domain::market_data::{MarketRecord, ParseSchemaError, Schema, UnixNanos};
use crate::domain::query::{HistoricalQuery, InvalidQuery, SymbologyType};
use crate::infrastructure::metrics;

// =============================================================================
// Request / Result
// =============================================================================

fn default_stype_in() -> String {
    SymbologyType::Parent.as_str().to_string()
}

/// Historical request as received from a client.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HistoricalRequest {
    /// Requested symbols.
    pub symbols: Vec<String>,
    /// Schema name (`trades`, `ohlcv-1s`, `ohlcv-1m`).
    pub schema: String,
    /// Symbology of `symbols`.
    #[serde(default = "default_stype_in")]
    pub stype_in: String,
    /// Inclusive start, RFC 3339.
    pub start_rfc3339: String,
    /// Exclusive end, RFC 3339.
    pub end_rfc3339: String,
    /// Optional positive record limit.
    #[serde(default)]
    pub limit: Option<i64>,
}

/// Records for one schema, ordered by event time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoricalResult {
    /// Schema of every record in `data`.
    pub schema: Schema,
    /// The records.
    pub data: Vec<MarketRecord>,
}

// =============================================================================
// Errors
// =============================================================================

/// Historical request failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueryError {
    /// No symbols were requested.
    #[error("at least one symbol is required")]
    EmptySymbols,

    /// Limit was zero or negative.
    #[error("limit must be positive, got {0}")]
    InvalidLimit(i64),

    /// Unknown schema name.
    #[error(transparent)]
    InvalidSchema(#[from] ParseSchemaError),

    /// Unknown symbology.
    #[error("{0}")]
    InvalidSymbology(String),

    /// Malformed timestamp.
    #[error("invalid {field} timestamp '{value}': expected RFC 3339")]
    InvalidTimestamp {
        /// Request field name.
        field: &'static str,
        /// Raw value.
        value: String,
    },

    /// The data source rejected or failed the request.
    #[error(transparent)]
    Source(#[from] SourceError),
}

impl QueryError {
    /// Whether the client caused the failure.
    #[must_use]
    pub const fn is_client_error(&self) -> bool {
        match self {
            Self::Source(err) => err.is_client_error(),
            _ => true,
        }
    }
}

impl From<InvalidQuery> for QueryError {
    fn from(err: InvalidQuery) -> Self {
        match err {
            InvalidQuery::EmptySymbols => Self::EmptySymbols,
            InvalidQuery::InvalidRange { start, end } => {
                Self::Source(SourceError::InvalidRange { start, end })
            }
        }
    }
}

// =============================================================================
// Gateway
// =============================================================================

/// Stateless front door for historical queries.
#[derive(Clone)]
pub struct QueryGateway {
    source: SharedDataSource,
}

impl QueryGateway {
    /// Create a gateway over a data source.
    #[must_use]
    pub fn new(source: SharedDataSource) -> Self {
        Self { source }
    }

    /// Validate a client request without touching the source.
    ///
    /// # Errors
    ///
    /// Returns the first validation failure found.
    pub fn validate(request: &HistoricalRequest) -> Result<HistoricalQuery, QueryError> {
        let schema: Schema = request.schema.parse()?;
        let stype_in: SymbologyType = request
            .stype_in
            .parse()
            .map_err(QueryError::InvalidSymbology)?;
        let start = parse_rfc3339("start", &request.start_rfc3339)?;
        let end = parse_rfc3339("end", &request.end_rfc3339)?;

        let mut query = HistoricalQuery::new(request.symbols.iter().cloned(), schema, start, end)?
            .with_stype_in(stype_in);

        if let Some(limit) = request.limit {
            let limit = usize::try_from(limit)
                .ok()
                .and_then(NonZeroUsize::new)
                .ok_or(QueryError::InvalidLimit(limit))?;
            query = query.with_limit(limit);
        }

        Ok(query)
    }

    /// Validate and run a client request.
    ///
    /// # Errors
    ///
    /// Validation failures are returned before the source is called.
    /// Source failures are returned as `QueryError::Source`; no partial
    /// results are produced.
    pub async fn execute(&self, request: &HistoricalRequest) -> Result<HistoricalResult, QueryError> {
        let query = Self::validate(request)?;
        self.fetch(&query).await
    }

    /// Run an already validated query.
    ///
    /// # Errors
    ///
    /// Returns `QueryError::Source` if the source fails.
    pub async fn fetch(&self, query: &HistoricalQuery) -> Result<HistoricalResult, QueryError> {
        let started = Instant::now();
        let schema = query.schema();

        let result = self.source.fetch_historical(query).await;
        metrics::record_historical_duration(schema, started.elapsed());

        let mut data = match result {
            Ok(data) => data,
            Err(err) => {
                metrics::record_historical_request(schema, err.kind());
                tracing::warn!(
                    source = self.source.name(),
                    schema = %schema,
                    error = %err,
                    "Historical fetch failed"
                );
                return Err(err.into());
            }
        };

        let returned = data.len();
        data.retain(|record| record.matches_schema(schema) && query.contains(record.event_time()));
        if !data.is_sorted_by_key(MarketRecord::event_time) {
            data.sort_by_key(MarketRecord::event_time);
        }
        if let Some(limit) = query.limit() {
            data.truncate(limit.get());
        }

        if data.len() != returned {
            tracing::debug!(returned, kept = data.len(), "Trimmed source records");
        }
        metrics::record_historical_request(schema, "ok");
        tracing::debug!(
            source = self.source.name(),
            schema = %schema,
            symbols = query.symbols().len(),
            records = data.len(),
            "Historical query served"
        );

        Ok(HistoricalResult { schema, data })
    }
}

fn parse_rfc3339(field: &'static str, value: &str) -> Result<UnixNanos, QueryError> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .and_then(|dt| dt.timestamp_nanos_opt())
        .ok_or_else(|| QueryError::InvalidTimestamp {
            field,
            value: value.to_string(),
        })
}

// =============================================================================
// Tests
// =============================================================================
