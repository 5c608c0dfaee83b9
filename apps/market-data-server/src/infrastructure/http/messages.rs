//! Wire messages for the HTTP and WebSocket API.
//!
//! Field names carry their units (`_unix_ns`, `_i64` for fixed-point
//! prices at 1e9, `_u32`/`_u64` for quantities) so clients never have to
//! guess a scale.

use serde::{Deserialize, Serialize};

use crate::application::services::{HistoricalResult, StreamError, StreamEvent};
use crate::domain::market_data::{Bar, MarketRecord, PriceTick, Schema, Symbol, UnixNanos};

// =============================================================================
// Records
// =============================================================================

/// A trade on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeRecord {
    /// Event time, ns since epoch.
    pub ts_event_unix_ns: UnixNanos,
    /// Symbol.
    pub symbol: Symbol,
    /// Fixed-point price.
    pub price_i64: i64,
    /// Quantity.
    pub size_u32: u32,
}

impl From<&PriceTick> for TradeRecord {
    fn from(tick: &PriceTick) -> Self {
        Self {
            ts_event_unix_ns: tick.event_time,
            symbol: tick.symbol.clone(),
            price_i64: tick.price,
            size_u32: tick.size,
        }
    }
}

impl From<TradeRecord> for PriceTick {
    fn from(record: TradeRecord) -> Self {
        Self {
            event_time: record.ts_event_unix_ns,
            symbol: record.symbol,
            price: record.price_i64,
            size: record.size_u32,
        }
    }
}

/// An OHLCV bar on the wire. The timestamp is the bar's close boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OhlcvRecord {
    /// Bar close boundary, ns since epoch.
    pub ts_event_unix_ns: UnixNanos,
    /// Symbol.
    pub symbol: Symbol,
    /// Fixed-point open.
    pub open_i64: i64,
    /// Fixed-point high.
    pub high_i64: i64,
    /// Fixed-point low.
    pub low_i64: i64,
    /// Fixed-point close.
    pub close_i64: i64,
    /// Traded volume.
    pub volume_u64: u64,
}

impl From<&Bar> for OhlcvRecord {
    fn from(bar: &Bar) -> Self {
        Self {
            ts_event_unix_ns: bar.event_time,
            symbol: bar.symbol.clone(),
            open_i64: bar.open,
            high_i64: bar.high,
            low_i64: bar.low,
            close_i64: bar.close,
            volume_u64: bar.volume,
        }
    }
}

impl From<OhlcvRecord> for Bar {
    fn from(record: OhlcvRecord) -> Self {
        Self {
            event_time: record.ts_event_unix_ns,
            symbol: record.symbol,
            open: record.open_i64,
            high: record.high_i64,
            low: record.low_i64,
            close: record.close_i64,
            volume: record.volume_u64,
        }
    }
}

// =============================================================================
// Historical
// =============================================================================

/// Historical response, tagged by schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "schema")]
pub enum HistoricalResponse {
    /// Trades.
    #[serde(rename = "trades")]
    Trades {
        /// Records.
        data: Vec<TradeRecord>,
    },
    /// One-second bars.
    #[serde(rename = "ohlcv-1s")]
    Ohlcv1s {
        /// Records.
        data: Vec<OhlcvRecord>,
    },
    /// One-minute bars.
    #[serde(rename = "ohlcv-1m")]
    Ohlcv1m {
        /// Records.
        data: Vec<OhlcvRecord>,
    },
}

impl HistoricalResponse {
    /// Number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Trades { data } => data.len(),
            Self::Ohlcv1s { data } | Self::Ohlcv1m { data } => data.len(),
        }
    }

    /// Whether the response carries no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn bars(data: &[MarketRecord]) -> Vec<OhlcvRecord> {
    data.iter()
        .filter_map(|record| match record {
            MarketRecord::Bar(bar) => Some(OhlcvRecord::from(bar)),
            MarketRecord::Trade(_) => None,
        })
        .collect()
}

impl From<&HistoricalResult> for HistoricalResponse {
    fn from(result: &HistoricalResult) -> Self {
        match result.schema {
            Schema::Trades => Self::Trades {
                data: result
                    .data
                    .iter()
                    .filter_map(|record| match record {
                        MarketRecord::Trade(tick) => Some(TradeRecord::from(tick)),
                        MarketRecord::Bar(_) => None,
                    })
                    .collect(),
            },
            Schema::Ohlcv1s => Self::Ohlcv1s {
                data: bars(&result.data),
            },
            Schema::Ohlcv1m => Self::Ohlcv1m {
                data: bars(&result.data),
            },
        }
    }
}

// =============================================================================
// Live
// =============================================================================

/// A WebSocket text frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LiveMessage {
    /// Subscription acknowledged.
    Connected {
        /// Resolved symbols.
        symbols: Vec<Symbol>,
        /// Active schema.
        schema: Schema,
    },
    /// A trade.
    Trade(TradeRecord),
    /// A bar.
    Ohlcv(OhlcvRecord),
    /// Backpressure notice, upstream failure or rejected subscription.
    Error {
        /// Human-readable description.
        message: String,
    },
}

impl LiveMessage {
    /// Error frame from any displayable error.
    pub fn error(err: impl std::fmt::Display) -> Self {
        Self::Error {
            message: err.to_string(),
        }
    }
}

impl From<&MarketRecord> for LiveMessage {
    fn from(record: &MarketRecord) -> Self {
        match record {
            MarketRecord::Trade(tick) => Self::Trade(tick.into()),
            MarketRecord::Bar(bar) => Self::Ohlcv(bar.into()),
        }
    }
}

impl From<&StreamError> for LiveMessage {
    fn from(err: &StreamError) -> Self {
        Self::error(err)
    }
}

impl From<StreamEvent> for LiveMessage {
    fn from(event: StreamEvent) -> Self {
        match event {
            StreamEvent::Connected { symbols, schema } => Self::Connected { symbols, schema },
            StreamEvent::Record(record) => (&record).into(),
            StreamEvent::Error(err) => (&err).into(),
        }
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Error body for non-2xx responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Human-readable description.
    pub error: String,
    /// HTTP status code.
    pub code: u16,
}

// =============================================================================
// Tests
// =============================================================================
