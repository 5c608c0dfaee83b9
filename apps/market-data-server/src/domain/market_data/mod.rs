//! Market Data Record Types
//!
//! Normalized, source-agnostic records shared by every producer and
//! consumer in the server.
//!
//! # Fixed-point prices
//!
//! Prices are `i64` values scaled by [`PRICE_SCALE`] (1e9), so `5000.25`
//! is stored as `5_000_250_000_000`. Timestamps are nanoseconds since the
//! Unix epoch ([`UnixNanos`]).

use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};

// =============================================================================
// Primitive Types
// =============================================================================

/// Fixed-point scale applied to every price (1e9).
pub const PRICE_SCALE: i64 = 1_000_000_000;

/// Nanoseconds since the Unix epoch.
pub type UnixNanos = i64;

/// An instrument symbol (e.g. `ES.FUT`).
pub type Symbol = String;

/// Nanoseconds per second.
pub const NANOS_PER_SECOND: i64 = 1_000_000_000;

/// Convert a decimal price into fixed-point representation.
///
/// Returns `None` if the scaled value does not fit in an `i64`.
#[must_use]
pub fn price_from_decimal(value: Decimal) -> Option<i64> {
    value
        .checked_mul(Decimal::from(PRICE_SCALE))?
        .round()
        .to_i64()
}

/// Convert a fixed-point price back into a decimal.
#[must_use]
pub fn price_to_decimal(price: i64) -> Decimal {
    Decimal::from_i128_with_scale(i128::from(price), 9).normalize()
}

// =============================================================================
// Schema
// =============================================================================

/// Record shape and aggregation granularity of a query or subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Schema {
    /// Individual trade prints.
    #[serde(rename = "trades")]
    Trades,
    /// One-second OHLCV bars.
    #[serde(rename = "ohlcv-1s")]
    Ohlcv1s,
    /// One-minute OHLCV bars.
    #[serde(rename = "ohlcv-1m")]
    Ohlcv1m,
}

impl Schema {
    /// Get all schemas.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[Self::Trades, Self::Ohlcv1s, Self::Ohlcv1m]
    }

    /// Wire name of the schema.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Trades => "trades",
            Self::Ohlcv1s => "ohlcv-1s",
            Self::Ohlcv1m => "ohlcv-1m",
        }
    }

    /// Bar period in nanoseconds, `None` for trades.
    #[must_use]
    pub const fn period_nanos(&self) -> Option<i64> {
        match self {
            Self::Trades => None,
            Self::Ohlcv1s => Some(NANOS_PER_SECOND),
            Self::Ohlcv1m => Some(60 * NANOS_PER_SECOND),
        }
    }

    /// Whether this schema carries bars.
    #[must_use]
    pub const fn is_bar(&self) -> bool {
        self.period_nanos().is_some()
    }
}

impl fmt::Display for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown schema name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid schema: {0}. Expected: trades, ohlcv-1s, or ohlcv-1m")]
pub struct ParseSchemaError(pub String);

impl FromStr for Schema {
    type Err = ParseSchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "trades" => Ok(Self::Trades),
            "ohlcv-1s" => Ok(Self::Ohlcv1s),
            "ohlcv-1m" => Ok(Self::Ohlcv1m),
            other => Err(ParseSchemaError(other.to_string())),
        }
    }
}

// =============================================================================
// Records
// =============================================================================

/// A single trade print.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriceTick {
    /// Event time (ns since epoch).
    pub event_time: UnixNanos,
    /// Instrument symbol.
    pub symbol: Symbol,
    /// Fixed-point price.
    pub price: i64,
    /// Trade size.
    pub size: u32,
}

/// An OHLCV bar. `event_time` is the closing boundary of the bar window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bar {
    /// Closing boundary of the window (ns since epoch).
    pub event_time: UnixNanos,
    /// Instrument symbol.
    pub symbol: Symbol,
    /// First trade price in the window.
    pub open: i64,
    /// Highest trade price in the window.
    pub high: i64,
    /// Lowest trade price in the window.
    pub low: i64,
    /// Last trade price in the window.
    pub close: i64,
    /// Total traded size in the window.
    pub volume: u64,
}

impl Bar {
    /// Check `low <= open, close <= high`.
    #[must_use]
    pub const fn is_consistent(&self) -> bool {
        self.low <= self.open
            && self.open <= self.high
            && self.low <= self.close
            && self.close <= self.high
    }
}

/// A normalized market data record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarketRecord {
    /// A trade print.
    Trade(PriceTick),
    /// An OHLCV bar.
    Bar(Bar),
}

impl MarketRecord {
    /// Event time of the record.
    #[must_use]
    pub const fn event_time(&self) -> UnixNanos {
        match self {
            Self::Trade(tick) => tick.event_time,
            Self::Bar(bar) => bar.event_time,
        }
    }

    /// Symbol of the record.
    #[must_use]
    pub fn symbol(&self) -> &str {
        match self {
            Self::Trade(tick) => &tick.symbol,
            Self::Bar(bar) => &bar.symbol,
        }
    }

    /// Whether the record has the shape `schema` asks for.
    ///
    /// Bars are not tagged with their period; a bar matches a bar schema
    /// when it closes on one of that schema's boundaries. A minute bar
    /// therefore also lands on a second boundary.
    #[must_use]
    pub const fn matches_schema(&self, schema: Schema) -> bool {
        match (self, schema.period_nanos()) {
            (Self::Trade(_), None) => true,
            (Self::Bar(bar), Some(period)) => bar.event_time.rem_euclid(period) == 0,
            _ => false,
        }
    }
}

impl From<PriceTick> for MarketRecord {
    fn from(tick: PriceTick) -> Self {
        Self::Trade(tick)
    }
}

impl From<Bar> for MarketRecord {
    fn from(bar: Bar) -> Self {
        Self::Bar(bar)
    }
}

// =============================================================================
// Tests
// =============================================================================
