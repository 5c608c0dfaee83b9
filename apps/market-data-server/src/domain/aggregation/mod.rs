//! Trade to OHLCV Aggregation
//!
//! Folds a stream of trades into fixed-period bars. Windows are aligned to
//! multiples of the period since the epoch; the emitted bar's `event_time`
//! is the window's closing boundary.
//!
//! The first trade in a window sets open/high/low/close, later trades widen
//! high/low and move close, and volume accumulates. A bar is emitted when a
//! trade lands at or beyond the current window's end, which also opens the
//! next window. Windows without trades produce no bar.

use std::collections::HashMap;

use super::market_data::{Bar, PriceTick, Schema, Symbol, UnixNanos};

/// Aggregation errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AggregationError {
    /// The schema has no bar period.
    #[error("schema {0} is not a bar schema")]
    NotABarSchema(Schema),

    /// A trade arrived before the window currently being built.
    #[error("trade for {symbol} at {event_time} precedes open window starting at {window_start}")]
    OutOfOrder {
        /// Trade symbol.
        symbol: Symbol,
        /// Trade event time.
        event_time: UnixNanos,
        /// Start of the open window.
        window_start: UnixNanos,
    },
}

#[derive(Debug, Clone)]
struct WindowBuilder {
    start: UnixNanos,
    end: UnixNanos,
    open: i64,
    high: i64,
    low: i64,
    close: i64,
    volume: u64,
}

impl WindowBuilder {
    fn open_with(tick: &PriceTick, period: i64) -> Self {
        let start = tick.event_time.div_euclid(period) * period;
        Self {
            start,
            end: start + period,
            open: tick.price,
            high: tick.price,
            low: tick.price,
            close: tick.price,
            volume: u64::from(tick.size),
        }
    }

    fn add(&mut self, tick: &PriceTick) {
        self.high = self.high.max(tick.price);
        self.low = self.low.min(tick.price);
        self.close = tick.price;
        self.volume += u64::from(tick.size);
    }

    fn build(&self, symbol: &str) -> Bar {
        Bar {
            event_time: self.end,
            symbol: symbol.to_string(),
            open: self.open,
            high: self.high,
            low: self.low,
            close: self.close,
            volume: self.volume,
        }
    }
}

/// Per-symbol bar aggregator for one bar schema.
#[derive(Debug, Clone)]
pub struct BarAggregator {
    schema: Schema,
    period: i64,
    windows: HashMap<Symbol, WindowBuilder>,
}

impl BarAggregator {
    /// Create an aggregator for a bar schema.
    ///
    /// # Errors
    ///
    /// Returns `AggregationError::NotABarSchema` for [`Schema::Trades`].
    pub fn new(schema: Schema) -> Result<Self, AggregationError> {
        let period = schema
            .period_nanos()
            .ok_or(AggregationError::NotABarSchema(schema))?;
        Ok(Self {
            schema,
            period,
            windows: HashMap::new(),
        })
    }

    /// Schema this aggregator produces.
    #[must_use]
    pub const fn schema(&self) -> Schema {
        self.schema
    }

    /// Add a trade, returning the bar it closed, if any.
    ///
    /// # Errors
    ///
    /// Returns `AggregationError::OutOfOrder` if the trade is older than the
    /// symbol's open window. The aggregator state is left unchanged.
    pub fn accumulate(&mut self, tick: &PriceTick) -> Result<Option<Bar>, AggregationError> {
        let Some(window) = self.windows.get_mut(&tick.symbol) else {
            self.windows.insert(
                tick.symbol.clone(),
                WindowBuilder::open_with(tick, self.period),
            );
            return Ok(None);
        };

        if tick.event_time < window.start {
            return Err(AggregationError::OutOfOrder {
                symbol: tick.symbol.clone(),
                event_time: tick.event_time,
                window_start: window.start,
            });
        }

        if tick.event_time < window.end {
            window.add(tick);
            return Ok(None);
        }

        let closed = window.build(&tick.symbol);
        *window = WindowBuilder::open_with(tick, self.period);
        Ok(Some(closed))
    }

    /// Close every open window, returning the partial bars sorted by time.
    pub fn flush(&mut self) -> Vec<Bar> {
        let mut bars: Vec<Bar> = self
            .windows
            .drain()
            .map(|(symbol, window)| window.build(&symbol))
            .collect();
        bars.sort_by(|a, b| {
            a.event_time
                .cmp(&b.event_time)
                .then_with(|| a.symbol.cmp(&b.symbol))
        });
        bars
    }
}

// =============================================================================
// Tests
// =============================================================================
