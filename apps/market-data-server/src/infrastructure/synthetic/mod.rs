//! Synthetic Data Source
//!
//! Generates plausible futures trades and bars without any network access.
//! Used when no vendor credentials are configured and throughout the tests.
//!
//! # Determinism
//!
//! Historical output depends only on the seed, the symbol and the query,
//! so the same query against the same seed returns the same records.
//! Live streams are paced by `tokio::time`, which lets tests drive them
//! under a paused clock.

mod generator;
mod instruments;

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use futures::stream::{self, BoxStream};

pub use generator::{TradeGenerator, fnv1a};
pub use instruments::Instrument;

use crate::application::ports::{DataSource, DataSourceMode, LiveFeed, SourceError};
use crate::domain::aggregation::BarAggregator;
use crate::domain::market_data::{MarketRecord, Schema, Symbol, UnixNanos};
use crate::domain::query::HistoricalQuery;
use crate::infrastructure::config::SyntheticSettings;

/// Shortest gap between generated historical trades.
const HISTORICAL_GAP_MIN: i64 = 20_000_000;

/// Longest gap between generated historical trades.
const HISTORICAL_GAP_MAX: i64 = 1_500_000_000;

// =============================================================================
// Configuration
// =============================================================================

/// Synthetic source configuration.
#[derive(Debug, Clone)]
pub struct SyntheticConfig {
    /// Base seed; random per process when unset.
    pub seed: Option<u64>,
    /// Shortest gap between live trades.
    pub min_interval: Duration,
    /// Longest gap between live trades.
    pub max_interval: Duration,
    /// Per-symbol cap on generated historical records.
    pub max_records: usize,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self::from(SyntheticSettings::default())
    }
}

impl From<SyntheticSettings> for SyntheticConfig {
    fn from(settings: SyntheticSettings) -> Self {
        Self {
            seed: settings.seed,
            min_interval: settings.min_interval,
            max_interval: settings.max_interval,
            max_records: settings.max_records,
        }
    }
}

// =============================================================================
// Source
// =============================================================================

/// Seeded random-walk data source.
#[derive(Debug)]
pub struct SyntheticSource {
    config: SyntheticConfig,
    seed: u64,
    live_streams: AtomicU64,
}

impl SyntheticSource {
    /// Create a synthetic source.
    #[must_use]
    pub fn new(config: SyntheticConfig) -> Self {
        let seed = config.seed.unwrap_or_else(rand::random);
        tracing::debug!(seed, "Synthetic source seeded");
        Self {
            config,
            seed,
            live_streams: AtomicU64::new(0),
        }
    }

    /// Create a source with a fixed seed and default pacing.
    #[must_use]
    pub fn with_seed(seed: u64) -> Self {
        Self::new(SyntheticConfig {
            seed: Some(seed),
            ..SyntheticConfig::default()
        })
    }

    /// Effective base seed.
    #[must_use]
    pub const fn seed(&self) -> u64 {
        self.seed
    }

    #[allow(clippy::cast_sign_loss)]
    fn historical_seed(&self, symbol: &str, query: &HistoricalQuery) -> u64 {
        self.seed ^ fnv1a(symbol.as_bytes()) ^ (query.start() as u64).rotate_left(17)
    }

    fn generate_symbol(
        &self,
        instrument: &'static Instrument,
        query: &HistoricalQuery,
        cap: usize,
    ) -> Result<Vec<MarketRecord>, SourceError> {
        let mut generator =
            TradeGenerator::new(instrument, self.historical_seed(instrument.symbol, query));
        let mut records = Vec::new();

        let Some(period) = query.schema().period_nanos() else {
            let mut t = query
                .start()
                .saturating_add(generator.gap(HISTORICAL_GAP_MIN, HISTORICAL_GAP_MAX));
            while t < query.end() && records.len() < cap {
                records.push(MarketRecord::Trade(generator.trade_at(t)));
                t = t.saturating_add(generator.gap(HISTORICAL_GAP_MIN, HISTORICAL_GAP_MAX));
            }
            return Ok(records);
        };

        // Bars are labelled by their closing boundary, so the first one in
        // range may be built from trades before `start`. Windows that open
        // or close outside the i64 range are never generated.
        let Some(first_close) = ceil_to(query.start(), period) else {
            return Ok(records);
        };
        let mut t = first_close.checked_sub(period).unwrap_or(first_close);
        let last_trade = query.end().min(i64::MAX - period);
        let mut aggregator =
            BarAggregator::new(query.schema()).map_err(|e| SourceError::Unsupported(e.to_string()))?;

        while t < last_trade && records.len() < cap {
            let trade = generator.trade_at(t);
            if let Some(bar) = aggregator
                .accumulate(&trade)
                .map_err(|e| SourceError::Upstream(e.to_string()))?
                && query.contains(bar.event_time)
            {
                records.push(MarketRecord::Bar(bar));
            }
            t = t.saturating_add(generator.gap(HISTORICAL_GAP_MIN, HISTORICAL_GAP_MAX));
        }

        if records.len() < cap {
            records.extend(
                aggregator
                    .flush()
                    .into_iter()
                    .filter(|bar| query.contains(bar.event_time))
                    .map(MarketRecord::Bar),
            );
        }

        Ok(records)
    }

    fn live_symbol_stream(
        &self,
        instrument: &'static Instrument,
        schema: Schema,
    ) -> Result<BoxStream<'static, Result<MarketRecord, SourceError>>, SourceError> {
        let stream_no = self.live_streams.fetch_add(1, Ordering::Relaxed);
        let seed = self.seed ^ fnv1a(instrument.symbol.as_bytes()) ^ stream_no.rotate_left(32);

        let aggregator = match schema {
            Schema::Trades => None,
            _ => Some(
                BarAggregator::new(schema).map_err(|e| SourceError::Unsupported(e.to_string()))?,
            ),
        };

        let state = LiveState {
            generator: TradeGenerator::new(instrument, seed),
            aggregator,
            origin_wall: Utc::now().timestamp_nanos_opt().unwrap_or_default(),
            origin: tokio::time::Instant::now(),
            last_time: i64::MIN,
            min_gap: duration_nanos(self.config.min_interval),
            max_gap: duration_nanos(self.config.max_interval),
        };

        Ok(stream::unfold(state, |mut state| async move {
            let record = state.next_record().await;
            Some((Ok(record), state))
        })
        .boxed())
    }
}

#[async_trait]
impl DataSource for SyntheticSource {
    fn kind(&self) -> DataSourceMode {
        DataSourceMode::Synthetic
    }

    fn name(&self) -> &'static str {
        "synthetic"
    }

    async fn fetch_historical(
        &self,
        query: &HistoricalQuery,
    ) -> Result<Vec<MarketRecord>, SourceError> {
        let instruments = query
            .symbols()
            .iter()
            .map(|symbol| {
                Instrument::lookup(symbol).ok_or_else(|| {
                    SourceError::Unsupported(format!("no synthetic instrument for {symbol}"))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let cap = query
            .limit()
            .map_or(self.config.max_records, |limit| {
                limit.get().min(self.config.max_records)
            });

        let mut records = Vec::new();
        for instrument in instruments {
            records.extend(self.generate_symbol(instrument, query, cap)?);
        }

        records.sort_by(|a, b| {
            a.event_time()
                .cmp(&b.event_time())
                .then_with(|| a.symbol().cmp(b.symbol()))
        });
        if let Some(limit) = query.limit() {
            records.truncate(limit.get());
        }

        tracing::debug!(
            schema = %query.schema(),
            symbols = query.symbols().len(),
            records = records.len(),
            "Synthetic historical records generated"
        );
        Ok(records)
    }

    async fn open_live_stream(
        &self,
        symbols: &[Symbol],
        schema: Schema,
    ) -> Result<LiveFeed, SourceError> {
        let instruments = symbols
            .iter()
            .map(|symbol| {
                Instrument::lookup(symbol).ok_or_else(|| SourceError::InvalidSymbol(symbol.clone()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        if instruments.is_empty() {
            return Err(SourceError::Unsupported(
                "at least one symbol is required".to_string(),
            ));
        }

        let streams = instruments
            .into_iter()
            .map(|instrument| {
                tracing::debug!(
                    symbol = instrument.symbol,
                    anchor = %instrument.anchor_decimal(),
                    schema = %schema,
                    "Synthetic live stream opened"
                );
                self.live_symbol_stream(instrument, schema)
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Box::pin(stream::select_all(streams)))
    }
}

// =============================================================================
// Live Generation
// =============================================================================

struct LiveState {
    generator: TradeGenerator,
    aggregator: Option<BarAggregator>,
    origin_wall: UnixNanos,
    origin: tokio::time::Instant,
    last_time: UnixNanos,
    min_gap: i64,
    max_gap: i64,
}

impl LiveState {
    async fn next_record(&mut self) -> MarketRecord {
        loop {
            let gap = self.generator.gap(self.min_gap, self.max_gap);
            tokio::time::sleep(Duration::from_nanos(gap.unsigned_abs())).await;

            let elapsed = duration_nanos(self.origin.elapsed());
            let event_time = (self.origin_wall + elapsed).max(self.last_time.saturating_add(1));
            self.last_time = event_time;

            let trade = self.generator.trade_at(event_time);
            let Some(aggregator) = self.aggregator.as_mut() else {
                return MarketRecord::Trade(trade);
            };

            // Event times only grow, so accumulate cannot see an older trade.
            if let Ok(Some(bar)) = aggregator.accumulate(&trade) {
                return MarketRecord::Bar(bar);
            }
        }
    }
}

fn duration_nanos(duration: Duration) -> i64 {
    i64::try_from(duration.as_nanos()).unwrap_or(i64::MAX)
}

const fn ceil_to(value: i64, period: i64) -> Option<i64> {
    let rem = value.rem_euclid(period);
    if rem == 0 {
        Some(value)
    } else {
        value.checked_add(period - rem)
    }
}

// =============================================================================
// Tests
// =============================================================================
