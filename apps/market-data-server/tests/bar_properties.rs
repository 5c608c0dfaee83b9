//! Property Tests
//!
//! Bar aggregation and historical result invariants over generated input.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::collections::BTreeSet;
use std::num::NonZeroUsize;

use proptest::prelude::*;

use market_data_server::{
    BarAggregator, DataSource, HistoricalQuery, MarketRecord, PriceTick, Schema, SyntheticSource,
};

const JAN_1_2024: i64 = 1_704_067_200_000_000_000;
const SECOND: i64 = 1_000_000_000;

fn bar_schema() -> impl Strategy<Value = Schema> {
    prop_oneof![Just(Schema::Ohlcv1s), Just(Schema::Ohlcv1m)]
}

/// Time-ordered trades for one symbol: (gap ns, price, size) steps.
fn trade_steps() -> impl Strategy<Value = Vec<(i64, i64, u32)>> {
    prop::collection::vec(
        (0..90 * SECOND, 1_000_000_000..10_000_000_000i64, 1..500u32),
        1..200,
    )
}

fn ticks(steps: &[(i64, i64, u32)]) -> Vec<PriceTick> {
    let mut t = JAN_1_2024;
    steps
        .iter()
        .map(|&(gap, price, size)| {
            t += gap;
            PriceTick {
                event_time: t,
                symbol: "CL.FUT".to_string(),
                price,
                size,
            }
        })
        .collect()
}

proptest! {
    #[test]
    fn bars_are_consistent_and_conserve_volume(schema in bar_schema(), steps in trade_steps()) {
        let period = schema.period_nanos().unwrap();
        let ticks = ticks(&steps);
        let mut aggregator = BarAggregator::new(schema).unwrap();

        let mut bars = Vec::new();
        for tick in &ticks {
            bars.extend(aggregator.accumulate(tick).unwrap());
        }
        bars.extend(aggregator.flush());

        let windows: BTreeSet<i64> = ticks.iter().map(|t| t.event_time.div_euclid(period)).collect();
        prop_assert_eq!(bars.len(), windows.len());

        let volume: u64 = bars.iter().map(|b| b.volume).sum();
        let traded: u64 = ticks.iter().map(|t| u64::from(t.size)).sum();
        prop_assert_eq!(volume, traded);

        let min_price = ticks.iter().map(|t| t.price).min().unwrap();
        let max_price = ticks.iter().map(|t| t.price).max().unwrap();
        for pair in bars.windows(2) {
            prop_assert!(pair[0].event_time < pair[1].event_time);
        }
        for bar in &bars {
            prop_assert!(bar.is_consistent());
            prop_assert_eq!(bar.event_time % period, 0);
            prop_assert!(bar.low >= min_price && bar.high <= max_price);
        }
    }

    #[test]
    fn late_trades_never_corrupt_the_open_window(steps in trade_steps(), back in 1..SECOND) {
        let ticks = ticks(&steps);
        let mut aggregator = BarAggregator::new(Schema::Ohlcv1s).unwrap();
        for tick in &ticks {
            aggregator.accumulate(tick).unwrap();
        }

        let last = ticks.last().unwrap();
        let window_start = last.event_time.div_euclid(SECOND) * SECOND;
        let late = PriceTick {
            event_time: window_start - back,
            price: 1,
            ..last.clone()
        };
        prop_assert!(aggregator.accumulate(&late).is_err());

        let bars = aggregator.flush();
        prop_assert_eq!(bars.len(), 1);
        prop_assert!(bars[0].low > 1);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn synthetic_history_is_ordered_bounded_and_limited(
        seed in any::<u64>(),
        schema in prop_oneof![Just(Schema::Trades), Just(Schema::Ohlcv1s), Just(Schema::Ohlcv1m)],
        offset_secs in 0..86_400i64,
        span_secs in 1..1_800i64,
        limit in prop::option::of(1..400usize),
    ) {
        let start = JAN_1_2024 + offset_secs * SECOND;
        let end = start + span_secs * SECOND;
        let mut query = HistoricalQuery::new(["ES.FUT", "GC.FUT"], schema, start, end).unwrap();
        if let Some(limit) = limit {
            query = query.with_limit(NonZeroUsize::new(limit).unwrap());
        }

        let source = SyntheticSource::with_seed(seed);
        let records = tokio_test::block_on(source.fetch_historical(&query)).unwrap();

        if let Some(limit) = limit {
            prop_assert!(records.len() <= limit);
        }
        prop_assert!(records.is_sorted_by_key(MarketRecord::event_time));
        for record in &records {
            prop_assert!(record.matches_schema(schema));
            prop_assert!(query.contains(record.event_time()));
            if let MarketRecord::Bar(bar) = record {
                prop_assert!(bar.is_consistent());
            }
        }
    }
}
