//! Query Gateway Integration Tests
//!
//! Tests historical request validation and result shaping against the
//! synthetic source and a recording stub.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use market_data_server::{
    Bar, DataSource, DataSourceMode, HistoricalQuery, HistoricalRequest, LiveFeed, MarketRecord,
    PriceTick, QueryError, QueryGateway, Schema, SourceError, Symbol, SyntheticSource,
};

const JAN_1_2024: i64 = 1_704_067_200_000_000_000;
const SECOND: i64 = 1_000_000_000;

/// Returns canned records and counts calls.
struct StubSource {
    records: Vec<MarketRecord>,
    failure: Option<SourceError>,
    calls: AtomicUsize,
}

impl StubSource {
    fn returning(records: Vec<MarketRecord>) -> Arc<Self> {
        Arc::new(Self {
            records,
            failure: None,
            calls: AtomicUsize::new(0),
        })
    }

    fn failing(err: SourceError) -> Arc<Self> {
        Arc::new(Self {
            records: Vec::new(),
            failure: Some(err),
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DataSource for StubSource {
    fn kind(&self) -> DataSourceMode {
        DataSourceMode::Vendor
    }

    fn name(&self) -> &'static str {
        "stub"
    }

    async fn fetch_historical(
        &self,
        _query: &HistoricalQuery,
    ) -> Result<Vec<MarketRecord>, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.failure {
            Some(err) => Err(err.clone()),
            None => Ok(self.records.clone()),
        }
    }

    async fn open_live_stream(
        &self,
        _symbols: &[Symbol],
        _schema: Schema,
    ) -> Result<LiveFeed, SourceError> {
        Err(SourceError::Unsupported("stub has no live data".to_string()))
    }
}

fn request(schema: &str, start: &str, end: &str, limit: Option<i64>) -> HistoricalRequest {
    HistoricalRequest {
        symbols: vec!["ES.FUT".to_string()],
        schema: schema.to_string(),
        stype_in: "parent".to_string(),
        start_rfc3339: start.to_string(),
        end_rfc3339: end.to_string(),
        limit,
    }
}

fn trade(event_time: i64) -> MarketRecord {
    MarketRecord::Trade(PriceTick {
        event_time,
        symbol: "ES.FUT".to_string(),
        price: 5_000_000_000_000,
        size: 2,
    })
}

fn bar(event_time: i64) -> MarketRecord {
    MarketRecord::Bar(Bar {
        event_time,
        symbol: "ES.FUT".to_string(),
        open: 1,
        high: 2,
        low: 1,
        close: 2,
        volume: 3,
    })
}

// =============================================================================
// Synthetic Scenarios
// =============================================================================

#[tokio::test]
async fn es_trades_in_first_minute_of_2024() {
    let gateway = QueryGateway::new(Arc::new(SyntheticSource::with_seed(7)));
    let result = gateway
        .execute(&request(
            "trades",
            "2024-01-01T00:00:00Z",
            "2024-01-01T00:01:00Z",
            Some(5),
        ))
        .await
        .unwrap();

    assert_eq!(result.schema, Schema::Trades);
    assert!(!result.data.is_empty());
    assert!(result.data.len() <= 5);
    for record in &result.data {
        assert!(matches!(record, MarketRecord::Trade(_)));
        assert_eq!(record.symbol(), "ES.FUT");
        assert!((JAN_1_2024..JAN_1_2024 + 60 * SECOND).contains(&record.event_time()));
    }
    assert!(result.data.is_sorted_by_key(MarketRecord::event_time));
}

#[tokio::test]
async fn synthetic_bars_cover_the_window() {
    let gateway = QueryGateway::new(Arc::new(SyntheticSource::with_seed(7)));
    let result = gateway
        .execute(&request(
            "ohlcv-1s",
            "2024-01-01T00:00:00Z",
            "2024-01-01T00:05:00Z",
            None,
        ))
        .await
        .unwrap();

    assert_eq!(result.schema, Schema::Ohlcv1s);
    assert!(result.data.len() > 100);
    for record in &result.data {
        let MarketRecord::Bar(bar) = record else {
            panic!("expected bars only");
        };
        assert!(bar.is_consistent());
        assert_eq!(bar.event_time % SECOND, 0);
    }
}

#[tokio::test]
async fn minute_bars_include_the_bar_closing_at_start() {
    let gateway = QueryGateway::new(Arc::new(SyntheticSource::with_seed(11)));
    let result = gateway
        .execute(&request(
            "ohlcv-1m",
            "2024-01-01T00:00:00Z",
            "2024-01-01T00:05:00Z",
            None,
        ))
        .await
        .unwrap();

    let closes: Vec<i64> = result
        .data
        .iter()
        .map(|record| (record.event_time() - JAN_1_2024) / (60 * SECOND))
        .collect();
    assert_eq!(closes, vec![0, 1, 2, 3, 4]);
}

#[tokio::test]
async fn minute_bars_at_the_earliest_representable_time() {
    let gateway = QueryGateway::new(Arc::new(SyntheticSource::with_seed(3)));
    let result = gateway
        .execute(&request(
            "ohlcv-1m",
            "1677-09-21T00:12:44Z",
            "1677-09-21T00:20:00Z",
            None,
        ))
        .await
        .unwrap();

    assert!(!result.data.is_empty());
    for record in &result.data {
        assert!(record.matches_schema(Schema::Ohlcv1m));
        assert_eq!(record.event_time().rem_euclid(60 * SECOND), 0);
    }
}

#[tokio::test]
async fn unknown_synthetic_symbol_is_a_client_error() {
    let gateway = QueryGateway::new(Arc::new(SyntheticSource::with_seed(7)));
    let mut req = request("trades", "2024-01-01T00:00:00Z", "2024-01-01T00:01:00Z", None);
    req.symbols = vec!["ZZZ.FUT".to_string()];

    let err = gateway.execute(&req).await.unwrap_err();
    assert!(matches!(err, QueryError::Source(SourceError::Unsupported(_))));
    assert!(err.is_client_error());
}

// =============================================================================
// Validation
// =============================================================================

#[tokio::test]
async fn equal_bounds_fail_before_the_source_is_called() {
    let source = StubSource::returning(vec![trade(JAN_1_2024)]);
    let gateway = QueryGateway::new(source.clone());

    let err = gateway
        .execute(&request(
            "trades",
            "2024-01-01T00:00:00Z",
            "2024-01-01T00:00:00Z",
            None,
        ))
        .await
        .unwrap_err();

    assert_eq!(
        err,
        QueryError::Source(SourceError::InvalidRange {
            start: JAN_1_2024,
            end: JAN_1_2024,
        })
    );
    assert_eq!(source.calls(), 0);
}

#[tokio::test]
async fn invalid_requests_never_reach_the_source() {
    let source = StubSource::returning(Vec::new());
    let gateway = QueryGateway::new(source.clone());

    let bad = [
        request("trades", "2024-01-01T00:01:00Z", "2024-01-01T00:00:00Z", None),
        request("trades", "2024-01-01T00:00:00Z", "2024-01-01T00:01:00Z", Some(0)),
        request("mbp-10", "2024-01-01T00:00:00Z", "2024-01-01T00:01:00Z", None),
        request("trades", "2024-01-01", "2024-01-01T00:01:00Z", None),
    ];
    for req in &bad {
        let err = gateway.execute(req).await.unwrap_err();
        assert!(err.is_client_error(), "{err}");
    }

    let mut no_symbols = request("trades", "2024-01-01T00:00:00Z", "2024-01-01T00:01:00Z", None);
    no_symbols.symbols = vec!["  ".to_string()];
    assert_eq!(gateway.execute(&no_symbols).await.unwrap_err(), QueryError::EmptySymbols);

    let mut bad_stype = request("trades", "2024-01-01T00:00:00Z", "2024-01-01T00:01:00Z", None);
    bad_stype.stype_in = "isin".to_string();
    assert!(matches!(
        gateway.execute(&bad_stype).await,
        Err(QueryError::InvalidSymbology(_))
    ));

    assert_eq!(source.calls(), 0);
}

// =============================================================================
// Result Shaping
// =============================================================================

#[tokio::test]
async fn out_of_window_and_wrong_shape_records_are_dropped() {
    let source = StubSource::returning(vec![
        trade(JAN_1_2024 + 3 * SECOND),
        bar(JAN_1_2024 + SECOND),
        trade(JAN_1_2024 - SECOND),
        trade(JAN_1_2024 + 60 * SECOND),
        trade(JAN_1_2024 + SECOND),
    ]);
    let gateway = QueryGateway::new(source);

    let result = gateway
        .execute(&request(
            "trades",
            "2024-01-01T00:00:00Z",
            "2024-01-01T00:01:00Z",
            None,
        ))
        .await
        .unwrap();

    assert_eq!(
        result.data,
        vec![trade(JAN_1_2024 + SECOND), trade(JAN_1_2024 + 3 * SECOND)]
    );
}

#[tokio::test]
async fn second_bars_are_dropped_from_minute_queries() {
    let source = StubSource::returning(vec![
        bar(JAN_1_2024 + SECOND),
        bar(JAN_1_2024 + 60 * SECOND),
        bar(JAN_1_2024 + 61 * SECOND),
        trade(JAN_1_2024 + 90 * SECOND),
        bar(JAN_1_2024 + 120 * SECOND),
    ]);
    let gateway = QueryGateway::new(source);

    let result = gateway
        .execute(&request(
            "ohlcv-1m",
            "2024-01-01T00:00:00Z",
            "2024-01-01T00:05:00Z",
            None,
        ))
        .await
        .unwrap();

    assert_eq!(
        result.data,
        vec![bar(JAN_1_2024 + 60 * SECOND), bar(JAN_1_2024 + 120 * SECOND)]
    );
}

#[tokio::test]
async fn limit_is_applied_when_the_source_ignores_it() {
    let records = (0..20).map(|i| trade(JAN_1_2024 + i * SECOND)).collect();
    let gateway = QueryGateway::new(StubSource::returning(records));

    let result = gateway
        .execute(&request(
            "trades",
            "2024-01-01T00:00:00Z",
            "2024-01-01T00:01:00Z",
            Some(3),
        ))
        .await
        .unwrap();

    assert_eq!(
        result.data,
        vec![trade(JAN_1_2024), trade(JAN_1_2024 + SECOND), trade(JAN_1_2024 + 2 * SECOND)]
    );
}

#[tokio::test]
async fn upstream_failures_are_not_client_errors() {
    let gateway = QueryGateway::new(StubSource::failing(SourceError::Upstream(
        "HTTP 503".to_string(),
    )));

    let err = gateway
        .execute(&request(
            "ohlcv-1m",
            "2024-01-01T00:00:00Z",
            "2024-01-01T01:00:00Z",
            None,
        ))
        .await
        .unwrap_err();

    assert!(matches!(err, QueryError::Source(SourceError::Upstream(_))));
    assert!(!err.is_client_error());
}
