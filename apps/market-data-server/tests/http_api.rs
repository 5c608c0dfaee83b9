//! HTTP API Integration Tests
//!
//! Drives the router with `tower::ServiceExt::oneshot` over a synthetic
//! source, and runs one live WebSocket session against a bound server.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use market_data_server::infrastructure::http::LiveMessage;
use market_data_server::{
    AppState, HttpServer, MultiplexerConfig, QueryGateway, Schema, SharedDataSource,
    StreamMultiplexer, SyntheticSource, create_router,
};

fn app_state(shutdown: CancellationToken) -> AppState {
    let source: SharedDataSource = Arc::new(SyntheticSource::with_seed(42));
    let gateway = QueryGateway::new(Arc::clone(&source));
    let multiplexer = StreamMultiplexer::new(Arc::clone(&source), MultiplexerConfig::default());
    AppState::new(&source, gateway, multiplexer, shutdown)
}

async fn post_historical(state: AppState, body: &str) -> (StatusCode, Value) {
    let response = create_router(state)
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/historical")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&body).unwrap())
}

async fn get_text(state: AppState, uri: &str) -> (StatusCode, String) {
    let response = create_router(state)
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();

    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, String::from_utf8(body.to_vec()).unwrap())
}

// =============================================================================
// Historical
// =============================================================================

#[tokio::test]
async fn historical_trades_envelope() {
    let body = json!({
        "symbols": ["ES.FUT"],
        "schema": "trades",
        "start_rfc3339": "2024-01-01T00:00:00Z",
        "end_rfc3339": "2024-01-01T00:01:00Z",
        "limit": 5
    });
    let (status, json) = post_historical(app_state(CancellationToken::new()), &body.to_string()).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["schema"], "trades");
    let data = json["data"].as_array().unwrap();
    assert!(!data.is_empty() && data.len() <= 5);

    let mut last = 0;
    for record in data {
        assert_eq!(record["symbol"], "ES.FUT");
        let ts = record["ts_event_unix_ns"].as_i64().unwrap();
        assert!(ts >= last);
        last = ts;
        assert!(record["price_i64"].as_i64().unwrap() > 0);
        assert!(record["size_u32"].as_u64().unwrap() > 0);
    }
}

#[tokio::test]
async fn historical_bars_envelope() {
    let body = json!({
        "symbols": ["NQ.FUT"],
        "schema": "ohlcv-1m",
        "stype_in": "parent",
        "start_rfc3339": "2024-01-02T14:30:00Z",
        "end_rfc3339": "2024-01-02T15:00:00Z"
    });
    let (status, json) = post_historical(app_state(CancellationToken::new()), &body.to_string()).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["schema"], "ohlcv-1m");
    for bar in json["data"].as_array().unwrap() {
        let low = bar["low_i64"].as_i64().unwrap();
        let high = bar["high_i64"].as_i64().unwrap();
        assert!(low <= bar["open_i64"].as_i64().unwrap());
        assert!(bar["close_i64"].as_i64().unwrap() <= high);
    }
}

#[tokio::test]
async fn equal_bounds_are_rejected() {
    let body = json!({
        "symbols": ["ES.FUT"],
        "schema": "trades",
        "start_rfc3339": "2024-01-01T00:00:00Z",
        "end_rfc3339": "2024-01-01T00:00:00Z"
    });
    let (status, json) = post_historical(app_state(CancellationToken::new()), &body.to_string()).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["code"], 400);
    assert!(json["error"].as_str().unwrap().contains("invalid range"));
}

#[tokio::test]
async fn unknown_schema_is_rejected() {
    let body = json!({
        "symbols": ["ES.FUT"],
        "schema": "mbo",
        "start_rfc3339": "2024-01-01T00:00:00Z",
        "end_rfc3339": "2024-01-01T00:01:00Z"
    });
    let (status, json) = post_historical(app_state(CancellationToken::new()), &body.to_string()).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["code"], 400);
}

#[tokio::test]
async fn malformed_body_is_rejected() {
    let (status, json) = post_historical(app_state(CancellationToken::new()), "{\"symbols\":").await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["code"], 400);
    assert!(!json["error"].as_str().unwrap().is_empty());
}

// =============================================================================
// Health
// =============================================================================

#[tokio::test]
async fn plain_health_endpoints() {
    let shutdown = CancellationToken::new();

    assert_eq!(
        get_text(app_state(shutdown.clone()), "/api/health").await,
        (StatusCode::OK, "ok".to_string())
    );
    assert_eq!(
        get_text(app_state(shutdown.clone()), "/healthz").await,
        (StatusCode::OK, "OK".to_string())
    );
    assert_eq!(
        get_text(app_state(shutdown.clone()), "/readyz").await,
        (StatusCode::OK, "READY".to_string())
    );

    shutdown.cancel();
    assert_eq!(
        get_text(app_state(shutdown), "/readyz").await,
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY".to_string())
    );
}

#[tokio::test]
async fn health_reports_source_and_streams() {
    let (status, body) = get_text(app_state(CancellationToken::new()), "/health").await;
    let json: Value = serde_json::from_str(&body).unwrap();

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["source"], "synthetic");
    assert_eq!(json["mode"], "synthetic");
    assert_eq!(json["active_subscriptions"], 0);
    assert_eq!(json["upstream_feeds"], 0);
    assert_eq!(json["queue_capacity"], 1024);
    for schema in ["trades", "ohlcv-1s", "ohlcv-1m"] {
        assert_eq!(json["streams"][schema]["symbol_count"], 0);
        assert_eq!(json["streams"][schema]["subscriber_count"], 0);
    }
}

// =============================================================================
// Live
// =============================================================================

async fn next_message<S>(ws: &mut S) -> LiveMessage
where
    S: futures::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("socket closed")
            .unwrap();
        if let Message::Text(text) = frame {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

#[tokio::test]
async fn live_session_streams_trades_and_releases_the_feed() {
    let shutdown = CancellationToken::new();
    let state = app_state(shutdown.clone());
    let multiplexer = state.multiplexer().clone();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = HttpServer::new(addr, state, shutdown.clone());
    let server_task = tokio::spawn(server.serve(listener));

    let url = format!("ws://{addr}/ws/live?symbols=ES.FUT&schema=trades");
    let (mut ws, _response) = tokio_tungstenite::connect_async(url).await.unwrap();

    assert_eq!(
        next_message(&mut ws).await,
        LiveMessage::Connected {
            symbols: vec!["ES.FUT".to_string()],
            schema: Schema::Trades,
        }
    );
    let LiveMessage::Trade(trade) = next_message(&mut ws).await else {
        panic!("expected a trade");
    };
    assert_eq!(trade.symbol, "ES.FUT");
    assert_eq!(multiplexer.upstream_feed_count(), 1);
    let streams = multiplexer.subscription_stats();
    assert_eq!(streams.trades.symbol_count, 1);
    assert_eq!(streams.trades.subscriber_count, 1);
    assert_eq!(streams.feed_count(), 1);

    ws.close(None).await.unwrap();
    for _ in 0..100 {
        if multiplexer.active_subscriptions() == 0 && multiplexer.upstream_feed_count() == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(multiplexer.active_subscriptions(), 0);
    assert_eq!(multiplexer.upstream_feed_count(), 0);
    assert_eq!(multiplexer.subscription_stats().feed_count(), 0);

    shutdown.cancel();
    server_task.await.unwrap().unwrap();
}

#[tokio::test]
async fn live_session_rejects_unknown_schema() {
    let shutdown = CancellationToken::new();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = HttpServer::new(addr, app_state(shutdown.clone()), shutdown.clone());
    let server_task = tokio::spawn(server.serve(listener));

    let url = format!("ws://{addr}/ws/live?schema=mbp-1");
    let (mut ws, _response) = tokio_tungstenite::connect_async(url).await.unwrap();

    assert!(matches!(next_message(&mut ws).await, LiveMessage::Error { .. }));

    shutdown.cancel();
    server_task.await.unwrap().unwrap();
}
