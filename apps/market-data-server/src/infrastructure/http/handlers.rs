//! Route handlers.

use std::time::Duration;

use axum::{
    Json,
    extract::{
        Query, State,
        rejection::JsonRejection,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::Instrument;
use uuid::Uuid;

use super::AppState;
use super::messages::{ErrorResponse, HistoricalResponse, LiveMessage};
use crate::application::services::{HistoricalRequest, QueryError};
use crate::domain::market_data::{Schema, Symbol};
use crate::domain::subscription::TotalSubscriptionStats;
use crate::infrastructure::metrics::get_metrics_handle;

/// Symbol used when a live client names none.
pub const DEFAULT_LIVE_SYMBOL: &str = "ES.FUT";

// =============================================================================
// Errors
// =============================================================================

/// API error rendered as `{ error, code }`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    /// Create a bad request error.
    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    /// Status code of the response.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<QueryError> for ApiError {
    fn from(err: QueryError) -> Self {
        let status = if err.is_client_error() {
            StatusCode::BAD_REQUEST
        } else {
            StatusCode::BAD_GATEWAY
        };
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorResponse {
            error: self.message,
            code: self.status.as_u16(),
        };
        (self.status, Json(body)).into_response()
    }
}

// =============================================================================
// Historical
// =============================================================================

/// `POST /api/historical`
pub async fn historical(
    State(state): State<AppState>,
    payload: Result<Json<HistoricalRequest>, JsonRejection>,
) -> Result<Json<HistoricalResponse>, ApiError> {
    let Json(request) = payload.map_err(|rejection| ApiError::bad_request(rejection.body_text()))?;

    tracing::info!(
        symbols = ?request.symbols,
        schema = %request.schema,
        start = %request.start_rfc3339,
        end = %request.end_rfc3339,
        limit = ?request.limit,
        "Historical request"
    );

    let result = state.gateway.execute(&request).await.map_err(|err| {
        tracing::warn!(error = %err, "Historical request failed");
        ApiError::from(err)
    })?;

    Ok(Json(HistoricalResponse::from(&result)))
}

// =============================================================================
// Live
// =============================================================================

/// Query parameters of `GET /ws/live`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LiveParams {
    /// Comma-separated symbols.
    pub symbols: Option<String>,
    /// Schema name.
    pub schema: Option<String>,
}

impl LiveParams {
    /// Requested symbols, defaulting to [`DEFAULT_LIVE_SYMBOL`].
    #[must_use]
    pub fn symbols(&self) -> Vec<Symbol> {
        let symbols: Vec<Symbol> = self
            .symbols
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(ToString::to_string)
            .collect();
        if symbols.is_empty() {
            vec![DEFAULT_LIVE_SYMBOL.to_string()]
        } else {
            symbols
        }
    }

    /// Requested schema, defaulting to trades.
    ///
    /// # Errors
    ///
    /// Returns the parse error message for an unknown schema.
    pub fn schema(&self) -> Result<Schema, String> {
        self.schema
            .as_deref()
            .map_or(Ok(Schema::Trades), |raw| {
                raw.parse::<Schema>().map_err(|e| e.to_string())
            })
    }
}

/// `GET /ws/live`
pub async fn live(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(params): Query<LiveParams>,
) -> Response {
    let session_id = Uuid::new_v4();
    let span = tracing::info_span!("live_session", %session_id);
    ws.on_upgrade(move |socket| live_session(socket, state, params).instrument(span))
}

async fn live_session(socket: WebSocket, state: AppState, params: LiveParams) {
    let (mut sender, mut receiver) = socket.split();

    let schema = match params.schema() {
        Ok(schema) => schema,
        Err(message) => {
            tracing::info!(error = %message, "Rejected live subscription");
            let _ = send(&mut sender, &LiveMessage::Error { message }).await;
            let _ = sender.close().await;
            return;
        }
    };
    let symbols = params.symbols();

    let mut handle = match state.multiplexer.subscribe(&symbols, schema).await {
        Ok(handle) => handle,
        Err(err) => {
            tracing::info!(error = %err, symbols = ?symbols, "Rejected live subscription");
            let _ = send(&mut sender, &LiveMessage::error(&err)).await;
            let _ = sender.close().await;
            return;
        }
    };

    tracing::info!(
        subscription_id = handle.id(),
        symbols = ?handle.symbols(),
        schema = %schema,
        "Live session opened"
    );

    loop {
        tokio::select! {
            () = state.shutdown.cancelled() => {
                tracing::debug!("Shutting down live session");
                break;
            }
            incoming = receiver.next() => match incoming {
                None | Some(Err(_) | Ok(Message::Close(_))) => break,
                Some(Ok(_)) => {}
            },
            event = handle.next() => {
                let Some(event) = event else { break };
                if send(&mut sender, &LiveMessage::from(event)).await.is_err() {
                    break;
                }
            }
        }
    }

    tracing::info!(
        subscription_id = handle.id(),
        dropped_events = handle.dropped_events(),
        "Live session closed"
    );
    drop(handle);
    let _ = sender.close().await;
}

async fn send<S>(sender: &mut S, message: &LiveMessage) -> Result<(), axum::Error>
where
    S: futures::Sink<Message, Error = axum::Error> + Unpin,
{
    match serde_json::to_string(message) {
        Ok(json) => sender.send(Message::Text(json.into())).await,
        Err(err) => {
            tracing::error!(error = %err, "Failed to encode live message");
            Ok(())
        }
    }
}

// =============================================================================
// Health
// =============================================================================

/// JSON body of `GET /health`.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// `healthy`, or `shutting_down` once shutdown began.
    pub status: &'static str,
    /// Server version.
    pub version: String,
    /// Active data source.
    pub source: &'static str,
    /// Data source mode.
    pub mode: String,
    /// Seconds since start.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Open live subscriptions.
    pub active_subscriptions: usize,
    /// Open upstream feeds.
    pub upstream_feeds: usize,
    /// Per-subscriber queue capacity.
    pub queue_capacity: usize,
    /// Open feeds and holders per schema.
    pub streams: TotalSubscriptionStats,
}

/// `GET /api/health`
pub async fn api_health() -> &'static str {
    "ok"
}

/// `GET /healthz`
pub async fn liveness() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// `GET /readyz`
pub async fn readiness(State(state): State<AppState>) -> impl IntoResponse {
    if state.shutdown.is_cancelled() {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    } else {
        (StatusCode::OK, "READY")
    }
}

/// `GET /health`
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(build_health_response(&state))
}

fn build_health_response(state: &AppState) -> HealthResponse {
    let uptime: Duration = state.started_at.elapsed();
    HealthResponse {
        status: if state.shutdown.is_cancelled() {
            "shutting_down"
        } else {
            "healthy"
        },
        version: state.version.clone(),
        source: state.source_name,
        mode: state.mode.to_string(),
        uptime_secs: uptime.as_secs(),
        current_time: Utc::now(),
        active_subscriptions: state.multiplexer.active_subscriptions(),
        upstream_feeds: state.multiplexer.upstream_feed_count(),
        queue_capacity: state.multiplexer.queue_capacity(),
        streams: state.multiplexer.subscription_stats(),
    }
}

/// `GET /metrics`
pub async fn metrics() -> impl IntoResponse {
    get_metrics_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                handle.render(),
            )
        },
    )
}
