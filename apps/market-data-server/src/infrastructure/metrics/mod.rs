//! Prometheus Metrics Module
//!
//! Exposes server metrics in Prometheus format.
//!
//! # Metrics Categories
//!
//! - **Historical**: request outcomes and fetch latency per schema
//! - **Streaming**: events delivered and dropped, backpressure notices
//! - **Subscriptions**: active subscriptions and open upstream feeds
//! - **Errors**: upstream feed failures and rejected subscriptions
//!
//! # Integration
//!
//! Metrics are rendered at `GET /metrics` on the HTTP server. Recording
//! before [`init_metrics`] is a no-op.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

use crate::domain::market_data::Schema;

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// Subsequent calls return the handle installed by the first one.
///
/// # Errors
///
/// Returns an error if the global recorder cannot be installed.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "market_data_historical_requests_total",
        "Historical requests by schema and outcome"
    );
    describe_histogram!(
        "market_data_historical_fetch_seconds",
        "Time spent fetching historical records from the data source"
    );

    describe_counter!(
        "market_data_events_delivered_total",
        "Live records enqueued to subscribers"
    );
    describe_counter!(
        "market_data_events_dropped_total",
        "Live records dropped because a subscriber queue was full"
    );
    describe_counter!(
        "market_data_backpressure_notices_total",
        "Backpressure notices issued to subscribers"
    );

    describe_gauge!(
        "market_data_active_subscriptions",
        "Number of open live subscriptions"
    );
    describe_gauge!(
        "market_data_upstream_feeds",
        "Number of open upstream (schema, symbol) feeds"
    );

    describe_counter!(
        "market_data_upstream_failures_total",
        "Upstream feeds terminated by a source error"
    );
    describe_counter!(
        "market_data_subscriptions_rejected_total",
        "Subscriptions rejected while opening"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Record a historical request outcome (`ok` or a source error kind).
pub fn record_historical_request(schema: Schema, outcome: &'static str) {
    counter!(
        "market_data_historical_requests_total",
        "schema" => schema.as_str(),
        "outcome" => outcome
    )
    .increment(1);
}

/// Record historical fetch duration.
pub fn record_historical_duration(schema: Schema, duration: Duration) {
    histogram!(
        "market_data_historical_fetch_seconds",
        "schema" => schema.as_str()
    )
    .record(duration.as_secs_f64());
}

/// Record records enqueued to subscribers.
pub fn record_events_delivered(schema: Schema, count: u64) {
    counter!(
        "market_data_events_delivered_total",
        "schema" => schema.as_str()
    )
    .increment(count);
}

/// Record records dropped for full queues.
pub fn record_events_dropped(schema: Schema, count: u64) {
    counter!(
        "market_data_events_dropped_total",
        "schema" => schema.as_str()
    )
    .increment(count);
}

/// Record a backpressure notice.
pub fn record_backpressure_notice(schema: Schema) {
    counter!(
        "market_data_backpressure_notices_total",
        "schema" => schema.as_str()
    )
    .increment(1);
}

/// Update the open subscription count.
#[allow(clippy::cast_precision_loss)]
pub fn set_active_subscriptions(count: usize) {
    gauge!("market_data_active_subscriptions").set(count as f64);
}

/// Update the open upstream feed count.
#[allow(clippy::cast_precision_loss)]
pub fn set_upstream_feeds(count: usize) {
    gauge!("market_data_upstream_feeds").set(count as f64);
}

/// Record an upstream feed failure.
pub fn record_upstream_failure(schema: Schema) {
    counter!(
        "market_data_upstream_failures_total",
        "schema" => schema.as_str()
    )
    .increment(1);
}

/// Record a rejected subscription.
pub fn record_subscription_rejected(schema: Schema, reason: &'static str) {
    counter!(
        "market_data_subscriptions_rejected_total",
        "schema" => schema.as_str(),
        "reason" => reason
    )
    .increment(1);
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_without_recorder_is_noop() {
        record_historical_request(Schema::Trades, "ok");
        record_events_delivered(Schema::Ohlcv1s, 3);
        set_active_subscriptions(2);
    }

    #[test]
    fn init_is_idempotent() {
        let first = init_metrics().unwrap();
        let second = init_metrics().unwrap();
        record_upstream_failure(Schema::Ohlcv1m);
        let rendered = second.render();
        assert!(rendered.contains("market_data_upstream_failures_total"));
        drop(first);
    }
}
