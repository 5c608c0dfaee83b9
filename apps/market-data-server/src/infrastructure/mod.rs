//! Infrastructure Layer - Adapters and external integrations.
//!
//! Concrete data sources behind the `DataSource` port, the HTTP and
//! WebSocket transport, configuration, and observability.

/// Seeded random-walk data source.
pub mod synthetic;

/// Databento data source.
pub mod vendor;

/// HTTP and WebSocket transport.
pub mod http;

/// Configuration loading.
pub mod config;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Tracing subscriber and OpenTelemetry export.
pub mod telemetry;
