//! Domain Layer - Market data records and subscription bookkeeping.
//!
//! Pure types with no I/O: the fixed-point record model, trade to bar
//! aggregation, historical query validation, and the subscription
//! lifecycle and reference counts.

/// Fixed-point prices, schemas, trades and bars.
pub mod market_data;

/// Trade to OHLCV bar aggregation.
pub mod aggregation;

/// Validated historical queries.
pub mod query;

/// Subscription lifecycle and upstream feed reference counts.
pub mod subscription;
