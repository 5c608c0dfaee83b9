//! Application Services
//!
//! Services that orchestrate domain logic over the data source port.
//!
//! - `QueryGateway`: validates and serves historical requests
//! - `StreamMultiplexer`: manages live subscriptions and fans out records

/// Historical request validation and delegation.
pub mod query_gateway;

/// Live subscription fan-out.
pub mod multiplexer;

/// Per-subscription queues and the consumer handle.
pub mod subscriber;

pub use multiplexer::{DEFAULT_QUEUE_CAPACITY, MultiplexerConfig, StreamMultiplexer};
pub use query_gateway::{HistoricalRequest, HistoricalResult, QueryError, QueryGateway};
pub use subscriber::{StreamError, StreamEvent, SubscriptionHandle};
