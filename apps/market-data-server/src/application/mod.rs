//! Application Layer - Use cases and port definitions.
//!
//! This layer defines the data source contract and the services that
//! drive it: the query gateway for historical requests and the stream
//! multiplexer for live subscriptions.

/// Port interfaces for data sources.
pub mod ports;

/// Query gateway and stream multiplexer.
pub mod services;
