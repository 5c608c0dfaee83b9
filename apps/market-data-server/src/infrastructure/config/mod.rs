//! Configuration Module
//!
//! Environment-driven configuration for the server and its data sources.

mod settings;

pub use settings::{
    ConfigError, Credentials, ServerConfig, ServerSettings, StreamSettings, SyntheticSettings,
    VendorSettings,
};
