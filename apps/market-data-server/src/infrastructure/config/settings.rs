//! Server Configuration Settings
//!
//! Configuration types for the market data server, loaded from environment
//! variables. The data source mode is decided once here: a non-empty
//! `DATABENTO_API_KEY` selects the vendor source, otherwise the synthetic
//! generator is used.

use std::net::SocketAddr;
use std::time::Duration;

use crate::application::ports::DataSourceMode;
use crate::application::services::DEFAULT_QUEUE_CAPACITY;
use crate::domain::query::SymbologyType;

/// Vendor API credentials.
#[derive(Clone)]
pub struct Credentials {
    api_key: String,
}

impl Credentials {
    /// Create new credentials.
    #[must_use]
    pub const fn new(api_key: String) -> Self {
        Self { api_key }
    }

    /// Get the API key.
    #[must_use]
    pub fn api_key(&self) -> &str {
        &self.api_key
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

/// HTTP listener settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Bind host.
    pub host: String,
    /// Bind port.
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3001,
        }
    }
}

impl ServerSettings {
    /// Socket address to bind.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if host and port do not form an
    /// IP socket address.
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        let raw = format!("{}:{}", self.host, self.port);
        raw.parse().map_err(|_| ConfigError::InvalidValue {
            key: "HOST".to_string(),
            value: self.host.clone(),
        })
    }
}

/// Live stream fan-out settings.
#[derive(Debug, Clone)]
pub struct StreamSettings {
    /// Bounded queue size of each subscription.
    pub queue_capacity: usize,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

/// Synthetic generator settings.
#[derive(Debug, Clone)]
pub struct SyntheticSettings {
    /// Fixed seed; random per process when unset.
    pub seed: Option<u64>,
    /// Shortest gap between live trades.
    pub min_interval: Duration,
    /// Longest gap between live trades.
    pub max_interval: Duration,
    /// Per-symbol cap on generated historical trades.
    pub max_records: usize,
}

impl Default for SyntheticSettings {
    fn default() -> Self {
        Self {
            seed: None,
            min_interval: Duration::from_millis(100),
            max_interval: Duration::from_millis(500),
            max_records: 10_000,
        }
    }
}

/// Databento settings.
#[derive(Debug, Clone)]
pub struct VendorSettings {
    /// Dataset code.
    pub dataset: String,
    /// Symbology of requested symbols for live sessions.
    pub stype_in: SymbologyType,
    /// Silence on a live session longer than this fails the feed.
    pub heartbeat_timeout: Duration,
    /// Bound on live session setup and historical downloads.
    pub request_timeout: Duration,
}

impl Default for VendorSettings {
    fn default() -> Self {
        Self {
            dataset: "GLBX.MDP3".to_string(),
            stype_in: SymbologyType::Parent,
            heartbeat_timeout: Duration::from_secs(60),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Complete server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Data source backing the process.
    pub mode: DataSourceMode,
    /// Vendor credentials, present in vendor mode.
    pub credentials: Option<Credentials>,
    /// HTTP listener settings.
    pub server: ServerSettings,
    /// Fan-out settings.
    pub stream: StreamSettings,
    /// Synthetic generator settings.
    pub synthetic: SyntheticSettings,
    /// Databento settings.
    pub vendor: VendorSettings,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            mode: DataSourceMode::Synthetic,
            credentials: None,
            server: ServerSettings::default(),
            stream: StreamSettings::default(),
            synthetic: SyntheticSettings::default(),
            vendor: VendorSettings::default(),
        }
    }
}

impl ServerConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a value is present but invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if a value is present but invalid.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(&lookup);

        let credentials = env
            .get("DATABENTO_API_KEY")
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty())
            .map(Credentials::new);
        let mode = if credentials.is_some() {
            DataSourceMode::Vendor
        } else {
            DataSourceMode::Synthetic
        };

        let server_defaults = ServerSettings::default();
        let server = ServerSettings {
            host: env.get("HOST").unwrap_or(server_defaults.host),
            port: env.parse("PORT", server_defaults.port)?,
        };

        let stream = StreamSettings {
            queue_capacity: env.parse(
                "STREAM_QUEUE_CAPACITY",
                StreamSettings::default().queue_capacity,
            )?,
        };
        if stream.queue_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                key: "STREAM_QUEUE_CAPACITY".to_string(),
                value: "0".to_string(),
            });
        }

        let synthetic_defaults = SyntheticSettings::default();
        let synthetic = SyntheticSettings {
            seed: env.parse_optional("SYNTHETIC_SEED")?,
            min_interval: env.parse_millis("SYNTHETIC_MIN_INTERVAL_MS", synthetic_defaults.min_interval)?,
            max_interval: env.parse_millis("SYNTHETIC_MAX_INTERVAL_MS", synthetic_defaults.max_interval)?,
            max_records: env.parse("SYNTHETIC_MAX_RECORDS", synthetic_defaults.max_records)?,
        };
        if synthetic.min_interval > synthetic.max_interval {
            return Err(ConfigError::InvalidInterval {
                min: synthetic.min_interval,
                max: synthetic.max_interval,
            });
        }

        let vendor_defaults = VendorSettings::default();
        let stype_in = match env.get("DATABENTO_STYPE_IN") {
            Some(raw) => raw.parse().map_err(|_| ConfigError::InvalidValue {
                key: "DATABENTO_STYPE_IN".to_string(),
                value: raw,
            })?,
            None => vendor_defaults.stype_in,
        };
        let vendor = VendorSettings {
            dataset: env.get("DATABENTO_DATASET").unwrap_or(vendor_defaults.dataset),
            stype_in,
            heartbeat_timeout: env.parse_secs(
                "DATABENTO_HEARTBEAT_TIMEOUT_SECS",
                vendor_defaults.heartbeat_timeout,
            )?,
            request_timeout: env.parse_secs(
                "DATABENTO_REQUEST_TIMEOUT_SECS",
                vendor_defaults.request_timeout,
            )?,
        };

        Ok(Self {
            mode,
            credentials,
            server,
            stream,
            synthetic,
            vendor,
        })
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A variable is set to something that does not parse.
    #[error("invalid value for {key}: {value}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// Raw value.
        value: String,
    },

    /// Synthetic pacing bounds are inverted.
    #[error("synthetic interval minimum {min:?} exceeds maximum {max:?}")]
    InvalidInterval {
        /// Minimum gap.
        min: Duration,
        /// Maximum gap.
        max: Duration,
    },
}

struct Env<'a, F>(&'a F);

impl<F> Env<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key).filter(|v| !v.trim().is_empty())
    }

    fn parse_optional<T: std::str::FromStr>(&self, key: &str) -> Result<Option<T>, ConfigError> {
        self.get(key)
            .map(|raw| {
                raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
                    key: key.to_string(),
                    value: raw.clone(),
                })
            })
            .transpose()
    }

    fn parse<T: std::str::FromStr>(&self, key: &str, default: T) -> Result<T, ConfigError> {
        Ok(self.parse_optional(key)?.unwrap_or(default))
    }

    fn parse_secs(&self, key: &str, default: Duration) -> Result<Duration, ConfigError> {
        Ok(self
            .parse_optional::<u64>(key)?
            .map_or(default, Duration::from_secs))
    }

    fn parse_millis(&self, key: &str, default: Duration) -> Result<Duration, ConfigError> {
        Ok(self
            .parse_optional::<u64>(key)?
            .map_or(default, Duration::from_millis))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config_from(pairs: &[(&str, &str)]) -> Result<ServerConfig, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        ServerConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_without_environment() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.mode, DataSourceMode::Synthetic);
        assert!(config.credentials.is_none());
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 3001);
        assert_eq!(config.stream.queue_capacity, 1024);
        assert_eq!(config.vendor.dataset, "GLBX.MDP3");
        assert_eq!(config.vendor.heartbeat_timeout, Duration::from_secs(60));
        assert_eq!(config.synthetic.min_interval, Duration::from_millis(100));
        assert_eq!(config.synthetic.max_interval, Duration::from_millis(500));
    }

    #[test]
    fn api_key_selects_vendor_mode() {
        let config = config_from(&[("DATABENTO_API_KEY", "db-abc123")]).unwrap();
        assert_eq!(config.mode, DataSourceMode::Vendor);
        assert_eq!(config.credentials.unwrap().api_key(), "db-abc123");
    }

    #[test]
    fn blank_api_key_stays_synthetic() {
        let config = config_from(&[("DATABENTO_API_KEY", "   ")]).unwrap();
        assert_eq!(config.mode, DataSourceMode::Synthetic);
    }

    #[test]
    fn overrides_are_parsed() {
        let config = config_from(&[
            ("HOST", "0.0.0.0"),
            ("PORT", "8080"),
            ("STREAM_QUEUE_CAPACITY", "16"),
            ("SYNTHETIC_SEED", "42"),
            ("DATABENTO_STYPE_IN", "raw_symbol"),
        ])
        .unwrap();
        assert_eq!(config.server.socket_addr().unwrap().port(), 8080);
        assert_eq!(config.stream.queue_capacity, 16);
        assert_eq!(config.synthetic.seed, Some(42));
        assert_eq!(config.vendor.stype_in, SymbologyType::RawSymbol);
    }

    #[test]
    fn invalid_values_are_errors() {
        assert!(matches!(
            config_from(&[("PORT", "http")]),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert!(matches!(
            config_from(&[("STREAM_QUEUE_CAPACITY", "0")]),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert!(matches!(
            config_from(&[
                ("SYNTHETIC_MIN_INTERVAL_MS", "900"),
                ("SYNTHETIC_MAX_INTERVAL_MS", "100"),
            ]),
            Err(ConfigError::InvalidInterval { .. })
        ));
    }

    #[test]
    fn credentials_redacted_debug() {
        let creds = Credentials::new("db-secret".to_string());
        let debug = format!("{creds:?}");
        assert!(!debug.contains("db-secret"));
        assert!(debug.contains("[REDACTED]"));
    }
}
