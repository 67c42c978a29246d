//! Observability sink configuration.

use serde::Deserialize;

/// Observability sink configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ObservabilityConfig {
    /// Whether to write one JSON record per line to stdout.
    pub stdout: bool,

    /// Durable record store configuration.
    pub store: StoreConfig,

    /// Redis pub/sub configuration for the ephemeral activity stream.
    ///
    /// When unset, activity publishing is disabled.
    pub redis: Option<RedisConfig>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            stdout: true,
            store: StoreConfig::default(),
            redis: None,
        }
    }
}

/// Durable record store configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    /// Whether records are written to the durable store.
    pub enabled: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Redis pub/sub configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RedisConfig {
    /// Connection URL, e.g. `redis://localhost:6379`.
    pub url: String,
}
