//! Cache configuration.
//!
//! Read once when the cache is constructed; changing it requires a new
//! cache instance.

use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const DEFAULT_IDLE_TTL_MS: u64 = 6 * 60 * 1000;
pub const DEFAULT_SWEEP_INTERVAL_MS: u64 = 20 * 1000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// When false every lookup fails fast or returns nothing.
    pub enabled: bool,
    /// How long a tenant's map may stay unused before it is dropped.
    pub idle_ttl_ms: u64,
    /// Period of the background sweep.
    pub sweep_interval_ms: u64,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            idle_ttl_ms: DEFAULT_IDLE_TTL_MS,
            sweep_interval_ms: DEFAULT_SWEEP_INTERVAL_MS,
        }
    }
}

impl IndexConfig {
    /// A configuration with the index switched off.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Default::default()
        }
    }

    pub fn idle_ttl(&self) -> Duration {
        Duration::from_millis(self.idle_ttl_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}

/// Parse a cache config from a JSON string; missing fields take defaults.
pub fn parse_index_config(json: &str) -> Result<IndexConfig, serde_json::Error> {
    serde_json::from_str(json)
}
