//! Cache layer configuration.

use serde::Deserialize;

/// How the front cache holds on to materialized values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrontRetention {
    /// Keep entries only while some caller still holds the value.
    #[default]
    Weak,
    /// Keep strong references, evicting the oldest beyond `front_max_entries`.
    Bounded,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// Wrap the store in the caching source.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub front_retention: FrontRetention,
    #[serde(default = "default_front_max_entries")]
    pub front_max_entries: usize,
    #[serde(default = "default_backing_max_entries")]
    pub backing_max_entries: usize,
    /// Seconds a backing entry stays readable. Zero disables expiry.
    #[serde(default = "default_backing_ttl_secs")]
    pub backing_ttl_secs: u64,
}

fn default_enabled() -> bool {
    true
}

fn default_front_max_entries() -> usize {
    10_000
}

fn default_backing_max_entries() -> usize {
    100_000
}

fn default_backing_ttl_secs() -> u64 {
    3600 // 1 hour
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            front_retention: FrontRetention::default(),
            front_max_entries: default_front_max_entries(),
            backing_max_entries: default_backing_max_entries(),
            backing_ttl_secs: default_backing_ttl_secs(),
        }
    }
}
