//! Database configuration.

use serde::Deserialize;

/// SQLite connection settings.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path or URL of the database file. `:memory:` opens a private
    /// in-memory database.
    #[serde(default = "default_url")]
    pub url: String,
    /// Maximum pooled connections.
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
    /// How long a connection waits on a locked database (milliseconds).
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

fn default_url() -> String {
    "folio.db".into()
}

fn default_pool_size() -> u32 {
    8
}

fn default_busy_timeout_ms() -> u64 {
    5000
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            pool_size: default_pool_size(),
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}
