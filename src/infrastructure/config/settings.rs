//! Application configuration loading and validation.
//!
//! Provides the main [`Config`] struct that aggregates all settings.
//! Configuration is loaded from a TOML file; `FOLIO_DATABASE_URL` overrides
//! the database location.
//!
//! # Example
//!
//! ```no_run
//! use folio_store::infrastructure::config::Config;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::load("config.toml")?;
//!     config.init_logging();
//!     Ok(())
//! }
//! ```

use std::path::Path;

use serde::Deserialize;

use super::cache::{CacheConfig, FrontRetention};
use super::logging::LoggingConfig;
use super::store::DatabaseConfig;
use super::traversal::TraversalConfig;
use crate::domain::id::SEPARATOR;
use crate::error::{ConfigError, Result};

/// Environment variable overriding `database.url`.
pub const DATABASE_URL_ENV: &str = "FOLIO_DATABASE_URL";

/// Identifier scheme settings.
#[derive(Debug, Clone, Deserialize)]
pub struct IdentifierConfig {
    /// Prefix of every scheme this store issues, e.g. `Db` gives `DbPrt`.
    #[serde(default = "default_scheme_prefix")]
    pub scheme_prefix: String,
}

fn default_scheme_prefix() -> String {
    "Db".into()
}

impl Default for IdentifierConfig {
    fn default() -> Self {
        Self {
            scheme_prefix: default_scheme_prefix(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub identifiers: IdentifierConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub traversal: TraversalConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Parse configuration from TOML text, apply environment overrides and
    /// validate.
    ///
    /// # Errors
    /// Returns an error if the TOML is malformed or a value is out of range.
    pub fn parse_toml(content: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(content).map_err(ConfigError::Parse)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed, or if
    /// validation fails.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadFile)?;
        Self::parse_toml(&content)
    }

    /// Like [`Config::load`], but a missing file yields the defaults.
    ///
    /// # Errors
    /// Returns an error if an existing file cannot be parsed or validated.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            Self::parse_toml("")
        }
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var(DATABASE_URL_ENV) {
            if !url.trim().is_empty() {
                self.database.url = url;
            }
        }
    }

    /// Validate configuration values.
    #[allow(clippy::result_large_err)]
    fn validate(&self) -> Result<()> {
        if self.database.url.trim().is_empty() {
            return Err(ConfigError::MissingField {
                field: "database.url",
            }
            .into());
        }
        if self.database.pool_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "pool_size",
                reason: "must be greater than 0".to_string(),
            }
            .into());
        }
        let prefix = &self.identifiers.scheme_prefix;
        if prefix.is_empty() {
            return Err(ConfigError::MissingField {
                field: "scheme_prefix",
            }
            .into());
        }
        if prefix.contains(SEPARATOR) || prefix.chars().any(char::is_whitespace) {
            return Err(ConfigError::InvalidValue {
                field: "scheme_prefix",
                reason: format!("must not contain whitespace or '{SEPARATOR}'"),
            }
            .into());
        }
        if self.cache.front_retention == FrontRetention::Bounded
            && self.cache.front_max_entries == 0
        {
            return Err(ConfigError::InvalidValue {
                field: "front_max_entries",
                reason: "must be greater than 0 for bounded retention".to_string(),
            }
            .into());
        }
        if self.cache.backing_max_entries == 0 {
            return Err(ConfigError::InvalidValue {
                field: "backing_max_entries",
                reason: "must be greater than 0".to_string(),
            }
            .into());
        }
        if self.traversal.worker_threads == 0 {
            return Err(ConfigError::InvalidValue {
                field: "worker_threads",
                reason: "must be greater than 0".to_string(),
            }
            .into());
        }
        if self.traversal.queue_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                field: "queue_capacity",
                reason: "must be greater than 0".to_string(),
            }
            .into());
        }
        Ok(())
    }

    /// Initialize logging with the configured settings.
    pub fn init_logging(&self) {
        self.logging.init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn empty_document_gives_defaults() {
        let config = Config::parse_toml("").unwrap();
        assert_eq!(config.identifiers.scheme_prefix, "Db");
        assert_eq!(config.cache.front_retention, FrontRetention::Weak);
        assert!(config.cache.enabled);
        assert!(config.traversal.worker_threads > 0);
    }

    #[test]
    fn sections_override_defaults() {
        let config = Config::parse_toml(
            r#"
            [identifiers]
            scheme_prefix = "Ref"

            [cache]
            front_retention = "bounded"
            front_max_entries = 16

            [traversal]
            worker_threads = 3
            queue_capacity = 8

            [logging]
            level = "debug"
            format = "json"
            "#,
        )
        .unwrap();
        assert_eq!(config.identifiers.scheme_prefix, "Ref");
        assert_eq!(config.cache.front_retention, FrontRetention::Bounded);
        assert_eq!(config.cache.front_max_entries, 16);
        assert_eq!(config.traversal.worker_threads, 3);
        assert_eq!(config.logging.format, "json");
    }

    #[test]
    fn scheme_prefix_must_not_contain_separator() {
        let err = Config::parse_toml("[identifiers]\nscheme_prefix = \"D~b\"").unwrap_err();
        assert!(matches!(
            err,
            Error::Config(ConfigError::InvalidValue {
                field: "scheme_prefix",
                ..
            })
        ));
    }

    #[test]
    fn zero_workers_rejected() {
        let err = Config::parse_toml("[traversal]\nworker_threads = 0").unwrap_err();
        assert!(matches!(
            err,
            Error::Config(ConfigError::InvalidValue {
                field: "worker_threads",
                ..
            })
        ));
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        let err = Config::parse_toml("[database").unwrap_err();
        assert!(matches!(err, Error::Config(ConfigError::Parse(_))));
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let err = Config::load("/nonexistent/folio.toml").unwrap_err();
        assert!(matches!(err, Error::Config(ConfigError::ReadFile(_))));
    }
}
