//! Store handles shared by the command handlers.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use super::command::AsOfArgs;
use crate::adapter::outbound::sqlite::SqlitePositionMaster;
use crate::application::cache::CachingPositionSource;
use crate::domain::{IdCodec, Instant, VersionCorrection};
use crate::error::{Error, Result};
use crate::infrastructure::config::Config;
use crate::port::PositionSource;

/// An opened store plus the read path commands should use: the caching
/// source when `[cache] enabled`, the store itself otherwise.
pub struct Session {
    pub master: Arc<SqlitePositionMaster>,
    source: Arc<dyn PositionSource>,
}

impl Session {
    /// # Errors
    /// Returns an error if the database cannot be opened or migrated.
    pub fn open(config: &Config) -> Result<Self> {
        let master = Arc::new(SqlitePositionMaster::open(config)?);
        let source: Arc<dyn PositionSource> = if config.cache.enabled {
            Arc::new(CachingPositionSource::from_config(
                Arc::clone(&master),
                master.codec().clone(),
                &config.cache,
            ))
        } else {
            Arc::clone(&master) as Arc<dyn PositionSource>
        };
        Ok(Self { master, source })
    }

    #[must_use]
    pub fn source(&self) -> &dyn PositionSource {
        self.source.as_ref()
    }

    #[must_use]
    pub fn codec(&self) -> &IdCodec {
        self.master.codec()
    }
}

/// Parse an RFC 3339 instant.
///
/// # Errors
/// Returns [`Error::InvalidArgument`] for anything else.
pub fn parse_instant(text: &str) -> Result<Instant> {
    DateTime::parse_from_rfc3339(text)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|e| Error::InvalidArgument(format!("instant '{text}': {e}")))
}

impl AsOfArgs {
    /// # Errors
    /// Returns [`Error::InvalidArgument`] if an instant does not parse.
    pub fn version_correction(&self) -> Result<VersionCorrection> {
        let version = self.version_as_of.as_deref().map(parse_instant).transpose()?;
        let correction = self.corrected_to.as_deref().map(parse_instant).transpose()?;
        Ok(VersionCorrection::of(version, correction))
    }
}
