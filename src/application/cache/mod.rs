//! Two-tier cache in front of a [`PositionSource`](crate::port::PositionSource).
//!
//! Only exact keys are cached: a snapshot or row id, with instants that
//! contain no "latest" axis. Everything else goes straight to the source.

mod backing;
mod front;
mod source;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::version::to_micros;
use crate::domain::{EntityKind, VersionCorrection};

pub use backing::{BackingCache, MemoryBackingCache};
pub use front::{FrontCache, Retention};
pub use source::{CacheStats, CachingPositionSource};

/// Exact cache key: entity kind, id text and, where the id alone does not
/// pin the result, the instants in micros.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey {
    pub kind: EntityKind,
    pub id: String,
    pub at: Option<(i64, i64)>,
}

impl CacheKey {
    #[must_use]
    pub fn new(kind: EntityKind, id: impl Into<String>, at: Option<(i64, i64)>) -> Self {
        Self {
            kind,
            id: id.into(),
            at,
        }
    }

    /// Key for `id` at `vc`, or `None` when `vc` still contains "latest".
    #[must_use]
    pub fn exact(kind: EntityKind, id: impl Into<String>, vc: VersionCorrection) -> Option<Self> {
        exact_instants(vc).map(|at| Self::new(kind, id, Some(at)))
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.at {
            Some((v, c)) => write!(f, "{}:{}@v{v}c{c}", self.kind, self.id),
            None => write!(f, "{}:{}", self.kind, self.id),
        }
    }
}

/// Micros of both axes when neither is "latest".
#[must_use]
pub fn exact_instants(vc: VersionCorrection) -> Option<(i64, i64)> {
    match (vc.version(), vc.correction()) {
        (Some(v), Some(c)) => Some((to_micros(v), to_micros(c))),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn latest_instants_have_no_key() {
        assert!(CacheKey::exact(EntityKind::Node, "DbNod~1", VersionCorrection::LATEST).is_none());
        let half = VersionCorrection::version_as_of(Utc.timestamp_opt(10, 0).unwrap());
        assert!(CacheKey::exact(EntityKind::Node, "DbNod~1", half).is_none());
    }

    #[test]
    fn exact_instants_are_keyed_in_micros() {
        let at = Utc.timestamp_opt(10, 0).unwrap();
        let key = CacheKey::exact(EntityKind::Node, "DbNod~1~0", VersionCorrection::at(at)).unwrap();
        assert_eq!(key.at, Some((10_000_000, 10_000_000)));
        assert_eq!(key.to_string(), "node:DbNod~1~0@v10000000c10000000");
    }
}
