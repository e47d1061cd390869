//! Mapping between storage row numbers and public identifiers.
//!
//! Object ids carry the object's first row number. A row's unique id
//! carries the distance from that number, so the first row of every object
//! is version `0`. Snapshot ids carry a version token instead.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::entity::EntityKind;
use super::id::{ObjectId, UniqueId};
use super::version::{from_micros, VersionCorrection};
use crate::error::{Error, Result};

/// Maximum `ver_from` and `corr_from` over the rows of a materialized tree,
/// in micros. Rendered as `v<version>c<correction>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VersionToken {
    pub version: i64,
    pub correction: i64,
}

impl VersionToken {
    #[must_use]
    pub fn new(version: i64, correction: i64) -> Self {
        Self {
            version,
            correction,
        }
    }

    /// Widen the token to cover another contributing row.
    pub fn include(&mut self, version: i64, correction: i64) {
        self.version = self.version.max(version);
        self.correction = self.correction.max(correction);
    }

    /// The instants that reproduce the tree this token was derived from.
    ///
    /// # Errors
    /// Returns [`Error::Parse`] if either component is out of range.
    pub fn version_correction(&self) -> Result<VersionCorrection> {
        Ok(VersionCorrection::of(
            Some(from_micros(self.version)?),
            Some(from_micros(self.correction)?),
        ))
    }
}

impl fmt::Display for VersionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}c{}", self.version, self.correction)
    }
}

impl FromStr for VersionToken {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::invalid_id(s, "malformed version token");
        let body = s.strip_prefix('v').ok_or_else(invalid)?;
        let (version, correction) = body.split_once('c').ok_or_else(invalid)?;
        Ok(Self::new(
            version.parse().map_err(|_| invalid())?,
            correction.parse().map_err(|_| invalid())?,
        ))
    }
}

/// What the version part of a unique id selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdVersion {
    /// Unversioned: whatever is current when the read runs.
    Latest,
    /// One stored row, by row number.
    Row(i64),
    /// A whole tree as of the token's instants.
    Snapshot(VersionToken),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodedId {
    pub kind: EntityKind,
    pub oid: i64,
    pub version: IdVersion,
}

/// Encodes and decodes identifiers under one scheme prefix.
#[derive(Debug, Clone)]
pub struct IdCodec {
    schemes: [String; 4],
}

impl Default for IdCodec {
    fn default() -> Self {
        Self::new("Db")
    }
}

impl IdCodec {
    #[must_use]
    pub fn new(prefix: &str) -> Self {
        Self {
            schemes: EntityKind::ALL.map(|kind| format!("{prefix}{}", kind.scheme_suffix())),
        }
    }

    #[must_use]
    pub fn scheme(&self, kind: EntityKind) -> &str {
        &self.schemes[kind as usize]
    }

    /// # Errors
    /// Returns [`Error::InvalidIdentifier`] for a scheme this codec does not own.
    pub fn kind_of(&self, scheme: &str) -> Result<EntityKind> {
        EntityKind::ALL
            .into_iter()
            .find(|kind| self.scheme(*kind) == scheme)
            .ok_or_else(|| Error::invalid_id(scheme, "unknown scheme"))
    }

    #[must_use]
    pub fn object_id(&self, kind: EntityKind, oid: i64) -> ObjectId {
        ObjectId::from_parts_unchecked(self.scheme(kind), oid)
    }

    /// Unique id of row `row` of object `oid`.
    ///
    /// # Errors
    /// Returns [`Error::InvariantViolation`] if the row precedes its object.
    pub fn row_id(&self, kind: EntityKind, oid: i64, row: i64) -> Result<UniqueId> {
        let suffix = row - oid;
        if suffix < 0 {
            return Err(Error::InvariantViolation(format!(
                "row {row} precedes object {oid}"
            )));
        }
        Ok(self.object_id(kind, oid).at_version(&suffix.to_string()))
    }

    #[must_use]
    pub fn snapshot_id(&self, kind: EntityKind, oid: i64, token: VersionToken) -> UniqueId {
        self.object_id(kind, oid).at_version(&token.to_string())
    }

    /// # Errors
    /// Returns [`Error::InvalidIdentifier`] if the scheme is foreign or the
    /// value is not a number.
    pub fn extract_oid(&self, id: &ObjectId) -> Result<(EntityKind, i64)> {
        self.parse_object(id.scheme(), id.value(), id.as_str())
    }

    /// Row number named by a row unique id.
    ///
    /// # Errors
    /// Returns [`Error::InvalidIdentifier`] unless `id` is a numeric row id.
    pub fn extract_row_id(&self, id: &UniqueId) -> Result<i64> {
        match self.decode(id)?.version {
            IdVersion::Row(row) => Ok(row),
            IdVersion::Latest => Err(Error::invalid_id(id.as_str(), "id is not versioned")),
            IdVersion::Snapshot(_) => Err(Error::invalid_id(id.as_str(), "id names a snapshot")),
        }
    }

    /// # Errors
    /// Returns [`Error::InvalidIdentifier`] if any part is malformed.
    pub fn decode(&self, id: &UniqueId) -> Result<DecodedId> {
        let (kind, oid) = self.parse_object(id.scheme(), id.value(), id.as_str())?;
        let version = match id.version() {
            None => IdVersion::Latest,
            Some(v) if v.starts_with('v') => IdVersion::Snapshot(v.parse()?),
            Some(v) => {
                let suffix: i64 = v
                    .parse()
                    .map_err(|_| Error::invalid_id(id.as_str(), "version is not numeric"))?;
                if suffix < 0 {
                    return Err(Error::invalid_id(id.as_str(), "negative version"));
                }
                let row = oid
                    .checked_add(suffix)
                    .ok_or_else(|| Error::invalid_id(id.as_str(), "version out of range"))?;
                IdVersion::Row(row)
            }
        };
        Ok(DecodedId { kind, oid, version })
    }

    /// Decode and require a particular kind.
    ///
    /// # Errors
    /// Returns [`Error::InvalidIdentifier`] on a malformed id or a kind mismatch.
    pub fn decode_as(&self, kind: EntityKind, id: &UniqueId) -> Result<DecodedId> {
        let decoded = self.decode(id)?;
        if decoded.kind != kind {
            return Err(Error::invalid_id(
                id.as_str(),
                format!("expected a {kind} id, found a {} id", decoded.kind),
            ));
        }
        Ok(decoded)
    }

    /// Object number of an object id of the given kind.
    ///
    /// # Errors
    /// Returns [`Error::InvalidIdentifier`] on a malformed id or a kind mismatch.
    pub fn oid_as(&self, kind: EntityKind, id: &ObjectId) -> Result<i64> {
        let (found, oid) = self.extract_oid(id)?;
        if found != kind {
            return Err(Error::invalid_id(
                id.as_str(),
                format!("expected a {kind} id, found a {found} id"),
            ));
        }
        Ok(oid)
    }

    fn parse_object(&self, scheme: &str, value: &str, original: &str) -> Result<(EntityKind, i64)> {
        let kind = self
            .kind_of(scheme)
            .map_err(|_| Error::invalid_id(original, "unknown scheme"))?;
        let oid = value
            .parse::<i64>()
            .map_err(|_| Error::invalid_id(original, "object value is not numeric"))?;
        Ok((kind, oid))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schemes_follow_prefix() {
        let codec = IdCodec::new("Test");
        assert_eq!(codec.scheme(EntityKind::Portfolio), "TestPrt");
        assert_eq!(codec.scheme(EntityKind::Trade), "TestTrd");
        assert_eq!(codec.kind_of("TestNod").unwrap(), EntityKind::Node);
        assert!(codec.kind_of("DbNod").is_err());
    }

    #[test]
    fn row_suffix_is_distance_from_object() {
        let codec = IdCodec::default();
        let first = codec.row_id(EntityKind::Position, 40, 40).unwrap();
        assert_eq!(first.as_str(), "DbPos~40~0");
        let later = codec.row_id(EntityKind::Position, 40, 57).unwrap();
        assert_eq!(later.as_str(), "DbPos~40~17");
        assert_eq!(codec.extract_row_id(&later).unwrap(), 57);
        assert!(codec.row_id(EntityKind::Position, 40, 39).is_err());
    }

    #[test]
    fn snapshot_ids_round_trip_their_token() {
        let codec = IdCodec::default();
        let token = VersionToken::new(1_000, 2_000);
        let uid = codec.snapshot_id(EntityKind::Portfolio, 9, token);
        assert_eq!(uid.as_str(), "DbPrt~9~v1000c2000");
        let decoded = codec.decode(&uid).unwrap();
        assert_eq!(decoded.oid, 9);
        assert_eq!(decoded.version, IdVersion::Snapshot(token));
        assert!(codec.extract_row_id(&uid).is_err());
    }

    #[test]
    fn unversioned_ids_decode_as_latest() {
        let codec = IdCodec::default();
        let uid: UniqueId = "DbNod~12".parse().unwrap();
        assert_eq!(codec.decode(&uid).unwrap().version, IdVersion::Latest);
        assert!(matches!(
            codec.extract_row_id(&uid),
            Err(Error::InvalidIdentifier { .. })
        ));
    }

    #[test]
    fn malformed_suffixes_are_invalid_identifiers() {
        let codec = IdCodec::default();
        for bad in ["DbPrt~1~x", "DbPrt~1~-2", "DbPrt~x~0", "DbPrt~1~vc", "DbPrt~1~v1c", "Other~1~0"] {
            let uid: UniqueId = bad.parse().unwrap();
            assert!(
                matches!(codec.decode(&uid), Err(Error::InvalidIdentifier { .. })),
                "{bad} should not decode"
            );
        }
    }

    #[test]
    fn kind_mismatch_is_rejected() {
        let codec = IdCodec::default();
        let uid: UniqueId = "DbPos~1~0".parse().unwrap();
        assert!(codec.decode_as(EntityKind::Position, &uid).is_ok());
        assert!(codec.decode_as(EntityKind::Portfolio, &uid).is_err());
    }

    #[test]
    fn token_yields_fixed_instants() {
        let vc = VersionToken::new(5, 6).version_correction().unwrap();
        assert!(!vc.contains_latest());
    }
}
