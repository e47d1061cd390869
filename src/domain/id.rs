//! Identifier value types.
//!
//! Object and unique ids are backed by a shared `Arc<str>` so clones are
//! cheap and two ids can be checked for pointer identity after
//! deduplication.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Separator between scheme, value and version.
pub const SEPARATOR: char = '~';

fn check_part(part: &str, what: &str, original: &str) -> Result<()> {
    if part.is_empty() {
        return Err(Error::invalid_id(original, format!("empty {what}")));
    }
    Ok(())
}

/// Stable identity of an entity across all of its history, `scheme~value`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ObjectId(Arc<str>);

impl ObjectId {
    /// # Errors
    /// Returns [`Error::InvalidIdentifier`] if either part is empty or
    /// contains the separator.
    pub fn new(scheme: &str, value: &str) -> Result<Self> {
        let text = format!("{scheme}{SEPARATOR}{value}");
        text.parse()
    }

    /// Build from parts already known to be well formed.
    pub(crate) fn from_parts_unchecked(scheme: &str, value: i64) -> Self {
        Self(Arc::from(format!("{scheme}{SEPARATOR}{value}")))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn scheme(&self) -> &str {
        self.0.split(SEPARATOR).next().unwrap_or_default()
    }

    #[must_use]
    pub fn value(&self) -> &str {
        self.0.split(SEPARATOR).nth(1).unwrap_or_default()
    }

    /// Unversioned unique id, meaning "latest".
    #[must_use]
    pub fn at_latest(&self) -> UniqueId {
        UniqueId(Arc::clone(&self.0))
    }

    #[must_use]
    pub fn at_version(&self, version: &str) -> UniqueId {
        UniqueId(Arc::from(format!("{}{SEPARATOR}{version}", self.0)))
    }

    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl FromStr for ObjectId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split(SEPARATOR).collect();
        if parts.len() != 2 {
            return Err(Error::invalid_id(s, "expected scheme~value"));
        }
        check_part(parts[0], "scheme", s)?;
        check_part(parts[1], "value", s)?;
        Ok(Self(Arc::from(s)))
    }
}

impl TryFrom<String> for ObjectId {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<ObjectId> for String {
    fn from(id: ObjectId) -> Self {
        id.0.to_string()
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of one row, or of "latest" when unversioned:
/// `scheme~value` or `scheme~value~version`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UniqueId(Arc<str>);

impl UniqueId {
    /// # Errors
    /// Returns [`Error::InvalidIdentifier`] if any part is malformed.
    pub fn new(scheme: &str, value: &str, version: Option<&str>) -> Result<Self> {
        let text = match version {
            Some(version) => format!("{scheme}{SEPARATOR}{value}{SEPARATOR}{version}"),
            None => format!("{scheme}{SEPARATOR}{value}"),
        };
        text.parse()
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn scheme(&self) -> &str {
        self.0.split(SEPARATOR).next().unwrap_or_default()
    }

    #[must_use]
    pub fn value(&self) -> &str {
        self.0.split(SEPARATOR).nth(1).unwrap_or_default()
    }

    #[must_use]
    pub fn version(&self) -> Option<&str> {
        self.0.split(SEPARATOR).nth(2)
    }

    #[must_use]
    pub fn is_versioned(&self) -> bool {
        self.version().is_some()
    }

    #[must_use]
    pub fn object_id(&self) -> ObjectId {
        match self.0.rfind(SEPARATOR) {
            Some(pos) if self.is_versioned() => ObjectId(Arc::from(&self.0[..pos])),
            _ => ObjectId(Arc::clone(&self.0)),
        }
    }

    /// This id with the version stripped.
    #[must_use]
    pub fn to_latest(&self) -> Self {
        self.object_id().at_latest()
    }

    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl FromStr for UniqueId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split(SEPARATOR).collect();
        if !(2..=3).contains(&parts.len()) {
            return Err(Error::invalid_id(s, "expected scheme~value[~version]"));
        }
        check_part(parts[0], "scheme", s)?;
        check_part(parts[1], "value", s)?;
        if let Some(version) = parts.get(2) {
            check_part(version, "version", s)?;
        }
        Ok(Self(Arc::from(s)))
    }
}

impl TryFrom<String> for UniqueId {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<UniqueId> for String {
    fn from(id: UniqueId) -> Self {
        id.0.to_string()
    }
}

impl fmt::Display for UniqueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An identifier issued by some outside system, e.g. a ticker or a
/// counterparty code.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ExternalId {
    scheme: String,
    value: String,
}

impl ExternalId {
    pub fn new(scheme: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            scheme: scheme.into(),
            value: value.into(),
        }
    }

    #[must_use]
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    #[must_use]
    pub fn value(&self) -> &str {
        &self.value
    }
}

impl fmt::Display for ExternalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{SEPARATOR}{}", self.scheme, self.value)
    }
}

impl FromStr for ExternalId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.split_once(SEPARATOR) {
            Some((scheme, value)) if !scheme.is_empty() && !value.is_empty() => {
                Ok(Self::new(scheme, value))
            }
            _ => Err(Error::invalid_id(s, "expected scheme~value")),
        }
    }
}

/// Set of external ids that together reference one thing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExternalIdBundle(BTreeSet<ExternalId>);

impl ExternalIdBundle {
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn of(id: ExternalId) -> Self {
        Self(BTreeSet::from([id]))
    }

    pub fn insert(&mut self, id: ExternalId) -> bool {
        self.0.insert(id)
    }

    #[must_use]
    pub fn with(mut self, id: ExternalId) -> Self {
        self.0.insert(id);
        self
    }

    #[must_use]
    pub fn contains(&self, id: &ExternalId) -> bool {
        self.0.contains(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ExternalId> {
        self.0.iter()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl FromIterator<ExternalId> for ExternalIdBundle {
    fn from_iter<I: IntoIterator<Item = ExternalId>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unique_id_parts() {
        let uid: UniqueId = "DbPrt~101~3".parse().unwrap();
        assert_eq!(uid.scheme(), "DbPrt");
        assert_eq!(uid.value(), "101");
        assert_eq!(uid.version(), Some("3"));
        assert_eq!(uid.object_id().as_str(), "DbPrt~101");
        assert_eq!(uid.to_latest().as_str(), "DbPrt~101");
    }

    #[test]
    fn unversioned_unique_id_shares_object_storage() {
        let oid = ObjectId::new("DbNod", "7").unwrap();
        let latest = oid.at_latest();
        assert!(!latest.is_versioned());
        assert_eq!(latest.object_id(), oid);
    }

    #[test]
    fn malformed_ids_are_rejected() {
        for bad in ["", "DbPrt", "DbPrt~", "~1", "a~b~c~d", "a~b~"] {
            assert!(
                matches!(bad.parse::<UniqueId>(), Err(Error::InvalidIdentifier { .. })),
                "{bad} should be rejected"
            );
        }
        assert!("a~b~c".parse::<ObjectId>().is_err());
    }

    #[test]
    fn ids_serialize_as_strings() {
        let uid: UniqueId = "DbPos~5~0".parse().unwrap();
        let json = serde_json::to_string(&uid).unwrap();
        assert_eq!(json, "\"DbPos~5~0\"");
        let back: UniqueId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, uid);
        assert!(serde_json::from_str::<UniqueId>("\"nope\"").is_err());
    }

    #[test]
    fn bundle_is_ordered_and_deduplicated() {
        let bundle = ExternalIdBundle::of(ExternalId::new("TICKER", "B"))
            .with(ExternalId::new("TICKER", "A"))
            .with(ExternalId::new("TICKER", "A"));
        let values: Vec<_> = bundle.iter().map(ExternalId::value).collect();
        assert_eq!(values, vec!["A", "B"]);
    }

    #[test]
    fn external_id_parse() {
        let id: ExternalId = "CPTY~acme".parse().unwrap();
        assert_eq!(id.scheme(), "CPTY");
        assert_eq!(id.to_string(), "CPTY~acme");
        assert!("acme".parse::<ExternalId>().is_err());
    }
}
