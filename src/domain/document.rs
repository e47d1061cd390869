//! Request and result envelopes for writes, history and search.

use serde::{Deserialize, Serialize};

use rust_decimal::Decimal;

use super::entity::{Entity, EntityKind};
use super::id::{ExternalId, ObjectId, UniqueId};
use super::version::{Instant, VersionCorrection};

/// One stored row with its bitemporal intervals. `None` ends are `+∞`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document<T> {
    pub unique_id: UniqueId,
    pub version_from: Instant,
    pub version_to: Option<Instant>,
    pub correction_from: Instant,
    pub correction_to: Option<Instant>,
    pub value: T,
}

impl<T> Document<T> {
    /// True if this row is valid at both instants.
    #[must_use]
    pub fn is_valid_at(&self, version: Instant, correction: Instant) -> bool {
        self.version_from <= version
            && self.version_to.map_or(true, |to| version < to)
            && self.correction_from <= correction
            && self.correction_to.map_or(true, |to| correction < to)
    }

    /// True if neither interval has been closed.
    #[must_use]
    pub fn is_current(&self) -> bool {
        self.version_to.is_none() && self.correction_to.is_none()
    }
}

/// Page selection. A `size` of zero asks for the total count only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PagingRequest {
    pub first: usize,
    pub size: usize,
}

impl PagingRequest {
    pub const ALL: Self = Self {
        first: 0,
        size: usize::MAX,
    };
    pub const NONE: Self = Self { first: 0, size: 0 };

    /// 1-based page number of `size` items.
    #[must_use]
    pub fn page(page: usize, size: usize) -> Self {
        Self {
            first: page.saturating_sub(1).saturating_mul(size),
            size,
        }
    }

    #[must_use]
    pub fn limit(&self) -> i64 {
        i64::try_from(self.size).unwrap_or(i64::MAX)
    }

    #[must_use]
    pub fn offset(&self) -> i64 {
        i64::try_from(self.first).unwrap_or(i64::MAX)
    }
}

impl Default for PagingRequest {
    fn default() -> Self {
        Self::ALL
    }
}

/// The page actually returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Paging {
    pub first: usize,
    pub size: usize,
    pub total: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult<T> {
    pub documents: Vec<Document<T>>,
    pub paging: Paging,
    /// The instants the search was resolved at.
    pub version_correction: VersionCorrection,
}

impl<T> SearchResult<T> {
    pub fn values(&self) -> impl Iterator<Item = &T> {
        self.documents.iter().map(|doc| &doc.value)
    }
}

/// Rows of one object, optionally restricted to instant ranges.
///
/// A range whose ends are equal selects the rows valid at that point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRequest {
    pub object_id: ObjectId,
    pub versions_from: Option<Instant>,
    pub versions_to: Option<Instant>,
    pub corrections_from: Option<Instant>,
    pub corrections_to: Option<Instant>,
    pub paging: PagingRequest,
}

impl HistoryRequest {
    #[must_use]
    pub fn all(object_id: ObjectId) -> Self {
        Self {
            object_id,
            versions_from: None,
            versions_to: None,
            corrections_from: None,
            corrections_to: None,
            paging: PagingRequest::ALL,
        }
    }

    #[must_use]
    pub fn with_versions(mut self, from: Option<Instant>, to: Option<Instant>) -> Self {
        self.versions_from = from;
        self.versions_to = to;
        self
    }

    #[must_use]
    pub fn with_corrections(mut self, from: Option<Instant>, to: Option<Instant>) -> Self {
        self.corrections_from = from;
        self.corrections_to = to;
        self
    }

    #[must_use]
    pub fn with_paging(mut self, paging: PagingRequest) -> Self {
        self.paging = paging;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PortfolioSearchRequest {
    pub object_ids: Option<Vec<ObjectId>>,
    /// Name pattern with `*` and `?` wildcards, matched case-insensitively.
    pub name: Option<String>,
    pub version_correction: VersionCorrection,
    pub paging: PagingRequest,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PositionSearchRequest {
    pub object_ids: Option<Vec<ObjectId>>,
    /// Restrict to positions held directly by these nodes.
    pub node_ids: Option<Vec<ObjectId>>,
    pub min_quantity: Option<Decimal>,
    pub max_quantity: Option<Decimal>,
    pub security_key: Option<ExternalId>,
    pub version_correction: VersionCorrection,
    pub paging: PagingRequest,
}

/// A write against the store.
///
/// The kind is taken from the entity, or from the target's scheme for
/// removals. New nodes, positions and trades name their parent through the
/// payload's parent id.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteRequest {
    Add(Entity),
    Update { target: UniqueId, entity: Entity },
    Remove { target: UniqueId },
    Correct { target: UniqueId, entity: Entity },
}

impl WriteRequest {
    #[must_use]
    pub fn operation(&self) -> &'static str {
        match self {
            Self::Add(_) => "add",
            Self::Update { .. } => "update",
            Self::Remove { .. } => "remove",
            Self::Correct { .. } => "correct",
        }
    }

    #[must_use]
    pub fn entity_kind(&self) -> Option<EntityKind> {
        match self {
            Self::Add(entity)
            | Self::Update { entity, .. }
            | Self::Correct { entity, .. } => Some(entity.kind()),
            Self::Remove { .. } => None,
        }
    }
}

/// Outcome of a write.
///
/// For a removal, `unique_id` names the closed row and both instants are
/// the moment it was closed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteReceipt {
    pub unique_id: UniqueId,
    pub version_from: Instant,
    pub correction_from: Instant,
}
