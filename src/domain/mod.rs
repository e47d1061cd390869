//! Storage-agnostic domain types.

pub mod clock;
pub mod codec;
pub mod dedup;
pub mod document;
pub mod entity;
pub mod id;
pub mod tree;
pub mod version;

pub use clock::{Clock, SteppingClock, SystemClock};
pub use codec::{DecodedId, IdCodec, IdVersion, VersionToken};
pub use dedup::IdDeduplicator;
pub use document::{
    Document, HistoryRequest, Paging, PagingRequest, PortfolioSearchRequest,
    PositionSearchRequest, SearchResult, WriteReceipt, WriteRequest,
};
pub use entity::{
    Attributes, Entity, EntityKind, Portfolio, PortfolioNode, Position, SecurityLink, Trade,
};
pub use id::{ExternalId, ExternalIdBundle, ObjectId, UniqueId};
pub use tree::{Bounds, EncodedNode, NestedSetDecoder, NodeIdx, TreeArena};
pub use version::{Instant, VersionCorrection};
