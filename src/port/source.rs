//! Read port shared by the database store and the caching layer.

use std::sync::Arc;

use crate::domain::{
    Entity, EntityKind, IdCodec, ObjectId, Portfolio, PortfolioNode, Position, Trade, UniqueId,
    VersionCorrection,
};
use crate::error::Result;

use super::change::ChangeManager;

/// Resolves identifiers to materialized entities.
///
/// Portfolio and node reads return whole subtrees, and their root carries a
/// snapshot id that reproduces the same tree when read back. A row id pins
/// the root row; an unversioned id or a "latest" axis resolves at the
/// current instant.
pub trait PositionSource: Send + Sync {
    fn portfolio(&self, id: &UniqueId, vc: VersionCorrection) -> Result<Arc<Portfolio>>;

    fn portfolio_at(&self, id: &ObjectId, vc: VersionCorrection) -> Result<Arc<Portfolio>>;

    fn node(&self, id: &UniqueId, vc: VersionCorrection) -> Result<Arc<PortfolioNode>>;

    fn node_at(&self, id: &ObjectId, vc: VersionCorrection) -> Result<Arc<PortfolioNode>>;

    /// Unversioned ids resolve to the current row.
    fn position(&self, id: &UniqueId) -> Result<Arc<Position>>;

    fn position_at(&self, id: &ObjectId, vc: VersionCorrection) -> Result<Arc<Position>>;

    /// Unversioned ids resolve to the current row.
    fn trade(&self, id: &UniqueId) -> Result<Arc<Trade>>;

    fn trade_at(&self, id: &ObjectId, vc: VersionCorrection) -> Result<Arc<Trade>>;

    fn change_manager(&self) -> &ChangeManager;
}

/// Read any entity by unique id, dispatching on its scheme.
///
/// # Errors
/// Returns [`crate::Error::InvalidIdentifier`] for a foreign scheme, and any
/// error of the underlying read.
pub fn get_entity<S: PositionSource + ?Sized>(
    source: &S,
    codec: &IdCodec,
    id: &UniqueId,
    vc: VersionCorrection,
) -> Result<Entity> {
    Ok(match codec.kind_of(id.scheme())? {
        EntityKind::Portfolio => Entity::Portfolio(source.portfolio(id, vc)?),
        EntityKind::Node => Entity::Node(source.node(id, vc)?),
        EntityKind::Position if id.is_versioned() => Entity::Position(source.position(id)?),
        EntityKind::Position => Entity::Position(source.position_at(&id.object_id(), vc)?),
        EntityKind::Trade if id.is_versioned() => Entity::Trade(source.trade(id)?),
        EntityKind::Trade => Entity::Trade(source.trade_at(&id.object_id(), vc)?),
    })
}
