//! [`PositionSource`] decorator backed by the front and backing caches.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, trace, warn};

use super::backing::{BackingCache, MemoryBackingCache};
use super::front::{FrontCache, Retention};
use super::{exact_instants, CacheKey};
use crate::domain::{
    EntityKind, IdCodec, IdVersion, ObjectId, Portfolio, PortfolioNode, Position, Trade,
    UniqueId, VersionCorrection,
};
use crate::error::Result;
use crate::infrastructure::config::CacheConfig;
use crate::port::{ChangeEvent, ChangeListener, ChangeManager, PositionSource};

/// Point-in-time view of the cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub front_hits: u64,
    pub backing_hits: u64,
    pub misses: u64,
    /// Requests that could not be keyed and went straight to the source.
    pub bypasses: u64,
}

#[derive(Default)]
struct Counters {
    front_hits: AtomicU64,
    backing_hits: AtomicU64,
    misses: AtomicU64,
    bypasses: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> CacheStats {
        CacheStats {
            front_hits: self.front_hits.load(Ordering::Relaxed),
            backing_hits: self.backing_hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            bypasses: self.bypasses.load(Ordering::Relaxed),
        }
    }
}

/// Forwards the wrapped source's events to the cache's own subscribers.
struct Republisher {
    target: Arc<ChangeManager>,
}

impl ChangeListener for Republisher {
    fn entity_changed(&self, event: &ChangeEvent) {
        self.target.publish(event.clone());
    }
}

/// Caches exact reads of a [`PositionSource`].
///
/// A request is cacheable when its key pins one result forever: a snapshot
/// id, a row id for positions and trades, or a row or object id for trees
/// read at instants with no "latest" axis. Everything else bypasses both
/// tiers. Change events are republished, never used for eviction.
pub struct CachingPositionSource<S: PositionSource> {
    inner: Arc<S>,
    codec: IdCodec,
    portfolios: FrontCache<Portfolio>,
    nodes: FrontCache<PortfolioNode>,
    positions: FrontCache<Position>,
    trades: FrontCache<Trade>,
    backing: Arc<dyn BackingCache>,
    changes: Arc<ChangeManager>,
    republisher: Arc<dyn ChangeListener>,
    counters: Counters,
}

impl<S: PositionSource> std::fmt::Debug for CachingPositionSource<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachingPositionSource")
            .field("portfolios", &self.portfolios)
            .field("nodes", &self.nodes)
            .field("positions", &self.positions)
            .field("trades", &self.trades)
            .field("backing", &self.backing.len())
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl<S: PositionSource> CachingPositionSource<S> {
    /// Wrap `inner` and start republishing its change events.
    pub fn new(
        inner: Arc<S>,
        codec: IdCodec,
        retention: Retention,
        backing: Arc<dyn BackingCache>,
    ) -> Self {
        let changes = Arc::new(ChangeManager::new());
        let republisher: Arc<dyn ChangeListener> = Arc::new(Republisher {
            target: Arc::clone(&changes),
        });
        inner.change_manager().add_listener(Arc::clone(&republisher));
        Self {
            inner,
            codec,
            portfolios: FrontCache::new(retention),
            nodes: FrontCache::new(retention),
            positions: FrontCache::new(retention),
            trades: FrontCache::new(retention),
            backing,
            changes,
            republisher,
            counters: Counters::default(),
        }
    }

    /// Wrap `inner` with an in-memory backing cache sized by `config`.
    pub fn from_config(inner: Arc<S>, codec: IdCodec, config: &CacheConfig) -> Self {
        let backing: Arc<dyn BackingCache> = Arc::new(MemoryBackingCache::from_config(config));
        Self::new(inner, codec, Retention::from(config), backing)
    }

    #[must_use]
    pub fn inner(&self) -> &Arc<S> {
        &self.inner
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        self.counters.snapshot()
    }

    /// Drop front entries whose values have been reclaimed.
    pub fn purge(&self) -> usize {
        let purged = self.portfolios.purge()
            + self.nodes.purge()
            + self.positions.purge()
            + self.trades.purge();
        debug!(purged, "Purged front cache");
        purged
    }

    fn tree_key(&self, kind: EntityKind, id: &UniqueId, vc: VersionCorrection) -> Option<CacheKey> {
        match self.codec.decode_as(kind, id).ok()?.version {
            IdVersion::Snapshot(_) => Some(CacheKey::new(kind, id.as_str(), None)),
            IdVersion::Row(_) => CacheKey::exact(kind, id.as_str(), vc),
            IdVersion::Latest => None,
        }
    }

    fn row_key(&self, kind: EntityKind, id: &UniqueId) -> Option<CacheKey> {
        match self.codec.decode_as(kind, id).ok()?.version {
            IdVersion::Row(_) => Some(CacheKey::new(kind, id.as_str(), None)),
            IdVersion::Latest | IdVersion::Snapshot(_) => None,
        }
    }

    /// Front, then backing, then the source. A freshly loaded value goes to
    /// the backing tier before the front tier, and the front tier's winner
    /// is returned.
    fn lookup<V>(
        &self,
        front: &FrontCache<V>,
        key: Option<CacheKey>,
        load: impl FnOnce() -> Result<Arc<V>>,
    ) -> Result<(Arc<V>, bool)>
    where
        V: Serialize + DeserializeOwned,
    {
        let Some(key) = key else {
            Counters::bump(&self.counters.bypasses);
            return Ok((load()?, false));
        };
        let mut missed = false;
        let value = front.get_or_insert_with(key.clone(), || {
            missed = true;
            self.load_through_backing(&key, load)
        })?;
        if !missed {
            Counters::bump(&self.counters.front_hits);
            trace!(%key, "Front cache hit");
        }
        Ok((value, true))
    }

    fn load_through_backing<V>(
        &self,
        key: &CacheKey,
        load: impl FnOnce() -> Result<Arc<V>>,
    ) -> Result<Arc<V>>
    where
        V: Serialize + DeserializeOwned,
    {
        if let Some(bytes) = self.backing.get(key) {
            match serde_json::from_slice::<V>(&bytes) {
                Ok(value) => {
                    Counters::bump(&self.counters.backing_hits);
                    trace!(%key, "Backing cache hit");
                    return Ok(Arc::new(value));
                }
                Err(e) => warn!(%key, error = %e, "Discarding undecodable backing entry"),
            }
        }

        Counters::bump(&self.counters.misses);
        let value = load()?;
        match serde_json::to_vec(value.as_ref()) {
            Ok(bytes) => self.backing.put(key.clone(), bytes),
            Err(e) => warn!(%key, error = %e, "Could not serialize for backing cache"),
        }
        Ok(value)
    }

    /// Instants under which a tree's row-id nodes are registered: the
    /// snapshot token's instants and the exact instants of the read.
    fn registrations(&self, root_id: Option<&UniqueId>, vc: VersionCorrection) -> Vec<(i64, i64)> {
        let snapshot = root_id
            .and_then(|id| self.codec.decode(id).ok())
            .and_then(|decoded| match decoded.version {
                IdVersion::Snapshot(token) => Some((token.version, token.correction)),
                _ => None,
            });
        let mut at: Vec<(i64, i64)> = snapshot.into_iter().chain(exact_instants(vc)).collect();
        at.dedup();
        at
    }

    fn snapshot_key(&self, kind: EntityKind, id: Option<&UniqueId>) -> Option<CacheKey> {
        let id = id?;
        matches!(self.codec.decode(id).ok()?.version, IdVersion::Snapshot(_))
            .then(|| CacheKey::new(kind, id.as_str(), None))
    }

    fn register_portfolio(&self, portfolio: &Arc<Portfolio>, vc: VersionCorrection) {
        if let Some(key) = self.snapshot_key(EntityKind::Portfolio, portfolio.unique_id.as_ref()) {
            self.portfolios.put_if_absent(key, Arc::clone(portfolio));
        }
        let at = self.registrations(portfolio.unique_id.as_ref(), vc);
        self.register_subtree(&portfolio.root, &at);
    }

    fn register_node(&self, node: &Arc<PortfolioNode>, vc: VersionCorrection) {
        if let Some(key) = self.snapshot_key(EntityKind::Node, node.unique_id.as_ref()) {
            self.nodes.put_if_absent(key, Arc::clone(node));
        }
        let at = self.registrations(node.unique_id.as_ref(), vc);
        self.register_subtree(node, &at);
    }

    /// Every row-id node, position and trade below and including `node`.
    fn register_subtree(&self, node: &Arc<PortfolioNode>, at: &[(i64, i64)]) {
        self.register_row_node(node, at);
        for position in &node.positions {
            self.register_position(position);
        }
        for child in &node.child_nodes {
            self.register_subtree(child, at);
        }
    }

    fn register_row_node(&self, node: &Arc<PortfolioNode>, at: &[(i64, i64)]) {
        let Some(id) = node.unique_id.as_ref() else {
            return;
        };
        if self.row_key(EntityKind::Node, id).is_none() {
            return;
        }
        for instants in at {
            self.nodes.put_if_absent(
                CacheKey::new(EntityKind::Node, id.as_str(), Some(*instants)),
                Arc::clone(node),
            );
        }
    }

    fn register_position(&self, position: &Arc<Position>) {
        if let Some(key) = position
            .unique_id
            .as_ref()
            .and_then(|id| self.row_key(EntityKind::Position, id))
        {
            self.positions.put_if_absent(key, Arc::clone(position));
        }
        for trade in &position.trades {
            if let Some(key) = trade
                .unique_id
                .as_ref()
                .and_then(|id| self.row_key(EntityKind::Trade, id))
            {
                self.trades.put_if_absent(key, Arc::clone(trade));
            }
        }
    }
}

impl<S: PositionSource> Drop for CachingPositionSource<S> {
    fn drop(&mut self) {
        self.inner.change_manager().remove_listener(&self.republisher);
    }
}

impl<S: PositionSource> PositionSource for CachingPositionSource<S> {
    fn portfolio(&self, id: &UniqueId, vc: VersionCorrection) -> Result<Arc<Portfolio>> {
        let key = self.tree_key(EntityKind::Portfolio, id, vc);
        let (value, cached) = self.lookup(&self.portfolios, key, || self.inner.portfolio(id, vc))?;
        if cached {
            self.register_portfolio(&value, vc);
        }
        Ok(value)
    }

    fn portfolio_at(&self, id: &ObjectId, vc: VersionCorrection) -> Result<Arc<Portfolio>> {
        let key = CacheKey::exact(EntityKind::Portfolio, id.as_str(), vc);
        let (value, cached) = self.lookup(&self.portfolios, key, || self.inner.portfolio_at(id, vc))?;
        if cached {
            self.register_portfolio(&value, vc);
        }
        Ok(value)
    }

    fn node(&self, id: &UniqueId, vc: VersionCorrection) -> Result<Arc<PortfolioNode>> {
        let key = self.tree_key(EntityKind::Node, id, vc);
        let (value, cached) = self.lookup(&self.nodes, key, || self.inner.node(id, vc))?;
        if cached {
            self.register_node(&value, vc);
        }
        Ok(value)
    }

    fn node_at(&self, id: &ObjectId, vc: VersionCorrection) -> Result<Arc<PortfolioNode>> {
        let key = CacheKey::exact(EntityKind::Node, id.as_str(), vc);
        let (value, cached) = self.lookup(&self.nodes, key, || self.inner.node_at(id, vc))?;
        if cached {
            self.register_node(&value, vc);
        }
        Ok(value)
    }

    fn position(&self, id: &UniqueId) -> Result<Arc<Position>> {
        let key = self.row_key(EntityKind::Position, id);
        let (value, cached) = self.lookup(&self.positions, key, || self.inner.position(id))?;
        if cached {
            self.register_position(&value);
        }
        Ok(value)
    }

    fn position_at(&self, id: &ObjectId, vc: VersionCorrection) -> Result<Arc<Position>> {
        let key = CacheKey::exact(EntityKind::Position, id.as_str(), vc);
        let (value, cached) =
            self.lookup(&self.positions, key, || self.inner.position_at(id, vc))?;
        if cached {
            self.register_position(&value);
        }
        Ok(value)
    }

    fn trade(&self, id: &UniqueId) -> Result<Arc<Trade>> {
        let key = self.row_key(EntityKind::Trade, id);
        Ok(self.lookup(&self.trades, key, || self.inner.trade(id))?.0)
    }

    fn trade_at(&self, id: &ObjectId, vc: VersionCorrection) -> Result<Arc<Trade>> {
        let key = CacheKey::exact(EntityKind::Trade, id.as_str(), vc);
        Ok(self.lookup(&self.trades, key, || self.inner.trade_at(id, vc))?.0)
    }

    fn change_manager(&self) -> &ChangeManager {
        &self.changes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ExternalId, VersionToken};
    use crate::error::Error;
    use crate::port::ChangeType;
    use chrono::{TimeZone, Utc};
    use parking_lot::Mutex;
    use rust_decimal_macros::dec;

    /// Source that counts loads and serves one fixed tree.
    struct Fixed {
        codec: IdCodec,
        loads: Mutex<usize>,
        changes: ChangeManager,
    }

    impl Fixed {
        fn new() -> Self {
            Self {
                codec: IdCodec::default(),
                loads: Mutex::new(0),
                changes: ChangeManager::new(),
            }
        }

        fn loads(&self) -> usize {
            *self.loads.lock()
        }

        fn tree(&self, root_id: UniqueId) -> PortfolioNode {
            let child_id = self.codec.row_id(EntityKind::Node, 1002, 1002).unwrap();
            let position_id = self.codec.row_id(EntityKind::Position, 1003, 1003).unwrap();
            let mut position = Position::new(dec!(100), ExternalId::new("T", "X"));
            position.unique_id = Some(position_id);
            let mut child = PortfolioNode::new("child").with_position(position);
            child.unique_id = Some(child_id);
            let mut root = PortfolioNode::new("root").with_child(child);
            root.unique_id = Some(root_id);
            root
        }
    }

    impl PositionSource for Fixed {
        fn portfolio(&self, _: &UniqueId, _: VersionCorrection) -> Result<Arc<Portfolio>> {
            Err(Error::NotFound("portfolio".into()))
        }

        fn portfolio_at(&self, _: &ObjectId, _: VersionCorrection) -> Result<Arc<Portfolio>> {
            Err(Error::NotFound("portfolio".into()))
        }

        fn node(&self, id: &UniqueId, _: VersionCorrection) -> Result<Arc<PortfolioNode>> {
            *self.loads.lock() += 1;
            Ok(Arc::new(self.tree(id.clone())))
        }

        fn node_at(&self, id: &ObjectId, _: VersionCorrection) -> Result<Arc<PortfolioNode>> {
            *self.loads.lock() += 1;
            let token = VersionToken::new(10_000_000, 10_000_000);
            let oid = self.codec.oid_as(EntityKind::Node, id)?;
            Ok(Arc::new(self.tree(self.codec.snapshot_id(EntityKind::Node, oid, token))))
        }

        fn position(&self, id: &UniqueId) -> Result<Arc<Position>> {
            *self.loads.lock() += 1;
            Err(Error::NotFound(id.to_string()))
        }

        fn position_at(&self, id: &ObjectId, _: VersionCorrection) -> Result<Arc<Position>> {
            Err(Error::NotFound(id.to_string()))
        }

        fn trade(&self, id: &UniqueId) -> Result<Arc<Trade>> {
            Err(Error::NotFound(id.to_string()))
        }

        fn trade_at(&self, id: &ObjectId, _: VersionCorrection) -> Result<Arc<Trade>> {
            Err(Error::NotFound(id.to_string()))
        }

        fn change_manager(&self) -> &ChangeManager {
            &self.changes
        }
    }

    fn cache(inner: &Arc<Fixed>) -> CachingPositionSource<Fixed> {
        CachingPositionSource::new(
            Arc::clone(inner),
            IdCodec::default(),
            Retention::Weak,
            Arc::new(MemoryBackingCache::new(100, None)),
        )
    }

    fn at_ten() -> VersionCorrection {
        VersionCorrection::at(Utc.timestamp_opt(10, 0).unwrap())
    }

    #[test]
    fn exact_reads_hit_after_the_first_load() {
        let inner = Arc::new(Fixed::new());
        let cache = cache(&inner);
        let id = IdCodec::default().row_id(EntityKind::Node, 1001, 1001).unwrap();

        let first = cache.node(&id, at_ten()).unwrap();
        let second = cache.node(&id, at_ten()).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(inner.loads(), 1);
        assert_eq!(cache.stats().front_hits, 1);
    }

    #[test]
    fn latest_reads_bypass() {
        let inner = Arc::new(Fixed::new());
        let cache = cache(&inner);
        let id = IdCodec::default().row_id(EntityKind::Node, 1001, 1001).unwrap();

        cache.node(&id, VersionCorrection::LATEST).unwrap();
        cache.node(&id, VersionCorrection::LATEST).unwrap();
        assert_eq!(inner.loads(), 2);
        assert_eq!(cache.stats().bypasses, 2);
    }

    #[test]
    fn descendants_are_registered() {
        let inner = Arc::new(Fixed::new());
        let cache = cache(&inner);
        let codec = IdCodec::default();
        let root = codec.row_id(EntityKind::Node, 1001, 1001).unwrap();
        let child = codec.row_id(EntityKind::Node, 1002, 1002).unwrap();

        let tree = cache.node(&root, at_ten()).unwrap();
        let sub = cache.node(&child, at_ten()).unwrap();
        assert!(Arc::ptr_eq(&tree.child_nodes[0], &sub));

        let position_id = codec.row_id(EntityKind::Position, 1003, 1003).unwrap();
        let position = cache.position(&position_id).unwrap();
        assert!(Arc::ptr_eq(&tree.child_nodes[0].positions[0], &position));
        assert_eq!(inner.loads(), 1);
    }

    #[test]
    fn snapshot_roots_are_registered_under_their_token() {
        let inner = Arc::new(Fixed::new());
        let cache = cache(&inner);
        let object_id = IdCodec::default().object_id(EntityKind::Node, 1001);

        let tree = cache.node_at(&object_id, at_ten()).unwrap();
        let snapshot = tree.unique_id.clone().unwrap();
        let again = cache.node(&snapshot, VersionCorrection::LATEST).unwrap();
        assert!(Arc::ptr_eq(&tree, &again));
        assert_eq!(inner.loads(), 1);
    }

    #[test]
    fn descendants_hit_at_the_instants_the_tree_was_read_at() {
        let inner = Arc::new(Fixed::new());
        let cache = cache(&inner);
        let codec = IdCodec::default();
        let object_id = codec.object_id(EntityKind::Node, 1001);
        let child = codec.row_id(EntityKind::Node, 1002, 1002).unwrap();
        let later = VersionCorrection::at(Utc.timestamp_opt(310, 0).unwrap());

        let tree = cache.node_at(&object_id, later).unwrap();
        let sub = cache.node(&child, later).unwrap();
        assert!(Arc::ptr_eq(&tree.child_nodes[0], &sub));

        let token_instants = VersionCorrection::at(Utc.timestamp_opt(10, 0).unwrap());
        let same = cache.node(&child, token_instants).unwrap();
        assert!(Arc::ptr_eq(&sub, &same));
        assert_eq!(inner.loads(), 1);
        assert_eq!(
            cache.stats(),
            CacheStats {
                front_hits: 2,
                misses: 1,
                ..CacheStats::default()
            }
        );
    }

    #[test]
    fn errors_are_not_cached() {
        let inner = Arc::new(Fixed::new());
        let cache = cache(&inner);
        let id = IdCodec::default().row_id(EntityKind::Position, 1005, 1005).unwrap();
        assert!(cache.position(&id).is_err());
        assert!(cache.position(&id).is_err());
        assert_eq!(inner.loads(), 2);
    }

    #[test]
    fn events_are_republished_until_dropped() {
        let inner = Arc::new(Fixed::new());
        let cache = cache(&inner);
        let mut rx = cache.change_manager().subscribe();
        let event = ChangeEvent {
            change_type: ChangeType::Changed,
            object_id: IdCodec::default().object_id(EntityKind::Node, 1001),
            version_from: None,
            version_to: None,
            version_instant: Utc::now(),
        };
        inner.change_manager().publish(event.clone());
        assert_eq!(rx.try_recv().unwrap(), event);

        drop(cache);
        inner.change_manager().publish(event);
        assert!(rx.try_recv().is_err());
    }
}
