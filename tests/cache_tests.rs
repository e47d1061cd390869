//! The caching source in front of a real store.

mod harness;
mod support;

use std::sync::{Arc, Barrier};
use std::thread;

use folio_store::application::cache::{CachingPositionSource, MemoryBackingCache, Retention};
use folio_store::adapter::outbound::sqlite::SqlitePositionMaster;
use folio_store::domain::{IdVersion, VersionCorrection};
use folio_store::port::{ChangeType, PositionMaster, PositionSource};
use rust_decimal_macros::dec;

use harness::temp_db::TempDb;
use support::fixtures::{grid_portfolio, holding, small_portfolio};

fn caching(master: &Arc<SqlitePositionMaster>) -> CachingPositionSource<SqlitePositionMaster> {
    CachingPositionSource::new(
        Arc::clone(master),
        master.codec().clone(),
        Retention::Weak,
        Arc::new(MemoryBackingCache::new(1_000, None)),
    )
}

#[test]
fn concurrent_snapshot_reads_share_one_instance() {
    let db = TempDb::create("cache-concurrent");
    let master = Arc::new(db.master());
    let added = master.add(grid_portfolio("Wide", 3, 2, 2)).unwrap();
    let cache = caching(&master);
    let snapshot_id = master
        .portfolio(&added.unique_id.to_latest(), VersionCorrection::LATEST)
        .unwrap()
        .unique_id
        .clone()
        .unwrap();

    const READERS: usize = 8;
    let barrier = Barrier::new(READERS);
    let results: Vec<_> = thread::scope(|s| {
        let handles: Vec<_> = (0..READERS)
            .map(|_| {
                s.spawn(|| {
                    barrier.wait();
                    cache.portfolio(&snapshot_id, VersionCorrection::LATEST).unwrap()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let first = &results[0];
    assert!(results.iter().all(|r| Arc::ptr_eq(r, first)));
    let stats = cache.stats();
    assert_eq!(stats.front_hits + stats.backing_hits + stats.misses, READERS as u64);
    assert!(stats.misses >= 1);
}

#[test]
fn latest_reads_see_every_write() {
    let db = TempDb::create("cache-latest");
    let master = Arc::new(db.master());
    let added = master.add(small_portfolio()).unwrap();
    let cache = caching(&master);
    let oid = added.unique_id.object_id();

    let before = cache.portfolio_at(&oid, VersionCorrection::LATEST).unwrap();
    assert_eq!(before.root.positions[0].quantity, dec!(100));
    let position_id = before.root.positions[0].unique_id.clone().unwrap();
    master.update(&position_id, holding(dec!(150), "AAPL")).unwrap();

    let after = cache.portfolio_at(&oid, VersionCorrection::LATEST).unwrap();
    assert_eq!(after.root.positions[0].quantity, dec!(150));
    assert_eq!(cache.stats().bypasses, 2);
    assert_eq!(cache.stats().misses, 0);
}

#[test]
fn exact_reads_are_served_from_the_cache() {
    let db = TempDb::create("cache-exact");
    let master = Arc::new(db.master());
    let added = master.add(small_portfolio()).unwrap();
    let cache = caching(&master);
    let oid = added.unique_id.object_id();
    let at = VersionCorrection::at(added.version_from);

    let first = cache.portfolio_at(&oid, at).unwrap();
    let second = cache.portfolio_at(&oid, at).unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(cache.stats().misses, 1);
    assert_eq!(cache.stats().front_hits, 1);

    drop(first);
    drop(second);
    let third = cache.portfolio_at(&oid, at).unwrap();
    assert_eq!(third.root.positions[0].quantity, dec!(100));
    assert_eq!(cache.stats().backing_hits, 1);
}

#[test]
fn tree_reads_register_their_descendants() {
    let db = TempDb::create("cache-register");
    let master = Arc::new(db.master());
    let codec = master.codec().clone();
    let added = master.add(small_portfolio()).unwrap();
    let cache = caching(&master);
    let snapshot_id = master
        .portfolio(&added.unique_id.to_latest(), VersionCorrection::LATEST)
        .unwrap()
        .unique_id
        .clone()
        .unwrap();
    let IdVersion::Snapshot(token) = codec.decode(&snapshot_id).unwrap().version else {
        panic!("expected a snapshot id");
    };

    let tree = cache.portfolio(&snapshot_id, VersionCorrection::LATEST).unwrap();
    assert_eq!(cache.stats().misses, 1);

    let child = &tree.root.child_nodes[0];
    let child_id = child.unique_id.clone().unwrap();
    let node = cache
        .node(&child_id, token.version_correction().unwrap())
        .unwrap();
    assert!(Arc::ptr_eq(&node, child));

    let held = &tree.root.positions[0];
    let position = cache.position(held.unique_id.as_ref().unwrap()).unwrap();
    assert!(Arc::ptr_eq(&position, held));

    let stats = cache.stats();
    assert_eq!(stats.front_hits, 2);
    assert_eq!(stats.misses, 1);
}

#[test]
fn sub_nodes_hit_at_the_instants_their_tree_was_read_at() {
    let db = TempDb::create("cache-register-later");
    let master = Arc::new(db.master());
    let added = master.add(small_portfolio()).unwrap();
    let cache = caching(&master);
    let at = VersionCorrection::at(added.version_from + chrono::Duration::minutes(5));

    let tree = cache.portfolio_at(&added.unique_id.object_id(), at).unwrap();
    let child = &tree.root.child_nodes[0];
    let node = cache.node(child.unique_id.as_ref().unwrap(), at).unwrap();

    assert!(Arc::ptr_eq(&node, child));
    assert_eq!(cache.stats().misses, 1);
    assert_eq!(cache.stats().front_hits, 1);
}

#[test]
fn change_events_are_republished_without_eviction() {
    let db = TempDb::create("cache-events");
    let master = Arc::new(db.master());
    let added = master.add(small_portfolio()).unwrap();
    let cache = caching(&master);
    let mut events = cache.change_manager().subscribe();

    let oid = added.unique_id.object_id();
    let at = VersionCorrection::at(added.version_from);
    let pinned = cache.portfolio_at(&oid, at).unwrap();
    let position_id = pinned.root.positions[0].unique_id.clone().unwrap();
    master.update(&position_id, holding(dec!(150), "AAPL")).unwrap();

    let event = events.try_recv().unwrap();
    assert_eq!(event.change_type, ChangeType::Changed);
    assert_eq!(event.object_id, position_id.object_id());

    let again = cache.portfolio_at(&oid, at).unwrap();
    assert!(Arc::ptr_eq(&pinned, &again));
    assert_eq!(again.root.positions[0].quantity, dec!(100));
}
