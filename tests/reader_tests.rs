//! Point-in-time reads, snapshot ids and subtree materialization.

mod harness;
mod support;

use folio_store::domain::{
    EntityKind, IdCodec, IdVersion, Portfolio, PortfolioNode, UniqueId, VersionCorrection,
};
use folio_store::port::{get_entity, PositionMaster, PositionSource};
use folio_store::Error;
use rust_decimal_macros::dec;

use harness::temp_db::TempDb;
use support::fixtures::{grid_node_count, grid_portfolio, holding, small_portfolio};

#[test]
fn portfolio_history_answers_as_of_queries() {
    let db = TempDb::create("reader-scenario");
    let master = db.master();
    let added = master.add(small_portfolio()).unwrap();
    let portfolio_oid = added.unique_id.object_id();

    let first = master.portfolio_at(&portfolio_oid, VersionCorrection::LATEST).unwrap();
    assert_eq!(first.root.name, "R");
    assert_eq!(first.root.child_nodes[0].name, "C");
    let position_id = first.root.positions[0].unique_id.clone().unwrap();

    let updated = master
        .update(&position_id, holding(dec!(150), "AAPL"))
        .unwrap();

    let before = master
        .portfolio_at(
            &portfolio_oid,
            VersionCorrection::version_as_of(updated.version_from - chrono::Duration::microseconds(1)),
        )
        .unwrap();
    assert_eq!(before.root.positions[0].quantity, dec!(100));

    let after = master
        .portfolio_at(&portfolio_oid, VersionCorrection::version_as_of(updated.version_from))
        .unwrap();
    assert_eq!(after.root.positions[0].quantity, dec!(150));
}

#[test]
fn snapshot_ids_reproduce_the_tree_they_came_from() {
    let db = TempDb::create("reader-snapshot");
    let master = db.master();
    let codec = master.codec().clone();
    let added = master.add(small_portfolio()).unwrap();

    let snapshot = master
        .portfolio(&added.unique_id.to_latest(), VersionCorrection::LATEST)
        .unwrap();
    let snapshot_id = snapshot.unique_id.clone().unwrap();
    assert!(matches!(
        codec.decode(&snapshot_id).unwrap().version,
        IdVersion::Snapshot(_)
    ));

    let position_id = snapshot.root.positions[0].unique_id.clone().unwrap();
    master
        .update(&position_id, holding(dec!(150), "AAPL"))
        .unwrap();
    let root = snapshot.root.unique_id.clone().unwrap();
    master.add(PortfolioNode::under(root, "D")).unwrap();

    let again = master.portfolio(&snapshot_id, VersionCorrection::LATEST).unwrap();
    assert_eq!(again.unique_id.as_ref(), Some(&snapshot_id));
    assert_eq!(again.root.positions[0].quantity, dec!(100));
    assert_eq!(again.root.child_nodes.len(), 1);
    assert_eq!(again.root, snapshot.root);

    let latest = master
        .portfolio(&added.unique_id.to_latest(), VersionCorrection::LATEST)
        .unwrap();
    assert_ne!(latest.unique_id.as_ref(), Some(&snapshot_id));
    assert_eq!(latest.root.positions[0].quantity, dec!(150));
    assert_eq!(latest.root.child_nodes.len(), 2);
}

#[test]
fn node_snapshots_cover_only_their_subtree() {
    let db = TempDb::create("reader-node");
    let master = db.master();
    let codec = master.codec().clone();
    let added = master.add(grid_portfolio("Grid", 2, 2, 1)).unwrap();
    let tree = master.portfolio(&added.unique_id, VersionCorrection::LATEST).unwrap();
    let branch = &tree.root.child_nodes[1];
    let branch_oid = branch.unique_id.as_ref().unwrap().object_id();

    let node = master.node_at(&branch_oid, VersionCorrection::LATEST).unwrap();
    assert_eq!(node.name, "n.1");
    assert_eq!(node.node_count(), grid_node_count(2, 1));
    assert_eq!(node.position_count(), 3);
    let node_id = node.unique_id.clone().unwrap();
    assert!(matches!(
        codec.decode_as(EntityKind::Node, &node_id).unwrap().version,
        IdVersion::Snapshot(_)
    ));

    let leaf = node.child_nodes[0].unique_id.clone().unwrap();
    master.add(PortfolioNode::under(leaf, "extra")).unwrap();
    let pinned = master.node(&node_id, VersionCorrection::LATEST).unwrap();
    assert_eq!(pinned.node_count(), grid_node_count(2, 1));
    let moved = master.node_at(&branch_oid, VersionCorrection::LATEST).unwrap();
    assert_eq!(moved.node_count(), grid_node_count(2, 1) + 1);
}

#[test]
fn row_ids_read_the_row_they_name() {
    let db = TempDb::create("reader-row");
    let master = db.master();
    let added = master.add(small_portfolio()).unwrap();
    let tree = master.portfolio(&added.unique_id, VersionCorrection::LATEST).unwrap();
    assert_eq!(tree.unique_id.as_ref(), Some(&added.unique_id));

    let root = tree.root.unique_id.clone().unwrap();
    master.add(PortfolioNode::under(root, "D")).unwrap();

    let old_row = master.portfolio(&added.unique_id, VersionCorrection::LATEST).unwrap();
    assert_eq!(old_row.root.child_nodes.len(), 1);
    let current = master
        .portfolio_at(&added.unique_id.object_id(), VersionCorrection::LATEST)
        .unwrap();
    assert_eq!(current.root.child_nodes.len(), 2);
}

#[test]
fn repeated_ids_in_one_tree_share_storage() {
    let db = TempDb::create("reader-dedup");
    let master = db.master();
    let portfolio = Portfolio::new(
        "Shared",
        PortfolioNode::new("R")
            .with_position(holding(dec!(1), "A"))
            .with_position(holding(dec!(2), "B"))
            .with_child(PortfolioNode::new("C")),
    );
    let added = master.add(portfolio).unwrap();
    let tree = master.portfolio(&added.unique_id, VersionCorrection::LATEST).unwrap();

    let root = &tree.root;
    let child = &root.child_nodes[0];
    assert!(root
        .portfolio_id
        .as_ref()
        .unwrap()
        .ptr_eq(child.portfolio_id.as_ref().unwrap()));
    let first = root.positions[0].parent_node_id.as_ref().unwrap();
    let second = root.positions[1].parent_node_id.as_ref().unwrap();
    assert!(first.ptr_eq(second));
}

#[test]
fn bad_and_unknown_ids_are_reported() {
    let db = TempDb::create("reader-errors");
    let master = db.master();
    let codec = IdCodec::default();

    let garbled: UniqueId = "DbPrt~abc".parse().unwrap();
    assert!(matches!(
        master.portfolio(&garbled, VersionCorrection::LATEST),
        Err(Error::InvalidIdentifier { .. })
    ));

    let foreign: UniqueId = "Other~12".parse().unwrap();
    assert!(matches!(
        get_entity(&master, &codec, &foreign, VersionCorrection::LATEST),
        Err(Error::InvalidIdentifier { .. })
    ));

    let missing = codec.object_id(EntityKind::Portfolio, 424_242);
    assert!(matches!(
        master.portfolio_at(&missing, VersionCorrection::LATEST),
        Err(Error::NotFound(_))
    ));

    let added = master.add(small_portfolio()).unwrap();
    let too_early = VersionCorrection::version_as_of(added.version_from - chrono::Duration::seconds(1));
    assert!(matches!(
        master.portfolio_at(&added.unique_id.object_id(), too_early),
        Err(Error::NotFound(_))
    ));
}

#[test]
fn any_entity_is_readable_by_its_id() {
    let db = TempDb::create("reader-entity");
    let master = db.master();
    let codec = master.codec().clone();
    let added = master.add(small_portfolio()).unwrap();
    let tree = master.portfolio(&added.unique_id, VersionCorrection::LATEST).unwrap();
    let position_id = tree.root.positions[0].unique_id.clone().unwrap();

    let entity = get_entity(&master, &codec, &position_id.to_latest(), VersionCorrection::LATEST)
        .unwrap();
    assert_eq!(entity.kind(), EntityKind::Position);
    assert_eq!(entity.unique_id(), Some(&position_id));

    let entity = get_entity(&master, &codec, &added.unique_id, VersionCorrection::LATEST).unwrap();
    assert_eq!(entity.kind(), EntityKind::Portfolio);
}
