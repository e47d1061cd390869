//! Object history and search over stored rows.

mod harness;
mod support;

use folio_store::domain::{
    Entity, HistoryRequest, PagingRequest, Portfolio, PortfolioNode, PortfolioSearchRequest,
    PositionSearchRequest, VersionCorrection,
};
use folio_store::port::{PositionMaster, PositionSource};
use folio_store::Error;
use rust_decimal_macros::dec;

use harness::temp_db::TempDb;
use support::fixtures::{holding, small_portfolio, ticker};

fn quantity(entity: &Entity) -> rust_decimal::Decimal {
    match entity {
        Entity::Position(position) => position.quantity,
        other => panic!("expected a position, got {}", other.kind()),
    }
}

#[test]
fn history_lists_rows_newest_first_with_paging() {
    let db = TempDb::create("history-paging");
    let master = db.master();
    let added = master.add(small_portfolio()).unwrap();
    let tree = master.portfolio(&added.unique_id, VersionCorrection::LATEST).unwrap();
    let mut current = tree.root.positions[0].unique_id.clone().unwrap();
    let object_id = current.object_id();

    let mut receipts = Vec::new();
    for q in [dec!(110), dec!(120), dec!(130)] {
        let receipt = master.update(&current, holding(q, "AAPL")).unwrap();
        current = receipt.unique_id.clone();
        receipts.push(receipt);
    }

    let all = master.history(&HistoryRequest::all(object_id.clone())).unwrap();
    assert_eq!(all.paging.total, 4);
    let quantities: Vec<_> = all.values().map(quantity).collect();
    assert_eq!(quantities, vec![dec!(130), dec!(120), dec!(110), dec!(100)]);
    assert!(all.documents[0].is_current());
    assert!(!all.documents[1].is_current());

    let second_page = master
        .history(&HistoryRequest::all(object_id.clone()).with_paging(PagingRequest::page(2, 3)))
        .unwrap();
    assert_eq!(second_page.paging.total, 4);
    assert_eq!(second_page.documents.len(), 1);
    assert_eq!(quantity(&second_page.documents[0].value), dec!(100));

    let at = receipts[1].version_from;
    let point = master
        .history(&HistoryRequest::all(object_id).with_versions(Some(at), Some(at)))
        .unwrap();
    assert_eq!(point.documents.len(), 1);
    assert_eq!(quantity(&point.documents[0].value), dec!(120));
}

#[test]
fn portfolio_history_materializes_each_structure() {
    let db = TempDb::create("history-portfolio");
    let master = db.master();
    let added = master.add(small_portfolio()).unwrap();
    let tree = master.portfolio(&added.unique_id, VersionCorrection::LATEST).unwrap();
    let root = tree.root.unique_id.clone().unwrap();
    master.add(PortfolioNode::under(root, "D")).unwrap();

    let history = master
        .history(&HistoryRequest::all(added.unique_id.object_id()))
        .unwrap();
    let children: Vec<usize> = history
        .values()
        .map(|entity| match entity {
            Entity::Portfolio(p) => p.root.child_nodes.len(),
            other => panic!("expected a portfolio, got {}", other.kind()),
        })
        .collect();
    assert_eq!(children, vec![2, 1]);
    assert_eq!(history.documents[1].unique_id, added.unique_id);
}

#[test]
fn inverted_history_range_is_rejected() {
    let db = TempDb::create("history-range");
    let master = db.master();
    let added = master.add(small_portfolio()).unwrap();
    let later = added.version_from + chrono::Duration::seconds(30);
    let request = HistoryRequest::all(added.unique_id.object_id())
        .with_versions(Some(later), Some(added.version_from));
    assert!(matches!(master.history(&request), Err(Error::InvalidArgument(_))));
}

#[test]
fn portfolios_are_found_by_name_pattern_and_instant() {
    let db = TempDb::create("search-portfolios");
    let master = db.master();
    master
        .add(Portfolio::new("Alpha Fund", PortfolioNode::new("root")))
        .unwrap();
    let beta = master
        .add(Portfolio::new("Beta Fund", PortfolioNode::new("root")))
        .unwrap();
    master
        .add(Portfolio::new("Gamma", PortfolioNode::new("root")))
        .unwrap();

    let funds = master
        .search_portfolios(&PortfolioSearchRequest {
            name: Some("*fund".into()),
            ..Default::default()
        })
        .unwrap();
    let names: Vec<_> = funds.values().map(|p| p.name.clone()).collect();
    assert_eq!(names, vec!["Alpha Fund", "Beta Fund"]);

    let single = master
        .search_portfolios(&PortfolioSearchRequest {
            name: Some("?eta*".into()),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(single.paging.total, 1);

    let early = master
        .search_portfolios(&PortfolioSearchRequest {
            version_correction: VersionCorrection::version_as_of(beta.version_from),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(early.paging.total, 2);

    let count_only = master
        .search_portfolios(&PortfolioSearchRequest {
            paging: PagingRequest::NONE,
            ..Default::default()
        })
        .unwrap();
    assert_eq!(count_only.paging.total, 3);
    assert!(count_only.documents.is_empty());
}

#[test]
fn positions_are_found_by_node_security_and_quantity() {
    let db = TempDb::create("search-positions");
    let master = db.master();
    let added = master.add(small_portfolio()).unwrap();
    let tree = master.portfolio(&added.unique_id, VersionCorrection::LATEST).unwrap();
    let child = tree.root.child_nodes[0].unique_id.clone().unwrap();
    master
        .add(holding(dec!(20), "MSFT").in_node(child.clone()))
        .unwrap();
    master
        .add(holding(dec!(500), "IBM").in_node(child.clone()))
        .unwrap();

    let by_node = master
        .search_positions(&PositionSearchRequest {
            node_ids: Some(vec![child.object_id()]),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(by_node.paging.total, 2);

    let by_security = master
        .search_positions(&PositionSearchRequest {
            security_key: Some(ticker("AAPL")),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(by_security.paging.total, 1);
    assert_eq!(by_security.documents[0].value.quantity, dec!(100));

    let mid = master
        .search_positions(&PositionSearchRequest {
            min_quantity: Some(dec!(50)),
            max_quantity: Some(dec!(200)),
            ..Default::default()
        })
        .unwrap();
    let quantities: Vec<_> = mid.values().map(|p| p.quantity).collect();
    assert_eq!(quantities, vec![dec!(100)]);

    let before = master
        .search_positions(&PositionSearchRequest {
            version_correction: VersionCorrection::version_as_of(added.version_from),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(before.paging.total, 1);
}

#[test]
fn security_search_skips_superseded_rows_of_a_widely_held_key() {
    let db = TempDb::create("search-security-history");
    let master = db.master();
    let added = master.add(small_portfolio()).unwrap();
    let tree = master.portfolio(&added.unique_id, VersionCorrection::LATEST).unwrap();
    let mut row = tree.root.positions[0].unique_id.clone().unwrap();
    for step in 1..=50 {
        row = master
            .update(&row, holding(dec!(100) + rust_decimal::Decimal::from(step), "AAPL"))
            .unwrap()
            .unique_id;
    }

    let aapl = master
        .search_positions(&PositionSearchRequest {
            security_key: Some(ticker("AAPL")),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(aapl.paging.total, 1);
    assert_eq!(aapl.documents[0].value.quantity, dec!(150));
    assert_eq!(aapl.documents[0].unique_id, row);
}
