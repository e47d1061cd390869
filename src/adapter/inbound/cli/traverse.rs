//! Handler for `folio traverse`: totals position quantities per node with
//! the parallel traverser.

use std::sync::Arc;

use dashmap::DashMap;
use rust_decimal::Decimal;
use serde_json::json;
use tabled::{Table, Tabled};

use super::command::TraverseArgs;
use super::output;
use super::session::Session;
use crate::application::traversal::{ParallelTraverser, TraversalCallback, TreeItem};
use crate::domain::{Entity, PortfolioNode, UniqueId};
use crate::error::{Error, Result};
use crate::infrastructure::config::Config;
use crate::port::get_entity;

/// Post-order roll-up of quantities. A node's total is written only after
/// its children's totals exist.
#[derive(Default)]
pub(crate) struct QuantityTotals {
    by_node: DashMap<usize, Decimal>,
}

fn node_key(node: &Arc<PortfolioNode>) -> usize {
    Arc::as_ptr(node) as usize
}

impl QuantityTotals {
    pub(crate) fn total(&self, node: &Arc<PortfolioNode>) -> Decimal {
        self.by_node.get(&node_key(node)).map_or(Decimal::ZERO, |t| *t)
    }
}

impl TraversalCallback for QuantityTotals {
    fn pre_order(&self, _: TreeItem<'_>) {}

    fn post_order(&self, item: TreeItem<'_>) {
        if let TreeItem::Node(node) = item {
            let own: Decimal = node.positions.iter().map(|p| p.quantity).sum();
            let below: Decimal = node.child_nodes.iter().map(|child| self.total(child)).sum();
            self.by_node.insert(node_key(node), own + below);
        }
    }
}

#[derive(Tabled)]
struct TotalRow {
    #[tabled(rename = "Node")]
    node: String,
    #[tabled(rename = "Unique Id")]
    unique_id: String,
    #[tabled(rename = "Total Quantity")]
    total: String,
}

fn collect_rows(
    node: &Arc<PortfolioNode>,
    depth: usize,
    totals: &QuantityTotals,
    rows: &mut Vec<TotalRow>,
) {
    rows.push(TotalRow {
        node: format!("{}{}", "  ".repeat(depth), node.name),
        unique_id: node
            .unique_id
            .as_ref()
            .map_or_else(|| "-".to_string(), ToString::to_string),
        total: totals.total(node).to_string(),
    });
    for child in &node.child_nodes {
        collect_rows(child, depth + 1, totals, rows);
    }
}

pub fn execute(config: &Config, args: &TraverseArgs) -> Result<()> {
    let session = Session::open(config)?;
    let id: UniqueId = args.id.parse()?;
    let vc = args.as_of.version_correction()?;
    let root = match get_entity(session.source(), session.codec(), &id, vc)? {
        Entity::Portfolio(portfolio) => Arc::clone(&portfolio.root),
        Entity::Node(node) => node,
        other => {
            return Err(Error::InvalidArgument(format!(
                "{} is a {}, not a portfolio or node",
                id,
                other.kind()
            )))
        }
    };

    let traverser = ParallelTraverser::from_config(&config.traversal)?;
    let totals = Arc::new(QuantityTotals::default());
    let stats = traverser.traverse(&root, totals.clone())?;

    if output::is_json() {
        output::json_output(json!({
            "command": "traverse",
            "nodes": stats.nodes,
            "positions": stats.positions,
            "total": totals.total(&root).to_string(),
        }));
        return Ok(());
    }

    output::section(&format!("Totals under {}", root.name));
    let mut rows = Vec::new();
    collect_rows(&root, 0, &totals, &mut rows);
    output::lines(&Table::new(rows).to_string());
    output::field("Nodes", stats.nodes);
    output::field("Positions", stats.positions);
    output::field("Workers", traverser.pool().threads());
    Ok(())
}
