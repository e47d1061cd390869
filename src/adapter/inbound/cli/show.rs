//! Handler for `folio show`.

use std::fmt::Write as _;

use serde_json::json;
use tabled::{Table, Tabled};

use super::command::ShowArgs;
use super::output;
use super::session::Session;
use crate::domain::{Entity, PortfolioNode, Position, Trade, UniqueId};
use crate::error::Result;
use crate::infrastructure::config::Config;
use crate::port::get_entity;

#[derive(Tabled)]
struct TradeRow {
    #[tabled(rename = "Unique Id")]
    unique_id: String,
    #[tabled(rename = "Quantity")]
    quantity: String,
    #[tabled(rename = "Counterparty")]
    counterparty: String,
    #[tabled(rename = "Traded At")]
    traded_at: String,
}

fn id_text(id: Option<&UniqueId>) -> String {
    id.map_or_else(|| "-".to_string(), ToString::to_string)
}

fn position_line(position: &Position) -> String {
    let security = position
        .security_link
        .external_ids
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "{} x {} [{}]",
        position.quantity,
        security,
        id_text(position.unique_id.as_ref())
    )
}

/// Indented outline of a node subtree.
pub(crate) fn render_tree(node: &PortfolioNode) -> String {
    let mut out = String::new();
    render_node(node, 0, &mut out);
    out
}

fn render_node(node: &PortfolioNode, depth: usize, out: &mut String) {
    let indent = "  ".repeat(depth);
    let _ = writeln!(out, "{indent}{} [{}]", node.name, id_text(node.unique_id.as_ref()));
    for position in &node.positions {
        let _ = writeln!(out, "{indent}  - {}", position_line(position));
    }
    for child in &node.child_nodes {
        render_node(child, depth + 1, out);
    }
}

fn trade_rows(trades: &[std::sync::Arc<Trade>]) -> Vec<TradeRow> {
    trades
        .iter()
        .map(|trade| TradeRow {
            unique_id: id_text(trade.unique_id.as_ref()),
            quantity: trade.quantity.to_string(),
            counterparty: trade.counterparty.to_string(),
            traded_at: trade.traded_at.to_rfc3339(),
        })
        .collect()
}

pub fn execute(config: &Config, args: &ShowArgs) -> Result<()> {
    let session = Session::open(config)?;
    let id: UniqueId = args.id.parse()?;
    let vc = args.as_of.version_correction()?;
    let entity = get_entity(session.source(), session.codec(), &id, vc)?;

    if output::is_json() {
        output::json_output(json!({
            "command": "show",
            "version_correction": vc.to_string(),
            "entity": serde_json::to_value(&entity)?,
        }));
        return Ok(());
    }
    if output::is_quiet() {
        return Ok(());
    }

    match &entity {
        Entity::Portfolio(portfolio) => {
            output::section(&format!("Portfolio {}", portfolio.name));
            output::field("Unique id", id_text(portfolio.unique_id.as_ref()));
            for (key, value) in &portfolio.attributes {
                output::field(key, value);
            }
            output::field("Nodes", portfolio.root.node_count());
            output::field("Positions", portfolio.root.position_count());
            output::section("Tree");
            output::lines(&render_tree(&portfolio.root));
        }
        Entity::Node(node) => {
            output::section(&format!("Node {}", node.name));
            output::field("Unique id", id_text(node.unique_id.as_ref()));
            output::field("Portfolio", id_text(node.portfolio_id.as_ref()));
            output::section("Tree");
            output::lines(&render_tree(node));
        }
        Entity::Position(position) => {
            output::section("Position");
            output::field("Unique id", id_text(position.unique_id.as_ref()));
            output::field("Node", id_text(position.parent_node_id.as_ref()));
            output::field("Holding", position_line(position));
            if !position.trades.is_empty() {
                output::section("Trades");
                output::lines(&Table::new(trade_rows(&position.trades)).to_string());
            }
        }
        Entity::Trade(trade) => {
            output::section("Trade");
            output::field("Unique id", id_text(trade.unique_id.as_ref()));
            output::field("Position", id_text(trade.parent_position_id.as_ref()));
            output::field("Quantity", trade.quantity);
            output::field("Counterparty", &trade.counterparty);
            output::field("Traded at", trade.traded_at.to_rfc3339());
            if let (Some(premium), Some(currency)) = (trade.premium, &trade.premium_currency) {
                output::field("Premium", format!("{premium} {currency}"));
            }
        }
    }
    Ok(())
}
