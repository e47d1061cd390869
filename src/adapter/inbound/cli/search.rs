//! Handlers for `folio search`.

use serde_json::json;
use tabled::{Table, Tabled};

use super::command::{PortfolioSearchArgs, PositionSearchArgs, SearchCommand};
use super::output;
use super::session::Session;
use crate::domain::{Entity, ObjectId, PortfolioSearchRequest, PositionSearchRequest};
use crate::error::Result;
use crate::infrastructure::config::Config;
use crate::port::PositionMaster;

#[derive(Tabled)]
struct PortfolioRow {
    #[tabled(rename = "Unique Id")]
    unique_id: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Nodes")]
    nodes: usize,
    #[tabled(rename = "Positions")]
    positions: usize,
}

#[derive(Tabled)]
struct PositionRow {
    #[tabled(rename = "Unique Id")]
    unique_id: String,
    #[tabled(rename = "Node")]
    node: String,
    #[tabled(rename = "Holding")]
    holding: String,
}

pub fn execute(config: &Config, command: &SearchCommand) -> Result<()> {
    let session = Session::open(config)?;
    match command {
        SearchCommand::Portfolios(args) => portfolios(&session, args),
        SearchCommand::Positions(args) => positions(&session, args),
    }
}

fn portfolios(session: &Session, args: &PortfolioSearchArgs) -> Result<()> {
    let request = PortfolioSearchRequest {
        name: args.name.clone(),
        version_correction: args.as_of.version_correction()?,
        ..PortfolioSearchRequest::default()
    };
    let result = session.master.search_portfolios(&request)?;

    if output::is_json() {
        output::json_output(json!({
            "command": "search.portfolios",
            "paging": result.paging,
            "documents": serde_json::to_value(&result.documents)?,
        }));
        return Ok(());
    }

    output::section("Portfolios");
    let rows: Vec<PortfolioRow> = result
        .documents
        .iter()
        .map(|doc| PortfolioRow {
            unique_id: doc.unique_id.to_string(),
            name: doc.value.name.clone(),
            nodes: doc.value.root.node_count(),
            positions: doc.value.root.position_count(),
        })
        .collect();
    output::lines(&Table::new(rows).to_string());
    output::field("Matches", result.paging.total);
    Ok(())
}

fn positions(session: &Session, args: &PositionSearchArgs) -> Result<()> {
    let node_ids = args
        .node
        .as_deref()
        .map(|id| id.parse::<ObjectId>().map(|id| vec![id]))
        .transpose()?;
    let request = PositionSearchRequest {
        node_ids,
        min_quantity: args.min_quantity,
        max_quantity: args.max_quantity,
        security_key: args.security.as_deref().map(str::parse).transpose()?,
        version_correction: args.as_of.version_correction()?,
        ..PositionSearchRequest::default()
    };
    let result = session.master.search_positions(&request)?;

    if output::is_json() {
        output::json_output(json!({
            "command": "search.positions",
            "paging": result.paging,
            "documents": serde_json::to_value(&result.documents)?,
        }));
        return Ok(());
    }

    output::section("Positions");
    let rows: Vec<PositionRow> = result
        .documents
        .iter()
        .map(|doc| PositionRow {
            unique_id: doc.unique_id.to_string(),
            node: doc
                .value
                .parent_node_id
                .as_ref()
                .map_or_else(|| "-".to_string(), |id| id.object_id().to_string()),
            holding: Entity::Position(doc.value.clone()).label(),
        })
        .collect();
    output::lines(&Table::new(rows).to_string());
    output::field("Matches", result.paging.total);
    Ok(())
}
