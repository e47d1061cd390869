//! Handler for `folio history`.

use serde_json::json;
use tabled::{Table, Tabled};

use super::command::HistoryArgs;
use super::output;
use super::session::Session;
use crate::domain::{HistoryRequest, Instant, ObjectId, PagingRequest};
use crate::error::Result;
use crate::infrastructure::config::Config;
use crate::port::PositionMaster;

#[derive(Tabled)]
struct HistoryRow {
    #[tabled(rename = "Unique Id")]
    unique_id: String,
    #[tabled(rename = "Version")]
    version: String,
    #[tabled(rename = "Correction")]
    correction: String,
    #[tabled(rename = "Value")]
    label: String,
}

fn span(from: Instant, to: Option<Instant>) -> String {
    let end = to.map_or_else(|| "∞".to_string(), |to| to.to_rfc3339());
    format!("{} .. {end}", from.to_rfc3339())
}

pub fn execute(config: &Config, args: &HistoryArgs) -> Result<()> {
    let session = Session::open(config)?;
    let object_id: ObjectId = args.object_id.parse()?;
    let request = HistoryRequest::all(object_id)
        .with_paging(PagingRequest::page(args.page, args.page_size));
    let result = session.master.history(&request)?;

    if output::is_json() {
        output::json_output(json!({
            "command": "history",
            "paging": result.paging,
            "documents": serde_json::to_value(&result.documents)?,
        }));
        return Ok(());
    }

    output::section(&format!("History of {}", request.object_id));
    let rows: Vec<HistoryRow> = result
        .documents
        .iter()
        .map(|doc| HistoryRow {
            unique_id: doc.unique_id.to_string(),
            version: span(doc.version_from, doc.version_to),
            correction: span(doc.correction_from, doc.correction_to),
            label: doc.value.label(),
        })
        .collect();
    output::lines(&Table::new(rows).to_string());
    output::field(
        "Rows",
        format!(
            "{}-{} of {}",
            result.paging.first + usize::from(result.paging.size > 0),
            result.paging.first + result.paging.size,
            result.paging.total
        ),
    );
    Ok(())
}
