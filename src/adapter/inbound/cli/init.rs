//! Handler for `folio init`.

use serde_json::json;

use super::output;
use super::session::Session;
use crate::domain::EntityKind;
use crate::error::Result;
use crate::infrastructure::config::Config;

/// Open the configured database, creating it and applying migrations.
pub fn execute(config: &Config) -> Result<()> {
    let session = Session::open(config)?;

    if output::is_json() {
        output::json_output(json!({
            "command": "init",
            "database": config.database.url,
            "scheme_prefix": config.identifiers.scheme_prefix,
        }));
        return Ok(());
    }

    output::header(env!("CARGO_PKG_VERSION"));
    output::success("Database ready");
    output::field("Database", &config.database.url);
    output::field("Portfolio ids", session.codec().scheme(EntityKind::Portfolio));
    Ok(())
}
