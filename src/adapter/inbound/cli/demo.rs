//! Handler for `folio demo`: writes a small portfolio and gives it some
//! history to look at.

use rust_decimal_macros::dec;
use serde_json::json;

use super::output;
use super::session::Session;
use crate::domain::{
    ExternalId, Portfolio, PortfolioNode, Position, SecurityLink, Trade, VersionCorrection,
    WriteReceipt,
};
use crate::error::{Error, Result};
use crate::infrastructure::config::Config;
use crate::port::{PositionMaster, PositionSource};

fn ticker(symbol: &str) -> ExternalId {
    ExternalId::new("TICKER", symbol)
}

fn sample() -> Portfolio {
    let broker = ExternalId::new("CPTY", "PRIME-1");
    let equities = PortfolioNode::new("Equities")
        .with_position(
            Position::new(dec!(100), ticker("AAPL"))
                .with_trade(Trade::new(dec!(100), broker.clone(), chrono::Utc::now())),
        )
        .with_position(Position::new(dec!(50), ticker("MSFT")));
    let bonds = PortfolioNode::new("Bonds").with_position(Position::new(dec!(1000), ticker("UST10Y")));
    let root = PortfolioNode::new("Demo Fund").with_child(equities).with_child(bonds);
    Portfolio::new("Demo Fund", root).with_attribute("desk", "demo")
}

fn report(step: &str, receipt: &WriteReceipt) {
    if output::is_json() {
        output::json_output(json!({
            "command": "demo",
            "step": step,
            "unique_id": receipt.unique_id.as_str(),
            "version_from": receipt.version_from,
            "correction_from": receipt.correction_from,
        }));
    } else {
        output::success(&format!("{step}: {}", receipt.unique_id));
    }
}

/// Add the sample portfolio, then add a node, update a position and
/// correct it.
pub fn execute(config: &Config) -> Result<()> {
    let session = Session::open(config)?;
    let master = &session.master;
    output::header(env!("CARGO_PKG_VERSION"));

    let added = master.add(sample())?;
    report("Added portfolio", &added);

    let portfolio = master.portfolio(&added.unique_id.to_latest(), VersionCorrection::LATEST)?;
    let root_id = portfolio
        .root
        .unique_id
        .clone()
        .ok_or_else(|| Error::InvariantViolation("stored node without an id".into()))?;
    let cash = PortfolioNode::under(root_id, "Cash")
        .with_position(Position::new(dec!(25000), ExternalId::new("CCY", "USD")));
    report("Added node", &master.add(cash)?);

    let aapl = portfolio
        .root
        .all_positions()
        .into_iter()
        .find(|p| p.security_link == SecurityLink::of(ticker("AAPL")))
        .ok_or_else(|| Error::NotFound("AAPL position".into()))?;
    let aapl_id = aapl
        .unique_id
        .clone()
        .ok_or_else(|| Error::InvariantViolation("stored position without an id".into()))?;
    let mut bigger = Position::clone(&aapl);
    bigger.quantity = dec!(150);
    let updated = master.update(&aapl_id, bigger.clone())?;
    report("Updated AAPL to 150", &updated);

    let mut fixed = bigger;
    fixed.quantity = dec!(140);
    report("Corrected AAPL to 140", &master.correct(&updated.unique_id, fixed)?);

    if !output::is_json() {
        output::section("Try");
        output::lines(&format!(
            "folio show {}\nfolio history {}\nfolio traverse {}",
            added.unique_id.object_id(),
            aapl_id.object_id(),
            added.unique_id.object_id(),
        ));
    }
    Ok(())
}
