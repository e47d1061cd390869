use chrono::{TimeZone, Utc};
use folio_store::domain::{ExternalId, Portfolio, PortfolioNode, Position, Trade};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

pub fn ticker(symbol: &str) -> ExternalId {
    ExternalId::new("TICKER", symbol)
}

pub fn holding(quantity: Decimal, symbol: &str) -> Position {
    Position::new(quantity, ticker(symbol))
}

pub fn buy(quantity: Decimal) -> Trade {
    let traded_at = Utc.with_ymd_and_hms(2023, 12, 29, 15, 30, 0).unwrap();
    Trade::new(quantity, ExternalId::new("CPTY", "BROKER"), traded_at)
}

/// Root `R` holding 100 AAPL, with one child `C`.
pub fn small_portfolio() -> Portfolio {
    Portfolio::new(
        "Test",
        PortfolioNode::new("R")
            .with_position(holding(dec!(100), "AAPL"))
            .with_child(PortfolioNode::new("C")),
    )
}

/// Root with `breadth` children per node down to `depth` levels, each node
/// holding `per_node` positions of quantity 1.
pub fn grid_portfolio(name: &str, breadth: usize, depth: usize, per_node: usize) -> Portfolio {
    fn build(label: String, breadth: usize, depth: usize, per_node: usize) -> PortfolioNode {
        let mut node = PortfolioNode::new(label.clone());
        for i in 0..per_node {
            node = node.with_position(holding(Decimal::ONE, &format!("{label}-{i}")));
        }
        if depth > 0 {
            for b in 0..breadth {
                node = node.with_child(build(format!("{label}.{b}"), breadth, depth - 1, per_node));
            }
        }
        node
    }
    Portfolio::new(name, build("n".into(), breadth, depth, per_node))
}

/// Nodes in a full tree of the given breadth and depth.
pub fn grid_node_count(breadth: usize, depth: usize) -> usize {
    (0..=depth).map(|level| breadth.pow(level as u32)).sum()
}
