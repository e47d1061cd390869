//! The four entity kinds of the store and their fixed hierarchy.
//!
//! Materialized trees are immutable: children are held as `Arc`s so the
//! same subtree can be shared between a portfolio, its cached nodes and
//! any traversal in flight. Parent links are ids, never pointers.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::id::{ExternalId, ExternalIdBundle, ObjectId, UniqueId};
use super::version::Instant;

/// Free-form string attributes attached to an entity.
pub type Attributes = BTreeMap<String, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Portfolio,
    Node,
    Position,
    Trade,
}

impl EntityKind {
    pub const ALL: [Self; 4] = [Self::Portfolio, Self::Node, Self::Position, Self::Trade];

    /// Suffix appended to the configured scheme prefix.
    #[must_use]
    pub const fn scheme_suffix(self) -> &'static str {
        match self {
            Self::Portfolio => "Prt",
            Self::Node => "Nod",
            Self::Position => "Pos",
            Self::Trade => "Trd",
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Portfolio => "portfolio",
            Self::Node => "node",
            Self::Position => "position",
            Self::Trade => "trade",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reference from a position or trade to the security it holds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityLink {
    pub external_ids: ExternalIdBundle,
    /// Resolved security, when one has been linked.
    pub object_id: Option<ObjectId>,
}

impl SecurityLink {
    #[must_use]
    pub fn of(id: ExternalId) -> Self {
        Self {
            external_ids: ExternalIdBundle::of(id),
            object_id: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Portfolio {
    pub unique_id: Option<UniqueId>,
    pub name: String,
    #[serde(default)]
    pub attributes: Attributes,
    pub root: Arc<PortfolioNode>,
}

impl Portfolio {
    pub fn new(name: impl Into<String>, root: PortfolioNode) -> Self {
        Self {
            unique_id: None,
            name: name.into(),
            attributes: Attributes::new(),
            root: Arc::new(root),
        }
    }

    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioNode {
    pub unique_id: Option<UniqueId>,
    pub portfolio_id: Option<UniqueId>,
    pub parent_node_id: Option<UniqueId>,
    pub name: String,
    #[serde(default)]
    pub child_nodes: Vec<Arc<PortfolioNode>>,
    #[serde(default)]
    pub positions: Vec<Arc<Position>>,
}

impl PortfolioNode {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            unique_id: None,
            portfolio_id: None,
            parent_node_id: None,
            name: name.into(),
            child_nodes: Vec::new(),
            positions: Vec::new(),
        }
    }

    /// A detached node destined for `parent`, used when adding a node.
    pub fn under(parent: UniqueId, name: impl Into<String>) -> Self {
        Self {
            parent_node_id: Some(parent),
            ..Self::new(name)
        }
    }

    #[must_use]
    pub fn with_child(mut self, child: PortfolioNode) -> Self {
        self.child_nodes.push(Arc::new(child));
        self
    }

    #[must_use]
    pub fn with_position(mut self, position: Position) -> Self {
        self.positions.push(Arc::new(position));
        self
    }

    /// Nodes in this subtree, including this one.
    #[must_use]
    pub fn node_count(&self) -> usize {
        1 + self
            .child_nodes
            .iter()
            .map(|child| child.node_count())
            .sum::<usize>()
    }

    /// Positions in this subtree.
    #[must_use]
    pub fn position_count(&self) -> usize {
        self.positions.len()
            + self
                .child_nodes
                .iter()
                .map(|child| child.position_count())
                .sum::<usize>()
    }

    /// Depth-first search by object id.
    #[must_use]
    pub fn find_node(&self, object_id: &ObjectId) -> Option<&Arc<PortfolioNode>> {
        for child in &self.child_nodes {
            if child.unique_id.as_ref().map(UniqueId::object_id).as_ref() == Some(object_id) {
                return Some(child);
            }
            if let Some(found) = child.find_node(object_id) {
                return Some(found);
            }
        }
        None
    }

    /// Positions in this subtree, pre-order.
    #[must_use]
    pub fn all_positions(&self) -> Vec<Arc<Position>> {
        let mut out = self.positions.clone();
        for child in &self.child_nodes {
            out.extend(child.all_positions());
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub unique_id: Option<UniqueId>,
    pub parent_node_id: Option<UniqueId>,
    pub quantity: Decimal,
    #[serde(default)]
    pub security_link: SecurityLink,
    pub provider_id: Option<ExternalId>,
    #[serde(default)]
    pub attributes: Attributes,
    #[serde(default)]
    pub trades: Vec<Arc<Trade>>,
}

impl Position {
    pub fn new(quantity: Decimal, security: ExternalId) -> Self {
        Self {
            unique_id: None,
            parent_node_id: None,
            quantity,
            security_link: SecurityLink::of(security),
            provider_id: None,
            attributes: Attributes::new(),
            trades: Vec::new(),
        }
    }

    #[must_use]
    pub fn in_node(mut self, node: UniqueId) -> Self {
        self.parent_node_id = Some(node);
        self
    }

    #[must_use]
    pub fn with_trade(mut self, trade: Trade) -> Self {
        self.trades.push(Arc::new(trade));
        self
    }

    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub unique_id: Option<UniqueId>,
    pub parent_position_id: Option<UniqueId>,
    pub quantity: Decimal,
    #[serde(default)]
    pub security_link: SecurityLink,
    pub counterparty: ExternalId,
    pub traded_at: Instant,
    pub premium: Option<Decimal>,
    pub premium_currency: Option<String>,
    pub provider_id: Option<ExternalId>,
    #[serde(default)]
    pub attributes: Attributes,
}

impl Trade {
    pub fn new(quantity: Decimal, counterparty: ExternalId, traded_at: Instant) -> Self {
        Self {
            unique_id: None,
            parent_position_id: None,
            quantity,
            security_link: SecurityLink::default(),
            counterparty,
            traded_at,
            premium: None,
            premium_currency: None,
            provider_id: None,
            attributes: Attributes::new(),
        }
    }

    #[must_use]
    pub fn in_position(mut self, position: UniqueId) -> Self {
        self.parent_position_id = Some(position);
        self
    }

    #[must_use]
    pub fn with_premium(mut self, premium: Decimal, currency: impl Into<String>) -> Self {
        self.premium = Some(premium);
        self.premium_currency = Some(currency.into());
        self
    }
}

/// Any one of the four entity kinds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum Entity {
    Portfolio(Arc<Portfolio>),
    Node(Arc<PortfolioNode>),
    Position(Arc<Position>),
    Trade(Arc<Trade>),
}

impl Entity {
    #[must_use]
    pub fn kind(&self) -> EntityKind {
        match self {
            Self::Portfolio(_) => EntityKind::Portfolio,
            Self::Node(_) => EntityKind::Node,
            Self::Position(_) => EntityKind::Position,
            Self::Trade(_) => EntityKind::Trade,
        }
    }

    #[must_use]
    pub fn unique_id(&self) -> Option<&UniqueId> {
        match self {
            Self::Portfolio(p) => p.unique_id.as_ref(),
            Self::Node(n) => n.unique_id.as_ref(),
            Self::Position(p) => p.unique_id.as_ref(),
            Self::Trade(t) => t.unique_id.as_ref(),
        }
    }

    /// Display name for listings.
    #[must_use]
    pub fn label(&self) -> String {
        match self {
            Self::Portfolio(p) => p.name.clone(),
            Self::Node(n) => n.name.clone(),
            Self::Position(p) => format!("{} x {}", p.quantity, describe_link(&p.security_link)),
            Self::Trade(t) => format!("{} with {}", t.quantity, t.counterparty),
        }
    }
}

fn describe_link(link: &SecurityLink) -> String {
    link.external_ids
        .iter()
        .next()
        .map_or_else(|| "-".to_string(), ToString::to_string)
}

impl From<Portfolio> for Entity {
    fn from(value: Portfolio) -> Self {
        Self::Portfolio(Arc::new(value))
    }
}

impl From<PortfolioNode> for Entity {
    fn from(value: PortfolioNode) -> Self {
        Self::Node(Arc::new(value))
    }
}

impl From<Position> for Entity {
    fn from(value: Position) -> Self {
        Self::Position(Arc::new(value))
    }
}

impl From<Trade> for Entity {
    fn from(value: Trade) -> Self {
        Self::Trade(Arc::new(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sample() -> PortfolioNode {
        PortfolioNode::new("root")
            .with_position(Position::new(dec!(1), ExternalId::new("T", "A")))
            .with_child(
                PortfolioNode::new("a")
                    .with_child(PortfolioNode::new("a1"))
                    .with_position(Position::new(dec!(2), ExternalId::new("T", "B"))),
            )
            .with_child(PortfolioNode::new("b"))
    }

    #[test]
    fn counts_cover_whole_subtree() {
        let root = sample();
        assert_eq!(root.node_count(), 4);
        assert_eq!(root.position_count(), 2);
        let quantities: Vec<_> = root.all_positions().iter().map(|p| p.quantity).collect();
        assert_eq!(quantities, vec![dec!(1), dec!(2)]);
    }

    #[test]
    fn entity_serializes_with_kind_tag() {
        let entity = Entity::from(PortfolioNode::new("n"));
        let json = serde_json::to_value(&entity).unwrap();
        assert_eq!(json["kind"], "node");
        let back: Entity = serde_json::from_value(json).unwrap();
        assert_eq!(back, entity);
        assert_eq!(back.kind(), EntityKind::Node);
    }

    #[test]
    fn labels_describe_positions() {
        let entity = Entity::from(Position::new(dec!(10), ExternalId::new("TICKER", "X")));
        assert_eq!(entity.label(), "10 x TICKER~X");
    }
}
