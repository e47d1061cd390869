//! Bitemporal reads.
//!
//! Resolves the single row valid at a `(version, correction)` point and
//! materializes whole subtrees from one range query over the nested-set
//! bounds.

use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::sync::Arc;

use diesel::prelude::*;
use diesel::sql_types::BigInt;
use diesel::SqliteConnection;
use rust_decimal::Decimal;
use tracing::{debug, error};

use super::database::model::{
    MaxRow, NodeRow, PortfolioRow, PositionRow, SecurityKeyRow, TradeRow, TreeRow, Versioned,
};
use super::database::schema::{portfolio, portfolio_node, position, position_security_key, trade};
use crate::domain::version::{from_micros, END_OF_TIME};
use crate::domain::{
    Attributes, Bounds, EntityKind, ExternalId, IdCodec, IdDeduplicator, NestedSetDecoder, NodeIdx,
    ObjectId, Portfolio, PortfolioNode, Position, SecurityLink, Trade, UniqueId, VersionToken,
};
use crate::error::{Error, Result};

/// Every node of one portfolio row inside `[left, right]`, each joined with
/// its positions valid at the requested point, and each position fanned out
/// once per security key and once per trade.
const SUBTREE_SQL: &str = "\
SELECT n.id AS node_id, n.oid AS node_oid, n.portfolio_id, n.portfolio_oid, \
       n.parent_node_id, n.parent_node_oid, n.tree_left, n.tree_right, \
       n.name AS node_name, n.ver_from AS node_ver_from, n.corr_from AS node_corr_from, \
       p.id AS pos_id, p.oid AS pos_oid, p.quantity AS pos_quantity, \
       p.security_oid AS pos_security_oid, p.provider_scheme AS pos_provider_scheme, \
       p.provider_value AS pos_provider_value, p.attributes AS pos_attributes, \
       p.ver_from AS pos_ver_from, p.corr_from AS pos_corr_from, \
       k.key_scheme, k.key_value, \
       t.id AS trade_id, t.oid AS trade_oid, t.quantity AS trade_quantity, \
       t.counterparty_scheme AS trade_cpty_scheme, t.counterparty_value AS trade_cpty_value, \
       t.traded_at AS trade_traded_at, t.premium AS trade_premium, \
       t.premium_currency AS trade_premium_currency, t.provider_scheme AS trade_provider_scheme, \
       t.provider_value AS trade_provider_value, t.security_link AS trade_security_link, \
       t.attributes AS trade_attributes \
FROM portfolio_node n \
LEFT JOIN position p ON p.node_oid = n.oid \
     AND p.ver_from <= ? AND p.ver_to > ? AND p.corr_from <= ? AND p.corr_to > ? \
LEFT JOIN (SELECT 'k' AS sub_kind UNION ALL SELECT 't' AS sub_kind) x ON p.id IS NOT NULL \
LEFT JOIN position_security_key k ON x.sub_kind = 'k' AND k.position_id = p.id \
LEFT JOIN trade t ON x.sub_kind = 't' AND t.position_id = p.id \
WHERE n.portfolio_id = ? AND n.tree_left BETWEEN ? AND ? \
ORDER BY n.tree_left, p.oid, p.id, x.sub_kind, t.oid, k.key_scheme, k.key_value";

/// Latest removal, at or before the read point, of a position that was held
/// somewhere in the subtree.
const REMOVED_SQL: &str = "\
SELECT MAX(p.ver_to) AS value \
FROM position p \
JOIN portfolio_node n ON p.node_oid = n.oid \
WHERE n.portfolio_id = ? AND n.tree_left BETWEEN ? AND ? \
  AND p.ver_to <= ? AND p.corr_from <= ? AND p.corr_to > ?";

/// Which id the root of a materialized tree carries.
#[derive(Debug, Clone)]
pub enum RootId {
    /// The root row's own id.
    Row,
    /// A snapshot id derived from the tree's token.
    Snapshot,
    /// An id the caller asked for, e.g. the snapshot id it read by.
    Given(UniqueId),
}

/// A materialized subtree and the token of every row that shaped it.
#[derive(Debug, Clone)]
pub struct Subtree {
    pub root: Arc<PortfolioNode>,
    pub token: VersionToken,
}

pub(crate) fn describe_instant(micros: i64) -> String {
    if micros == END_OF_TIME {
        return "latest".into();
    }
    from_micros(micros).map_or_else(|_| micros.to_string(), |t| t.to_rfc3339())
}

/// Exactly one row or an error. Two rows at one point means the stored
/// history is corrupt.
fn single<R: Versioned>(rows: Vec<R>, kind: EntityKind, oid: i64, at: &str) -> Result<R> {
    let mut rows = rows.into_iter();
    match (rows.next(), rows.next()) {
        (Some(row), None) => Ok(row),
        (None, _) => Err(Error::NotFound(format!("{kind} {oid} {at}"))),
        (Some(first), Some(second)) => {
            error!(
                kind = %kind,
                oid,
                first_row = first.row_id(),
                second_row = second.row_id(),
                "Multiple rows valid at one point"
            );
            Err(Error::InvariantViolation(format!(
                "{kind} {oid} has more than one row {at}"
            )))
        }
    }
}

macro_rules! row_loaders {
    ($by_id:ident, $at:ident, $current:ident, $table:ident, $row:ty, $kind:expr) => {
        pub fn $by_id(&self, conn: &mut SqliteConnection, id: i64) -> Result<$row> {
            $table::table
                .find(id)
                .select(<$row>::as_select())
                .first(conn)
                .optional()?
                .ok_or_else(|| Error::NotFound(format!("{} row {id}", $kind)))
        }

        pub fn $at(
            &self,
            conn: &mut SqliteConnection,
            oid: i64,
            version: i64,
            correction: i64,
        ) -> Result<$row> {
            let rows: Vec<$row> = $table::table
                .filter($table::oid.eq(oid))
                .filter($table::ver_from.le(version))
                .filter($table::ver_to.gt(version))
                .filter($table::corr_from.le(correction))
                .filter($table::corr_to.gt(correction))
                .select(<$row>::as_select())
                .limit(2)
                .load(conn)?;
            single(
                rows,
                $kind,
                oid,
                &format!(
                    "at version {} correction {}",
                    describe_instant(version),
                    describe_instant(correction)
                ),
            )
        }

        pub fn $current(&self, conn: &mut SqliteConnection, oid: i64) -> Result<$row> {
            let rows: Vec<$row> = $table::table
                .filter($table::oid.eq(oid))
                .filter($table::ver_to.eq(END_OF_TIME))
                .filter($table::corr_to.eq(END_OF_TIME))
                .select(<$row>::as_select())
                .limit(2)
                .load(conn)?;
            single(rows, $kind, oid, "at latest")
        }
    };
}

/// Stateless reader; every call takes the connection it runs on so that
/// callers control the surrounding transaction.
#[derive(Debug, Clone, Copy)]
pub struct Reader<'a> {
    codec: &'a IdCodec,
}

impl<'a> Reader<'a> {
    #[must_use]
    pub fn new(codec: &'a IdCodec) -> Self {
        Self { codec }
    }

    row_loaders!(
        portfolio_row,
        portfolio_row_at,
        portfolio_row_current,
        portfolio,
        PortfolioRow,
        EntityKind::Portfolio
    );
    row_loaders!(
        node_row,
        node_row_at,
        node_row_current,
        portfolio_node,
        NodeRow,
        EntityKind::Node
    );
    row_loaders!(
        position_row,
        position_row_at,
        position_row_current,
        position,
        PositionRow,
        EntityKind::Position
    );
    row_loaders!(
        trade_row,
        trade_row_at,
        trade_row_current,
        trade,
        TradeRow,
        EntityKind::Trade
    );

    /// Node rows of one portfolio row in `left` order.
    pub fn node_rows(&self, conn: &mut SqliteConnection, portfolio_id: i64) -> Result<Vec<NodeRow>> {
        Ok(portfolio_node::table
            .filter(portfolio_node::portfolio_id.eq(portfolio_id))
            .order(portfolio_node::tree_left.asc())
            .select(NodeRow::as_select())
            .load(conn)?)
    }

    /// Materialize the nodes of portfolio row `portfolio_id` within
    /// `bounds`, with the positions valid at `(version, correction)`.
    pub fn subtree(
        &self,
        conn: &mut SqliteConnection,
        portfolio_id: i64,
        bounds: Bounds,
        version: i64,
        correction: i64,
        dedup: &mut IdDeduplicator,
    ) -> Result<Subtree> {
        let rows: Vec<TreeRow> = diesel::sql_query(SUBTREE_SQL)
            .bind::<BigInt, _>(version)
            .bind::<BigInt, _>(version)
            .bind::<BigInt, _>(correction)
            .bind::<BigInt, _>(correction)
            .bind::<BigInt, _>(portfolio_id)
            .bind::<BigInt, _>(bounds.left)
            .bind::<BigInt, _>(bounds.right)
            .load(conn)?;
        debug!(portfolio_id, rows = rows.len(), "Loaded subtree rows");

        let (root, mut token) = TreeAssembler::new(self.codec, dedup).assemble(rows)?;

        let removed: Vec<MaxRow> = diesel::sql_query(REMOVED_SQL)
            .bind::<BigInt, _>(portfolio_id)
            .bind::<BigInt, _>(bounds.left)
            .bind::<BigInt, _>(bounds.right)
            .bind::<BigInt, _>(version)
            .bind::<BigInt, _>(correction)
            .bind::<BigInt, _>(correction)
            .load(conn)?;
        if let Some(removed_at) = removed.first().and_then(|row| row.value) {
            token.include(removed_at, i64::MIN);
        }
        Ok(Subtree { root, token })
    }

    /// A portfolio row with its whole structure at `(version, correction)`.
    pub fn portfolio_tree(
        &self,
        conn: &mut SqliteConnection,
        row: &PortfolioRow,
        version: i64,
        correction: i64,
        root_id: RootId,
    ) -> Result<Arc<Portfolio>> {
        let mut dedup = IdDeduplicator::new();
        let subtree = self.subtree(
            conn,
            row.id,
            Bounds::new(1, i64::MAX),
            version,
            correction,
            &mut dedup,
        )?;
        let unique_id = match root_id {
            RootId::Row => self.codec.row_id(EntityKind::Portfolio, row.oid, row.id)?,
            RootId::Snapshot => self
                .codec
                .snapshot_id(EntityKind::Portfolio, row.oid, subtree.token),
            RootId::Given(id) => id,
        };
        Ok(Arc::new(self.portfolio_from_row(row, subtree.root, unique_id)?))
    }

    /// A node row with its subtree at `(version, correction)`.
    pub fn node_tree(
        &self,
        conn: &mut SqliteConnection,
        row: &NodeRow,
        version: i64,
        correction: i64,
        root_id: RootId,
    ) -> Result<Arc<PortfolioNode>> {
        let mut dedup = IdDeduplicator::new();
        let subtree = self.subtree(
            conn,
            row.portfolio_id,
            Bounds::new(row.tree_left, row.tree_right),
            version,
            correction,
            &mut dedup,
        )?;
        let unique_id = match root_id {
            RootId::Row => return Ok(subtree.root),
            RootId::Snapshot => self
                .codec
                .snapshot_id(EntityKind::Node, row.oid, subtree.token),
            RootId::Given(id) => id,
        };
        let mut root =
            Arc::try_unwrap(subtree.root).unwrap_or_else(|shared| PortfolioNode::clone(&shared));
        root.unique_id = Some(unique_id);
        Ok(Arc::new(root))
    }

    pub fn portfolio_from_row(
        &self,
        row: &PortfolioRow,
        root: Arc<PortfolioNode>,
        unique_id: UniqueId,
    ) -> Result<Portfolio> {
        Ok(Portfolio {
            unique_id: Some(unique_id),
            name: row.name.clone(),
            attributes: parse_attributes(&row.attributes)?,
            root,
        })
    }

    /// A standalone position with its security keys and trades.
    pub fn position_from_row(
        &self,
        conn: &mut SqliteConnection,
        row: &PositionRow,
        dedup: &mut IdDeduplicator,
    ) -> Result<Position> {
        let keys: Vec<SecurityKeyRow> = position_security_key::table
            .filter(position_security_key::position_id.eq(row.id))
            .order((
                position_security_key::key_scheme.asc(),
                position_security_key::key_value.asc(),
            ))
            .select(SecurityKeyRow::as_select())
            .load(conn)?;
        let trades: Vec<TradeRow> = trade::table
            .filter(trade::position_id.eq(row.id))
            .order(trade::oid.asc())
            .select(TradeRow::as_select())
            .load(conn)?;

        let mut position = position_base(self.codec, row, dedup)?;
        for key in keys {
            position
                .security_link
                .external_ids
                .insert(ExternalId::new(key.key_scheme, key.key_value));
        }
        for trade in &trades {
            position
                .trades
                .push(Arc::new(trade_from_row(self.codec, trade, dedup)?));
        }
        Ok(position)
    }

    pub fn trade_from_row(&self, row: &TradeRow, dedup: &mut IdDeduplicator) -> Result<Trade> {
        trade_from_row(self.codec, row, dedup)
    }

    /// Position rows currently held by any of `node_oids`.
    pub fn current_positions_under(
        &self,
        conn: &mut SqliteConnection,
        node_oids: &[i64],
    ) -> Result<Vec<PositionRow>> {
        if node_oids.is_empty() {
            return Ok(Vec::new());
        }
        Ok(position::table
            .filter(position::node_oid.eq_any(node_oids))
            .filter(position::ver_to.eq(END_OF_TIME))
            .filter(position::corr_to.eq(END_OF_TIME))
            .order(position::oid.asc())
            .select(PositionRow::as_select())
            .load(conn)?)
    }

    /// Object ids of the trades of one position row.
    pub fn trade_oids(&self, conn: &mut SqliteConnection, position_id: i64) -> Result<HashSet<i64>> {
        let oids: Vec<i64> = trade::table
            .filter(trade::position_id.eq(position_id))
            .select(trade::oid)
            .load(conn)?;
        Ok(oids.into_iter().collect())
    }
}

/// Node under construction while the stream is decoded.
#[derive(Debug)]
struct NodeDraft {
    unique_id: UniqueId,
    portfolio_id: UniqueId,
    parent_node_id: Option<UniqueId>,
    name: String,
    positions: Vec<Arc<Position>>,
}

#[derive(Debug)]
struct PositionDraft {
    id: i64,
    position: Position,
    last_trade: Option<i64>,
}

/// Single pass over ordered subtree rows.
struct TreeAssembler<'a, 'd> {
    codec: &'a IdCodec,
    dedup: &'d mut IdDeduplicator,
    decoder: NestedSetDecoder<NodeDraft>,
    token: VersionToken,
    positions: HashMap<NodeIdx, Vec<Arc<Position>>>,
    node: Option<(i64, NodeIdx)>,
    last_position_oid: Option<i64>,
    draft: Option<PositionDraft>,
}

impl<'a, 'd> TreeAssembler<'a, 'd> {
    fn new(codec: &'a IdCodec, dedup: &'d mut IdDeduplicator) -> Self {
        Self {
            codec,
            dedup,
            decoder: NestedSetDecoder::new(),
            token: VersionToken::new(i64::MIN, i64::MIN),
            positions: HashMap::new(),
            node: None,
            last_position_oid: None,
            draft: None,
        }
    }

    fn assemble(mut self, rows: Vec<TreeRow>) -> Result<(Arc<PortfolioNode>, VersionToken)> {
        for row in &rows {
            self.accept(row)?;
        }
        self.flush_position();

        let mut arena = self.decoder.finish()?;
        for (idx, positions) in self.positions {
            if let Some(draft) = arena.get_mut(idx) {
                draft.positions = positions;
            }
        }
        let root = arena.fold(|draft, children| {
            Arc::new(PortfolioNode {
                unique_id: Some(draft.unique_id),
                portfolio_id: Some(draft.portfolio_id),
                parent_node_id: draft.parent_node_id,
                name: draft.name,
                child_nodes: children,
                positions: draft.positions,
            })
        })?;
        Ok((root, self.token))
    }

    fn accept(&mut self, row: &TreeRow) -> Result<()> {
        if self.node.map(|(id, _)| id) != Some(row.node_id) {
            self.flush_position();
            self.start_node(row)?;
        }
        let Some(pos_id) = row.pos_id else {
            return Ok(());
        };
        if self.draft.as_ref().map(|d| d.id) != Some(pos_id) {
            self.flush_position();
            self.start_position(row)?;
        }
        let Some(draft) = self.draft.as_mut() else {
            return Ok(());
        };
        if let (Some(scheme), Some(value)) = (&row.key_scheme, &row.key_value) {
            draft
                .position
                .security_link
                .external_ids
                .insert(ExternalId::new(scheme.clone(), value.clone()));
        }
        if let Some(trade) = row.trade_row() {
            if draft.last_trade != Some(trade.id) {
                draft.last_trade = Some(trade.id);
                let trade = trade_from_row(self.codec, &trade, self.dedup)?;
                draft.position.trades.push(Arc::new(trade));
            }
        }
        Ok(())
    }

    fn start_node(&mut self, row: &TreeRow) -> Result<()> {
        self.token.include(row.node_ver_from, row.node_corr_from);
        let unique_id = self
            .dedup
            .unique(self.codec.row_id(EntityKind::Node, row.node_oid, row.node_id)?);
        let portfolio_id = self.dedup.unique(self.codec.row_id(
            EntityKind::Portfolio,
            row.portfolio_oid,
            row.portfolio_id,
        )?);
        let parent_node_id = match (row.parent_node_oid, row.parent_node_id) {
            (Some(oid), Some(id)) => Some(
                self.dedup
                    .unique(self.codec.row_id(EntityKind::Node, oid, id)?),
            ),
            _ => None,
        };
        let draft = NodeDraft {
            unique_id,
            portfolio_id,
            parent_node_id,
            name: row.node_name.clone(),
            positions: Vec::new(),
        };
        let idx = self
            .decoder
            .push(Bounds::new(row.tree_left, row.tree_right), draft)?;
        self.node = Some((row.node_id, idx));
        self.last_position_oid = None;
        Ok(())
    }

    fn start_position(&mut self, row: &TreeRow) -> Result<()> {
        let (Some(id), Some(oid)) = (row.pos_id, row.pos_oid) else {
            return Ok(());
        };
        if self.last_position_oid == Some(oid) {
            error!(oid, node_oid = row.node_oid, "Multiple position rows valid at one point");
            return Err(Error::InvariantViolation(format!(
                "position {oid} has more than one valid row in node {}",
                row.node_oid
            )));
        }
        self.last_position_oid = Some(oid);
        let stored = PositionRow {
            id,
            oid,
            node_oid: row.node_oid,
            quantity: row.pos_quantity.clone().unwrap_or_default(),
            security_oid: row.pos_security_oid.clone(),
            provider_scheme: row.pos_provider_scheme.clone(),
            provider_value: row.pos_provider_value.clone(),
            attributes: row.pos_attributes.clone().unwrap_or_default(),
            ver_from: row.pos_ver_from.unwrap_or(i64::MIN),
            ver_to: END_OF_TIME,
            corr_from: row.pos_corr_from.unwrap_or(i64::MIN),
            corr_to: END_OF_TIME,
        };
        self.token.include(stored.ver_from, stored.corr_from);
        let position = position_base(self.codec, &stored, self.dedup)?;
        self.draft = Some(PositionDraft {
            id,
            position,
            last_trade: None,
        });
        Ok(())
    }

    fn flush_position(&mut self) {
        if let (Some(draft), Some((_, idx))) = (self.draft.take(), self.node) {
            self.positions
                .entry(idx)
                .or_default()
                .push(Arc::new(draft.position));
        }
    }
}

fn parse_attributes(json: &str) -> Result<Attributes> {
    if json.is_empty() {
        return Ok(Attributes::new());
    }
    serde_json::from_str(json).map_err(|e| Error::Parse(format!("attributes: {e}")))
}

fn parse_decimal(text: &str, what: &str) -> Result<Decimal> {
    Decimal::from_str(text).map_err(|e| Error::Parse(format!("{what} '{text}': {e}")))
}

fn external(scheme: &Option<String>, value: &Option<String>) -> Option<ExternalId> {
    match (scheme, value) {
        (Some(scheme), Some(value)) => Some(ExternalId::new(scheme.clone(), value.clone())),
        _ => None,
    }
}

/// Position fields without keys or trades.
fn position_base(
    codec: &IdCodec,
    row: &PositionRow,
    dedup: &mut IdDeduplicator,
) -> Result<Position> {
    let security_oid = row
        .security_oid
        .as_deref()
        .map(ObjectId::from_str)
        .transpose()?;
    Ok(Position {
        unique_id: Some(dedup.unique(codec.row_id(EntityKind::Position, row.oid, row.id)?)),
        parent_node_id: Some(
            dedup.unique(codec.object_id(EntityKind::Node, row.node_oid).at_latest()),
        ),
        quantity: parse_decimal(&row.quantity, "quantity")?,
        security_link: SecurityLink {
            external_ids: Default::default(),
            object_id: security_oid,
        },
        provider_id: external(&row.provider_scheme, &row.provider_value),
        attributes: parse_attributes(&row.attributes)?,
        trades: Vec::new(),
    })
}

fn trade_from_row(codec: &IdCodec, row: &TradeRow, dedup: &mut IdDeduplicator) -> Result<Trade> {
    let security_link: SecurityLink = if row.security_link.is_empty() {
        SecurityLink::default()
    } else {
        serde_json::from_str(&row.security_link)
            .map_err(|e| Error::Parse(format!("trade security link: {e}")))?
    };
    Ok(Trade {
        unique_id: Some(dedup.unique(codec.row_id(EntityKind::Trade, row.oid, row.id)?)),
        parent_position_id: Some(dedup.unique(codec.row_id(
            EntityKind::Position,
            row.position_oid,
            row.position_id,
        )?)),
        quantity: parse_decimal(&row.quantity, "trade quantity")?,
        security_link,
        counterparty: ExternalId::new(row.counterparty_scheme.clone(), row.counterparty_value.clone()),
        traded_at: from_micros(row.traded_at)?,
        premium: row
            .premium
            .as_deref()
            .map(|p| parse_decimal(p, "premium"))
            .transpose()?,
        premium_currency: row.premium_currency.clone(),
        provider_id: external(&row.provider_scheme, &row.provider_value),
        attributes: parse_attributes(&row.attributes)?,
    })
}
