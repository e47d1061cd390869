//! Bitemporal writes.
//!
//! History is insert-only. A write closes the targeted row on one axis and
//! inserts its replacement. Each close only matches a row that is still
//! latest on that axis, so a concurrent writer sees a conflict instead of
//! losing an update.
//!
//! Node rows belong to one portfolio row and trade rows to one position
//! row. Changing a node rewrites its portfolio's whole structure, and
//! changing a trade rewrites its position.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use diesel::prelude::*;
use diesel::SqliteConnection;
use tracing::debug;

use super::database::model::{
    Intervals, NodeRow, PortfolioRow, PositionRow, SecurityKeyRow, TradeRow, Versioned,
};
use super::database::schema::{portfolio, portfolio_node, position, position_security_key, trade};
use super::database::sequence::{allocate, next_id};
use super::reader::Reader;
use crate::domain::version::{from_micros, micros_to_bound, to_micros, END_OF_TIME};
use crate::domain::{
    Attributes, Bounds, Entity, EntityKind, IdCodec, IdDeduplicator, IdVersion, Instant,
    NestedSetDecoder, NodeIdx, Portfolio, PortfolioNode, Position, Trade, TreeArena, UniqueId,
    WriteReceipt, WriteRequest,
};
use crate::error::{Error, Result};
use crate::port::{ChangeEvent, ChangeType};

/// Which interval a write closes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Axis {
    Version,
    Correction,
}

impl Axis {
    fn conflict(self, what: String) -> Error {
        match self {
            Self::Version => Error::NotLatestVersion(what),
            Self::Correction => Error::NotLatestCorrection(what),
        }
    }
}

/// A node of a structure about to be written. `oid` is kept for nodes that
/// already exist in the portfolio; new nodes take their first row id.
#[derive(Debug)]
struct NodePlan {
    oid: Option<i64>,
    name: String,
    positions: Vec<Arc<Position>>,
}

/// Where each planned node landed: `(row id, object id)`.
type Placement = HashMap<NodeIdx, (i64, i64)>;

fn attributes_json(attributes: &Attributes) -> Result<String> {
    Ok(serde_json::to_string(attributes)?)
}

fn depth(depth: usize) -> Result<i32> {
    i32::try_from(depth).map_err(|_| Error::InvalidArgument(format!("tree depth {depth} is too large")))
}

/// One write, applied inside the caller's immediate transaction.
///
/// Change events are collected and handed back so they can be published
/// only after commit.
pub(crate) struct WriteTxn<'c> {
    conn: &'c mut SqliteConnection,
    codec: &'c IdCodec,
    reader: Reader<'c>,
    now: Instant,
    micros: i64,
    events: Vec<ChangeEvent>,
}

impl<'c> WriteTxn<'c> {
    pub fn new(conn: &'c mut SqliteConnection, codec: &'c IdCodec, now: Instant) -> Self {
        Self {
            conn,
            codec,
            reader: Reader::new(codec),
            now,
            micros: to_micros(now),
            events: Vec::new(),
        }
    }

    pub fn into_events(self) -> Vec<ChangeEvent> {
        self.events
    }

    pub fn apply(&mut self, request: &WriteRequest) -> Result<WriteReceipt> {
        match request {
            WriteRequest::Add(entity) => match entity {
                Entity::Portfolio(p) => self.add_portfolio(p),
                Entity::Node(n) => self.add_node(n),
                Entity::Position(p) => self.add_position(p),
                Entity::Trade(t) => self.add_trade(t),
            },
            WriteRequest::Update { target, entity } => match entity {
                Entity::Portfolio(p) => self.replace_portfolio(target, p, Axis::Version),
                Entity::Node(n) => self.replace_node(target, n, Axis::Version),
                Entity::Position(p) => self.replace_position(target, p, Axis::Version),
                Entity::Trade(t) => self.replace_trade(target, t, Axis::Version),
            },
            WriteRequest::Correct { target, entity } => match entity {
                Entity::Portfolio(p) => self.replace_portfolio(target, p, Axis::Correction),
                Entity::Node(n) => self.replace_node(target, n, Axis::Correction),
                Entity::Position(p) => self.replace_position(target, p, Axis::Correction),
                Entity::Trade(t) => self.replace_trade(target, t, Axis::Correction),
            },
            WriteRequest::Remove { target } => match self.codec.kind_of(target.scheme())? {
                EntityKind::Portfolio => self.remove_portfolio(target),
                EntityKind::Node => self.remove_node(target),
                EntityKind::Position => self.remove_position(target),
                EntityKind::Trade => self.remove_trade(target),
            },
        }
    }

    // Portfolios

    fn add_portfolio(&mut self, value: &Portfolio) -> Result<WriteReceipt> {
        let id = next_id(self.conn)?;
        let row = PortfolioRow {
            id,
            oid: id,
            ver_from: self.micros,
            ver_to: END_OF_TIME,
            corr_from: self.micros,
            corr_to: END_OF_TIME,
            name: value.name.clone(),
            attributes: attributes_json(&value.attributes)?,
        };
        diesel::insert_into(portfolio::table)
            .values(&row)
            .execute(self.conn)?;
        let plan = self.plan(&value.root, &HashSet::new())?;
        let placed = self.insert_structure(&row, &plan)?;
        self.event(ChangeType::Added, EntityKind::Portfolio, row.oid);
        debug!(portfolio_oid = row.oid, nodes = placed.len(), "Inserted portfolio");
        self.receipt(EntityKind::Portfolio, &row)
    }

    fn replace_portfolio(
        &mut self,
        target: &UniqueId,
        value: &Portfolio,
        axis: Axis,
    ) -> Result<WriteReceipt> {
        let old = self.row_target(EntityKind::Portfolio, target, Reader::portfolio_row)?;
        require_latest(&old, target, axis)?;
        let keep: HashSet<i64> = self
            .reader
            .node_rows(self.conn, old.id)?
            .iter()
            .map(|n| n.oid)
            .collect();
        let plan = self.plan(&value.root, &keep)?;
        let attributes = attributes_json(&value.attributes)?;
        let (row, _) = self.rewrite_portfolio(&old, &value.name, &attributes, &plan, axis)?;
        self.changed(EntityKind::Portfolio, row.oid, row.intervals());
        self.receipt(EntityKind::Portfolio, &row)
    }

    fn remove_portfolio(&mut self, target: &UniqueId) -> Result<WriteReceipt> {
        let old = self.removal_target(
            EntityKind::Portfolio,
            target,
            Reader::portfolio_row,
            Reader::portfolio_row_current,
        )?;
        let nodes: Vec<i64> = self
            .reader
            .node_rows(self.conn, old.id)?
            .iter()
            .map(|n| n.oid)
            .collect();
        self.close_portfolio(&old, Axis::Version)?;
        self.cascade_positions(&nodes, Axis::Version, old.ver_from)?;
        for oid in &nodes {
            self.event(ChangeType::Removed, EntityKind::Node, *oid);
        }
        self.event(ChangeType::Removed, EntityKind::Portfolio, old.oid);
        self.removal_receipt(EntityKind::Portfolio, &old)
    }

    // Nodes

    fn add_node(&mut self, value: &PortfolioNode) -> Result<WriteReceipt> {
        let parent = value
            .parent_node_id
            .as_ref()
            .ok_or_else(|| Error::InvalidArgument("a new node needs a parent node id".into()))?;
        let parent_oid = self.codec.decode_as(EntityKind::Node, parent)?.oid;
        let parent_row = self.parent_row(parent, |reader, conn, micros| {
            reader.node_row_at(conn, parent_oid, micros, micros)
        })?;
        let old = self.reader.portfolio_row(self.conn, parent_row.portfolio_id)?;
        let mut plan = self.current_plan(&old)?;
        let parent_idx = locate(&plan, parent_oid)?;
        let idx = self.graft(&mut plan, parent_idx, value, &HashSet::new(), &mut HashSet::new())?;
        let (row, placed) =
            self.rewrite_portfolio(&old, &old.name, &old.attributes, &plan, Axis::Version)?;
        self.changed(EntityKind::Portfolio, row.oid, row.intervals());
        self.placed_receipt(EntityKind::Node, &placed, idx, row.intervals())
    }

    fn replace_node(
        &mut self,
        target: &UniqueId,
        value: &PortfolioNode,
        axis: Axis,
    ) -> Result<WriteReceipt> {
        let old_node = self.row_target(EntityKind::Node, target, Reader::node_row)?;
        require_latest(&old_node, target, axis)?;
        let old = self.reader.portfolio_row(self.conn, old_node.portfolio_id)?;
        let mut plan = self.current_plan(&old)?;
        let idx = locate(&plan, old_node.oid)?;

        let mut keep = HashSet::new();
        let mut stack = plan.children(idx).to_vec();
        while let Some(next) = stack.pop() {
            if let Some(oid) = plan.get(next).and_then(|p| p.oid) {
                keep.insert(oid);
            }
            stack.extend(plan.children(next).iter().copied());
        }
        for child in plan.children(idx).to_vec() {
            plan.detach(child)?;
        }
        if let Some(draft) = plan.get_mut(idx) {
            draft.name = value.name.clone();
        }
        let mut used = HashSet::new();
        for child in &value.child_nodes {
            self.graft(&mut plan, idx, child, &keep, &mut used)?;
        }

        let (row, placed) = self.rewrite_portfolio(&old, &old.name, &old.attributes, &plan, axis)?;
        self.changed(EntityKind::Node, old_node.oid, row.intervals());
        self.changed(EntityKind::Portfolio, row.oid, row.intervals());
        self.placed_receipt(EntityKind::Node, &placed, idx, row.intervals())
    }

    fn remove_node(&mut self, target: &UniqueId) -> Result<WriteReceipt> {
        let old_node = self.removal_target(
            EntityKind::Node,
            target,
            Reader::node_row,
            Reader::node_row_current,
        )?;
        if old_node.parent_node_id.is_none() {
            return Err(Error::InvalidArgument(format!(
                "{target} is a root node; remove its portfolio instead"
            )));
        }
        let old = self.reader.portfolio_row(self.conn, old_node.portfolio_id)?;
        let mut plan = self.current_plan(&old)?;
        let idx = locate(&plan, old_node.oid)?;
        plan.detach(idx)?;
        let (row, _) =
            self.rewrite_portfolio(&old, &old.name, &old.attributes, &plan, Axis::Version)?;
        self.changed(EntityKind::Portfolio, row.oid, row.intervals());
        self.removal_receipt(EntityKind::Node, &old_node)
    }

    // Positions

    fn add_position(&mut self, value: &Position) -> Result<WriteReceipt> {
        let parent = value
            .parent_node_id
            .as_ref()
            .ok_or_else(|| Error::InvalidArgument("a new position needs a parent node id".into()))?;
        let node_oid = self.codec.decode_as(EntityKind::Node, parent)?.oid;
        self.parent_row(parent, |reader, conn, micros| {
            reader.node_row_at(conn, node_oid, micros, micros)
        })?;
        let (row, trades) = self.insert_position(
            value,
            node_oid,
            None,
            Intervals::open(self.micros),
            &HashSet::new(),
        )?;
        self.event(ChangeType::Added, EntityKind::Position, row.oid);
        for (_, oid) in trades {
            self.event(ChangeType::Added, EntityKind::Trade, oid);
        }
        self.receipt(EntityKind::Position, &row)
    }

    fn replace_position(
        &mut self,
        target: &UniqueId,
        value: &Position,
        axis: Axis,
    ) -> Result<WriteReceipt> {
        let old = self.row_target(EntityKind::Position, target, Reader::position_row)?;
        require_latest(&old, target, axis)?;
        let (row, _) = self.rewrite_position(&old, value, axis)?;
        self.changed(EntityKind::Position, row.oid, row.intervals());
        self.receipt(EntityKind::Position, &row)
    }

    fn remove_position(&mut self, target: &UniqueId) -> Result<WriteReceipt> {
        let old = self.removal_target(
            EntityKind::Position,
            target,
            Reader::position_row,
            Reader::position_row_current,
        )?;
        let trades = self.reader.trade_oids(self.conn, old.id)?;
        self.close_position(&old, Axis::Version)?;
        for oid in trades {
            self.event(ChangeType::Removed, EntityKind::Trade, oid);
        }
        self.event(ChangeType::Removed, EntityKind::Position, old.oid);
        self.removal_receipt(EntityKind::Position, &old)
    }

    // Trades

    fn add_trade(&mut self, value: &Trade) -> Result<WriteReceipt> {
        let parent = value
            .parent_position_id
            .as_ref()
            .ok_or_else(|| Error::InvalidArgument("a new trade needs a parent position id".into()))?;
        let position_oid = self.codec.decode_as(EntityKind::Position, parent)?.oid;
        let old = self.parent_row(parent, |reader, conn, micros| {
            reader.position_row_at(conn, position_oid, micros, micros)
        })?;
        let mut holder = self.load_position(&old)?;
        let mut fresh = value.clone();
        fresh.unique_id = None;
        holder.trades.push(Arc::new(fresh));
        let (row, trades) = self.rewrite_position(&old, &holder, Axis::Version)?;
        self.changed(EntityKind::Position, row.oid, row.intervals());
        let (id, oid) = trades
            .last()
            .copied()
            .ok_or_else(|| Error::InvariantViolation("new trade was not written".into()))?;
        self.receipt_at(EntityKind::Trade, oid, id, row.intervals())
    }

    fn replace_trade(&mut self, target: &UniqueId, value: &Trade, axis: Axis) -> Result<WriteReceipt> {
        let old_trade = self.row_target(EntityKind::Trade, target, Reader::trade_row)?;
        require_latest(&old_trade, target, axis)?;
        let old = self.reader.position_row(self.conn, old_trade.position_id)?;
        require_latest(&old, target, axis)?;
        let mut holder = self.load_position(&old)?;
        let slot = self
            .trade_slot(&holder, old_trade.oid)
            .ok_or_else(|| Error::NotFound(target.to_string()))?;
        let mut replacement = value.clone();
        replacement.unique_id = Some(
            self.codec
                .row_id(EntityKind::Trade, old_trade.oid, old_trade.id)?,
        );
        holder.trades[slot] = Arc::new(replacement);
        let (row, trades) = self.rewrite_position(&old, &holder, axis)?;
        self.changed(EntityKind::Trade, old_trade.oid, row.intervals());
        self.changed(EntityKind::Position, row.oid, row.intervals());
        let (id, oid) = trades
            .iter()
            .copied()
            .find(|(_, oid)| *oid == old_trade.oid)
            .ok_or_else(|| Error::InvariantViolation("replaced trade was not written".into()))?;
        self.receipt_at(EntityKind::Trade, oid, id, row.intervals())
    }

    fn remove_trade(&mut self, target: &UniqueId) -> Result<WriteReceipt> {
        let old_trade = self.removal_target(
            EntityKind::Trade,
            target,
            Reader::trade_row,
            Reader::trade_row_current,
        )?;
        let old = self.reader.position_row(self.conn, old_trade.position_id)?;
        let mut holder = self.load_position(&old)?;
        let slot = self
            .trade_slot(&holder, old_trade.oid)
            .ok_or_else(|| Error::NotFound(target.to_string()))?;
        holder.trades.remove(slot);
        let (row, _) = self.rewrite_position(&old, &holder, Axis::Version)?;
        self.changed(EntityKind::Position, row.oid, row.intervals());
        self.removal_receipt(EntityKind::Trade, &old_trade)
    }

    // Target resolution

    /// The row named by a versioned id, checked to belong to the id's object.
    fn row_target<R: Versioned>(
        &mut self,
        kind: EntityKind,
        target: &UniqueId,
        by_id: fn(&Reader<'c>, &mut SqliteConnection, i64) -> Result<R>,
    ) -> Result<R> {
        let decoded = self.codec.decode_as(kind, target)?;
        let IdVersion::Row(row_id) = decoded.version else {
            return Err(Error::invalid_id(
                target.as_str(),
                "this write needs the id of a stored row",
            ));
        };
        let row = by_id(&self.reader, self.conn, row_id)?;
        if row.object_id() != decoded.oid {
            return Err(Error::NotFound(target.to_string()));
        }
        Ok(row)
    }

    /// Removals accept an unversioned id, meaning the current row.
    fn removal_target<R: Versioned>(
        &mut self,
        kind: EntityKind,
        target: &UniqueId,
        by_id: fn(&Reader<'c>, &mut SqliteConnection, i64) -> Result<R>,
        current: fn(&Reader<'c>, &mut SqliteConnection, i64) -> Result<R>,
    ) -> Result<R> {
        let decoded = self.codec.decode_as(kind, target)?;
        match decoded.version {
            IdVersion::Latest => current(&self.reader, self.conn, decoded.oid),
            IdVersion::Row(_) => {
                let row = self.row_target(kind, target, by_id)?;
                require_latest(&row, target, Axis::Version)?;
                Ok(row)
            }
            IdVersion::Snapshot(_) => Err(Error::invalid_id(
                target.as_str(),
                "a snapshot id cannot be removed",
            )),
        }
    }

    /// A parent row valid now, or `ParentNotFound`.
    fn parent_row<R>(
        &mut self,
        parent: &UniqueId,
        load: impl FnOnce(&Reader<'c>, &mut SqliteConnection, i64) -> Result<R>,
    ) -> Result<R> {
        match load(&self.reader, self.conn, self.micros) {
            Err(Error::NotFound(_)) => Err(Error::ParentNotFound(parent.to_string())),
            other => other,
        }
    }

    // Structure

    fn node_plan(
        &self,
        node: &PortfolioNode,
        keep: &HashSet<i64>,
        used: &mut HashSet<i64>,
    ) -> NodePlan {
        let oid = node
            .unique_id
            .as_ref()
            .and_then(|id| self.codec.decode_as(EntityKind::Node, id).ok())
            .map(|decoded| decoded.oid)
            .filter(|oid| keep.contains(oid) && used.insert(*oid));
        NodePlan {
            oid,
            name: node.name.clone(),
            positions: node.positions.clone(),
        }
    }

    /// Plan a structure from a payload tree, keeping the object ids of
    /// nodes listed in `keep`.
    fn plan(&self, root: &PortfolioNode, keep: &HashSet<i64>) -> Result<TreeArena<NodePlan>> {
        let mut used = HashSet::new();
        let mut arena = TreeArena::with_root(self.node_plan(root, keep, &mut used));
        let top = arena.root();
        for child in &root.child_nodes {
            self.graft(&mut arena, top, child, keep, &mut used)?;
        }
        Ok(arena)
    }

    fn graft(
        &self,
        arena: &mut TreeArena<NodePlan>,
        parent: NodeIdx,
        node: &PortfolioNode,
        keep: &HashSet<i64>,
        used: &mut HashSet<i64>,
    ) -> Result<NodeIdx> {
        let idx = arena.push_child(parent, self.node_plan(node, keep, used))?;
        let mut stack: Vec<(&PortfolioNode, NodeIdx)> = vec![(node, idx)];
        while let Some((next, at)) = stack.pop() {
            for child in &next.child_nodes {
                let child_idx = arena.push_child(at, self.node_plan(child, keep, used))?;
                stack.push((child, child_idx));
            }
        }
        Ok(idx)
    }

    /// The stored structure of one portfolio row.
    fn current_plan(&mut self, row: &PortfolioRow) -> Result<TreeArena<NodePlan>> {
        let mut decoder = NestedSetDecoder::new();
        for node in self.reader.node_rows(self.conn, row.id)? {
            decoder.push(
                Bounds::new(node.tree_left, node.tree_right),
                NodePlan {
                    oid: Some(node.oid),
                    name: node.name,
                    positions: Vec::new(),
                },
            )?;
        }
        decoder.finish()
    }

    /// Insert node rows for `plan` under portfolio row `row`, plus the
    /// embedded positions of nodes that are new.
    fn insert_structure(
        &mut self,
        row: &PortfolioRow,
        plan: &TreeArena<NodePlan>,
    ) -> Result<Placement> {
        let encoded = plan.encode();
        let count = i64::try_from(encoded.len())
            .map_err(|_| Error::InvalidArgument("too many nodes".into()))?;
        let first = allocate(self.conn, count)?;
        let mut placed = Placement::with_capacity(encoded.len());
        let mut rows = Vec::with_capacity(encoded.len());
        for (id, node) in (first..).zip(&encoded) {
            let Some(draft) = plan.get(node.idx) else {
                continue;
            };
            let oid = draft.oid.unwrap_or(id);
            let parent = node.parent.and_then(|p| placed.get(&p).copied());
            rows.push(NodeRow {
                id,
                oid,
                portfolio_id: row.id,
                portfolio_oid: row.oid,
                parent_node_id: parent.map(|(id, _)| id),
                parent_node_oid: parent.map(|(_, oid)| oid),
                depth: depth(node.depth)?,
                tree_left: node.bounds.left,
                tree_right: node.bounds.right,
                name: draft.name.clone(),
                ver_from: row.ver_from,
                ver_to: row.ver_to,
                corr_from: row.corr_from,
                corr_to: row.corr_to,
            });
            placed.insert(node.idx, (id, oid));
        }
        diesel::insert_into(portfolio_node::table)
            .values(&rows)
            .execute(self.conn)?;

        for node in &encoded {
            let (Some(draft), Some(&(_, node_oid))) = (plan.get(node.idx), placed.get(&node.idx))
            else {
                continue;
            };
            if draft.oid.is_some() {
                continue;
            }
            self.event(ChangeType::Added, EntityKind::Node, node_oid);
            for held in &draft.positions {
                let (position, trades) = self.insert_position(
                    held,
                    node_oid,
                    None,
                    Intervals::open(self.micros),
                    &HashSet::new(),
                )?;
                self.event(ChangeType::Added, EntityKind::Position, position.oid);
                for (_, oid) in trades {
                    self.event(ChangeType::Added, EntityKind::Trade, oid);
                }
            }
        }
        Ok(placed)
    }

    /// Close portfolio row `old` on `axis` and insert its replacement with
    /// the structure in `plan`.
    ///
    /// When the replaced row is version-current, positions held by nodes
    /// that are not part of the new structure are removed with them.
    fn rewrite_portfolio(
        &mut self,
        old: &PortfolioRow,
        name: &str,
        attributes: &str,
        plan: &TreeArena<NodePlan>,
        axis: Axis,
    ) -> Result<(PortfolioRow, Placement)> {
        let old_nodes: Vec<i64> = self
            .reader
            .node_rows(self.conn, old.id)?
            .iter()
            .map(|n| n.oid)
            .collect();
        self.close_portfolio(old, axis)?;
        let intervals = match axis {
            Axis::Version => Intervals::open(self.micros),
            Axis::Correction => old.intervals().corrected(self.micros),
        };
        let row = PortfolioRow {
            id: next_id(self.conn)?,
            oid: old.oid,
            ver_from: intervals.ver_from,
            ver_to: intervals.ver_to,
            corr_from: intervals.corr_from,
            corr_to: intervals.corr_to,
            name: name.to_owned(),
            attributes: attributes.to_owned(),
        };
        diesel::insert_into(portfolio::table)
            .values(&row)
            .execute(self.conn)?;
        let placed = self.insert_structure(&row, plan)?;

        if old.ver_to == END_OF_TIME {
            let kept: HashSet<i64> = placed.values().map(|(_, oid)| *oid).collect();
            let vanished: Vec<i64> = old_nodes
                .into_iter()
                .filter(|oid| !kept.contains(oid))
                .collect();
            self.cascade_positions(&vanished, axis, old.ver_from)?;
            for oid in vanished {
                self.event(ChangeType::Removed, EntityKind::Node, oid);
            }
        }
        Ok((row, placed))
    }

    fn close_portfolio(&mut self, old: &PortfolioRow, axis: Axis) -> Result<()> {
        let closed = match axis {
            Axis::Version => diesel::update(
                portfolio::table
                    .filter(portfolio::id.eq(old.id))
                    .filter(portfolio::ver_to.eq(END_OF_TIME))
                    .filter(portfolio::corr_to.eq(END_OF_TIME)),
            )
            .set(portfolio::ver_to.eq(self.micros))
            .execute(self.conn)?,
            Axis::Correction => diesel::update(
                portfolio::table
                    .filter(portfolio::id.eq(old.id))
                    .filter(portfolio::corr_to.eq(END_OF_TIME)),
            )
            .set(portfolio::corr_to.eq(self.micros))
            .execute(self.conn)?,
        };
        if closed != 1 {
            return Err(axis.conflict(format!("portfolio row {}", old.id)));
        }
        let nodes = portfolio_node::table.filter(portfolio_node::portfolio_id.eq(old.id));
        match axis {
            Axis::Version => diesel::update(nodes)
                .set(portfolio_node::ver_to.eq(self.micros))
                .execute(self.conn)?,
            Axis::Correction => diesel::update(nodes)
                .set(portfolio_node::corr_to.eq(self.micros))
                .execute(self.conn)?,
        };
        Ok(())
    }

    /// Retire the current positions of `node_oids`.
    ///
    /// On the correction axis a position is corrected away from `since`,
    /// the start of the corrected portfolio row: any earlier part of its
    /// version history survives as a sibling row ending at `since`.
    fn cascade_positions(&mut self, node_oids: &[i64], axis: Axis, since: i64) -> Result<()> {
        let held = self.reader.current_positions_under(self.conn, node_oids)?;
        if !held.is_empty() {
            debug!(positions = held.len(), ?axis, "Removing positions of removed nodes");
        }
        for row in &held {
            let trades = self.reader.trade_oids(self.conn, row.id)?;
            match axis {
                Axis::Version => self.close_position(row, Axis::Version)?,
                Axis::Correction => {
                    let value = self.load_position(row)?;
                    self.close_position(row, Axis::Correction)?;
                    if row.ver_from < since {
                        let earlier = Intervals {
                            ver_from: row.ver_from,
                            ver_to: since,
                            corr_from: self.micros,
                            corr_to: END_OF_TIME,
                        };
                        self.insert_position(&value, row.node_oid, Some(row.oid), earlier, &trades)?;
                    }
                }
            }
            for oid in trades {
                self.event(ChangeType::Removed, EntityKind::Trade, oid);
            }
            self.event(ChangeType::Removed, EntityKind::Position, row.oid);
        }
        Ok(())
    }

    // Position rows

    fn load_position(&mut self, row: &PositionRow) -> Result<Position> {
        let mut dedup = IdDeduplicator::new();
        self.reader.position_from_row(self.conn, row, &mut dedup)
    }

    fn trade_slot(&self, holder: &Position, trade_oid: i64) -> Option<usize> {
        holder.trades.iter().position(|t| {
            t.unique_id
                .as_ref()
                .and_then(|id| self.codec.decode_as(EntityKind::Trade, id).ok())
                .is_some_and(|decoded| decoded.oid == trade_oid)
        })
    }

    fn insert_position(
        &mut self,
        value: &Position,
        node_oid: i64,
        oid: Option<i64>,
        intervals: Intervals,
        keep_trades: &HashSet<i64>,
    ) -> Result<(PositionRow, Vec<(i64, i64)>)> {
        let id = next_id(self.conn)?;
        let row = PositionRow {
            id,
            oid: oid.unwrap_or(id),
            node_oid,
            quantity: value.quantity.to_string(),
            security_oid: value
                .security_link
                .object_id
                .as_ref()
                .map(|o| o.as_str().to_owned()),
            provider_scheme: value.provider_id.as_ref().map(|p| p.scheme().to_owned()),
            provider_value: value.provider_id.as_ref().map(|p| p.value().to_owned()),
            attributes: attributes_json(&value.attributes)?,
            ver_from: intervals.ver_from,
            ver_to: intervals.ver_to,
            corr_from: intervals.corr_from,
            corr_to: intervals.corr_to,
        };
        diesel::insert_into(position::table)
            .values(&row)
            .execute(self.conn)?;

        let keys: Vec<SecurityKeyRow> = value
            .security_link
            .external_ids
            .iter()
            .map(|key| SecurityKeyRow {
                position_id: id,
                key_scheme: key.scheme().to_owned(),
                key_value: key.value().to_owned(),
            })
            .collect();
        if !keys.is_empty() {
            diesel::insert_into(position_security_key::table)
                .values(&keys)
                .execute(self.conn)?;
        }

        let mut placed = Vec::with_capacity(value.trades.len());
        if value.trades.is_empty() {
            return Ok((row, placed));
        }
        let count = i64::try_from(value.trades.len())
            .map_err(|_| Error::InvalidArgument("too many trades".into()))?;
        let first = allocate(self.conn, count)?;
        let mut used = HashSet::new();
        let mut rows = Vec::with_capacity(value.trades.len());
        for (trade_id, held) in (first..).zip(&value.trades) {
            let trade_oid = held
                .unique_id
                .as_ref()
                .and_then(|uid| self.codec.decode_as(EntityKind::Trade, uid).ok())
                .map(|decoded| decoded.oid)
                .filter(|o| keep_trades.contains(o) && used.insert(*o))
                .unwrap_or(trade_id);
            rows.push(TradeRow {
                id: trade_id,
                oid: trade_oid,
                position_id: row.id,
                position_oid: row.oid,
                quantity: held.quantity.to_string(),
                counterparty_scheme: held.counterparty.scheme().to_owned(),
                counterparty_value: held.counterparty.value().to_owned(),
                traded_at: to_micros(held.traded_at),
                premium: held.premium.map(|p| p.to_string()),
                premium_currency: held.premium_currency.clone(),
                provider_scheme: held.provider_id.as_ref().map(|p| p.scheme().to_owned()),
                provider_value: held.provider_id.as_ref().map(|p| p.value().to_owned()),
                security_link: serde_json::to_string(&held.security_link)?,
                attributes: attributes_json(&held.attributes)?,
                ver_from: row.ver_from,
                ver_to: row.ver_to,
                corr_from: row.corr_from,
                corr_to: row.corr_to,
            });
            placed.push((trade_id, trade_oid));
        }
        diesel::insert_into(trade::table)
            .values(&rows)
            .execute(self.conn)?;
        Ok((row, placed))
    }

    /// Close position row `old` on `axis` and insert `value` as its
    /// replacement, in the same node and under the same object id.
    fn rewrite_position(
        &mut self,
        old: &PositionRow,
        value: &Position,
        axis: Axis,
    ) -> Result<(PositionRow, Vec<(i64, i64)>)> {
        let previous = self.reader.trade_oids(self.conn, old.id)?;
        self.close_position(old, axis)?;
        let intervals = match axis {
            Axis::Version => Intervals::open(self.micros),
            Axis::Correction => old.intervals().corrected(self.micros),
        };
        let (row, trades) =
            self.insert_position(value, old.node_oid, Some(old.oid), intervals, &previous)?;
        let current: HashSet<i64> = trades.iter().map(|(_, oid)| *oid).collect();
        for (_, oid) in &trades {
            if !previous.contains(oid) {
                self.event(ChangeType::Added, EntityKind::Trade, *oid);
            }
        }
        for oid in previous.difference(&current) {
            self.event(ChangeType::Removed, EntityKind::Trade, *oid);
        }
        Ok((row, trades))
    }

    fn close_position(&mut self, old: &PositionRow, axis: Axis) -> Result<()> {
        let closed = match axis {
            Axis::Version => diesel::update(
                position::table
                    .filter(position::id.eq(old.id))
                    .filter(position::ver_to.eq(END_OF_TIME))
                    .filter(position::corr_to.eq(END_OF_TIME)),
            )
            .set(position::ver_to.eq(self.micros))
            .execute(self.conn)?,
            Axis::Correction => diesel::update(
                position::table
                    .filter(position::id.eq(old.id))
                    .filter(position::corr_to.eq(END_OF_TIME)),
            )
            .set(position::corr_to.eq(self.micros))
            .execute(self.conn)?,
        };
        if closed != 1 {
            return Err(axis.conflict(format!("position row {}", old.id)));
        }
        let trades = trade::table.filter(trade::position_id.eq(old.id));
        match axis {
            Axis::Version => diesel::update(trades)
                .set(trade::ver_to.eq(self.micros))
                .execute(self.conn)?,
            Axis::Correction => diesel::update(trades)
                .set(trade::corr_to.eq(self.micros))
                .execute(self.conn)?,
        };
        Ok(())
    }

    // Receipts and events

    fn receipt_at(
        &self,
        kind: EntityKind,
        oid: i64,
        id: i64,
        intervals: Intervals,
    ) -> Result<WriteReceipt> {
        Ok(WriteReceipt {
            unique_id: self.codec.row_id(kind, oid, id)?,
            version_from: from_micros(intervals.ver_from)?,
            correction_from: from_micros(intervals.corr_from)?,
        })
    }

    fn receipt<R: Versioned>(&self, kind: EntityKind, row: &R) -> Result<WriteReceipt> {
        self.receipt_at(kind, row.object_id(), row.row_id(), row.intervals())
    }

    fn placed_receipt(
        &self,
        kind: EntityKind,
        placed: &Placement,
        idx: NodeIdx,
        intervals: Intervals,
    ) -> Result<WriteReceipt> {
        let (id, oid) = placed
            .get(&idx)
            .copied()
            .ok_or_else(|| Error::InvariantViolation("written node was not placed".into()))?;
        self.receipt_at(kind, oid, id, intervals)
    }

    fn removal_receipt<R: Versioned>(&self, kind: EntityKind, row: &R) -> Result<WriteReceipt> {
        Ok(WriteReceipt {
            unique_id: self.codec.row_id(kind, row.object_id(), row.row_id())?,
            version_from: self.now,
            correction_from: self.now,
        })
    }

    fn event(&mut self, change_type: ChangeType, kind: EntityKind, oid: i64) {
        let (version_from, version_to) = match change_type {
            ChangeType::Added | ChangeType::Changed => (Some(self.now), None),
            ChangeType::Removed => (None, Some(self.now)),
        };
        self.events.push(ChangeEvent {
            change_type,
            object_id: self.codec.object_id(kind, oid),
            version_from,
            version_to,
            version_instant: self.now,
        });
    }

    /// A changed object whose current interval is `intervals`.
    fn changed(&mut self, kind: EntityKind, oid: i64, intervals: Intervals) {
        self.events.push(ChangeEvent {
            change_type: ChangeType::Changed,
            object_id: self.codec.object_id(kind, oid),
            version_from: from_micros(intervals.ver_from).ok(),
            version_to: micros_to_bound(intervals.ver_to).ok().flatten(),
            version_instant: self.now,
        });
    }
}

fn require_latest<R: Versioned>(row: &R, target: &UniqueId, axis: Axis) -> Result<()> {
    let intervals = row.intervals();
    let latest = match axis {
        Axis::Version => intervals.is_version_current() && intervals.is_correction_current(),
        Axis::Correction => intervals.is_correction_current(),
    };
    if latest {
        Ok(())
    } else {
        Err(axis.conflict(target.to_string()))
    }
}

fn locate(plan: &TreeArena<NodePlan>, oid: i64) -> Result<NodeIdx> {
    plan.find(|draft| draft.oid == Some(oid)).ok_or_else(|| {
        Error::InvariantViolation(format!("node {oid} is missing from its portfolio's structure"))
    })
}
