//! History and search queries.

use std::str::FromStr;
use std::sync::Arc;

use diesel::prelude::*;
use diesel::SqliteConnection;
use rust_decimal::Decimal;
use tracing::debug;

use super::database::model::{Intervals, NodeRow, PortfolioRow, PositionRow, TradeRow, Versioned};
use super::database::schema::{portfolio, portfolio_node, position, position_security_key, trade};
use super::reader::{Reader, RootId};
use crate::domain::version::{from_micros, micros_to_bound, to_micros};
use crate::domain::{
    Document, Entity, EntityKind, HistoryRequest, IdCodec, IdDeduplicator, Instant, Paging,
    PagingRequest, Portfolio, PortfolioSearchRequest, Position, PositionSearchRequest,
    SearchResult, UniqueId, VersionCorrection,
};
use crate::error::{Error, Result};

/// Translate a `*`/`?` wildcard pattern into a `LIKE` pattern escaped with
/// `\`.
pub(crate) fn like_pattern(wildcard: &str) -> String {
    let mut out = String::with_capacity(wildcard.len() + 2);
    for ch in wildcard.chars() {
        match ch {
            '*' => out.push('%'),
            '?' => out.push('_'),
            '%' | '_' | '\\' => {
                out.push('\\');
                out.push(ch);
            }
            other => out.push(other),
        }
    }
    out
}

/// `[from, to]` in micros. A missing start is unbounded, a missing end is
/// "now".
fn range(from: Option<Instant>, to: Option<Instant>, now: i64) -> (i64, i64) {
    (
        from.map_or(i64::MIN, to_micros),
        to.map_or(now, to_micros),
    )
}

fn document<T>(intervals: Intervals, unique_id: UniqueId, value: T) -> Result<Document<T>> {
    Ok(Document {
        unique_id,
        version_from: from_micros(intervals.ver_from)?,
        version_to: micros_to_bound(intervals.ver_to)?,
        correction_from: from_micros(intervals.corr_from)?,
        correction_to: micros_to_bound(intervals.corr_to)?,
        value,
    })
}

fn page<T>(items: Vec<T>, request: PagingRequest) -> (Vec<T>, Paging) {
    let total = items.len();
    let kept: Vec<T> = items
        .into_iter()
        .skip(request.first)
        .take(request.size)
        .collect();
    let paging = Paging {
        first: request.first.min(total),
        size: kept.len(),
        total,
    };
    (kept, paging)
}

fn resolved(version: i64, correction: i64) -> Result<VersionCorrection> {
    Ok(VersionCorrection::of(
        Some(from_micros(version)?),
        Some(from_micros(correction)?),
    ))
}

macro_rules! history_rows {
    ($conn:expr, $table:ident, $row:ty, $oid:expr, $v:expr, $c:expr) => {{
        let rows: Vec<$row> = $table::table
            .filter($table::oid.eq($oid))
            .filter($table::ver_from.le($v.1))
            .filter($table::ver_to.gt($v.0))
            .filter($table::corr_from.le($c.1))
            .filter($table::corr_to.gt($c.0))
            .order(($table::ver_from.desc(), $table::corr_from.desc()))
            .select(<$row>::as_select())
            .load($conn)?;
        rows
    }};
}

/// Rows of one object overlapping the requested instant ranges, newest
/// first. Portfolios and nodes are materialized as of their own row's start.
pub(crate) fn history(
    conn: &mut SqliteConnection,
    reader: Reader<'_>,
    codec: &IdCodec,
    request: &HistoryRequest,
    now: Instant,
) -> Result<SearchResult<Entity>> {
    let now = to_micros(now);
    let (kind, oid) = codec.extract_oid(&request.object_id)?;
    let versions = range(request.versions_from, request.versions_to, now);
    let corrections = range(request.corrections_from, request.corrections_to, now);
    if versions.0 > versions.1 || corrections.0 > corrections.1 {
        return Err(Error::InvalidArgument("history range ends before it starts".into()));
    }

    let mut dedup = IdDeduplicator::new();
    let documents = match kind {
        EntityKind::Portfolio => {
            let rows = history_rows!(conn, portfolio, PortfolioRow, oid, versions, corrections);
            let (rows, paging) = page(rows, request.paging);
            let mut documents = Vec::with_capacity(rows.len());
            for row in &rows {
                let value = reader.portfolio_tree(conn, row, row.ver_from, row.corr_from, RootId::Row)?;
                let unique_id = codec.row_id(kind, row.oid, row.id)?;
                documents.push(document(row.intervals(), unique_id, Entity::Portfolio(value))?);
            }
            (documents, paging)
        }
        EntityKind::Node => {
            let rows = history_rows!(conn, portfolio_node, NodeRow, oid, versions, corrections);
            let (rows, paging) = page(rows, request.paging);
            let mut documents = Vec::with_capacity(rows.len());
            for row in &rows {
                let value = reader.node_tree(conn, row, row.ver_from, row.corr_from, RootId::Row)?;
                let unique_id = codec.row_id(kind, row.oid, row.id)?;
                documents.push(document(row.intervals(), unique_id, Entity::Node(value))?);
            }
            (documents, paging)
        }
        EntityKind::Position => {
            let rows = history_rows!(conn, position, PositionRow, oid, versions, corrections);
            let (rows, paging) = page(rows, request.paging);
            let mut documents = Vec::with_capacity(rows.len());
            for row in &rows {
                let value = Arc::new(reader.position_from_row(conn, row, &mut dedup)?);
                let unique_id = codec.row_id(kind, row.oid, row.id)?;
                documents.push(document(row.intervals(), unique_id, Entity::Position(value))?);
            }
            (documents, paging)
        }
        EntityKind::Trade => {
            let rows = history_rows!(conn, trade, TradeRow, oid, versions, corrections);
            let (rows, paging) = page(rows, request.paging);
            let mut documents = Vec::with_capacity(rows.len());
            for row in &rows {
                let value = Arc::new(reader.trade_from_row(row, &mut dedup)?);
                let unique_id = codec.row_id(kind, row.oid, row.id)?;
                documents.push(document(row.intervals(), unique_id, Entity::Trade(value))?);
            }
            (documents, paging)
        }
    };
    debug!(object_id = %request.object_id, rows = documents.0.len(), "History loaded");
    Ok(SearchResult {
        documents: documents.0,
        paging: documents.1,
        version_correction: resolved(versions.1, corrections.1)?,
    })
}

/// Portfolios valid at the requested instants, ordered by object id.
pub(crate) fn portfolios(
    conn: &mut SqliteConnection,
    reader: Reader<'_>,
    codec: &IdCodec,
    request: &PortfolioSearchRequest,
    now: Instant,
) -> Result<SearchResult<Arc<Portfolio>>> {
    let (v, c) = request.version_correction.resolve(now);
    let mut query = portfolio::table
        .filter(portfolio::ver_from.le(v))
        .filter(portfolio::ver_to.gt(v))
        .filter(portfolio::corr_from.le(c))
        .filter(portfolio::corr_to.gt(c))
        .into_boxed();
    if let Some(ids) = &request.object_ids {
        let oids = ids
            .iter()
            .map(|id| codec.oid_as(EntityKind::Portfolio, id))
            .collect::<Result<Vec<i64>>>()?;
        query = query.filter(portfolio::oid.eq_any(oids));
    }
    if let Some(name) = &request.name {
        query = query.filter(portfolio::name.like(like_pattern(name)).escape('\\'));
    }
    let rows: Vec<PortfolioRow> = query
        .order(portfolio::oid.asc())
        .select(PortfolioRow::as_select())
        .load(conn)?;
    let (rows, paging) = page(rows, request.paging);

    let mut documents = Vec::with_capacity(rows.len());
    for row in &rows {
        let value = reader.portfolio_tree(conn, row, v, c, RootId::Row)?;
        let unique_id = value
            .unique_id
            .clone()
            .ok_or_else(|| Error::InvariantViolation("portfolio read without an id".into()))?;
        documents.push(document(row.intervals(), unique_id, value)?);
    }
    Ok(SearchResult {
        documents,
        paging,
        version_correction: resolved(v, c)?,
    })
}

/// Positions valid at the requested instants, ordered by object id.
pub(crate) fn positions(
    conn: &mut SqliteConnection,
    reader: Reader<'_>,
    codec: &IdCodec,
    request: &PositionSearchRequest,
    now: Instant,
) -> Result<SearchResult<Arc<Position>>> {
    let (v, c) = request.version_correction.resolve(now);

    let mut query = position::table
        .filter(position::ver_from.le(v))
        .filter(position::ver_to.gt(v))
        .filter(position::corr_from.le(c))
        .filter(position::corr_to.gt(c))
        .into_boxed();
    if let Some(ids) = &request.object_ids {
        let oids = ids
            .iter()
            .map(|id| codec.oid_as(EntityKind::Position, id))
            .collect::<Result<Vec<i64>>>()?;
        query = query.filter(position::oid.eq_any(oids));
    }
    if let Some(ids) = &request.node_ids {
        let oids = ids
            .iter()
            .map(|id| codec.oid_as(EntityKind::Node, id))
            .collect::<Result<Vec<i64>>>()?;
        query = query.filter(position::node_oid.eq_any(oids));
    }
    if let Some(key) = &request.security_key {
        let holders = position_security_key::table
            .filter(position_security_key::key_scheme.eq(key.scheme().to_owned()))
            .filter(position_security_key::key_value.eq(key.value().to_owned()))
            .select(position_security_key::position_id);
        query = query.filter(position::id.eq_any(holders));
    }
    let rows: Vec<PositionRow> = query
        .order(position::oid.asc())
        .select(PositionRow::as_select())
        .load(conn)?;

    let mut matching = Vec::with_capacity(rows.len());
    for row in rows {
        let quantity = Decimal::from_str(&row.quantity)
            .map_err(|e| Error::Parse(format!("quantity '{}': {e}", row.quantity)))?;
        let above = request.min_quantity.map_or(true, |min| quantity >= min);
        let below = request.max_quantity.map_or(true, |max| quantity <= max);
        if above && below {
            matching.push(row);
        }
    }
    let (rows, paging) = page(matching, request.paging);

    let mut dedup = IdDeduplicator::new();
    let mut documents = Vec::with_capacity(rows.len());
    for row in &rows {
        let value = Arc::new(reader.position_from_row(conn, row, &mut dedup)?);
        let unique_id = codec.row_id(EntityKind::Position, row.oid, row.id)?;
        documents.push(document(row.intervals(), unique_id, value)?);
    }
    Ok(SearchResult {
        documents,
        paging,
        version_correction: resolved(v, c)?,
    })
}
