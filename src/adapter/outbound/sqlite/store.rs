//! SQLite position master.
//!
//! Implements [`PositionSource`] and [`PositionMaster`] over the
//! bitemporal tables. Writes run in immediate transactions so that the
//! optimistic checks and the inserts they guard see one consistent state.
//! Reads run in deferred transactions.

use std::sync::Arc;

use diesel::r2d2::{ConnectionManager, PooledConnection};
use diesel::{Connection, SqliteConnection};
use tracing::{debug, info, warn};

use super::database::connection::{self, DbPool};
use super::database::model::Versioned;
use super::reader::{Reader, RootId};
use super::search;
use super::writer::WriteTxn;
use crate::domain::{
    Clock, Entity, EntityKind, HistoryRequest, IdCodec, IdDeduplicator, IdVersion, ObjectId,
    Portfolio, PortfolioNode, PortfolioSearchRequest, Position, PositionSearchRequest,
    SearchResult, SystemClock, Trade, UniqueId, VersionCorrection, WriteReceipt, WriteRequest,
};
use crate::error::{Error, Result};
use crate::infrastructure::config::Config;
use crate::port::{ChangeManager, PositionMaster, PositionSource};

type Conn = PooledConnection<ConnectionManager<SqliteConnection>>;

/// SQLite-backed position master.
pub struct SqlitePositionMaster {
    pool: DbPool,
    codec: IdCodec,
    clock: Arc<dyn Clock>,
    changes: ChangeManager,
}

impl std::fmt::Debug for SqlitePositionMaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlitePositionMaster")
            .field("codec", &self.codec)
            .field("clock", &self.clock)
            .field("changes", &self.changes)
            .finish_non_exhaustive()
    }
}

impl SqlitePositionMaster {
    /// Create a master over a migrated pool, stamping writes with the
    /// system clock.
    #[must_use]
    pub fn new(pool: DbPool, codec: IdCodec) -> Self {
        Self {
            pool,
            codec,
            clock: Arc::new(SystemClock::new()),
            changes: ChangeManager::new(),
        }
    }

    /// Open the configured database, apply migrations and create a master.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or migrated.
    pub fn open(config: &Config) -> Result<Self> {
        let pool = connection::open(&config.database)?;
        info!(url = %config.database.url, "Opened position database");
        Ok(Self::new(
            pool,
            IdCodec::new(&config.identifiers.scheme_prefix),
        ))
    }

    /// Replace the time source.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn codec(&self) -> &IdCodec {
        &self.codec
    }

    #[must_use]
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    fn conn(&self) -> Result<Conn> {
        self.pool
            .get()
            .map_err(|e| Error::Connection(e.to_string()))
    }

    /// Run `f` in a deferred transaction.
    fn read<T>(&self, f: impl FnOnce(&mut SqliteConnection, Reader<'_>) -> Result<T>) -> Result<T> {
        let mut pooled = self.conn()?;
        let conn: &mut SqliteConnection = &mut pooled;
        let reader = Reader::new(&self.codec);
        conn.transaction(|conn| f(conn, reader))
    }

    /// `(version, correction)` micros for a request. Latest axes are fixed
    /// once here so the whole read sees one instant.
    fn resolve(&self, vc: VersionCorrection) -> (i64, i64) {
        vc.resolve(self.clock.now())
    }

    fn portfolio_by_oid(&self, oid: i64, vc: VersionCorrection) -> Result<Arc<Portfolio>> {
        let (v, c) = self.resolve(vc);
        self.read(|conn, reader| {
            let row = reader.portfolio_row_at(conn, oid, v, c)?;
            reader.portfolio_tree(conn, &row, v, c, RootId::Snapshot)
        })
    }

    fn node_by_oid(&self, oid: i64, vc: VersionCorrection) -> Result<Arc<PortfolioNode>> {
        let (v, c) = self.resolve(vc);
        self.read(|conn, reader| {
            let row = reader.node_row_at(conn, oid, v, c)?;
            reader.node_tree(conn, &row, v, c, RootId::Snapshot)
        })
    }
}

/// Reject a stored row that does not belong to the requested object.
fn owned_by<R: Versioned>(row: R, oid: i64, id: &UniqueId) -> Result<R> {
    if row.object_id() == oid {
        Ok(row)
    } else {
        Err(Error::NotFound(id.to_string()))
    }
}

impl PositionSource for SqlitePositionMaster {
    fn portfolio(&self, id: &UniqueId, vc: VersionCorrection) -> Result<Arc<Portfolio>> {
        let decoded = self.codec.decode_as(EntityKind::Portfolio, id)?;
        match decoded.version {
            IdVersion::Latest => self.portfolio_by_oid(decoded.oid, vc),
            IdVersion::Row(row_id) => {
                let (v, c) = self.resolve(vc);
                self.read(|conn, reader| {
                    let row = owned_by(reader.portfolio_row(conn, row_id)?, decoded.oid, id)?;
                    let (v, c) = row.intervals().clamp(v, c);
                    reader.portfolio_tree(conn, &row, v, c, RootId::Row)
                })
            }
            IdVersion::Snapshot(token) => self.read(|conn, reader| {
                let row =
                    reader.portfolio_row_at(conn, decoded.oid, token.version, token.correction)?;
                reader.portfolio_tree(
                    conn,
                    &row,
                    token.version,
                    token.correction,
                    RootId::Given(id.clone()),
                )
            }),
        }
    }

    fn portfolio_at(&self, id: &ObjectId, vc: VersionCorrection) -> Result<Arc<Portfolio>> {
        let oid = self.codec.oid_as(EntityKind::Portfolio, id)?;
        self.portfolio_by_oid(oid, vc)
    }

    fn node(&self, id: &UniqueId, vc: VersionCorrection) -> Result<Arc<PortfolioNode>> {
        let decoded = self.codec.decode_as(EntityKind::Node, id)?;
        match decoded.version {
            IdVersion::Latest => self.node_by_oid(decoded.oid, vc),
            IdVersion::Row(row_id) => {
                let (v, c) = self.resolve(vc);
                self.read(|conn, reader| {
                    let row = owned_by(reader.node_row(conn, row_id)?, decoded.oid, id)?;
                    let (v, c) = row.intervals().clamp(v, c);
                    reader.node_tree(conn, &row, v, c, RootId::Row)
                })
            }
            IdVersion::Snapshot(token) => self.read(|conn, reader| {
                let row = reader.node_row_at(conn, decoded.oid, token.version, token.correction)?;
                reader.node_tree(
                    conn,
                    &row,
                    token.version,
                    token.correction,
                    RootId::Given(id.clone()),
                )
            }),
        }
    }

    fn node_at(&self, id: &ObjectId, vc: VersionCorrection) -> Result<Arc<PortfolioNode>> {
        let oid = self.codec.oid_as(EntityKind::Node, id)?;
        self.node_by_oid(oid, vc)
    }

    fn position(&self, id: &UniqueId) -> Result<Arc<Position>> {
        let decoded = self.codec.decode_as(EntityKind::Position, id)?;
        let (now, _) = self.resolve(VersionCorrection::LATEST);
        self.read(|conn, reader| {
            let row = match decoded.version {
                IdVersion::Latest => reader.position_row_at(conn, decoded.oid, now, now)?,
                IdVersion::Row(row_id) => {
                    owned_by(reader.position_row(conn, row_id)?, decoded.oid, id)?
                }
                IdVersion::Snapshot(_) => {
                    return Err(Error::invalid_id(id.as_str(), "positions have no snapshots"))
                }
            };
            let mut dedup = IdDeduplicator::new();
            Ok(Arc::new(reader.position_from_row(conn, &row, &mut dedup)?))
        })
    }

    fn position_at(&self, id: &ObjectId, vc: VersionCorrection) -> Result<Arc<Position>> {
        let oid = self.codec.oid_as(EntityKind::Position, id)?;
        let (v, c) = self.resolve(vc);
        self.read(|conn, reader| {
            let row = reader.position_row_at(conn, oid, v, c)?;
            let mut dedup = IdDeduplicator::new();
            Ok(Arc::new(reader.position_from_row(conn, &row, &mut dedup)?))
        })
    }

    fn trade(&self, id: &UniqueId) -> Result<Arc<Trade>> {
        let decoded = self.codec.decode_as(EntityKind::Trade, id)?;
        let (now, _) = self.resolve(VersionCorrection::LATEST);
        self.read(|conn, reader| {
            let row = match decoded.version {
                IdVersion::Latest => reader.trade_row_at(conn, decoded.oid, now, now)?,
                IdVersion::Row(row_id) => owned_by(reader.trade_row(conn, row_id)?, decoded.oid, id)?,
                IdVersion::Snapshot(_) => {
                    return Err(Error::invalid_id(id.as_str(), "trades have no snapshots"))
                }
            };
            let mut dedup = IdDeduplicator::new();
            Ok(Arc::new(reader.trade_from_row(&row, &mut dedup)?))
        })
    }

    fn trade_at(&self, id: &ObjectId, vc: VersionCorrection) -> Result<Arc<Trade>> {
        let oid = self.codec.oid_as(EntityKind::Trade, id)?;
        let (v, c) = self.resolve(vc);
        self.read(|conn, reader| {
            let row = reader.trade_row_at(conn, oid, v, c)?;
            let mut dedup = IdDeduplicator::new();
            Ok(Arc::new(reader.trade_from_row(&row, &mut dedup)?))
        })
    }

    fn change_manager(&self) -> &ChangeManager {
        &self.changes
    }
}

impl PositionMaster for SqlitePositionMaster {
    fn write(&self, request: WriteRequest) -> Result<WriteReceipt> {
        let mut pooled = self.conn()?;
        let conn: &mut SqliteConnection = &mut pooled;
        let outcome = conn.immediate_transaction(|conn| {
            // Stamped under the write lock so instants follow commit order.
            let now = self.clock.now();
            let mut txn = WriteTxn::new(conn, &self.codec, now);
            let receipt = txn.apply(&request)?;
            Ok::<_, Error>((receipt, txn.into_events()))
        });
        let (receipt, events) = match outcome {
            Ok(done) => done,
            Err(e) => {
                if e.is_conflict() {
                    warn!(operation = request.operation(), error = %e, "Write conflict");
                } else {
                    debug!(operation = request.operation(), error = %e, "Write rejected");
                }
                return Err(e);
            }
        };
        info!(
            operation = request.operation(),
            unique_id = %receipt.unique_id,
            events = events.len(),
            "Write committed"
        );
        for event in events {
            self.changes.publish(event);
        }
        Ok(receipt)
    }

    fn history(&self, request: &HistoryRequest) -> Result<SearchResult<Entity>> {
        let now = self.clock.now();
        self.read(|conn, reader| search::history(conn, reader, &self.codec, request, now))
    }

    fn search_portfolios(
        &self,
        request: &PortfolioSearchRequest,
    ) -> Result<SearchResult<Arc<Portfolio>>> {
        let now = self.clock.now();
        self.read(|conn, reader| search::portfolios(conn, reader, &self.codec, request, now))
    }

    fn search_positions(
        &self,
        request: &PositionSearchRequest,
    ) -> Result<SearchResult<Arc<Position>>> {
        let now = self.clock.now();
        self.read(|conn, reader| search::positions(conn, reader, &self.codec, request, now))
    }
}
