//! Database connection management using Diesel ORM.
//!
//! Provides connection pooling, migration support, and connection
//! configuration for SQLite databases.

use std::time::Duration;

use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, CustomizeConnection, Pool};
use diesel::SqliteConnection;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use tracing::debug;

use crate::infrastructure::config::DatabaseConfig;
use crate::error::{Error, Result};

/// Embedded database migrations compiled from the migrations/ directory.
pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

/// Type alias for a SQLite connection pool.
pub type DbPool = Pool<ConnectionManager<SqliteConnection>>;

/// Applies per-connection pragmas whenever the pool opens a connection.
#[derive(Debug, Clone, Copy)]
struct SqlitePragmas {
    busy_timeout_ms: u64,
}

impl CustomizeConnection<SqliteConnection, diesel::r2d2::Error> for SqlitePragmas {
    fn on_acquire(&self, conn: &mut SqliteConnection) -> std::result::Result<(), diesel::r2d2::Error> {
        diesel::sql_query(format!("PRAGMA busy_timeout = {}", self.busy_timeout_ms))
            .execute(conn)
            .map_err(diesel::r2d2::Error::QueryError)?;
        diesel::sql_query("PRAGMA foreign_keys = ON")
            .execute(conn)
            .map_err(diesel::r2d2::Error::QueryError)?;
        Ok(())
    }
}

/// True for URLs naming a private in-memory database.
#[must_use]
pub fn is_memory_url(url: &str) -> bool {
    url == ":memory:" || url.contains("mode=memory")
}

/// Create a connection pool for the given database URL.
///
/// An in-memory database exists once per connection, so such URLs get a
/// single long-lived connection.
///
/// # Errors
/// Returns an error if the pool cannot be created.
pub fn create_pool(config: &DatabaseConfig) -> Result<DbPool> {
    let manager = ConnectionManager::<SqliteConnection>::new(&config.url);
    let pragmas = SqlitePragmas {
        busy_timeout_ms: config.busy_timeout_ms,
    };
    let builder = Pool::builder().connection_customizer(Box::new(pragmas));
    let builder = if is_memory_url(&config.url) {
        builder
            .max_size(1)
            .max_lifetime(None)
            .idle_timeout(None)
    } else {
        builder
            .max_size(config.pool_size)
            .connection_timeout(Duration::from_millis(config.busy_timeout_ms.max(1_000)))
    };
    debug!(url = %config.url, "Creating connection pool");
    builder
        .build(manager)
        .map_err(|e| Error::Connection(e.to_string()))
}

/// Run all pending database migrations.
///
/// # Errors
/// Returns an error if migrations fail.
pub fn run_migrations(pool: &DbPool) -> Result<()> {
    let mut conn = pool
        .get()
        .map_err(|e| Error::Connection(e.to_string()))?;
    conn.run_pending_migrations(MIGRATIONS)
        .map_err(|e| Error::Connection(e.to_string()))?;
    Ok(())
}

/// Pool with migrations applied, ready for a store.
///
/// # Errors
/// Returns an error if the pool cannot be created or migrated.
pub fn open(config: &DatabaseConfig) -> Result<DbPool> {
    let pool = create_pool(config)?;
    run_migrations(&pool)?;
    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory() -> DatabaseConfig {
        DatabaseConfig {
            url: ":memory:".into(),
            ..DatabaseConfig::default()
        }
    }

    #[test]
    fn create_pool_with_memory_db() {
        let pool = create_pool(&memory());
        assert!(pool.is_ok());
    }

    #[test]
    fn memory_pool_has_single_connection() {
        let pool = create_pool(&memory()).unwrap();
        assert_eq!(pool.max_size(), 1);
    }

    #[test]
    fn memory_urls_are_detected() {
        assert!(is_memory_url(":memory:"));
        assert!(is_memory_url("file:test?mode=memory&cache=shared"));
        assert!(!is_memory_url("folio.db"));
    }

    #[test]
    fn migrations_create_tables() {
        let pool = open(&memory()).unwrap();
        let mut conn = pool.get().unwrap();
        let result = diesel::sql_query("SELECT * FROM portfolio LIMIT 1").execute(&mut conn);
        assert!(result.is_ok());
        let result = diesel::sql_query("SELECT * FROM trade LIMIT 1").execute(&mut conn);
        assert!(result.is_ok());
    }

    #[test]
    fn run_migrations_is_idempotent() {
        let pool = create_pool(&memory()).unwrap();
        run_migrations(&pool).unwrap();
        assert!(run_migrations(&pool).is_ok());
    }

    #[test]
    fn pragmas_are_applied_on_acquire() {
        #[derive(QueryableByName)]
        struct Pragma {
            #[diesel(sql_type = diesel::sql_types::BigInt)]
            foreign_keys: i64,
        }

        let pool = create_pool(&memory()).unwrap();
        let mut conn = pool.get().unwrap();
        let rows: Vec<Pragma> = diesel::sql_query("PRAGMA foreign_keys")
            .load(&mut conn)
            .unwrap();
        assert_eq!(rows[0].foreign_keys, 1);
    }
}
