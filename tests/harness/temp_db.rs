use std::path::PathBuf;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{TimeZone, Utc};
use folio_store::adapter::outbound::sqlite::database::connection::{self, DbPool};
use folio_store::adapter::outbound::sqlite::SqlitePositionMaster;
use folio_store::domain::{IdCodec, Instant, SteppingClock};
use folio_store::infrastructure::config::DatabaseConfig;

/// One second, the step of the test clock.
pub const STEP_MICROS: i64 = 1_000_000;

/// Temporary SQLite database for integration tests.
pub struct TempDb {
    path: PathBuf,
    pool: DbPool,
}

impl TempDb {
    pub fn create(name: &str) -> Self {
        let mut path = std::env::temp_dir();
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        path.push(format!("folio-{name}-{nanos}.db"));

        let config = DatabaseConfig {
            url: path.display().to_string(),
            ..DatabaseConfig::default()
        };
        let pool = connection::open(&config).expect("open sqlite database");
        Self { path, pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    /// A master whose clock starts at [`start`] and ticks one second per
    /// reading.
    pub fn master(&self) -> SqlitePositionMaster {
        SqlitePositionMaster::new(self.pool.clone(), IdCodec::default())
            .with_clock(Arc::new(SteppingClock::starting_at(start(), STEP_MICROS)))
    }
}

impl Drop for TempDb {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
        for suffix in ["-wal", "-shm"] {
            let mut side = self.path.clone().into_os_string();
            side.push(suffix);
            let _ = std::fs::remove_file(side);
        }
    }
}

pub fn start() -> Instant {
    Utc.with_ymd_and_hms(2024, 1, 2, 9, 0, 0).unwrap()
}
