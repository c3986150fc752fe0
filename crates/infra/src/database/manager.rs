//! SQLite connection pool and embedded schema.

use calsync_domain::{DatabaseConfig, Result};
use r2d2_sqlite::SqliteConnectionManager;
use tracing::debug;

use crate::errors::InfraError;

/// Pooled SQLite connection.
pub type PooledSqliteConnection = r2d2::PooledConnection<SqliteConnectionManager>;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS calendars (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    provider TEXT NOT NULL,
    provider_calendar_id TEXT NOT NULL,
    last_synced_at INTEGER,
    sync_enabled INTEGER NOT NULL DEFAULT 1
);

CREATE TABLE IF NOT EXISTS events (
    id TEXT PRIMARY KEY,
    calendar_id TEXT NOT NULL,
    provider_event_id TEXT,
    title TEXT NOT NULL,
    description TEXT,
    location TEXT,
    start_ts INTEGER NOT NULL,
    end_ts INTEGER NOT NULL,
    is_all_day INTEGER NOT NULL DEFAULT 0,
    updated_at INTEGER NOT NULL,
    etag TEXT,
    deleted INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_events_calendar ON events(calendar_id);

CREATE TABLE IF NOT EXISTS sync_results (
    id TEXT PRIMARY KEY,
    calendar_id TEXT NOT NULL,
    started_at INTEGER NOT NULL,
    finished_at INTEGER,
    status TEXT NOT NULL,
    events_processed INTEGER NOT NULL DEFAULT 0,
    events_created INTEGER NOT NULL DEFAULT 0,
    events_updated INTEGER NOT NULL DEFAULT 0,
    events_deleted INTEGER NOT NULL DEFAULT 0,
    errors TEXT NOT NULL DEFAULT '[]'
);
CREATE INDEX IF NOT EXISTS idx_sync_results_calendar ON sync_results(calendar_id);

CREATE TABLE IF NOT EXISTS sync_conflicts (
    id TEXT PRIMARY KEY,
    event_id TEXT NOT NULL,
    kind TEXT NOT NULL,
    local_snapshot TEXT NOT NULL,
    remote_snapshot TEXT NOT NULL,
    detected_at INTEGER NOT NULL,
    resolution TEXT NOT NULL DEFAULT 'unresolved'
);

CREATE TABLE IF NOT EXISTS credentials (
    user_id TEXT NOT NULL,
    provider TEXT NOT NULL,
    access_token TEXT NOT NULL,
    refresh_token TEXT,
    expires_at INTEGER NOT NULL,
    invalidated INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (user_id, provider)
);
";

/// r2d2-backed SQLite pool; applies the embedded schema on construction.
pub struct SqlitePool {
    pool: r2d2::Pool<SqliteConnectionManager>,
}

impl SqlitePool {
    /// Open (or create) the database at the configured path.
    pub fn new(config: &DatabaseConfig) -> Result<Self> {
        let manager = SqliteConnectionManager::file(&config.path).with_init(|conn| {
            conn.execute_batch(
                "PRAGMA journal_mode=WAL;
                 PRAGMA foreign_keys=ON;
                 PRAGMA busy_timeout=5000;",
            )
        });

        let pool = r2d2::Pool::builder()
            .max_size(config.pool_size.max(1))
            .build(manager)
            .map_err(InfraError::from)?;

        let this = Self { pool };
        this.apply_schema()?;
        debug!(path = %config.path, "sqlite pool ready");
        Ok(this)
    }

    /// Check a connection out of the pool.
    pub fn get(&self) -> Result<PooledSqliteConnection> {
        Ok(self.pool.get().map_err(InfraError::from)?)
    }

    fn apply_schema(&self) -> Result<()> {
        let conn = self.get()?;
        conn.execute_batch(SCHEMA).map_err(InfraError::from)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_applies_on_a_fresh_database() {
        let dir = tempfile::tempdir().unwrap();
        let config = DatabaseConfig {
            path: dir.path().join("test.db").to_string_lossy().into_owned(),
            pool_size: 2,
        };

        let pool = SqlitePool::new(&config).unwrap();
        let conn = pool.get().unwrap();

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<rusqlite::Result<_>>()
            .unwrap();

        for expected in ["calendars", "credentials", "events", "sync_conflicts", "sync_results"] {
            assert!(tables.iter().any(|t| t == expected), "missing table {expected}");
        }
    }
}
