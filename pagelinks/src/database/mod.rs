//! Database module for pagelinks.
//!
//! This module provides the persistence layer using SQLite with sqlx.
//! Reads go through a regular pool; every write goes through a single-connection
//! pool so that queue claims and page transitions never race for the write lock.

pub mod models;
pub mod repositories;
pub mod retry;
pub mod time;

use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use std::str::FromStr;
use std::time::Duration;

/// Upper bound for the read pool.
const MAX_READ_CONNECTIONS: u32 = 10;

const BUSY_TIMEOUT: Duration = Duration::from_secs(30);

/// The pair of pools every repository is built from.
#[derive(Debug, Clone)]
pub struct DbPools {
    pub read: SqlitePool,
    /// Single connection; every write is serialized through it.
    pub write: SqlitePool,
}

impl DbPools {
    /// Open both pools against `database_url` and apply migrations.
    pub async fn connect(database_url: &str) -> crate::Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(BUSY_TIMEOUT)
            // Links cascade with their page
            .foreign_keys(true)
            .create_if_missing(true);

        let write = open_pool(options.clone(), 1, Duration::from_secs(60)).await?;
        tracing::info!("Running database migrations...");
        sqlx::migrate!("./migrations").run(&write).await?;

        let read_connections = read_pool_size();
        let read = open_pool(options, read_connections, Duration::from_secs(30)).await?;
        tracing::info!(
            read_connections,
            "Database ready (WAL, serialized write connection)"
        );

        Ok(Self { read, write })
    }

    pub async fn close(&self) {
        self.read.close().await;
        self.write.close().await;
    }
}

async fn open_pool(
    options: SqliteConnectOptions,
    max_connections: u32,
    acquire_timeout: Duration,
) -> Result<SqlitePool, sqlx::Error> {
    SqlitePoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(acquire_timeout)
        .after_connect(|conn, _meta| {
            Box::pin(async move {
                sqlx::query("PRAGMA temp_store = MEMORY")
                    .execute(&mut *conn)
                    .await?;
                Ok(())
            })
        })
        .connect_with(options)
        .await
}

/// Two connections per core, capped.
fn read_pool_size() -> u32 {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get() as u32)
        .unwrap_or(2);
    (cores * 2).min(MAX_READ_CONNECTIONS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_creates_schema() {
        let dir = tempfile::TempDir::new().unwrap();
        let url = format!(
            "sqlite:{}?mode=rwc",
            dir.path().join("schema.db").to_string_lossy().replace('\\', "/")
        );
        let pools = DbPools::connect(&url).await.unwrap();

        let tables: Vec<(String,)> =
            sqlx::query_as("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
                .fetch_all(&pools.read)
                .await
                .unwrap();
        let names: Vec<&str> = tables.iter().map(|t| t.0.as_str()).collect();

        for table in ["users", "pages", "links", "scrape_jobs"] {
            assert!(names.contains(&table), "{} table missing", table);
        }

        let mode: (String,) = sqlx::query_as("PRAGMA journal_mode")
            .fetch_one(&pools.read)
            .await
            .unwrap();
        assert_eq!(mode.0, "wal");
    }
}
