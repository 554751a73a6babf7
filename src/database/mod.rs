//! Persistence layer: SQLite via sqlx.
//!
//! Connection pool management, models, repositories and the busy-retry
//! helper used around contended writes.

pub mod models;
pub mod repositories;
pub mod retry;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Pool, Sqlite};
use std::str::FromStr;
use std::time::Duration;

use crate::Result;

/// Database connection pool type alias.
pub type DbPool = Pool<Sqlite>;

/// Default busy timeout in milliseconds.
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 30_000;

/// Upper bound for the read pool; SQLite readers gain little beyond this.
const MAX_POOL_SIZE: u32 = 10;

/// Compute a sensible pool size from the available CPU cores.
pub fn default_pool_size() -> u32 {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get() as u32)
        .unwrap_or(2);
    (cores * 2).min(MAX_POOL_SIZE)
}

/// Initialize the connection pool with WAL mode and a busy timeout.
///
/// In-memory databases get a single connection: every pooled connection to
/// `sqlite::memory:` would otherwise see its own private database.
pub async fn init_pool(database_url: &str) -> Result<DbPool> {
    let in_memory = database_url.contains(":memory:");
    let max_connections = if in_memory { 1 } else { default_pool_size() };

    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .journal_mode(if in_memory {
            SqliteJournalMode::Memory
        } else {
            SqliteJournalMode::Wal
        })
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS))
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(30))
        .connect_with(options)
        .await?;

    Ok(pool)
}

/// Run pending migrations.
pub async fn run_migrations(pool: &DbPool) -> Result<()> {
    tracing::info!("Running database migrations...");
    sqlx::migrate!("./migrations").run(pool).await?;
    tracing::info!("Database migrations completed");
    Ok(())
}
