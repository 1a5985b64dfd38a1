// Connection pool setup

use crate::error::map_connect_error;
use dbcontext_core::port::DriverError;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;

/// SQLite connect options: WAL, busy timeout, foreign keys, create if missing
pub fn sqlite_options(database_url: &str) -> Result<SqliteConnectOptions, DriverError> {
    let options = SqliteConnectOptions::from_str(database_url)
        .map_err(map_connect_error)?
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(5))
        .foreign_keys(true)
        .create_if_missing(true);
    Ok(options)
}

/// Create SQLite connection pool with WAL mode and optimizations
pub async fn create_sqlite_pool(database_url: &str) -> Result<SqlitePool, DriverError> {
    let pool = SqlitePoolOptions::new()
        .max_connections(DEFAULT_MAX_CONNECTIONS)
        .connect_with(sqlite_options(database_url)?)
        .await
        .map_err(map_connect_error)?;

    Ok(pool)
}

pub fn pg_options(database_url: &str) -> Result<PgConnectOptions, DriverError> {
    PgConnectOptions::from_str(database_url).map_err(map_connect_error)
}

/// Create PostgreSQL connection pool; connections are opened lazily
pub fn create_pg_pool(database_url: &str, max_connections: u32) -> Result<PgPool, DriverError> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(10))
        .connect_lazy_with(pg_options(database_url)?);

    Ok(pool)
}
