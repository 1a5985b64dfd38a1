// dbcontext Infrastructure - sqlx Adapters
// Implements: Driver / Connection for SQLite and PostgreSQL

mod connection;
mod error;
mod notice;
mod postgres;
mod script;
mod sqlite;

pub use connection::{
    create_pg_pool, create_sqlite_pool, pg_options, sqlite_options, DEFAULT_MAX_CONNECTIONS,
};
pub use notice::{PgNoticeLayer, NOTICE_TARGET};
pub use postgres::{PgDriver, PgHandle};
pub use sqlite::{SqliteDriver, SqliteHandle};

use dbcontext_core::port::{Driver, DriverError};
use std::sync::Arc;

/// Pick a pooled driver by URL scheme (`sqlite:` or `postgres:`/`postgresql:`)
pub async fn driver_for_url(database_url: &str) -> Result<Arc<dyn Driver>, DriverError> {
    if database_url.starts_with("sqlite:") {
        Ok(Arc::new(SqliteDriver::from_url(database_url).await?))
    } else if database_url.starts_with("postgres:") || database_url.starts_with("postgresql:") {
        Ok(Arc::new(PgDriver::from_url(database_url)?))
    } else {
        Err(DriverError::Unsupported(format!(
            "unsupported database URL scheme: {}",
            database_url.split(':').next().unwrap_or_default()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_driver_for_url() {
        assert!(driver_for_url("sqlite::memory:").await.is_ok());
        assert!(driver_for_url("postgres://u:p@127.0.0.1:1/db").await.is_ok());
        assert!(matches!(
            driver_for_url("mysql://localhost/db").await,
            Err(DriverError::Unsupported(_))
        ));
    }
}
