// SQLite Driver Implementation

use crate::connection::{create_sqlite_pool, sqlite_options};
use crate::error::{map_connect_error, map_sqlx_error};
use crate::script::{run_script, StatementRunner};
use async_trait::async_trait;
use dbcontext_core::domain::Row;
use dbcontext_core::port::{Connection, Driver, DriverError, RawOutcome, RawResult};
use serde_json::Value;
use sqlx::pool::PoolConnection;
use sqlx::query::Query;
use sqlx::sqlite::{SqliteArguments, SqliteConnectOptions, SqliteConnection, SqliteRow};
use sqlx::{Column, ConnectOptions, Executor, Row as _, Sqlite, SqlitePool, Statement, TypeInfo, ValueRef};
use tracing::{debug, info};

enum Source {
    Pool(SqlitePool),
    Direct(SqliteConnectOptions),
}

/// Driver over SQLite.
///
/// Pooled connections are released back to the pool on disconnect; direct
/// connections are closed.
pub struct SqliteDriver {
    source: Source,
}

impl SqliteDriver {
    pub fn pooled(pool: SqlitePool) -> Self {
        Self {
            source: Source::Pool(pool),
        }
    }

    pub fn direct(options: SqliteConnectOptions) -> Self {
        Self {
            source: Source::Direct(options),
        }
    }

    /// Pooled driver over a freshly created pool
    pub async fn from_url(database_url: &str) -> Result<Self, DriverError> {
        Ok(Self::pooled(create_sqlite_pool(database_url).await?))
    }

    /// Direct driver: one new connection per session
    pub fn direct_from_url(database_url: &str) -> Result<Self, DriverError> {
        Ok(Self::direct(sqlite_options(database_url)?))
    }

    pub fn pool(&self) -> Option<&SqlitePool> {
        match &self.source {
            Source::Pool(pool) => Some(pool),
            Source::Direct(_) => None,
        }
    }
}

#[async_trait]
impl Driver for SqliteDriver {
    async fn connect(&self) -> Result<Box<dyn Connection>, DriverError> {
        let conn = match &self.source {
            Source::Pool(pool) => Conn::Pooled(pool.acquire().await.map_err(map_connect_error)?),
            Source::Direct(options) => {
                Conn::Direct(options.connect().await.map_err(map_connect_error)?)
            }
        };
        debug!(pooled = matches!(conn, Conn::Pooled(_)), "SQLite connection opened");

        Ok(Box::new(SqliteHandle { conn: Some(conn) }))
    }

    async fn shutdown(&self) -> Result<(), DriverError> {
        if let Source::Pool(pool) = &self.source {
            if !pool.is_closed() {
                info!("Closing SQLite pool");
                pool.close().await;
            }
        }
        Ok(())
    }
}

enum Conn {
    Pooled(PoolConnection<Sqlite>),
    Direct(SqliteConnection),
}

/// Live SQLite connection owned by one session
pub struct SqliteHandle {
    conn: Option<Conn>,
}

impl SqliteHandle {
    fn live(&mut self) -> Result<&mut SqliteConnection, DriverError> {
        match self.conn.as_mut() {
            Some(Conn::Pooled(conn)) => Ok(&mut **conn),
            Some(Conn::Direct(conn)) => Ok(conn),
            None => Err(DriverError::Execute("connection already closed".to_string())),
        }
    }
}

#[async_trait]
impl StatementRunner for SqliteHandle {
    async fn run_statement(
        &mut self,
        sql: &str,
        params: &[Value],
    ) -> Result<RawResult, DriverError> {
        let conn = self.live()?;

        // statements with result columns report rows, everything else a count
        let returns_rows = !(&mut *conn)
            .prepare(sql)
            .await
            .map_err(map_sqlx_error)?
            .columns()
            .is_empty();

        let query = params
            .iter()
            .fold(sqlx::query(sql), |query, value| bind_value(query, value));

        if returns_rows {
            let rows = query.fetch_all(&mut *conn).await.map_err(map_sqlx_error)?;
            let rows = rows.iter().map(decode_row).collect::<Result<Vec<_>, _>>()?;
            Ok(RawResult::rows(rows))
        } else {
            let done = query.execute(&mut *conn).await.map_err(map_sqlx_error)?;
            Ok(RawResult::row_count(done.rows_affected()))
        }
    }
}

#[async_trait]
impl Connection for SqliteHandle {
    async fn execute(&mut self, sql: &str, params: &[Value]) -> Result<RawOutcome, DriverError> {
        run_script(self, sql, params).await
    }

    async fn end(&mut self) -> Option<Result<(), DriverError>> {
        match self.conn.take() {
            Some(Conn::Direct(conn)) => Some(
                sqlx::Connection::close(conn)
                    .await
                    .map_err(|e| DriverError::Close(e.to_string())),
            ),
            other => {
                self.conn = other;
                None
            }
        }
    }

    async fn release(&mut self) -> Option<Result<(), DriverError>> {
        match self.conn.take() {
            Some(Conn::Pooled(conn)) => {
                drop(conn);
                Some(Ok(()))
            }
            other => {
                self.conn = other;
                None
            }
        }
    }
}

fn bind_value<'q>(
    query: Query<'q, Sqlite, SqliteArguments<'q>>,
    value: &Value,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    match value {
        Value::Null => query.bind(None::<String>),
        Value::Bool(b) => query.bind(*b),
        Value::Number(n) => match (n.as_i64(), n.as_f64()) {
            (Some(i), _) => query.bind(i),
            (None, Some(f)) => query.bind(f),
            (None, None) => query.bind(n.to_string()),
        },
        Value::String(s) => query.bind(s.clone()),
        // arrays and objects are stored as JSON text
        Value::Array(_) | Value::Object(_) => query.bind(value.to_string()),
    }
}

/// Decode by the value's storage class; SQLite columns are dynamically typed
fn decode_row(row: &SqliteRow) -> Result<Row, DriverError> {
    let mut decoded = Row::new();
    for column in row.columns() {
        let i = column.ordinal();
        let raw = row.try_get_raw(i).map_err(map_sqlx_error)?;
        let value = if raw.is_null() {
            Value::Null
        } else {
            match raw.type_info().name() {
                "INTEGER" | "BOOLEAN" => {
                    Value::from(row.try_get_unchecked::<i64, _>(i).map_err(map_sqlx_error)?)
                }
                "REAL" => Value::from(row.try_get_unchecked::<f64, _>(i).map_err(map_sqlx_error)?),
                "NUMERIC" => match row.try_get_unchecked::<i64, _>(i) {
                    Ok(n) => Value::from(n),
                    Err(_) => {
                        Value::from(row.try_get_unchecked::<f64, _>(i).map_err(map_sqlx_error)?)
                    }
                },
                "BLOB" => Value::from(
                    row.try_get_unchecked::<Vec<u8>, _>(i)
                        .map_err(map_sqlx_error)?,
                ),
                _ => Value::from(row.try_get_unchecked::<String, _>(i).map_err(map_sqlx_error)?),
            }
        };
        decoded.insert(column.name().to_string(), value);
    }
    Ok(decoded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio_test::assert_ok;

    async fn memory_driver() -> SqliteDriver {
        SqliteDriver::from_url("sqlite::memory:").await.unwrap()
    }

    fn single(outcome: RawOutcome) -> RawResult {
        match outcome {
            RawOutcome::Single(result) => result,
            other => panic!("expected a single result, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_select_decodes_rows() {
        let driver = memory_driver().await;
        let mut conn = driver.connect().await.unwrap();

        let result = single(
            conn.execute(
                "SELECT 1 AS n, 2.5 AS r, 'x' AS s, NULL AS z, x'0102' AS b",
                &[],
            )
            .await
            .unwrap(),
        );

        let rows = result.rows.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["n"], json!(1));
        assert_eq!(rows[0]["r"], json!(2.5));
        assert_eq!(rows[0]["s"], json!("x"));
        assert_eq!(rows[0]["z"], Value::Null);
        assert_eq!(rows[0]["b"], json!([1, 2]));
        assert_eq!(result.row_count, None);
    }

    #[tokio::test]
    async fn test_row_keys_follow_select_list() {
        let driver = memory_driver().await;
        let mut conn = driver.connect().await.unwrap();

        let result = single(
            conn.execute("SELECT 2 AS val, 1 AS id, 3 AS val2", &[])
                .await
                .unwrap(),
        );

        let rows = result.rows.unwrap();
        let keys: Vec<&str> = rows[0].keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["val", "id", "val2"]);
    }

    #[tokio::test]
    async fn test_empty_select_still_reports_rows() {
        let driver = memory_driver().await;
        let mut conn = driver.connect().await.unwrap();

        let result = single(conn.execute("SELECT 1 AS n WHERE 0", &[]).await.unwrap());
        assert_eq!(result.rows, Some(vec![]));
    }

    #[tokio::test]
    async fn test_positional_params_and_row_count() {
        let driver = memory_driver().await;
        let mut conn = driver.connect().await.unwrap();

        conn.execute("CREATE TABLE items (id INTEGER PRIMARY KEY, name TEXT, meta TEXT)", &[])
            .await
            .unwrap();
        let inserted = single(
            conn.execute(
                "INSERT INTO items (id, name, meta) VALUES ($1, $2, $3), ($4, $2, NULL)",
                &[json!(1), json!("a"), json!({"k": 1}), json!(2)],
            )
            .await
            .unwrap(),
        );
        assert_eq!(inserted, RawResult::row_count(2));

        let selected = single(
            conn.execute("SELECT name, meta FROM items WHERE id = $1", &[json!(1)])
                .await
                .unwrap(),
        );
        let rows = selected.rows.unwrap();
        assert_eq!(rows[0]["name"], json!("a"));
        assert_eq!(rows[0]["meta"], json!("{\"k\":1}"));
    }

    #[tokio::test]
    async fn test_batch_reports_each_statement() {
        let driver = memory_driver().await;
        let mut conn = driver.connect().await.unwrap();

        let outcome = conn
            .execute(
                "CREATE TABLE t (id INTEGER); INSERT INTO t VALUES (1), (2); SELECT id FROM t",
                &[],
            )
            .await
            .unwrap();

        match outcome {
            RawOutcome::Batch(results) => {
                assert_eq!(results.len(), 3);
                assert_eq!(results[0], RawResult::row_count(0));
                assert_eq!(results[1], RawResult::row_count(2));
                assert_eq!(results[2].rows.as_ref().map(Vec::len), Some(2));
            }
            other => panic!("expected a batch, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_errors_are_mapped() {
        let driver = memory_driver().await;
        let mut conn = driver.connect().await.unwrap();

        let err = conn.execute("SELEC 1", &[]).await.unwrap_err();
        assert!(matches!(err, DriverError::Execute(_)));

        conn.execute("CREATE TABLE u (id INTEGER PRIMARY KEY)", &[])
            .await
            .unwrap();
        conn.execute("INSERT INTO u VALUES (1)", &[]).await.unwrap();
        let err = conn
            .execute("INSERT INTO u VALUES (1)", &[])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Unique constraint violation"));
    }

    #[tokio::test]
    async fn test_pooled_connection_is_released() {
        let driver = memory_driver().await;
        let mut conn = driver.connect().await.unwrap();

        assert!(conn.end().await.is_none());
        assert!(matches!(conn.release().await, Some(Ok(()))));
        assert!(conn.release().await.is_none());
    }

    #[tokio::test]
    async fn test_direct_connection_is_ended() {
        let driver = SqliteDriver::direct_from_url("sqlite::memory:").unwrap();
        assert!(driver.pool().is_none());
        let mut conn = driver.connect().await.unwrap();

        assert!(conn.release().await.is_none());
        assert!(matches!(conn.end().await, Some(Ok(()))));
        assert!(matches!(
            conn.execute("SELECT 1", &[]).await,
            Err(DriverError::Execute(_))
        ));
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent() {
        let driver = memory_driver().await;
        assert_ok!(driver.shutdown().await);
        assert_ok!(driver.shutdown().await);
        assert!(driver.pool().map(|p| p.is_closed()).unwrap_or(false));
        assert!(matches!(driver.connect().await, Err(DriverError::Connect(_))));
    }
}
