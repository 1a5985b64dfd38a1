//! Session lifecycle against a real SQLite database
//!
//! - Single and multi-statement queries through the sqlx driver
//! - autoCommit commit/rollback persistence across sessions
//! - Panic, query-error and shutdown paths

use dbcontext_core::domain::{Dataset, DomainError};
use dbcontext_core::port::event_log::mocks::RecordingEventLog;
use dbcontext_core::port::DriverError;
use dbcontext_core::{AppError, QueryResult, SessionConfig, SessionFactory};
use dbcontext_infra_sqlx::SqliteDriver;
use futures::FutureExt;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;

const VALUES_QUERY: &str =
    "WITH t(id, val) AS (VALUES (1, 'a'), (2, 'b')) SELECT * FROM t WHERE id = $id";

#[derive(Debug)]
enum TestError {
    App(AppError),
    Rejected,
}

impl From<AppError> for TestError {
    fn from(e: AppError) -> Self {
        TestError::App(e)
    }
}

/// Temp database file, removed (with its WAL files) on drop
struct TempDb {
    path: PathBuf,
}

impl TempDb {
    fn new() -> Self {
        let path = std::env::temp_dir().join(format!("dbcontext-{}.db", uuid::Uuid::new_v4()));
        Self { path }
    }

    fn url(&self) -> String {
        format!("sqlite://{}", self.path.display())
    }
}

impl Drop for TempDb {
    fn drop(&mut self) {
        for suffix in ["", "-wal", "-shm"] {
            let _ = std::fs::remove_file(format!("{}{}", self.path.display(), suffix));
        }
    }
}

async fn memory_factory() -> (SessionFactory, RecordingEventLog) {
    let driver = SqliteDriver::from_url("sqlite::memory:").await.unwrap();
    let log = RecordingEventLog::new();
    let factory = SessionFactory::new(Arc::new(driver)).with_event_log(Arc::new(log.clone()));
    (factory, log)
}

async fn file_factory(db: &TempDb) -> SessionFactory {
    let driver = SqliteDriver::from_url(&db.url()).await.unwrap();
    let factory = SessionFactory::new(Arc::new(driver));
    factory
        .execute(SessionConfig::auto_commit(), |s| {
            Box::pin(async move {
                s.query(
                    "CREATE TABLE notes (id INTEGER PRIMARY KEY, body TEXT NOT NULL)",
                    &Value::Null,
                )
                .await
            })
        })
        .await
        .unwrap();
    factory
}

async fn count_notes(factory: &SessionFactory) -> u64 {
    factory
        .execute(SessionConfig::auto_connect(), |s| {
            Box::pin(async move {
                let result = s.query("SELECT COUNT(*) AS n FROM notes", &Value::Null).await?;
                Ok::<_, AppError>(result.single_row()?["n"].as_u64().unwrap_or(0))
            })
        })
        .await
        .unwrap()
}

#[tokio::test]
async fn test_named_params_select_single_row() {
    let (factory, log) = memory_factory().await;

    let result = factory
        .execute(SessionConfig::auto_commit(), |s| {
            Box::pin(async move { s.query(VALUES_QUERY, &json!({"id": 1})).await })
        })
        .await
        .unwrap();

    let expected = json!({"id": 1, "val": "a"});
    assert_eq!(Value::Object(result.single_row().unwrap().clone()), expected);
    assert_eq!(Value::Object(result.first_row().unwrap().clone()), expected);
    assert_eq!(result.rows().unwrap().map(<[_]>::len), Some(1));
    assert!(matches!(
        result.row_count(),
        Err(DomainError::NotAnUpdateQuery)
    ));

    assert_eq!(
        log.names(),
        vec![
            "connect-database",
            "enter",
            "query-succeeded",
            "leave",
            "query-succeeded",
            "message",
            "enter",
            "query-succeeded",
            "leave",
            "message",
            "disconnect-database",
        ]
    );
    let select = &log.of_type("query-succeeded")[1];
    assert_eq!(select["sql"], json!(VALUES_QUERY.replace("$id", "$1")));
    assert_eq!(select["params"], json!([1]));
}

#[tokio::test]
async fn test_multiple_statements_return_multiple_result_set() {
    let (factory, _log) = memory_factory().await;

    let result = factory
        .execute(SessionConfig::auto_connect(), |s| {
            Box::pin(async move {
                s.query(
                    "CREATE TABLE t (id INTEGER); INSERT INTO t VALUES (1), (2), (3)",
                    &Value::Null,
                )
                .await
            })
        })
        .await
        .unwrap();

    assert!(!result.is_single());
    let results = result.as_result_array().unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[1].row_count().unwrap(), 3);
    assert!(matches!(
        result.rows(),
        Err(DomainError::WrongResultSetArity(_))
    ));
}

#[tokio::test]
async fn test_auto_commit_persists_on_success() {
    let db = TempDb::new();
    let factory = file_factory(&db).await;

    factory
        .execute(SessionConfig::auto_commit(), |s| {
            Box::pin(async move {
                s.query(
                    "INSERT INTO notes (body) VALUES ($body), ($body)",
                    &json!({"body": "kept"}),
                )
                .await
            })
        })
        .await
        .unwrap();

    assert_eq!(count_notes(&factory).await, 2);
    factory.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_auto_commit_rolls_back_on_error() {
    let db = TempDb::new();
    let factory = file_factory(&db).await;

    let outcome: Result<(), TestError> = factory
        .execute(SessionConfig::auto_commit(), |s| {
            Box::pin(async move {
                s.query("INSERT INTO notes (body) VALUES ('lost')", &Value::Null)
                    .await?;
                Err(TestError::Rejected)
            })
        })
        .await;

    assert!(matches!(outcome, Err(TestError::Rejected)));
    assert_eq!(count_notes(&factory).await, 0);
    factory.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_panic_rolls_back_and_releases_connection() {
    let db = TempDb::new();
    let factory = file_factory(&db).await;

    let panicked = std::panic::AssertUnwindSafe(factory.execute(
        SessionConfig::auto_commit(),
        |s| {
            Box::pin(async move {
                s.query("INSERT INTO notes (body) VALUES ('lost')", &Value::Null)
                    .await?;
                if s.in_transaction() {
                    panic!("unit of work blew up");
                }
                Ok::<_, AppError>(())
            })
        },
    ))
    .catch_unwind()
    .await;

    assert!(panicked.is_err());
    assert_eq!(count_notes(&factory).await, 0);
    factory.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_query_error_carries_context() {
    let (factory, log) = memory_factory().await;

    let err = factory
        .execute(SessionConfig::auto_commit(), |s| {
            Box::pin(async move {
                s.query("SELECT * FROM missing_table WHERE id = $id", &json!({"id": 9}))
                    .await
            })
        })
        .await
        .unwrap_err();

    let query_error = err.as_query_error().unwrap();
    assert_eq!(query_error.named_params, json!({"id": 9}));
    assert_eq!(query_error.params, vec![json!(9)]);
    assert!(matches!(
        query_error.driver_error(),
        Some(DriverError::Execute(_))
    ));
    assert!(err.to_string().starts_with("DatabaseContext Error: "));
    assert!(err.to_string().contains("missing_table"));

    assert_eq!(log.of_type("query-error").len(), 1);
    assert!(log.names().ends_with(&[
        "message".to_string(),
        "enter".to_string(),
        "query-succeeded".to_string(),
        "leave".to_string(),
        "message".to_string(),
        "disconnect-database".to_string(),
    ]));
}

#[tokio::test]
async fn test_manual_lifecycle_with_direct_driver() {
    let db = TempDb::new();
    let factory = file_factory(&db).await;
    factory.shutdown().await.unwrap();

    let driver = SqliteDriver::direct_from_url(&db.url()).unwrap();
    let factory = SessionFactory::new(Arc::new(driver));

    let result = factory
        .execute(SessionConfig::default(), |s| {
            Box::pin(async move {
                s.connect().await?;
                s.begin_transaction().await?;
                s.query("INSERT INTO notes (body) VALUES ($b)", &json!({"b": "manual"}))
                    .await?;
                s.commit_transaction().await?;
                let result = s.query("SELECT body FROM notes", &Value::Null).await?;
                s.disconnect().await?;
                assert!(!s.is_connected());
                Ok::<QueryResult, AppError>(result)
            })
        })
        .await
        .unwrap();

    assert_eq!(result.single_row().unwrap()["body"], json!("manual"));
    assert_eq!(count_notes(&factory).await, 1);
}

#[tokio::test]
async fn test_shutdown_closes_pool_once() {
    let (factory, _log) = memory_factory().await;

    factory.shutdown().await.unwrap();
    factory.shutdown().await.unwrap();

    let err = factory.session(SessionConfig::auto_connect()).err().unwrap();
    assert!(matches!(err, AppError::InvalidState(_)));
}
