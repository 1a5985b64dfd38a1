// Session - one connection, one transaction, one unit of work

use super::named_params::rewrite;
use crate::config::SessionConfig;
use crate::domain::{MultipleResultSet, QueryResult, ResultSet};
use crate::error::{AppError, QueryError, Result};
use crate::port::{
    Connection, Driver, EventLog, IdProvider, Notice, RawOutcome, RawResult, SessionEvent,
    UuidProvider,
};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, error};

const SQL_BEGIN: &str = "BEGIN;";
const SQL_COMMIT: &str = "COMMIT;";
const SQL_ROLLBACK: &str = "ROLLBACK;";

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Future returned by lifecycle hooks
pub type HookFuture<'a> = BoxFuture<'a, Result<()>>;

/// Runs before the unit of work, in registration order
pub type Initializer = Arc<dyn for<'a> Fn(&'a mut Session) -> HookFuture<'a> + Send + Sync>;

/// Runs after the unit of work with its success flag, in list order
pub type Finalizer = Arc<dyn for<'a> Fn(&'a mut Session, bool) -> HookFuture<'a> + Send + Sync>;

/// Called for every server notice, in registration order
pub type NoticeHandler = Arc<dyn Fn(&Session, &Notice) + Send + Sync>;

/// Observable lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Connecting,
    /// `in_transaction` as reported by [`Session::in_transaction`]
    Connected { in_transaction: bool },
    /// Running without an open connection
    Disconnected,
    Finalizing,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Uninitialized,
    Running,
    Finalizing,
    Closed,
}

/// Transaction policy captured when the session initializes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Snapshot {
    pub auto_connect: bool,
    pub auto_commit: bool,
}

/// Owns at most one driver connection and drives connect → transact →
/// finalize around a unit of work.
///
/// Not for concurrent use: every operation takes `&mut self`.
pub struct Session {
    id: String,
    driver: Arc<dyn Driver>,
    log: Arc<dyn EventLog>,
    config: SessionConfig,
    snapshot: Snapshot,
    connection: Option<Box<dyn Connection>>,
    connecting: bool,
    in_transaction: bool,
    phase: Phase,
    initializers: Vec<Initializer>,
    finalizers: Vec<Finalizer>,
    notice_handlers: Vec<NoticeHandler>,
}

impl Session {
    pub fn new(driver: Arc<dyn Driver>, log: Arc<dyn EventLog>, config: SessionConfig) -> Self {
        let mut session = Self {
            id: UuidProvider.generate_id(),
            driver,
            log,
            config,
            snapshot: Snapshot::default(),
            connection: None,
            connecting: false,
            in_transaction: false,
            phase: Phase::Uninitialized,
            initializers: Vec::new(),
            finalizers: Vec::new(),
            notice_handlers: Vec::new(),
        };
        session.initializers.push(Arc::new(database_initializer));
        // the database finalizer stays ahead of every caller finalizer
        session.finalizers.insert(0, Arc::new(database_finalizer));
        session
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Changes after initialization do not affect the running session
    pub fn config_mut(&mut self) -> &mut SessionConfig {
        &mut self.config
    }

    pub fn snapshot(&self) -> Snapshot {
        self.snapshot
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    /// Tracks `begin_transaction` / `commit_transaction` /
    /// `rollback_transaction` only. Transaction statements sent through
    /// `query` and server-side aborts are not observed.
    pub fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    pub fn state(&self) -> SessionState {
        match self.phase {
            Phase::Closed => SessionState::Closed,
            Phase::Finalizing => SessionState::Finalizing,
            _ if self.connecting => SessionState::Connecting,
            _ if self.connection.is_some() => SessionState::Connected {
                in_transaction: self.in_transaction,
            },
            Phase::Uninitialized => SessionState::Uninitialized,
            Phase::Running => SessionState::Disconnected,
        }
    }

    pub fn add_initializer<F>(&mut self, hook: F)
    where
        F: for<'a> Fn(&'a mut Session) -> HookFuture<'a> + Send + Sync + 'static,
    {
        self.initializers.push(Arc::new(hook));
    }

    /// Runs after the database finalizer (connection already released)
    pub fn add_finalizer<F>(&mut self, hook: F)
    where
        F: for<'a> Fn(&'a mut Session, bool) -> HookFuture<'a> + Send + Sync + 'static,
    {
        self.finalizers.push(Arc::new(hook));
    }

    /// Runs before every finalizer registered so far
    pub fn prepend_finalizer<F>(&mut self, hook: F)
    where
        F: for<'a> Fn(&'a mut Session, bool) -> HookFuture<'a> + Send + Sync + 'static,
    {
        self.finalizers.insert(0, Arc::new(hook));
    }

    /// Every notice is also logged as a `postgresql-notice` event first
    pub fn add_notice_handler<F>(&mut self, handler: F)
    where
        F: Fn(&Session, &Notice) + Send + Sync + 'static,
    {
        self.notice_handlers.push(Arc::new(handler));
    }

    /// Run `unit_of_work` inside the session lifecycle.
    ///
    /// Initializers run first, then the unit of work, then every finalizer
    /// with the success flag, even when an initializer or the unit of work
    /// failed or panicked. The unit of work's own result is returned;
    /// teardown failures only reach the event log. A session runs once.
    pub async fn execute<T, E, F>(&mut self, unit_of_work: F) -> std::result::Result<T, E>
    where
        F: for<'a> FnOnce(&'a mut Session) -> BoxFuture<'a, std::result::Result<T, E>>,
        E: From<AppError>,
    {
        if self.phase != Phase::Uninitialized {
            return Err(AppError::InvalidState(format!(
                "session {} has already been executed",
                self.id
            ))
            .into());
        }
        self.phase = Phase::Running;

        let session = &mut *self;
        let outcome = AssertUnwindSafe(async move {
            session.run_initializers().await.map_err(E::from)?;
            unit_of_work(session).await
        })
        .catch_unwind()
        .await;

        let succeeded = matches!(outcome, Ok(Ok(_)));
        self.run_finalizers(succeeded).await;
        self.phase = Phase::Closed;
        debug!(session_id = %self.id, succeeded, "session closed");

        match outcome {
            Ok(result) => result,
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }

    async fn run_initializers(&mut self) -> Result<()> {
        let hooks = self.initializers.clone();
        for hook in hooks {
            hook(self).await?;
        }
        Ok(())
    }

    async fn run_finalizers(&mut self, succeeded: bool) {
        self.phase = Phase::Finalizing;
        let hooks = self.finalizers.clone();
        for hook in hooks {
            if let Err(e) = hook(self, succeeded).await {
                self.report_teardown_failure("finalizer", &e);
            }
        }
    }

    /// Snapshot the policy, then auto-connect and auto-begin as configured
    async fn initialize_database_context(&mut self) -> Result<()> {
        // auto_commit implies auto_connect
        self.snapshot.auto_connect = self.config.auto_connect || self.config.auto_commit;
        if self.snapshot.auto_connect {
            self.connect().await?;
        }

        self.snapshot.auto_commit = self.config.auto_commit;
        if self.snapshot.auto_commit {
            self.begin_transaction().await?;
        }
        Ok(())
    }

    /// Resolve the transaction and release the connection. Never fails:
    /// teardown errors are reported and the next step still runs.
    async fn finalize_database_context(&mut self, succeeded: bool) -> Result<()> {
        if !self.is_connected() {
            return Ok(());
        }

        if self.snapshot.auto_commit {
            let (step, result) = if succeeded {
                self.note("commit for finalization");
                ("commit", self.commit_transaction().await)
            } else {
                self.note("rollback for finalization");
                ("rollback", self.rollback_transaction().await)
            };
            if let Err(e) = result {
                self.report_teardown_failure(step, &e);
            }
        }

        if self.snapshot.auto_connect || self.snapshot.auto_commit {
            self.note("disconnect for finalization");
            if self.is_connected() {
                if let Err(e) = self.disconnect().await {
                    self.report_teardown_failure("disconnect", &e);
                }
            }
        }
        Ok(())
    }

    pub async fn connect(&mut self) -> Result<()> {
        self.emit(&SessionEvent::ConnectDatabase {
            session_id: &self.id,
        });
        if self.phase == Phase::Closed {
            return Err(AppError::InvalidState(format!(
                "session {} is closed",
                self.id
            )));
        }
        if self.connection.is_some() {
            return Err(AppError::AlreadyConnected);
        }

        self.connecting = true;
        let result = self.driver.connect().await;
        self.connecting = false;

        match result {
            Ok(connection) => {
                self.connection = Some(connection);
                Ok(())
            }
            Err(e) => {
                error!(session_id = %self.id, error = %e, "connect failed");
                Err(AppError::Connection(e))
            }
        }
    }

    /// No-op when not connected. The handle is dropped even if closing fails.
    pub async fn disconnect(&mut self) -> Result<()> {
        self.emit(&SessionEvent::DisconnectDatabase {
            session_id: &self.id,
        });
        let Some(mut connection) = self.connection.take() else {
            return Ok(());
        };
        self.in_transaction = false;

        let closed = match connection.end().await {
            Some(result) => result,
            None => match connection.release().await {
                Some(result) => result,
                None => {
                    error!(session_id = %self.id, "connection has no method to finalize");
                    Ok(())
                }
            },
        };
        drop(connection);
        closed.map_err(AppError::Connection)
    }

    pub async fn begin_transaction(&mut self) -> Result<QueryResult> {
        let result = self.traced("begin_transaction", SQL_BEGIN).await;
        if result.is_ok() {
            self.in_transaction = true;
        }
        result
    }

    pub async fn commit_transaction(&mut self) -> Result<QueryResult> {
        let result = self.traced("commit_transaction", SQL_COMMIT).await;
        if result.is_ok() {
            self.in_transaction = false;
        }
        result
    }

    pub async fn rollback_transaction(&mut self) -> Result<QueryResult> {
        let result = self.traced("rollback_transaction", SQL_ROLLBACK).await;
        if result.is_ok() {
            self.in_transaction = false;
        }
        result
    }

    /// Rewrite `$name` placeholders and execute
    pub async fn query(&mut self, template: &str, named_params: &Value) -> Result<QueryResult> {
        let rewritten = rewrite(template, named_params)?;
        self.execute_raw(&rewritten.sql, &rewritten.params, named_params)
            .await
    }

    /// Free-form message into the session's event log
    pub fn note(&self, message: &str) {
        self.emit(&SessionEvent::Message {
            session_id: &self.id,
            message,
        });
    }

    async fn traced(&mut self, label: &'static str, sql: &'static str) -> Result<QueryResult> {
        self.emit(&SessionEvent::Enter {
            session_id: &self.id,
            label,
        });
        let result = self.query(sql, &Value::Null).await;
        self.emit(&SessionEvent::Leave {
            session_id: &self.id,
            label,
        });
        result
    }

    /// `named_params` only travels into the logs
    async fn execute_raw(
        &mut self,
        sql: &str,
        params: &[Value],
        named_params: &Value,
    ) -> Result<QueryResult> {
        let connection = self.connection.as_mut().ok_or(AppError::NotConnected)?;
        let outcome = run_statement(&mut **connection, sql, params).await;
        let notices = connection.take_notices();
        self.dispatch_notices(&notices);

        match outcome {
            Ok(result) => {
                self.emit(&SessionEvent::QuerySucceeded {
                    session_id: &self.id,
                    sql,
                    named_params,
                    params,
                    kind: result.kind(),
                    value: &result,
                });
                Ok(result)
            }
            Err(source) => {
                let error = QueryError {
                    sql: sql.to_string(),
                    named_params: named_params.clone(),
                    params: params.to_vec(),
                    source,
                };
                self.emit(&SessionEvent::QueryError {
                    session_id: &self.id,
                    sql,
                    named_params,
                    params,
                    error: error.source.to_string(),
                });
                Err(AppError::Query(Box::new(error)))
            }
        }
    }

    fn dispatch_notices(&self, notices: &[Notice]) {
        for notice in notices {
            self.emit(&SessionEvent::PostgresqlNotice {
                session_id: &self.id,
                contents: notice,
            });
            for handler in &self.notice_handlers {
                handler(self, notice);
            }
        }
    }

    fn report_teardown_failure(&self, step: &str, error: &AppError) {
        self.emit(&SessionEvent::Finalization {
            session_id: &self.id,
            step,
            error: error.to_string(),
        });
    }

    /// Logger failures go to tracing and stop there
    fn emit(&self, event: &SessionEvent<'_>) {
        if let Err(e) = self.log.log(event) {
            error!(
                session_id = %self.id,
                event = event.name(),
                error = %e,
                "failed to write session event"
            );
        }
    }
}

fn database_initializer(session: &mut Session) -> HookFuture<'_> {
    Box::pin(session.initialize_database_context())
}

fn database_finalizer(session: &mut Session, succeeded: bool) -> HookFuture<'_> {
    Box::pin(session.finalize_database_context(succeeded))
}

async fn run_statement(
    connection: &mut dyn Connection,
    sql: &str,
    params: &[Value],
) -> std::result::Result<QueryResult, BoxError> {
    let raw = connection.execute(sql, params).await?;
    let result = match raw {
        RawOutcome::Single(raw) => QueryResult::Single(into_result_set(raw)),
        RawOutcome::Batch(raws) => QueryResult::Multiple(MultipleResultSet::new(
            raws.into_iter().map(into_result_set).collect(),
        )?),
    };
    Ok(result)
}

fn into_result_set(raw: RawResult) -> ResultSet {
    ResultSet::new(raw.rows, raw.row_count)
}
