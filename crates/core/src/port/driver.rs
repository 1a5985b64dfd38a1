// Driver Port
// Abstraction over the SQL client: open/close a connection, execute positional SQL

use crate::domain::Row;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

/// Output of one statement as reported by the driver
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawResult {
    pub rows: Option<Vec<Row>>,
    pub row_count: Option<u64>,
}

impl RawResult {
    pub fn rows(rows: Vec<Row>) -> Self {
        Self {
            rows: Some(rows),
            row_count: None,
        }
    }

    pub fn row_count(row_count: u64) -> Self {
        Self {
            rows: None,
            row_count: Some(row_count),
        }
    }
}

/// A single statement's output, or one output per statement of a batch
#[derive(Debug, Clone, PartialEq)]
pub enum RawOutcome {
    Single(RawResult),
    Batch(Vec<RawResult>),
}

/// Server message raised while a statement ran (`RAISE NOTICE`, warnings)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    /// `ERROR`, `WARNING`, `NOTICE`, `DEBUG` or `LOG`
    pub severity: String,
    pub message: String,
}

impl Notice {
    pub fn new(severity: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity: severity.into(),
            message: message.into(),
        }
    }
}

/// Driver errors
#[derive(Error, Debug)]
pub enum DriverError {
    #[error("Connect failed: {0}")]
    Connect(String),

    #[error("Execute failed: {0}")]
    Execute(String),

    #[error("Decode failed: {0}")]
    Decode(String),

    #[error("Close failed: {0}")]
    Close(String),

    #[error("Unsupported: {0}")]
    Unsupported(String),
}

/// Connection factory (one per database; usually wraps a pool)
///
/// Implementations:
/// - SqliteDriver / PgDriver in dbcontext-infra-sqlx
/// - mocks::MockDriver for tests
#[async_trait]
pub trait Driver: Send + Sync {
    /// Open a new connection and complete its handshake
    async fn connect(&self) -> Result<Box<dyn Connection>, DriverError>;

    /// Release shared resources (pool). Must be idempotent.
    async fn shutdown(&self) -> Result<(), DriverError>;
}

/// One live connection, exclusively owned by a session
#[async_trait]
pub trait Connection: Send {
    /// Execute SQL with positional parameters
    ///
    /// # Errors
    /// - DriverError::Execute if the database rejects the statement
    /// - DriverError::Decode if a returned value cannot be represented
    async fn execute(&mut self, sql: &str, params: &[Value]) -> Result<RawOutcome, DriverError>;

    /// Gracefully terminate the connection. `None` when not supported.
    async fn end(&mut self) -> Option<Result<(), DriverError>> {
        None
    }

    /// Hand the connection back to its pool. `None` when not supported.
    async fn release(&mut self) -> Option<Result<(), DriverError>> {
        None
    }

    /// Notices received since the last call, oldest first
    fn take_notices(&mut self) -> Vec<Notice> {
        Vec::new()
    }
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Everything the mock driver was asked to do, in order
    #[derive(Debug, Clone, PartialEq)]
    pub enum DriverCall {
        Connect,
        Execute { sql: String, params: Vec<Value> },
        End,
        Release,
        Shutdown,
    }

    /// Which close capability mock connections expose
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum CloseMode {
        End,
        Release,
        Neither,
    }

    type Responder = dyn Fn(&str, &[Value]) -> Result<RawOutcome, DriverError> + Send + Sync;

    /// Mock driver recording every call; statements answer through a responder
    #[derive(Clone)]
    pub struct MockDriver {
        calls: Arc<Mutex<Vec<DriverCall>>>,
        responder: Arc<Responder>,
        close_mode: CloseMode,
        fail_connect: bool,
        fail_close: bool,
        notices: Vec<(String, Notice)>,
    }

    impl MockDriver {
        /// Every statement reports zero affected rows
        pub fn new() -> Self {
            Self::with_responder(|_, _| Ok(RawOutcome::Single(RawResult::row_count(0))))
        }

        pub fn with_responder<F>(responder: F) -> Self
        where
            F: Fn(&str, &[Value]) -> Result<RawOutcome, DriverError> + Send + Sync + 'static,
        {
            Self {
                calls: Arc::new(Mutex::new(Vec::new())),
                responder: Arc::new(responder),
                close_mode: CloseMode::End,
                fail_connect: false,
                fail_close: false,
                notices: Vec::new(),
            }
        }

        /// Statements whose text contains `needle` fail
        pub fn failing_on(needle: impl Into<String>) -> Self {
            let needle = needle.into();
            Self::with_responder(move |sql, _| {
                if sql.contains(needle.as_str()) {
                    Err(DriverError::Execute(format!("mock failure on `{}`", sql)))
                } else {
                    Ok(RawOutcome::Single(RawResult::row_count(0)))
                }
            })
        }

        pub fn close_mode(mut self, mode: CloseMode) -> Self {
            self.close_mode = mode;
            self
        }

        pub fn fail_connect(mut self) -> Self {
            self.fail_connect = true;
            self
        }

        pub fn fail_close(mut self) -> Self {
            self.fail_close = true;
            self
        }

        /// Statements whose text contains `needle` raise `notice`
        pub fn notice_on(mut self, needle: impl Into<String>, notice: Notice) -> Self {
            self.notices.push((needle.into(), notice));
            self
        }

        pub fn calls(&self) -> Vec<DriverCall> {
            self.calls.lock().unwrap().clone()
        }

        /// Executed SQL texts, in order
        pub fn statements(&self) -> Vec<String> {
            self.calls()
                .into_iter()
                .filter_map(|call| match call {
                    DriverCall::Execute { sql, .. } => Some(sql),
                    _ => None,
                })
                .collect()
        }

        pub fn count(&self, call: &DriverCall) -> usize {
            self.calls().iter().filter(|c| *c == call).count()
        }
    }

    impl Default for MockDriver {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl Driver for MockDriver {
        async fn connect(&self) -> Result<Box<dyn Connection>, DriverError> {
            self.calls.lock().unwrap().push(DriverCall::Connect);
            if self.fail_connect {
                return Err(DriverError::Connect("mock connect refused".to_string()));
            }
            Ok(Box::new(MockConnection {
                driver: self.clone(),
                pending: Vec::new(),
            }))
        }

        async fn shutdown(&self) -> Result<(), DriverError> {
            self.calls.lock().unwrap().push(DriverCall::Shutdown);
            Ok(())
        }
    }

    pub struct MockConnection {
        driver: MockDriver,
        pending: Vec<Notice>,
    }

    impl MockConnection {
        fn close(&self, call: DriverCall) -> Result<(), DriverError> {
            self.driver.calls.lock().unwrap().push(call);
            if self.driver.fail_close {
                Err(DriverError::Close("mock close failure".to_string()))
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl Connection for MockConnection {
        async fn execute(&mut self, sql: &str, params: &[Value]) -> Result<RawOutcome, DriverError> {
            self.driver.calls.lock().unwrap().push(DriverCall::Execute {
                sql: sql.to_string(),
                params: params.to_vec(),
            });
            for (needle, notice) in &self.driver.notices {
                if sql.contains(needle.as_str()) {
                    self.pending.push(notice.clone());
                }
            }
            (self.driver.responder)(sql, params)
        }

        async fn end(&mut self) -> Option<Result<(), DriverError>> {
            match self.driver.close_mode {
                CloseMode::End => Some(self.close(DriverCall::End)),
                _ => None,
            }
        }

        async fn release(&mut self) -> Option<Result<(), DriverError>> {
            match self.driver.close_mode {
                CloseMode::Release => Some(self.close(DriverCall::Release)),
                _ => None,
            }
        }

        fn take_notices(&mut self) -> Vec<Notice> {
            std::mem::take(&mut self.pending)
        }
    }
}
