// Event Log Port
// Structured session events; the production sink renders them through tracing

use super::driver::Notice;
use crate::domain::{Dataset, QueryResult};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

/// Structured event emitted by a session
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SessionEvent<'a> {
    ConnectDatabase {
        session_id: &'a str,
    },
    DisconnectDatabase {
        session_id: &'a str,
    },
    QuerySucceeded {
        session_id: &'a str,
        sql: &'a str,
        named_params: &'a Value,
        params: &'a [Value],
        kind: &'static str,
        value: &'a QueryResult,
    },
    QueryError {
        session_id: &'a str,
        sql: &'a str,
        named_params: &'a Value,
        params: &'a [Value],
        error: String,
    },
    Enter {
        session_id: &'a str,
        label: &'a str,
    },
    Leave {
        session_id: &'a str,
        label: &'a str,
    },
    /// Teardown step failed; reported, never propagated
    Finalization {
        session_id: &'a str,
        step: &'a str,
        error: String,
    },
    Message {
        session_id: &'a str,
        message: &'a str,
    },
    /// Server notice raised during a statement
    PostgresqlNotice {
        session_id: &'a str,
        contents: &'a Notice,
    },
}

impl SessionEvent<'_> {
    /// Kebab-case event name (`query-succeeded`, `connect-database`, ...)
    pub fn name(&self) -> &'static str {
        match self {
            SessionEvent::ConnectDatabase { .. } => "connect-database",
            SessionEvent::DisconnectDatabase { .. } => "disconnect-database",
            SessionEvent::QuerySucceeded { .. } => "query-succeeded",
            SessionEvent::QueryError { .. } => "query-error",
            SessionEvent::Enter { .. } => "enter",
            SessionEvent::Leave { .. } => "leave",
            SessionEvent::Finalization { .. } => "finalization",
            SessionEvent::Message { .. } => "message",
            SessionEvent::PostgresqlNotice { .. } => "postgresql-notice",
        }
    }
}

#[derive(Error, Debug)]
pub enum EventLogError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Event sink unavailable: {0}")]
    Unavailable(String),
}

/// Sink for session events. Callers never let a failure here escape.
pub trait EventLog: Send + Sync {
    fn log(&self, event: &SessionEvent<'_>) -> Result<(), EventLogError>;
}

/// Production sink: every event becomes a `tracing` event
pub struct TracingEventLog;

impl EventLog for TracingEventLog {
    fn log(&self, event: &SessionEvent<'_>) -> Result<(), EventLogError> {
        match event {
            SessionEvent::ConnectDatabase { session_id }
            | SessionEvent::DisconnectDatabase { session_id } => {
                tracing::info!(session_id = %session_id, event = event.name());
            }
            SessionEvent::QuerySucceeded {
                session_id,
                sql,
                named_params,
                params,
                kind,
                value,
            } => {
                tracing::info!(
                    session_id = %session_id,
                    event = event.name(),
                    kind = %kind,
                    summary = %summarize(value),
                    sql = %sql,
                    named_params = %named_params,
                    params = ?params,
                );
            }
            SessionEvent::QueryError {
                session_id,
                sql,
                named_params,
                params,
                error,
            } => {
                tracing::error!(
                    session_id = %session_id,
                    event = event.name(),
                    sql = %sql,
                    named_params = %named_params,
                    params = ?params,
                    error = %error,
                );
            }
            SessionEvent::Enter { session_id, label } | SessionEvent::Leave { session_id, label } => {
                tracing::debug!(session_id = %session_id, event = event.name(), label = %label);
            }
            SessionEvent::Finalization {
                session_id,
                step,
                error,
            } => {
                tracing::warn!(
                    session_id = %session_id,
                    event = event.name(),
                    step = %step,
                    error = %error,
                    "teardown step failed (not critical)"
                );
            }
            SessionEvent::Message {
                session_id,
                message,
            } => {
                tracing::info!(session_id = %session_id, "{}", message);
            }
            SessionEvent::PostgresqlNotice {
                session_id,
                contents,
            } => {
                tracing::info!(
                    session_id = %session_id,
                    event = event.name(),
                    severity = %contents.severity,
                    "{}",
                    contents.message
                );
            }
        }
        Ok(())
    }
}

/// Row/row-count projection, never row contents
fn summarize(value: &QueryResult) -> String {
    match value {
        QueryResult::Single(rs) => match (rs.rows(), rs.row_count()) {
            (Ok(Some(rows)), _) => format!("rows={}", rows.len()),
            (_, Ok(count)) => format!("row_count={}", count),
            _ => "empty".to_string(),
        },
        QueryResult::Multiple(mrs) => mrs
            .iter()
            .map(|rs| summarize(&QueryResult::Single(rs.clone())))
            .collect::<Vec<_>>()
            .join(", "),
    }
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Keeps every event as JSON, in order
    #[derive(Clone, Default)]
    pub struct RecordingEventLog {
        events: Arc<Mutex<Vec<Value>>>,
    }

    impl RecordingEventLog {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn events(&self) -> Vec<Value> {
            self.events.lock().unwrap().clone()
        }

        /// Event names (`type` field), in order
        pub fn names(&self) -> Vec<String> {
            self.events()
                .iter()
                .filter_map(|e| e["type"].as_str().map(str::to_string))
                .collect()
        }

        pub fn of_type(&self, name: &str) -> Vec<Value> {
            self.events()
                .into_iter()
                .filter(|e| e["type"] == name)
                .collect()
        }
    }

    impl EventLog for RecordingEventLog {
        fn log(&self, event: &SessionEvent<'_>) -> Result<(), EventLogError> {
            let value = serde_json::to_value(event)?;
            self.events.lock().unwrap().push(value);
            Ok(())
        }
    }

    /// Rejects every event
    pub struct FailingEventLog;

    impl EventLog for FailingEventLog {
        fn log(&self, _event: &SessionEvent<'_>) -> Result<(), EventLogError> {
            Err(EventLogError::Unavailable("mock sink is down".to_string()))
        }
    }
}
