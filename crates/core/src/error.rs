// Central Error Type for the Application

use crate::port::DriverError;
use serde_json::Value;
use thiserror::Error;

/// Application-level error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Result set error: {0}")]
    Domain(#[from] crate::domain::DomainError),

    #[error("this session has already established a connection")]
    AlreadyConnected,

    #[error("no database connection was established")]
    NotConnected,

    #[error(transparent)]
    Query(#[from] Box<QueryError>),

    #[error("Connection error: {0}")]
    Connection(#[source] DriverError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),
}

/// A statement failed; carries the SQL and both parameter forms
#[derive(Error, Debug)]
#[error("DatabaseContext Error: {source}\n{sql}\n{named_params}")]
pub struct QueryError {
    pub sql: String,
    pub named_params: Value,
    pub params: Vec<Value>,
    #[source]
    pub source: Box<dyn std::error::Error + Send + Sync>,
}

impl QueryError {
    /// Driver-level cause, if the failure came from the driver
    pub fn driver_error(&self) -> Option<&DriverError> {
        self.source.downcast_ref::<DriverError>()
    }
}

impl AppError {
    pub fn as_query_error(&self) -> Option<&QueryError> {
        match self {
            AppError::Query(e) => Some(e),
            _ => None,
        }
    }
}

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;
