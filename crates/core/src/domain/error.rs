// Domain Error Types

use thiserror::Error;

pub(crate) const MSG_SINGLE_RESULTSET: &str =
    "single resultset error / cannot call a method for multiple resultsets";
pub(crate) const MSG_MULTIPLE_RESULTSET: &str =
    "multiple resultset error / cannot call a method for single resultset (maybe you accidentally got multiple results)";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("the query was not an update query")]
    NotAnUpdateQuery,

    #[error("the result has no dataset")]
    NoDataset,

    #[error("NOT UNIQUE: the result has more than one row ({0})")]
    NotUnique(usize),

    #[error("{0}")]
    WrongResultSetArity(&'static str),
}

pub type Result<T> = std::result::Result<T, DomainError>;
