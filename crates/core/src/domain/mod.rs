// Domain Layer - Result set types and their error kinds

pub mod error;
pub mod result_set;

// Re-exports
pub use error::DomainError;
pub use result_set::{Dataset, MultipleResultSet, QueryResult, ResultSet, Row};
