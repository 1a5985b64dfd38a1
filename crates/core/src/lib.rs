// dbcontext Core - Session lifecycle, result sets & ports
// NO database driver dependencies (hexagonal layout)

pub mod application;
pub mod config;
pub mod domain;
pub mod error;
pub mod port;

pub use application::{Session, SessionFactory, SessionState};
pub use config::SessionConfig;
pub use domain::{Dataset, DomainError, MultipleResultSet, QueryResult, ResultSet, Row};
pub use error::{AppError, QueryError, Result};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
