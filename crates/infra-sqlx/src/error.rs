// sqlx::Error -> DriverError
//
// Orphan rules rule out `From<sqlx::Error> for DriverError` here, hence the helper.

use dbcontext_core::port::DriverError;

/// Map a statement failure, keeping the database error code in the message
pub(crate) fn map_sqlx_error(err: sqlx::Error) -> DriverError {
    match &err {
        sqlx::Error::Database(db_err) => {
            if let Some(code) = db_err.code() {
                let code_str = code.as_ref();

                // SQLite: https://www.sqlite.org/rescode.html
                // PostgreSQL: SQLSTATE (Appendix A)
                match code_str {
                    "2067" | "1555" | "23505" => DriverError::Execute(format!(
                        "Unique constraint violation: {} ({})",
                        db_err.message(),
                        code_str
                    )),
                    "787" | "3850" | "23503" => DriverError::Execute(format!(
                        "Foreign key constraint violation: {} ({})",
                        db_err.message(),
                        code_str
                    )),
                    "5" | "40P01" => DriverError::Execute(format!(
                        "Database locked: {} ({})",
                        db_err.message(),
                        code_str
                    )),
                    "13" | "53100" => {
                        DriverError::Execute(format!("Database full: {}", db_err.message()))
                    }
                    _ => DriverError::Execute(format!(
                        "Database error [{}]: {}",
                        code_str,
                        db_err.message()
                    )),
                }
            } else {
                DriverError::Execute(format!("Database error: {}", db_err.message()))
            }
        }
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
            DriverError::Decode(err.to_string())
        }
        sqlx::Error::ColumnNotFound(col) => {
            DriverError::Decode(format!("Column not found: {}", col))
        }
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => DriverError::Connect(err.to_string()),
        _ => DriverError::Execute(err.to_string()),
    }
}

/// Map a failure while opening a connection or pool
pub(crate) fn map_connect_error(err: sqlx::Error) -> DriverError {
    match map_sqlx_error(err) {
        DriverError::Execute(message) | DriverError::Decode(message) => {
            DriverError::Connect(message)
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_errors_are_connect_errors() {
        assert!(matches!(
            map_sqlx_error(sqlx::Error::PoolTimedOut),
            DriverError::Connect(_)
        ));
        assert!(matches!(
            map_sqlx_error(sqlx::Error::ColumnNotFound("id".to_string())),
            DriverError::Decode(_)
        ));
        assert!(matches!(
            map_connect_error(sqlx::Error::Protocol("bad handshake".to_string())),
            DriverError::Connect(_)
        ));
    }
}
