// Statement scripts: one statement binds parameters, several run as a batch

use async_trait::async_trait;
use dbcontext_core::application::split_statements;
use dbcontext_core::port::{DriverError, RawOutcome, RawResult};
use serde_json::Value;
use tracing::debug;

/// Runs exactly one statement on a live connection
#[async_trait]
pub(crate) trait StatementRunner: Send {
    async fn run_statement(&mut self, sql: &str, params: &[Value])
        -> Result<RawResult, DriverError>;
}

/// Run `sql` as a single statement, or as a batch when it holds several.
///
/// A batch reports one result per statement and cannot take parameters.
pub(crate) async fn run_script<R>(
    runner: &mut R,
    sql: &str,
    params: &[Value],
) -> Result<RawOutcome, DriverError>
where
    R: StatementRunner + ?Sized,
{
    let statements = split_statements(sql);
    if let [statement] = statements.as_slice() {
        return Ok(RawOutcome::Single(
            runner.run_statement(statement, params).await?,
        ));
    }

    if !params.is_empty() {
        return Err(DriverError::Execute(format!(
            "cannot bind {} parameter(s) to a batch of {} statements",
            params.len(),
            statements.len()
        )));
    }

    debug!(statements = statements.len(), "Executing statement batch");
    let mut results = Vec::with_capacity(statements.len());
    for statement in statements {
        results.push(runner.run_statement(statement, &[]).await?);
    }
    Ok(RawOutcome::Batch(results))
}
