//! Provisioning operations: handing compiled statements to an [`Executor`].

use schemaforge_core::{CompiledDomain, Domain};
use tracing::info;

use crate::error::DbResult;
use crate::executor::Executor;

/// Creates the whole domain, or only the listed tables plus the schemas.
///
/// Returns the number of executed statements.
pub async fn create(
    executor: &dyn Executor,
    compiled: &CompiledDomain,
    tables: &[&str],
) -> DbResult<usize> {
    let statements = if tables.is_empty() {
        compiled.statements().to_vec()
    } else {
        compiled.statements_for(tables)?
    };
    info!(
        event = "provision_create",
        domain = compiled.domain(),
        tables = ?tables,
        statements = statements.len()
    );
    executor.execute_batch(&statements).await?;
    Ok(statements.len())
}

/// Drops a table together with its children and spillover tables.
///
/// Returns the fully qualified names of the dropped objects.
pub async fn drop(executor: &dyn Executor, domain: &Domain, table: &str) -> DbResult<Vec<String>> {
    let dependents = domain.find_dependent(table)?;
    let statements = domain.drop_statements(table)?;
    info!(
        event = "provision_drop",
        domain = domain.name(),
        table,
        objects = dependents.len()
    );
    executor.execute_batch(&statements).await?;
    Ok(dependents.into_iter().map(|dependent| dependent.table).collect())
}

/// Builds the deferred indices of one table, or of the whole domain.
pub async fn build_indices(
    executor: &dyn Executor,
    compiled: &CompiledDomain,
    table: Option<&str>,
) -> DbResult<usize> {
    let statements = match table {
        Some(table) => {
            // Fails with a lookup error for tables outside the domain.
            compiled.statements_for(&[table])?;
            compiled.indices_for(table).to_vec()
        }
        None => compiled.indices().to_vec(),
    };
    info!(
        event = "provision_indices",
        domain = compiled.domain(),
        table = table.unwrap_or("*"),
        indices = statements.len()
    );
    executor.execute_batch(&statements).await?;
    Ok(statements.len())
}
