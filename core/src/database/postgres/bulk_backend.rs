//! Set-based batch execution against postgres.
//!
//! INSERT batches bind column-major arrays to a single `UNNEST` statement.
//! UPDATE/DELETE rows target disjoint predicates and run as individual
//! statements inside the batch transaction. With row-error isolation each
//! row runs under a savepoint so a failing row rolls back alone.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use tokio_postgres::Transaction;
use tracing::debug;

use crate::{
    bulk::request::{BulkRow, Operation},
    database::{
        sql_value::SqlRow, BackendError, BatchOutcome, BatchRequest, BatchRowError, BulkBackend,
    },
};

use super::{
    client::{PostgresClient, ToSql},
    marshal::{row_arrays, ColumnSpec, PgArrayType},
    query_builder::{build_delete, build_insert, build_unnest_insert, build_update},
};

pub struct PostgresBulkBackend {
    client: Arc<PostgresClient>,
}

impl PostgresBulkBackend {
    pub fn new(client: Arc<PostgresClient>) -> Self {
        PostgresBulkBackend { client }
    }
}

#[async_trait]
impl BulkBackend for PostgresBulkBackend {
    async fn execute_batch(&self, batch: BatchRequest<'_>) -> Result<BatchOutcome, BackendError> {
        let mut conn = self.client.get_connection().await?;
        let transaction = conn.transaction().await?;

        let outcome = match batch.operation {
            Operation::Insert if !batch.isolate_row_errors => {
                insert_as_arrays(&transaction, batch.table, batch.rows, batch.column_types)
                    .await?
            }
            Operation::Insert => insert_isolated(&transaction, batch.table, batch.rows).await?,
            Operation::Update | Operation::Delete => {
                execute_per_row(&transaction, &batch).await?
            }
        };

        transaction.commit().await?;
        debug!(
            "batch committed on '{}': {} affected, {} row errors",
            batch.table,
            outcome.affected_rows,
            outcome.row_errors.len()
        );
        Ok(outcome)
    }
}

/// Resolves one array element type per column. Types the caller resolved
/// over the whole request take precedence; only columns without an entry
/// fall back to the first non-NULL value in this batch. A column that has
/// neither fails the batch before anything reaches the wire.
fn derive_column_specs(
    rows: &[BulkRow],
    column_types: &HashMap<String, String>,
) -> Result<Vec<ColumnSpec>, BackendError> {
    let first = rows.first().ok_or_else(|| BackendError::Other("empty batch".to_string()))?;

    first
        .columns
        .iter()
        .map(|column| {
            let element_type = match column_types.get(&column.name) {
                Some(type_name) => PgArrayType::new(type_name)
                    .map_err(|e| BackendError::Marshal(e.to_string()))?,
                None => {
                    let sample = rows
                        .iter()
                        .flat_map(|row| &row.columns)
                        .find(|c| c.name == column.name && !c.value.is_null())
                        .ok_or_else(|| {
                            BackendError::Marshal(format!(
                                "no element type for column '{}': every value is NULL and no \
                                 column type was provided",
                                column.name
                            ))
                        })?;
                    PgArrayType::for_value(&sample.value)
                        .map_err(|e| BackendError::Marshal(e.to_string()))?
                }
            };
            Ok(ColumnSpec { name: column.name.clone(), element_type })
        })
        .collect()
}

fn to_sql_rows(rows: &[BulkRow]) -> Vec<SqlRow> {
    rows.iter()
        .map(|row| {
            SqlRow::new(row.columns.iter().map(|c| (c.name.clone(), c.value.clone())).collect())
        })
        .collect()
}

async fn insert_as_arrays(
    transaction: &Transaction<'_>,
    table: &str,
    rows: &[BulkRow],
    column_types: &HashMap<String, String>,
) -> Result<BatchOutcome, BackendError> {
    let specs = derive_column_specs(rows, column_types)?;
    let arrays = row_arrays(&to_sql_rows(rows), &specs)
        .map_err(|e| BackendError::Marshal(e.to_string()))?;

    let sql = build_unnest_insert(table, &specs);
    let params: Vec<&(dyn ToSql + Sync)> =
        arrays.iter().map(|a| a as &(dyn ToSql + Sync)).collect();

    let affected_rows = transaction.execute(sql.as_str(), &params).await?;
    Ok(BatchOutcome::success(affected_rows))
}

async fn insert_isolated(
    transaction: &Transaction<'_>,
    table: &str,
    rows: &[BulkRow],
) -> Result<BatchOutcome, BackendError> {
    let mut outcome = BatchOutcome::default();

    for (index, row) in rows.iter().enumerate() {
        let columns: Vec<&str> = row.columns.iter().map(|c| c.name.as_str()).collect();
        let sql = build_insert(table, &columns);
        let params: Vec<&(dyn ToSql + Sync)> =
            row.columns.iter().map(|c| &c.value as &(dyn ToSql + Sync)).collect();

        match run_under_savepoint(transaction, &sql, &params).await {
            Ok(affected) => outcome.affected_rows += affected,
            Err(e) => {
                outcome.row_errors.push(BatchRowError { index, message: e.to_string() })
            }
        }
    }

    Ok(outcome)
}

async fn execute_per_row(
    transaction: &Transaction<'_>,
    batch: &BatchRequest<'_>,
) -> Result<BatchOutcome, BackendError> {
    let mut outcome = BatchOutcome::default();

    for (index, row) in batch.rows.iter().enumerate() {
        let (sql, params) = build_row_statement(batch.table, batch.operation, row);

        if batch.isolate_row_errors {
            match run_under_savepoint(transaction, &sql, &params).await {
                Ok(affected) => outcome.affected_rows += affected,
                Err(e) => {
                    outcome.row_errors.push(BatchRowError { index, message: e.to_string() })
                }
            }
        } else {
            outcome.affected_rows += transaction.execute(sql.as_str(), &params).await?;
        }
    }

    Ok(outcome)
}

fn build_row_statement<'a>(
    table: &str,
    operation: Operation,
    row: &'a BulkRow,
) -> (String, Vec<&'a (dyn ToSql + Sync)>) {
    match operation {
        Operation::Update => {
            let set_columns: Vec<&str> = row.columns.iter().map(|c| c.name.as_str()).collect();
            let sql = build_update(table, &set_columns, &row.filters);
            let params: Vec<&(dyn ToSql + Sync)> = row
                .columns
                .iter()
                .map(|c| &c.value as &(dyn ToSql + Sync))
                .chain(row.filters.iter().map(|f| &f.value as &(dyn ToSql + Sync)))
                .collect();
            (sql, params)
        }
        Operation::Delete => {
            let sql = build_delete(table, &row.filters);
            let params: Vec<&(dyn ToSql + Sync)> =
                row.filters.iter().map(|f| &f.value as &(dyn ToSql + Sync)).collect();
            (sql, params)
        }
        Operation::Insert => {
            let columns: Vec<&str> = row.columns.iter().map(|c| c.name.as_str()).collect();
            let sql = build_insert(table, &columns);
            let params: Vec<&(dyn ToSql + Sync)> =
                row.columns.iter().map(|c| &c.value as &(dyn ToSql + Sync)).collect();
            (sql, params)
        }
    }
}

/// Runs one statement under its own savepoint so a failure rolls back only
/// that statement, leaving the enclosing batch transaction usable.
async fn run_under_savepoint(
    transaction: &Transaction<'_>,
    sql: &str,
    params: &[&(dyn ToSql + Sync)],
) -> Result<u64, BackendError> {
    transaction.batch_execute("SAVEPOINT bulkflow_row").await?;

    match transaction.execute(sql, params).await {
        Ok(affected) => {
            transaction.batch_execute("RELEASE SAVEPOINT bulkflow_row").await?;
            Ok(affected)
        }
        Err(row_error) => {
            transaction.batch_execute("ROLLBACK TO SAVEPOINT bulkflow_row").await?;
            Err(BackendError::Postgres(row_error))
        }
    }
}
