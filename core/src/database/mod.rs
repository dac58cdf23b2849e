pub mod postgres;
pub mod sql_value;

use std::{collections::HashMap, time::Duration};

use async_trait::async_trait;

use crate::bulk::request::{BulkRow, Operation};
use sql_value::{SqlRow, SqlValue};

#[derive(thiserror::Error, Debug)]
pub enum BackendError {
    #[error("postgres error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("array marshaling error: {0}")]
    Marshal(String),

    #[error("backend failure: {0}")]
    Other(String),
}

/// Failure attributable to one row within a batch. `index` is relative to
/// the batch; the executor translates it back to the request's row numbering.
#[derive(Debug, Clone)]
pub struct BatchRowError {
    pub index: usize,
    pub message: String,
}

/// Result of one set-based batch call.
#[derive(Debug, Default)]
pub struct BatchOutcome {
    pub affected_rows: u64,
    pub row_errors: Vec<BatchRowError>,
}

impl BatchOutcome {
    pub fn success(affected_rows: u64) -> Self {
        BatchOutcome { affected_rows, row_errors: Vec::new() }
    }
}

/// One batch handed to the backend. `isolate_row_errors` asks the backend to
/// keep going past failing rows and report them individually; otherwise the
/// first failure fails the whole batch. `column_types` carries array element
/// types resolved over the whole request, so a column that is NULL in every
/// row of this particular batch still binds correctly.
#[derive(Debug)]
pub struct BatchRequest<'a> {
    pub table: &'a str,
    pub operation: Operation,
    pub rows: &'a [BulkRow],
    pub isolate_row_errors: bool,
    pub column_types: &'a HashMap<String, String>,
}

/// Set-based write surface of the backend. Each call is one unit of work
/// with its own commit scope.
#[async_trait]
pub trait BulkBackend: Send + Sync {
    async fn execute_batch(&self, batch: BatchRequest<'_>) -> Result<BatchOutcome, BackendError>;
}

/// Driver settings applied when opening a streaming cursor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CursorSettings {
    pub fetch_size: usize,
    pub query_timeout: Duration,
}

/// Forward-only handle over an open server-side cursor. Implementations
/// must release their resources on `close` and on drop, whichever comes
/// first.
#[async_trait]
pub trait RowCursor: Send {
    /// Advances the cursor by one row. `None` once exhausted.
    async fn next_row(&mut self) -> Result<Option<SqlRow>, BackendError>;

    /// Closes the cursor and releases the connection.
    async fn close(&mut self) -> Result<(), BackendError>;
}

/// Read surface of the backend: opens forward-only, read-only cursors on a
/// dedicated connection.
#[async_trait]
pub trait CursorBackend: Send + Sync {
    async fn open_cursor(
        &self,
        query: &str,
        params: &[SqlValue],
        settings: &CursorSettings,
    ) -> Result<Box<dyn RowCursor>, BackendError>;
}
