//! File-format import on top of the bulk executor: parse CSV or JSON into
//! bulk rows, then hand them to the normal execution path. A parse failure
//! before any row is produced reports `IMPORT_FAILED`; everything after
//! parsing follows ordinary bulk semantics.

use std::{collections::HashMap, time::Instant};

use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{error, info};
use uuid::Uuid;

use crate::database::sql_value::SqlValue;

use super::{
    executor::BulkExecutor,
    request::{BulkOperationRequest, BulkRow, ColumnValue, Operation},
    response::BulkOperationResponse,
};

pub const IMPORT_BATCH_SIZE: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportFormat {
    Csv,
    Json,
}

impl ImportFormat {
    fn as_str(&self) -> &'static str {
        match self {
            ImportFormat::Csv => "csv",
            ImportFormat::Json => "json",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ImportRequest {
    pub table: String,
    pub operation: Operation,
    pub format: ImportFormat,
    pub data: String,
    pub dry_run: bool,
    pub skip_on_error: bool,
    /// Renames source column headers to target table columns. Headers with
    /// no mapping entry keep their own name.
    pub column_mapping: HashMap<String, String>,
}

impl ImportRequest {
    pub fn new(table: impl Into<String>, format: ImportFormat, data: impl Into<String>) -> Self {
        ImportRequest {
            table: table.into(),
            operation: Operation::Insert,
            format,
            data: data.into(),
            dry_run: false,
            skip_on_error: false,
            column_mapping: HashMap::new(),
        }
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn skip_on_error(mut self, skip_on_error: bool) -> Self {
        self.skip_on_error = skip_on_error;
        self
    }

    pub fn column_mapping(mut self, mapping: HashMap<String, String>) -> Self {
        self.column_mapping = mapping;
        self
    }
}

#[derive(Error, Debug)]
pub enum ImportError {
    #[error("could not parse csv: {0}")]
    Csv(#[from] csv::Error),

    #[error("could not parse json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unsupported document shape: {0}")]
    Shape(String),
}

/// Parses the payload and runs it through the executor. Never returns an
/// error: parse failures become an `IMPORT_FAILED` response.
pub async fn import_data(
    executor: &BulkExecutor,
    request: ImportRequest,
) -> BulkOperationResponse {
    let started = Instant::now();

    let rows = match parse_rows(&request) {
        Ok(rows) => rows,
        Err(e) => {
            error!("import into '{}' failed before execution: {}", request.table, e);
            return BulkOperationResponse::import_failed(e.to_string(), started.elapsed());
        }
    };

    info!(
        "importing {} {} rows into '{}'",
        rows.len(),
        request.format.as_str(),
        request.table
    );

    let bulk_request = BulkOperationRequest::new(request.table, request.operation, rows)
        .dry_run(request.dry_run)
        .skip_on_error(request.skip_on_error)
        .batch_size(IMPORT_BATCH_SIZE)
        .metadata(format!("import_{}_{}", request.format.as_str(), Uuid::new_v4()));

    executor.execute(&bulk_request).await
}

fn parse_rows(request: &ImportRequest) -> Result<Vec<BulkRow>, ImportError> {
    match request.format {
        ImportFormat::Csv => parse_csv(&request.data, &request.column_mapping),
        ImportFormat::Json => parse_json(&request.data, &request.column_mapping),
    }
}

fn mapped<'a>(name: &'a str, mapping: &'a HashMap<String, String>) -> &'a str {
    mapping.get(name).map(String::as_str).unwrap_or(name)
}

/// First record is the header row. Empty fields import as NULL; everything
/// else imports as text and is cast by the database.
fn parse_csv(data: &str, mapping: &HashMap<String, String>) -> Result<Vec<BulkRow>, ImportError> {
    let mut reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(data.as_bytes());

    let headers: Vec<String> =
        reader.headers()?.iter().map(|h| mapped(h, mapping).to_string()).collect();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let columns = headers
            .iter()
            .zip(record.iter())
            .map(|(name, field)| {
                let value = if field.is_empty() {
                    SqlValue::Null
                } else {
                    SqlValue::Text(field.to_string())
                };
                ColumnValue { name: name.clone(), value }
            })
            .collect();
        rows.push(BulkRow::with_columns(columns));
    }
    Ok(rows)
}

/// Accepts a top-level array of flat objects.
fn parse_json(data: &str, mapping: &HashMap<String, String>) -> Result<Vec<BulkRow>, ImportError> {
    let document: JsonValue = serde_json::from_str(data)?;

    let JsonValue::Array(entries) = document else {
        return Err(ImportError::Shape("expected a top-level array of objects".to_string()));
    };

    let mut rows = Vec::with_capacity(entries.len());
    for (position, entry) in entries.iter().enumerate() {
        let JsonValue::Object(fields) = entry else {
            return Err(ImportError::Shape(format!("element {position} is not an object")));
        };
        let columns = fields
            .iter()
            .map(|(name, value)| {
                ColumnValue::new(mapped(name, mapping).to_string(), SqlValue::from_json(value))
            })
            .collect();
        rows.push(BulkRow::with_columns(columns));
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    };

    use super::*;
    use crate::{
        bulk::response::BulkStatus,
        chunking::{ChunkingPolicy, FixedPressureSampler},
        config::{BulkConfig, ChunkingConfig},
        database::{BackendError, BatchOutcome, BatchRequest, BulkBackend},
    };

    struct RecordingBackend {
        calls: AtomicUsize,
        rows_seen: Mutex<Vec<BulkRow>>,
    }

    #[async_trait::async_trait]
    impl BulkBackend for RecordingBackend {
        async fn execute_batch(
            &self,
            batch: BatchRequest<'_>,
        ) -> Result<BatchOutcome, BackendError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.rows_seen.lock().unwrap().extend_from_slice(batch.rows);
            Ok(BatchOutcome::success(batch.rows.len() as u64))
        }
    }

    fn executor_over(backend: Arc<RecordingBackend>) -> BulkExecutor {
        let policy = ChunkingPolicy::with_sampler(
            ChunkingConfig::default(),
            Arc::new(FixedPressureSampler { pressure_pct: 10.0 }),
        );
        let mut config = BulkConfig::default();
        config.allowed_tables.insert("audit_sessions".to_string());
        BulkExecutor::new(backend, policy, config)
    }

    fn recording_backend() -> Arc<RecordingBackend> {
        Arc::new(RecordingBackend { calls: AtomicUsize::new(0), rows_seen: Mutex::new(Vec::new()) })
    }

    #[tokio::test]
    async fn csv_import_builds_text_rows() {
        let backend = recording_backend();
        let executor = executor_over(backend.clone());

        let data = "event,count\nlogin,3\nlogout,\n";
        let request = ImportRequest::new("audit_sessions", ImportFormat::Csv, data);
        let response = import_data(&executor, request).await;

        assert_eq!(response.status, BulkStatus::Success);
        assert_eq!(response.successful_rows, 2);

        let rows = backend.rows_seen.lock().unwrap();
        assert_eq!(rows[0].columns[0].value, SqlValue::Text("login".to_string()));
        assert_eq!(rows[0].columns[1].value, SqlValue::Text("3".to_string()));
        // Empty CSV field imports as NULL.
        assert_eq!(rows[1].columns[1].value, SqlValue::Null);
    }

    #[tokio::test]
    async fn json_import_preserves_scalar_kinds() {
        let backend = recording_backend();
        let executor = executor_over(backend.clone());

        let data = r#"[{"event": "login", "count": 3, "ok": true}]"#;
        let request = ImportRequest::new("audit_sessions", ImportFormat::Json, data);
        let response = import_data(&executor, request).await;

        assert_eq!(response.status, BulkStatus::Success);
        let rows = backend.rows_seen.lock().unwrap();
        let row = &rows[0];
        assert_eq!(row.columns.iter().find(|c| c.name == "count").unwrap().value, SqlValue::I64(3));
        assert_eq!(
            row.columns.iter().find(|c| c.name == "ok").unwrap().value,
            SqlValue::Bool(true)
        );
    }

    #[tokio::test]
    async fn invalid_json_reports_import_failed_without_execution() {
        let backend = recording_backend();
        let executor = executor_over(backend.clone());

        let request = ImportRequest::new("audit_sessions", ImportFormat::Json, "{not json");
        let response = import_data(&executor, request).await;

        assert_eq!(response.status, BulkStatus::ImportFailed);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
        assert!(response.errors[0].message.contains("could not parse json"));
    }

    #[tokio::test]
    async fn json_top_level_object_is_rejected() {
        let backend = recording_backend();
        let executor = executor_over(backend.clone());

        let request =
            ImportRequest::new("audit_sessions", ImportFormat::Json, r#"{"event": "login"}"#);
        let response = import_data(&executor, request).await;

        assert_eq!(response.status, BulkStatus::ImportFailed);
        assert!(response.errors[0].message.contains("top-level array"));
    }

    #[tokio::test]
    async fn column_mapping_renames_headers() {
        let backend = recording_backend();
        let executor = executor_over(backend.clone());

        let mapping = HashMap::from([("evt".to_string(), "event".to_string())]);
        let request = ImportRequest::new("audit_sessions", ImportFormat::Csv, "evt\nlogin\n")
            .column_mapping(mapping);
        let response = import_data(&executor, request).await;

        assert_eq!(response.status, BulkStatus::Success);
        let rows = backend.rows_seen.lock().unwrap();
        assert_eq!(rows[0].columns[0].name, "event");
    }

    #[tokio::test]
    async fn import_dry_run_previews_without_execution() {
        let backend = recording_backend();
        let executor = executor_over(backend.clone());

        let request = ImportRequest::new("audit_sessions", ImportFormat::Csv, "event\na\nb\nc\n")
            .dry_run(true);
        let response = import_data(&executor, request).await;

        assert_eq!(response.status, BulkStatus::DryRunPreview);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
        assert_eq!(response.dry_run_preview.unwrap().estimated_affected_rows, 3);
    }
}
