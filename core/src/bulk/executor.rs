use std::{collections::HashMap, sync::Arc, time::Instant};

use tracing::{debug, error, info, warn};

use crate::{
    chunking::ChunkingPolicy,
    config::BulkConfig,
    database::{BatchRequest, BulkBackend},
    metrics,
};

use super::{
    request::{BulkOperationRequest, Operation},
    response::{
        BulkOperationResponse, DryRunPreview, ResponseBuilder, RowError, RowErrorKind,
    },
};

/// Orchestrates validation, chunking, per-batch execution and
/// partial-failure accounting for bulk write requests.
///
/// Batches run strictly sequentially: row numbering and partial-failure
/// semantics require deterministic ordering, and one logical bulk write must
/// not spread across concurrent connections.
pub struct BulkExecutor {
    backend: Arc<dyn BulkBackend>,
    policy: ChunkingPolicy,
    config: BulkConfig,
}

impl BulkExecutor {
    pub fn new(backend: Arc<dyn BulkBackend>, policy: ChunkingPolicy, config: BulkConfig) -> Self {
        BulkExecutor { backend, policy, config }
    }

    /// Executes a bulk request and always returns a complete response;
    /// row-level failures are reported inside it, never thrown.
    pub async fn execute(&self, request: &BulkOperationRequest) -> BulkOperationResponse {
        let started = Instant::now();
        let total_rows = request.rows.len();

        let validation_errors = self.validate(request);
        if !validation_errors.is_empty() && !request.dry_run {
            debug!(
                "bulk {} on '{}' rejected: {} validation errors",
                request.operation,
                request.table,
                validation_errors.len()
            );
            return BulkOperationResponse::validation_failed(
                total_rows,
                validation_errors,
                started.elapsed(),
            );
        }

        if request.dry_run {
            let preview = self.build_preview(request, total_rows, &validation_errors);
            return BulkOperationResponse::dry_run(
                total_rows,
                preview,
                validation_errors,
                started.elapsed(),
            );
        }

        let batch_cap = request.batch_size.unwrap_or(self.config.default_batch_size).max(1);
        let column_types = resolve_column_types(request);

        info!(
            "starting bulk {} on '{}': {} rows, batch cap {}",
            request.operation, request.table, total_rows, batch_cap
        );

        let mut builder = ResponseBuilder::new(total_rows);
        let mut offset = 0;

        while offset < total_rows {
            let decision = self.policy.evaluate(total_rows - offset);
            let chunk = decision.chunk_size.max(1).min(batch_cap).min(total_rows - offset);

            if decision.should_pause() {
                metrics::bulk::record_throttle_activation();
                warn!(
                    "memory pressure {:.1}% over threshold, pausing intake for {:?}",
                    decision.pressure_pct, decision.pause
                );
                tokio::time::sleep(decision.pause).await;
            }

            let batch_started = Instant::now();
            let batch_rows = &request.rows[offset..offset + chunk];
            let batch = BatchRequest {
                table: &request.table,
                operation: request.operation,
                rows: batch_rows,
                isolate_row_errors: request.skip_on_error,
                column_types: &column_types,
            };

            let mut batch_had_failure = false;
            match self.backend.execute_batch(batch).await {
                Ok(outcome) => {
                    builder.rows_attempted(chunk);
                    let failed = outcome.row_errors.len().min(chunk);
                    builder.rows_succeeded(chunk - failed);
                    for row_error in outcome.row_errors.into_iter().take(chunk) {
                        builder.row_failed(RowError::new(
                            offset + row_error.index,
                            row_error.message,
                            RowErrorKind::Execution,
                        ));
                    }
                    metrics::bulk::record_batch(
                        &request.table,
                        request.operation.as_sql(),
                        chunk - failed,
                        failed,
                        batch_started.elapsed(),
                    );
                    batch_had_failure = failed > 0;
                }
                Err(e) => {
                    error!(
                        "batch [{}..{}] on '{}' failed: {}",
                        offset,
                        offset + chunk - 1,
                        request.table,
                        e
                    );
                    builder.rows_attempted(chunk);
                    for i in 0..chunk {
                        builder.row_failed(RowError::new(
                            offset + i,
                            format!("batch failed: {e}"),
                            RowErrorKind::Execution,
                        ));
                    }
                    metrics::bulk::record_batch(
                        &request.table,
                        request.operation.as_sql(),
                        0,
                        chunk,
                        batch_started.elapsed(),
                    );
                    batch_had_failure = true;
                }
            }

            offset += chunk;
            debug!(
                "bulk progress on '{}': {} / {} rows attempted",
                request.table, offset, total_rows
            );

            if batch_had_failure && !request.skip_on_error {
                warn!(
                    "aborting bulk {} on '{}' after failure: {} of {} rows attempted",
                    request.operation, request.table, offset, total_rows
                );
                break;
            }
        }

        let response = builder.finish(started.elapsed());
        info!(
            "bulk {} on '{}' finished: status={:?}, processed={}, success={}, failed={}, took {}ms",
            request.operation,
            request.table,
            response.status,
            response.processed_rows,
            response.successful_rows,
            response.failed_rows,
            response.duration_ms
        );
        response
    }

    /// Structural validation against the allow-list and per-row shape rules.
    /// Row numbers in the returned errors are 0-based request positions.
    fn validate(&self, request: &BulkOperationRequest) -> Vec<RowError> {
        let mut errors = Vec::new();

        if request.table.trim().is_empty() {
            errors.push(RowError::new(0, "table name is required", RowErrorKind::Validation));
            return errors;
        }
        if !self.config.table_allowed(&request.table) {
            errors.push(RowError::new(
                0,
                format!("table not allowed: {}", request.table),
                RowErrorKind::Validation,
            ));
            return errors;
        }
        if request.rows.is_empty() {
            errors.push(RowError::new(0, "no rows provided", RowErrorKind::Validation));
            return errors;
        }

        for (row_number, row) in request.rows.iter().enumerate() {
            if row.is_empty() {
                errors.push(RowError::new(
                    row_number,
                    "row carries neither columns nor filters",
                    RowErrorKind::Validation,
                ));
                continue;
            }

            if row.columns.is_empty() && request.operation != Operation::Delete {
                errors.push(RowError::new(
                    row_number,
                    "no columns provided for row",
                    RowErrorKind::Validation,
                ));
            }

            for column in &row.columns {
                if column.name.trim().is_empty() {
                    errors.push(RowError::new(
                        row_number,
                        "column name is blank",
                        RowErrorKind::Validation,
                    ));
                } else if self.config.column_sensitive(&column.name) {
                    errors.push(RowError::new(
                        row_number,
                        format!("cannot modify sensitive column: {}", column.name),
                        RowErrorKind::Validation,
                    ));
                }
            }

            for filter in &row.filters {
                if filter.column.trim().is_empty() {
                    errors.push(RowError::new(
                        row_number,
                        "filter column name is blank",
                        RowErrorKind::Validation,
                    ));
                } else if self.config.column_sensitive(&filter.column) {
                    errors.push(RowError::new(
                        row_number,
                        format!("cannot filter on sensitive column: {}", filter.column),
                        RowErrorKind::Validation,
                    ));
                }
            }

            if request.operation != Operation::Insert && row.filters.is_empty() {
                errors.push(RowError::new(
                    row_number,
                    format!("WHERE clause required for {}", request.operation),
                    RowErrorKind::Validation,
                ));
            }
        }

        errors
    }

    fn build_preview(
        &self,
        request: &BulkOperationRequest,
        total_rows: usize,
        validation_errors: &[RowError],
    ) -> DryRunPreview {
        let batch_cap = request.batch_size.unwrap_or(self.config.default_batch_size).max(1);
        let batches = total_rows.div_ceil(batch_cap);

        let execution_plan = format!(
            "Bulk {} on table '{}': {} rows across ~{} batches of up to {} rows",
            request.operation, request.table, total_rows, batches, batch_cap
        );

        let mut validation_warnings = Vec::new();
        if !validation_errors.is_empty() {
            validation_warnings
                .push(format!("{} validation issues detected", validation_errors.len()));
        }

        DryRunPreview { estimated_affected_rows: total_rows, execution_plan, validation_warnings }
    }
}

/// Resolves array element types over the whole request so every batch binds
/// the same types regardless of where chunk boundaries fall. Caller-supplied
/// types win; the rest derive from the first non-NULL value of each column
/// anywhere in the request.
fn resolve_column_types(request: &BulkOperationRequest) -> HashMap<String, String> {
    let mut types = request.column_types.clone();

    for row in &request.rows {
        for column in &row.columns {
            if types.contains_key(&column.name) {
                continue;
            }
            if let Some(type_name) = column.value.sql_type_name() {
                types.insert(column.name.clone(), type_name.to_string());
            }
        }
    }

    types
}

#[cfg(test)]
mod tests {
    use std::{
        collections::VecDeque,
        sync::atomic::{AtomicUsize, Ordering},
    };

    use tokio::sync::Mutex;

    use super::*;
    use crate::{
        bulk::request::{BulkRow, ColumnValue, Filter},
        bulk::response::BulkStatus,
        chunking::FixedPressureSampler,
        config::ChunkingConfig,
        database::{sql_value::SqlValue, BackendError, BatchOutcome, BatchRowError},
    };

    /// Scripted backend: pops one outcome per batch call, records the batch
    /// sizes and column types it saw.
    struct MockBackend {
        calls: AtomicUsize,
        batch_sizes: Mutex<Vec<usize>>,
        column_types_seen: Mutex<Vec<HashMap<String, String>>>,
        script: Mutex<VecDeque<Result<BatchOutcome, BackendError>>>,
    }

    impl MockBackend {
        fn new(script: Vec<Result<BatchOutcome, BackendError>>) -> Arc<Self> {
            Arc::new(MockBackend {
                calls: AtomicUsize::new(0),
                batch_sizes: Mutex::new(Vec::new()),
                column_types_seen: Mutex::new(Vec::new()),
                script: Mutex::new(script.into()),
            })
        }

        fn always_ok() -> Arc<Self> {
            Self::new(Vec::new())
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl BulkBackend for MockBackend {
        async fn execute_batch(
            &self,
            batch: BatchRequest<'_>,
        ) -> Result<BatchOutcome, BackendError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.batch_sizes.lock().await.push(batch.rows.len());
            self.column_types_seen.lock().await.push(batch.column_types.clone());
            match self.script.lock().await.pop_front() {
                Some(outcome) => outcome,
                None => Ok(BatchOutcome::success(batch.rows.len() as u64)),
            }
        }
    }

    fn executor(backend: Arc<MockBackend>) -> BulkExecutor {
        let policy = ChunkingPolicy::with_sampler(
            ChunkingConfig::default(),
            Arc::new(FixedPressureSampler { pressure_pct: 10.0 }),
        );
        let mut config = BulkConfig::default();
        config.allowed_tables.insert("audit_sessions".to_string());
        BulkExecutor::new(backend, policy, config)
    }

    fn insert_rows(count: usize) -> Vec<BulkRow> {
        (0..count)
            .map(|i| BulkRow::with_columns(vec![ColumnValue::new("event", i as i64)]))
            .collect()
    }

    fn assert_invariants(response: &BulkOperationResponse) {
        assert_eq!(
            response.successful_rows + response.failed_rows,
            response.processed_rows,
            "successful + failed must equal processed"
        );
        assert!(response.processed_rows <= response.total_rows);
    }

    #[tokio::test]
    async fn empty_rows_fail_validation_without_backend_call() {
        let backend = MockBackend::always_ok();
        let executor = executor(backend.clone());

        let request = BulkOperationRequest::new("audit_sessions", Operation::Insert, vec![]);
        let response = executor.execute(&request).await;

        assert_eq!(response.status, BulkStatus::ValidationFailed);
        assert_eq!(response.processed_rows, 0);
        assert_eq!(backend.calls(), 0);
        assert_invariants(&response);
    }

    #[tokio::test]
    async fn disallowed_table_fails_validation() {
        let backend = MockBackend::always_ok();
        let executor = executor(backend.clone());

        let request = BulkOperationRequest::new("users", Operation::Insert, insert_rows(3));
        let response = executor.execute(&request).await;

        assert_eq!(response.status, BulkStatus::ValidationFailed);
        assert!(response.errors[0].message.contains("table not allowed"));
        assert_eq!(backend.calls(), 0);
    }

    #[tokio::test]
    async fn sensitive_column_fails_validation() {
        let backend = MockBackend::always_ok();
        let executor = executor(backend.clone());

        let rows = vec![BulkRow::with_columns(vec![ColumnValue::new("password", "x")])];
        let request = BulkOperationRequest::new("audit_sessions", Operation::Insert, rows);
        let response = executor.execute(&request).await;

        assert_eq!(response.status, BulkStatus::ValidationFailed);
        assert!(response.errors[0].message.contains("sensitive column"));
        assert_eq!(backend.calls(), 0);
    }

    #[tokio::test]
    async fn update_without_filters_fails_validation() {
        let backend = MockBackend::always_ok();
        let executor = executor(backend.clone());

        let rows = vec![BulkRow::with_columns(vec![ColumnValue::new("event", 1i64)])];
        let request = BulkOperationRequest::new("audit_sessions", Operation::Update, rows);
        let response = executor.execute(&request).await;

        assert_eq!(response.status, BulkStatus::ValidationFailed);
        assert!(response.errors[0].message.contains("WHERE clause required"));
    }

    #[tokio::test]
    async fn dry_run_never_touches_backend() {
        let backend = MockBackend::always_ok();
        let executor = executor(backend.clone());

        let request = BulkOperationRequest::new("audit_sessions", Operation::Insert, insert_rows(10))
            .dry_run(true);
        let response = executor.execute(&request).await;

        assert_eq!(response.status, BulkStatus::DryRunPreview);
        assert_eq!(backend.calls(), 0);
        let preview = response.dry_run_preview.as_ref().unwrap();
        assert_eq!(preview.estimated_affected_rows, 10);
        assert!(preview.execution_plan.contains("audit_sessions"));
        assert_eq!(response.processed_rows, 0);
        assert_invariants(&response);
    }

    #[tokio::test]
    async fn dry_run_surfaces_validation_warnings() {
        let backend = MockBackend::always_ok();
        let executor = executor(backend.clone());

        let mut rows = insert_rows(4);
        rows.push(BulkRow::default());
        let request = BulkOperationRequest::new("audit_sessions", Operation::Insert, rows)
            .dry_run(true);
        let response = executor.execute(&request).await;

        assert_eq!(response.status, BulkStatus::DryRunPreview);
        let preview = response.dry_run_preview.as_ref().unwrap();
        assert_eq!(preview.validation_warnings.len(), 1);
        assert!(!response.errors.is_empty());
    }

    #[tokio::test]
    async fn rows_split_into_sequential_batches() {
        let backend = MockBackend::always_ok();
        let executor = executor(backend.clone());

        let request = BulkOperationRequest::new("audit_sessions", Operation::Insert, insert_rows(250))
            .batch_size(100);
        let response = executor.execute(&request).await;

        assert_eq!(response.status, BulkStatus::Success);
        assert_eq!(backend.calls(), 3);
        assert_eq!(*backend.batch_sizes.lock().await, vec![100, 100, 50]);
        assert_eq!(response.processed_rows, 250);
        assert_eq!(response.successful_rows, 250);
        assert_invariants(&response);
    }

    #[tokio::test]
    async fn whole_batch_failure_stops_when_skip_on_error_is_false() {
        let backend = MockBackend::new(vec![
            Ok(BatchOutcome::success(100)),
            Err(BackendError::Connection("connection reset".to_string())),
        ]);
        let executor = executor(backend.clone());

        let request = BulkOperationRequest::new("audit_sessions", Operation::Insert, insert_rows(250))
            .batch_size(100)
            .skip_on_error(false);
        let response = executor.execute(&request).await;

        // Batch 3 never attempted.
        assert_eq!(backend.calls(), 2);
        assert_eq!(response.processed_rows, 200);
        assert!(response.processed_rows < response.total_rows);
        assert_eq!(response.successful_rows, 100);
        assert_eq!(response.failed_rows, 100);
        assert_eq!(response.status, BulkStatus::PartialSuccess);
        assert_eq!(response.errors.len(), 100);
        // Errors carry absolute 0-based row numbers from the failed batch.
        assert_eq!(response.errors[0].row_number, 100);
        assert_eq!(response.errors[99].row_number, 199);
        assert_invariants(&response);
    }

    #[tokio::test]
    async fn whole_batch_failure_continues_when_skip_on_error_is_true() {
        let backend = MockBackend::new(vec![
            Err(BackendError::Connection("connection reset".to_string())),
            Ok(BatchOutcome::success(100)),
            Ok(BatchOutcome::success(50)),
        ]);
        let executor = executor(backend.clone());

        let request = BulkOperationRequest::new("audit_sessions", Operation::Insert, insert_rows(250))
            .batch_size(100)
            .skip_on_error(true);
        let response = executor.execute(&request).await;

        assert_eq!(backend.calls(), 3);
        assert_eq!(response.processed_rows, 250);
        assert_eq!(response.successful_rows, 150);
        assert_eq!(response.failed_rows, 100);
        assert_eq!(response.status, BulkStatus::PartialSuccess);
        assert_invariants(&response);
    }

    #[tokio::test]
    async fn every_row_failing_is_failure() {
        let backend = MockBackend::new(vec![
            Err(BackendError::Connection("down".to_string())),
            Err(BackendError::Connection("down".to_string())),
        ]);
        let executor = executor(backend.clone());

        let request = BulkOperationRequest::new("audit_sessions", Operation::Insert, insert_rows(200))
            .batch_size(100)
            .skip_on_error(true);
        let response = executor.execute(&request).await;

        assert_eq!(response.status, BulkStatus::Failure);
        assert_eq!(response.failed_rows, 200);
        assert_eq!(response.successful_rows, 0);
        assert_invariants(&response);
    }

    #[tokio::test]
    async fn row_level_errors_are_translated_to_request_positions() {
        let backend = MockBackend::new(vec![
            Ok(BatchOutcome {
                affected_rows: 98,
                row_errors: vec![
                    BatchRowError { index: 3, message: "duplicate key".to_string() },
                    BatchRowError { index: 7, message: "null violation".to_string() },
                ],
            }),
            Ok(BatchOutcome::success(100)),
        ]);
        let executor = executor(backend.clone());

        let request = BulkOperationRequest::new("audit_sessions", Operation::Insert, insert_rows(200))
            .batch_size(100)
            .skip_on_error(true);
        let response = executor.execute(&request).await;

        assert_eq!(response.status, BulkStatus::PartialSuccess);
        assert_eq!(response.failed_rows, 2);
        assert_eq!(response.successful_rows, 198);
        assert_eq!(response.errors[0].row_number, 3);
        assert_eq!(response.errors[1].row_number, 7);
        assert_invariants(&response);
    }

    #[tokio::test]
    async fn row_level_error_aborts_remaining_batches_without_skip() {
        let backend = MockBackend::new(vec![Ok(BatchOutcome {
            affected_rows: 99,
            row_errors: vec![BatchRowError { index: 42, message: "bad row".to_string() }],
        })]);
        let executor = executor(backend.clone());

        let request = BulkOperationRequest::new("audit_sessions", Operation::Insert, insert_rows(300))
            .batch_size(100)
            .skip_on_error(false);
        let response = executor.execute(&request).await;

        assert_eq!(backend.calls(), 1);
        assert_eq!(response.processed_rows, 100);
        assert_eq!(response.errors[0].row_number, 42);
        assert_eq!(response.status, BulkStatus::PartialSuccess);
        assert_invariants(&response);
    }

    #[tokio::test]
    async fn column_types_resolve_over_the_whole_request_not_per_batch() {
        let backend = MockBackend::always_ok();
        let executor = executor(backend.clone());

        // "note" is non-NULL only in row 3; every row of the second batch
        // carries NULL for it, so a per-batch derivation would have nothing
        // to bind the second batch's array with.
        let rows: Vec<BulkRow> = (0..200)
            .map(|i| {
                let note = if i == 3 { SqlValue::Text("flagged".into()) } else { SqlValue::Null };
                BulkRow::with_columns(vec![
                    ColumnValue::new("event", i as i64),
                    ColumnValue { name: "note".to_string(), value: note },
                ])
            })
            .collect();

        let request = BulkOperationRequest::new("audit_sessions", Operation::Insert, rows)
            .batch_size(100);
        let response = executor.execute(&request).await;

        assert_eq!(response.status, BulkStatus::Success);
        assert_eq!(backend.calls(), 2);
        let seen = backend.column_types_seen.lock().await;
        for types in seen.iter() {
            assert_eq!(types.get("note").map(String::as_str), Some("text"));
            assert_eq!(types.get("event").map(String::as_str), Some("int8"));
        }
    }

    #[tokio::test]
    async fn explicit_column_types_override_derivation() {
        let backend = MockBackend::always_ok();
        let executor = executor(backend.clone());

        let rows = vec![BulkRow::with_columns(vec![ColumnValue::new("count", 1i64)])];
        let request = BulkOperationRequest::new("audit_sessions", Operation::Insert, rows)
            .column_type("count", "numeric");
        let response = executor.execute(&request).await;

        assert_eq!(response.status, BulkStatus::Success);
        let seen = backend.column_types_seen.lock().await;
        assert_eq!(seen[0].get("count").map(String::as_str), Some("numeric"));
    }

    #[tokio::test]
    async fn delete_rows_with_filters_only_are_valid() {
        let backend = MockBackend::always_ok();
        let executor = executor(backend.clone());

        let rows = vec![
            BulkRow::with_filters(vec![Filter::eq("id", 1i64)]),
            BulkRow::with_filters(vec![Filter::eq("id", 2i64)]),
        ];
        let request = BulkOperationRequest::new("audit_sessions", Operation::Delete, rows);
        let response = executor.execute(&request).await;

        assert_eq!(response.status, BulkStatus::Success);
        assert_eq!(response.successful_rows, 2);
    }
}
