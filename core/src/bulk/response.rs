use std::time::Duration;

use serde::Serialize;

/// Final outcome classification of a bulk request. Closed so callers can
/// match exhaustively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BulkStatus {
    Success,
    PartialSuccess,
    Failure,
    ValidationFailed,
    DryRunPreview,
    /// Reserved for the import layer: format parsing failed before any rows
    /// were produced.
    ImportFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RowErrorKind {
    Validation,
    Execution,
    Import,
}

/// A failure attributable to one row, numbered 0-based against the original
/// request order.
#[derive(Debug, Clone, Serialize)]
pub struct RowError {
    pub row_number: usize,
    pub message: String,
    pub error_type: RowErrorKind,
}

impl RowError {
    pub fn new(row_number: usize, message: impl Into<String>, error_type: RowErrorKind) -> Self {
        RowError { row_number, message: message.into(), error_type }
    }
}

/// What a dry run estimates would happen.
#[derive(Debug, Clone, Serialize)]
pub struct DryRunPreview {
    pub estimated_affected_rows: usize,
    pub execution_plan: String,
    pub validation_warnings: Vec<String>,
}

/// The complete, frozen outcome of one bulk request.
///
/// Invariants: `successful_rows + failed_rows == processed_rows` and
/// `processed_rows <= total_rows`, on every path.
#[derive(Debug, Clone, Serialize)]
pub struct BulkOperationResponse {
    pub total_rows: usize,
    pub processed_rows: usize,
    pub successful_rows: usize,
    pub failed_rows: usize,
    pub status: BulkStatus,
    pub errors: Vec<RowError>,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dry_run_preview: Option<DryRunPreview>,
}

impl BulkOperationResponse {
    pub fn validation_failed(
        total_rows: usize,
        errors: Vec<RowError>,
        duration: Duration,
    ) -> Self {
        BulkOperationResponse {
            total_rows,
            processed_rows: 0,
            successful_rows: 0,
            failed_rows: 0,
            status: BulkStatus::ValidationFailed,
            errors,
            duration_ms: duration.as_millis() as u64,
            dry_run_preview: None,
        }
    }

    pub fn dry_run(
        total_rows: usize,
        preview: DryRunPreview,
        errors: Vec<RowError>,
        duration: Duration,
    ) -> Self {
        BulkOperationResponse {
            total_rows,
            processed_rows: 0,
            successful_rows: 0,
            failed_rows: 0,
            status: BulkStatus::DryRunPreview,
            errors,
            duration_ms: duration.as_millis() as u64,
            dry_run_preview: Some(preview),
        }
    }

    pub fn import_failed(message: impl Into<String>, duration: Duration) -> Self {
        BulkOperationResponse {
            total_rows: 0,
            processed_rows: 0,
            successful_rows: 0,
            failed_rows: 0,
            status: BulkStatus::ImportFailed,
            errors: vec![RowError::new(0, message, RowErrorKind::Import)],
            duration_ms: duration.as_millis() as u64,
            dry_run_preview: None,
        }
    }
}

/// Accumulates per-batch outcomes and freezes them into a response.
#[derive(Debug)]
pub(crate) struct ResponseBuilder {
    total_rows: usize,
    processed_rows: usize,
    successful_rows: usize,
    failed_rows: usize,
    errors: Vec<RowError>,
}

impl ResponseBuilder {
    pub fn new(total_rows: usize) -> Self {
        ResponseBuilder {
            total_rows,
            processed_rows: 0,
            successful_rows: 0,
            failed_rows: 0,
            errors: Vec::new(),
        }
    }

    pub fn rows_attempted(&mut self, count: usize) {
        self.processed_rows += count;
    }

    pub fn rows_succeeded(&mut self, count: usize) {
        self.successful_rows += count;
    }

    pub fn row_failed(&mut self, error: RowError) {
        self.failed_rows += 1;
        self.errors.push(error);
    }

    /// Freezes the accumulated counts, deriving the status from them.
    pub fn finish(self, duration: Duration) -> BulkOperationResponse {
        debug_assert_eq!(self.successful_rows + self.failed_rows, self.processed_rows);
        debug_assert!(self.processed_rows <= self.total_rows);

        let status = if self.failed_rows == 0 && self.processed_rows == self.total_rows {
            BulkStatus::Success
        } else if self.successful_rows > 0 {
            BulkStatus::PartialSuccess
        } else {
            BulkStatus::Failure
        };

        BulkOperationResponse {
            total_rows: self.total_rows,
            processed_rows: self.processed_rows,
            successful_rows: self.successful_rows,
            failed_rows: self.failed_rows,
            status,
            errors: self.errors,
            duration_ms: duration.as_millis() as u64,
            dry_run_preview: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_rows_succeeding_is_success() {
        let mut builder = ResponseBuilder::new(10);
        builder.rows_attempted(10);
        builder.rows_succeeded(10);

        let response = builder.finish(Duration::from_millis(5));
        assert_eq!(response.status, BulkStatus::Success);
        assert_eq!(response.successful_rows + response.failed_rows, response.processed_rows);
    }

    #[test]
    fn mixed_outcome_is_partial_success() {
        let mut builder = ResponseBuilder::new(10);
        builder.rows_attempted(10);
        builder.rows_succeeded(7);
        for i in 7..10 {
            builder.row_failed(RowError::new(i, "boom", RowErrorKind::Execution));
        }

        let response = builder.finish(Duration::ZERO);
        assert_eq!(response.status, BulkStatus::PartialSuccess);
        assert_eq!(response.failed_rows, 3);
        assert_eq!(response.errors.len(), 3);
    }

    #[test]
    fn every_attempted_row_failing_is_failure() {
        let mut builder = ResponseBuilder::new(5);
        builder.rows_attempted(5);
        for i in 0..5 {
            builder.row_failed(RowError::new(i, "boom", RowErrorKind::Execution));
        }

        let response = builder.finish(Duration::ZERO);
        assert_eq!(response.status, BulkStatus::Failure);
        assert_eq!(response.successful_rows, 0);
    }

    #[test]
    fn early_abort_keeps_partial_results() {
        // 3 batches of 5, aborted after the second.
        let mut builder = ResponseBuilder::new(15);
        builder.rows_attempted(5);
        builder.rows_succeeded(5);
        builder.rows_attempted(5);
        for i in 5..10 {
            builder.row_failed(RowError::new(i, "batch failed", RowErrorKind::Execution));
        }

        let response = builder.finish(Duration::ZERO);
        assert_eq!(response.processed_rows, 10);
        assert!(response.processed_rows < response.total_rows);
        assert_eq!(response.status, BulkStatus::PartialSuccess);
    }

    #[test]
    fn validation_failed_has_zero_counts() {
        let response = BulkOperationResponse::validation_failed(
            4,
            vec![RowError::new(0, "table not allowed", RowErrorKind::Validation)],
            Duration::ZERO,
        );
        assert_eq!(response.status, BulkStatus::ValidationFailed);
        assert_eq!(response.processed_rows, 0);
        assert_eq!(response.failed_rows, 0);
        assert_eq!(response.errors.len(), 1);
    }

    #[test]
    fn status_serializes_screaming_snake() {
        let json = serde_json::to_string(&BulkStatus::PartialSuccess).unwrap();
        assert_eq!(json, "\"PARTIAL_SUCCESS\"");
        let json = serde_json::to_string(&BulkStatus::DryRunPreview).unwrap();
        assert_eq!(json, "\"DRY_RUN_PREVIEW\"");
    }
}
