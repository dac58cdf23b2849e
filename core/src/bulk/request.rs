use std::collections::HashMap;

use crate::database::sql_value::SqlValue;

/// The kind of set-based write a bulk request performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Insert,
    Update,
    Delete,
}

impl Operation {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Operation::Insert => "INSERT",
            Operation::Update => "UPDATE",
            Operation::Delete => "DELETE",
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_sql())
    }
}

/// Comparison operators allowed in row filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOperator {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Like,
}

impl FilterOperator {
    pub fn symbol(&self) -> &'static str {
        match self {
            FilterOperator::Eq => "=",
            FilterOperator::Ne => "<>",
            FilterOperator::Lt => "<",
            FilterOperator::Le => "<=",
            FilterOperator::Gt => ">",
            FilterOperator::Ge => ">=",
            FilterOperator::Like => "LIKE",
        }
    }
}

/// A named value written by INSERT/UPDATE rows.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnValue {
    pub name: String,
    pub value: SqlValue,
}

impl ColumnValue {
    pub fn new(name: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        ColumnValue { name: name.into(), value: value.into() }
    }
}

/// A WHERE predicate targeting rows for UPDATE/DELETE.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub column: String,
    pub operator: FilterOperator,
    pub value: SqlValue,
}

impl Filter {
    pub fn new(
        column: impl Into<String>,
        operator: FilterOperator,
        value: impl Into<SqlValue>,
    ) -> Self {
        Filter { column: column.into(), operator, value: value.into() }
    }

    pub fn eq(column: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        Filter::new(column, FilterOperator::Eq, value)
    }
}

/// One row of a bulk request. INSERT/UPDATE rows carry columns;
/// UPDATE/DELETE rows carry filters. A row with neither is invalid.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BulkRow {
    pub columns: Vec<ColumnValue>,
    pub filters: Vec<Filter>,
}

impl BulkRow {
    pub fn new(columns: Vec<ColumnValue>, filters: Vec<Filter>) -> Self {
        BulkRow { columns, filters }
    }

    pub fn with_columns(columns: Vec<ColumnValue>) -> Self {
        BulkRow { columns, filters: Vec::new() }
    }

    pub fn with_filters(filters: Vec<Filter>) -> Self {
        BulkRow { columns: Vec::new(), filters }
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty() && self.filters.is_empty()
    }
}

/// A validated-once, immutable description of a bulk write workload.
#[derive(Debug, Clone)]
pub struct BulkOperationRequest {
    pub table: String,
    pub operation: Operation,
    pub rows: Vec<BulkRow>,
    pub dry_run: bool,
    pub skip_on_error: bool,
    /// Caps the chunk size the chunking policy recommends. `None` defers
    /// entirely to the policy.
    pub batch_size: Option<usize>,
    /// Array element types per column (e.g. `"count" -> "int8"`). Columns
    /// without an entry have their type derived from the request's values.
    pub column_types: HashMap<String, String>,
    pub metadata: Option<String>,
}

impl BulkOperationRequest {
    pub fn new(table: impl Into<String>, operation: Operation, rows: Vec<BulkRow>) -> Self {
        BulkOperationRequest {
            table: table.into(),
            operation,
            rows,
            dry_run: false,
            skip_on_error: false,
            batch_size: None,
            column_types: HashMap::new(),
            metadata: None,
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

    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = Some(batch_size);
        self
    }

    pub fn column_type(mut self, column: impl Into<String>, element_type: impl Into<String>) -> Self {
        self.column_types.insert(column.into(), element_type.into());
        self
    }

    pub fn metadata(mut self, metadata: impl Into<String>) -> Self {
        self.metadata = Some(metadata.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operation_sql_literals() {
        assert_eq!(Operation::Insert.as_sql(), "INSERT");
        assert_eq!(Operation::Update.as_sql(), "UPDATE");
        assert_eq!(Operation::Delete.as_sql(), "DELETE");
    }

    #[test]
    fn filter_operator_symbols() {
        assert_eq!(FilterOperator::Eq.symbol(), "=");
        assert_eq!(FilterOperator::Ne.symbol(), "<>");
        assert_eq!(FilterOperator::Like.symbol(), "LIKE");
    }

    #[test]
    fn empty_row_detection() {
        assert!(BulkRow::default().is_empty());
        assert!(!BulkRow::with_columns(vec![ColumnValue::new("a", 1i64)]).is_empty());
        assert!(!BulkRow::with_filters(vec![Filter::eq("id", 1i64)]).is_empty());
    }

    #[test]
    fn request_builder_defaults() {
        let request = BulkOperationRequest::new("users", Operation::Insert, vec![]);
        assert!(!request.dry_run);
        assert!(!request.skip_on_error);
        assert_eq!(request.batch_size, None);

        let request = request.dry_run(true).batch_size(50).metadata("import");
        assert!(request.dry_run);
        assert_eq!(request.batch_size, Some(50));
        assert_eq!(request.metadata.as_deref(), Some("import"));
    }

    #[test]
    fn explicit_column_types_accumulate() {
        let request = BulkOperationRequest::new("users", Operation::Insert, vec![])
            .column_type("note", "text")
            .column_type("count", "int8");

        assert_eq!(request.column_types.get("note").map(String::as_str), Some("text"));
        assert_eq!(request.column_types.get("count").map(String::as_str), Some("int8"));
    }
}
