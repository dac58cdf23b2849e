pub mod executor;
pub mod import;
pub mod request;
pub mod response;

pub use executor::BulkExecutor;
pub use request::{
    BulkOperationRequest, BulkRow, ColumnValue, Filter, FilterOperator, Operation,
};
pub use response::{BulkOperationResponse, BulkStatus, DryRunPreview, RowError, RowErrorKind};
