// public
pub mod bulk;
pub mod chunking;
pub mod config;
pub mod metrics;
pub mod streaming;

pub mod database;
pub use database::{
    postgres::{PostgresBulkBackend, PostgresClient, PostgresCursorBackend},
    sql_value::{SqlRow, SqlValue},
    BackendError, BatchOutcome, BatchRequest, BatchRowError, BulkBackend, CursorBackend,
    CursorSettings, RowCursor,
};

pub use bulk::{
    import::{import_data, ImportFormat, ImportRequest},
    BulkExecutor, BulkOperationRequest, BulkOperationResponse, BulkRow, BulkStatus, ColumnValue,
    Filter, FilterOperator, Operation, RowError,
};
pub use chunking::{ChunkDecision, ChunkingPolicy, PressureSampler, PressureSnapshot};
pub use config::{BulkConfig, ChunkingConfig, EngineConfig, StreamingConfig};
pub use streaming::{QueryStreamer, RowMapper, RowStream, StreamError, StreamOptions};

mod logger;
pub use logger::{setup_info_logger, setup_logger};

// export 3rd party dependencies
pub use async_trait::async_trait;
pub use tokio_postgres::types::ToSql;
