pub mod bulk_backend;
pub mod client;
pub mod cursor;
pub mod marshal;
pub mod query_builder;

pub use bulk_backend::PostgresBulkBackend;
pub use client::{
    connection_string, PostgresClient, PostgresConnectionError, PostgresError,
};
pub use cursor::PostgresCursorBackend;
pub use marshal::{scalar_array, ColumnSpec, MarshalError, PgArrayType, PgScalarArray};

use crate::database::BackendError;

impl From<PostgresError> for BackendError {
    fn from(e: PostgresError) -> Self {
        match e {
            PostgresError::PgError(pg) => BackendError::Postgres(pg),
            PostgresError::ConnectionPoolError(pool) => BackendError::Connection(pool.to_string()),
        }
    }
}
