//! Server-side cursor access on a dedicated connection.
//!
//! Each open cursor owns one non-pooled connection for its whole lifetime:
//! `DECLARE ... NO SCROLL CURSOR` inside a transaction, `FETCH FORWARD` in
//! driver-sized pages, `CLOSE` and commit on release. Dropping the cursor
//! tears the connection down without the graceful close round trip.

use std::{collections::VecDeque, sync::Arc};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use tokio_postgres::{types::Type as ColumnType, Row};
use tracing::debug;
use uuid::Uuid;

use crate::database::{
    sql_value::{SqlRow, SqlValue},
    BackendError, CursorBackend, CursorSettings, RowCursor,
};

use super::client::{DedicatedConnection, PostgresClient, ToSql};

pub struct PostgresCursorBackend {
    client: Arc<PostgresClient>,
}

impl PostgresCursorBackend {
    pub fn new(client: Arc<PostgresClient>) -> Self {
        PostgresCursorBackend { client }
    }
}

#[async_trait]
impl CursorBackend for PostgresCursorBackend {
    async fn open_cursor(
        &self,
        query: &str,
        params: &[SqlValue],
        settings: &CursorSettings,
    ) -> Result<Box<dyn RowCursor>, BackendError> {
        let conn = self
            .client
            .connect_dedicated()
            .await
            .map_err(|e| BackendError::Connection(e.to_string()))?;

        let name = format!("bulkflow_cur_{}", Uuid::new_v4().simple());

        conn.client
            .batch_execute(&format!(
                "SET statement_timeout = {}",
                settings.query_timeout.as_millis()
            ))
            .await?;
        conn.client.batch_execute("BEGIN").await?;

        let declare = format!("DECLARE {name} NO SCROLL CURSOR FOR {query}");
        let param_refs: Vec<&(dyn ToSql + Sync)> =
            params.iter().map(|p| p as &(dyn ToSql + Sync)).collect();
        conn.client.execute(declare.as_str(), &param_refs).await?;

        debug!("declared cursor {} (fetch_size={})", name, settings.fetch_size);

        Ok(Box::new(PostgresCursor {
            conn,
            name,
            fetch_size: settings.fetch_size.max(1),
            buffer: VecDeque::new(),
            exhausted: false,
            open: true,
        }))
    }
}

struct PostgresCursor {
    conn: DedicatedConnection,
    name: String,
    fetch_size: usize,
    buffer: VecDeque<SqlRow>,
    exhausted: bool,
    open: bool,
}

impl PostgresCursor {
    async fn refill(&mut self) -> Result<(), BackendError> {
        let fetch = format!("FETCH FORWARD {} FROM {}", self.fetch_size, self.name);
        let rows = self.conn.client.query(fetch.as_str(), &[]).await?;

        if rows.len() < self.fetch_size {
            self.exhausted = true;
        }
        for row in &rows {
            self.buffer.push_back(convert_row(row)?);
        }
        Ok(())
    }
}

#[async_trait]
impl RowCursor for PostgresCursor {
    async fn next_row(&mut self) -> Result<Option<SqlRow>, BackendError> {
        if !self.open {
            return Ok(None);
        }
        if self.buffer.is_empty() && !self.exhausted {
            self.refill().await?;
        }
        Ok(self.buffer.pop_front())
    }

    async fn close(&mut self) -> Result<(), BackendError> {
        if !self.open {
            return Ok(());
        }
        self.open = false;
        self.buffer.clear();

        self.conn.client.batch_execute(&format!("CLOSE {}", self.name)).await?;
        self.conn.client.batch_execute("COMMIT").await?;
        debug!("closed cursor {}", self.name);
        Ok(())
    }
}

/// Converts a driver row into the engine's scalar representation. An
/// unsupported column type is an error naming the column, not a silent
/// NULL.
fn convert_row(row: &Row) -> Result<SqlRow, BackendError> {
    let mut converted = SqlRow::default();

    for (index, column) in row.columns().iter().enumerate() {
        let ty = column.type_();
        let value = if *ty == ColumnType::BOOL {
            row.try_get::<_, Option<bool>>(index)?.map(SqlValue::Bool)
        } else if *ty == ColumnType::INT2 {
            row.try_get::<_, Option<i16>>(index)?.map(SqlValue::I16)
        } else if *ty == ColumnType::INT4 {
            row.try_get::<_, Option<i32>>(index)?.map(SqlValue::I32)
        } else if *ty == ColumnType::INT8 {
            row.try_get::<_, Option<i64>>(index)?.map(SqlValue::I64)
        } else if *ty == ColumnType::FLOAT4 {
            row.try_get::<_, Option<f32>>(index)?.map(|v| SqlValue::F64(v as f64))
        } else if *ty == ColumnType::FLOAT8 {
            row.try_get::<_, Option<f64>>(index)?.map(SqlValue::F64)
        } else if *ty == ColumnType::NUMERIC {
            row.try_get::<_, Option<Decimal>>(index)?.map(SqlValue::Decimal)
        } else if *ty == ColumnType::TEXT
            || *ty == ColumnType::VARCHAR
            || *ty == ColumnType::BPCHAR
            || *ty == ColumnType::NAME
        {
            row.try_get::<_, Option<String>>(index)?.map(SqlValue::Text)
        } else if *ty == ColumnType::TIMESTAMPTZ {
            row.try_get::<_, Option<DateTime<Utc>>>(index)?.map(SqlValue::Timestamp)
        } else if *ty == ColumnType::TIMESTAMP {
            row.try_get::<_, Option<NaiveDateTime>>(index)?
                .map(|v| SqlValue::Timestamp(v.and_utc()))
        } else if *ty == ColumnType::DATE {
            row.try_get::<_, Option<NaiveDate>>(index)?.map(SqlValue::Date)
        } else if *ty == ColumnType::UUID {
            row.try_get::<_, Option<Uuid>>(index)?.map(SqlValue::Uuid)
        } else if *ty == ColumnType::JSON || *ty == ColumnType::JSONB {
            row.try_get::<_, Option<serde_json::Value>>(index)?.map(SqlValue::Json)
        } else if *ty == ColumnType::BYTEA {
            row.try_get::<_, Option<Vec<u8>>>(index)?.map(SqlValue::Bytes)
        } else {
            return Err(BackendError::Other(format!(
                "unsupported column type '{}' for column '{}'",
                ty,
                column.name()
            )));
        };

        converted.push(column.name(), value.unwrap_or(SqlValue::Null));
    }

    Ok(converted)
}
