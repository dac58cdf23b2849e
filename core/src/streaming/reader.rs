//! Lazy row streaming over server-side cursors.
//!
//! Rows are pulled on demand in driver-sized pages; nothing is materialized
//! up front. The stream owns one dedicated connection for its whole lifetime
//! and releases it on `close`, on exhaustion, on error, or on drop -
//! whichever comes first, exactly once.

use std::{marker::PhantomData, sync::Arc, time::Duration, time::Instant};

use thiserror::Error;
use tracing::{debug, info};

use crate::{
    config::StreamingConfig,
    database::{sql_value::SqlRow, sql_value::SqlValue, BackendError, CursorBackend, RowCursor},
    metrics,
};

use super::options::StreamOptions;

#[derive(Error, Debug)]
pub enum StreamError {
    #[error("could not open cursor: {0}")]
    OpenFailed(#[source] BackendError),

    #[error("could not fetch next rows: {0}")]
    FetchFailed(#[source] BackendError),

    #[error("could not map row {row_number}: {message}")]
    MapFailed { row_number: usize, message: String },
}

/// Converts one cursor row into the caller's type. `row_number` is the
/// 0-based position within the stream.
pub trait RowMapper<T>: Send {
    fn map_row(&self, row: &SqlRow, row_number: usize) -> Result<T, String>;
}

impl<T, F> RowMapper<T> for F
where
    F: Fn(&SqlRow, usize) -> Result<T, String> + Send,
{
    fn map_row(&self, row: &SqlRow, row_number: usize) -> Result<T, String> {
        self(row, row_number)
    }
}

/// Opens streams over the cursor backend, clamping the requested fetch size
/// into the configured window.
pub struct QueryStreamer {
    backend: Arc<dyn CursorBackend>,
    config: StreamingConfig,
}

impl QueryStreamer {
    pub fn new(backend: Arc<dyn CursorBackend>, config: StreamingConfig) -> Self {
        QueryStreamer { backend, config }
    }

    /// Opens a server-side cursor for `query` and returns a lazy stream over
    /// its rows. No rows are fetched until the first `next` call.
    pub async fn stream<T, M>(
        &self,
        query: &str,
        params: &[SqlValue],
        mapper: M,
        options: StreamOptions,
    ) -> Result<RowStream<T, M>, StreamError>
    where
        M: RowMapper<T>,
    {
        let fetch_size =
            options.fetch_size().clamp(self.config.min_fetch_size, self.config.max_fetch_size);
        let settings = crate::database::CursorSettings {
            fetch_size,
            query_timeout: Duration::from_secs(self.config.query_timeout_secs),
        };

        let cursor = self
            .backend
            .open_cursor(query, params, &settings)
            .await
            .map_err(StreamError::OpenFailed)?;

        info!(
            "opened stream '{}': fetch_size={}, timeout={}s",
            options.stream_name(),
            fetch_size,
            self.config.query_timeout_secs
        );

        Ok(RowStream {
            cursor: Some(cursor),
            mapper,
            stream_name: options.stream_name().to_string(),
            rows_streamed: 0,
            started: Instant::now(),
            finished: false,
            _marker: PhantomData,
        })
    }
}

/// A lazy, closable stream of mapped rows backed by one open cursor.
pub struct RowStream<T, M: RowMapper<T>> {
    cursor: Option<Box<dyn RowCursor>>,
    mapper: M,
    stream_name: String,
    rows_streamed: u64,
    started: Instant,
    finished: bool,
    _marker: PhantomData<fn() -> T>,
}

impl<T, M: RowMapper<T>> RowStream<T, M> {
    /// Pulls the next mapped row. Returns `None` once the stream is
    /// exhausted or closed. Any error closes the stream before it is
    /// reported, so the underlying connection is never leaked.
    pub async fn next(&mut self) -> Option<Result<T, StreamError>> {
        let cursor = self.cursor.as_mut()?;

        match cursor.next_row().await {
            Ok(Some(row)) => {
                let row_number = self.rows_streamed as usize;
                match self.mapper.map_row(&row, row_number) {
                    Ok(mapped) => {
                        self.rows_streamed += 1;
                        metrics::streams::record_row_streamed(&self.stream_name);
                        Some(Ok(mapped))
                    }
                    Err(message) => {
                        self.close().await;
                        Some(Err(StreamError::MapFailed { row_number, message }))
                    }
                }
            }
            Ok(None) => {
                self.close().await;
                None
            }
            Err(e) => {
                self.close().await;
                Some(Err(StreamError::FetchFailed(e)))
            }
        }
    }

    /// Releases the cursor and its connection. Safe to call more than once;
    /// later calls are no-ops.
    pub async fn close(&mut self) {
        if let Some(mut cursor) = self.cursor.take() {
            if let Err(e) = cursor.close().await {
                debug!("stream '{}': cursor close reported {}", self.stream_name, e);
            }
        }
        self.record_termination();
    }

    pub fn rows_streamed(&self) -> u64 {
        self.rows_streamed
    }

    pub fn is_closed(&self) -> bool {
        self.cursor.is_none()
    }

    /// Adapts this reader into a `futures::Stream` of mapped rows. The
    /// stream stops after the first error.
    pub fn into_stream(self) -> impl futures::Stream<Item = Result<T, StreamError>> {
        futures::stream::unfold(self, |mut reader| async move {
            match reader.next().await {
                Some(Ok(item)) => Some((Ok(item), reader)),
                Some(Err(e)) => {
                    // Reader already closed itself on the error path.
                    Some((Err(e), reader))
                }
                None => None,
            }
        })
    }

    fn record_termination(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        metrics::streams::record_stream_duration(
            &self.stream_name,
            self.started.elapsed().as_secs_f64(),
        );
        debug!("stream '{}' closed after {} rows", self.stream_name, self.rows_streamed);
    }
}

impl<T, M: RowMapper<T>> Drop for RowStream<T, M> {
    fn drop(&mut self) {
        // Dropping the cursor releases its connection without the graceful
        // CLOSE round trip; explicit close is preferred but not required.
        if self.cursor.take().is_some() {
            debug!("stream '{}' dropped while open", self.stream_name);
        }
        self.record_termination();
    }
}
