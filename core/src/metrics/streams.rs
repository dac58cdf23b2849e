//! Streaming-cursor metric helpers.

use super::definitions::{STREAM_DURATION, STREAM_ROWS_TOTAL};

/// Record one row consumed from a stream.
pub fn record_row_streamed(stream: &str) {
    STREAM_ROWS_TOTAL.with_label_values(&[stream]).inc();
}

/// Record the lifetime of a stream, once, at close.
pub fn record_stream_duration(stream: &str, duration_secs: f64) {
    STREAM_DURATION.with_label_values(&[stream]).observe(duration_secs);
}

/// Current row count for a stream label. Used by tests and diagnostics.
pub fn rows_streamed(stream: &str) -> f64 {
    STREAM_ROWS_TOTAL.with_label_values(&[stream]).get()
}
