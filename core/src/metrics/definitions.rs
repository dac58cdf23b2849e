//! Prometheus metric definitions for bulkflow.
//!
//! All metric registrations are centralized here for discoverability.
//! Metrics are lazily initialized on first access.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter, register_counter_vec, register_gauge, register_histogram_vec, Counter,
    CounterVec, Gauge, HistogramVec,
};

// =============================================================================
// Bulk Execution Metrics
// =============================================================================

/// Duration of individual batch calls.
/// Labels: table, operation
pub static BATCH_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "bulkflow_batch_duration_seconds",
        "Duration of individual bulk batch calls",
        &["table", "operation"],
        vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0]
    )
    .expect("failed to register BATCH_DURATION")
});

/// Rows processed by bulk operations.
/// Labels: table, operation, status (success/failed)
pub static BULK_ROWS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "bulkflow_bulk_rows_total",
        "Total number of rows processed by bulk operations",
        &["table", "operation", "status"]
    )
    .expect("failed to register BULK_ROWS_TOTAL")
});

/// Most recent memory pressure reading, 0-100.
pub static MEMORY_PRESSURE: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!(
        "bulkflow_memory_pressure_percent",
        "Most recent memory pressure sample used by the chunking policy"
    )
    .expect("failed to register MEMORY_PRESSURE")
});

/// Number of times the chunking policy paused the producer.
pub static THROTTLE_ACTIVATIONS_TOTAL: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "bulkflow_throttle_activations_total",
        "Total number of producer throttle pauses triggered by memory pressure"
    )
    .expect("failed to register THROTTLE_ACTIVATIONS_TOTAL")
});

// =============================================================================
// Streaming Metrics
// =============================================================================

/// Rows yielded by streaming cursors, incremented per row consumed.
/// Labels: stream
pub static STREAM_ROWS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "bulkflow_stream_rows_total",
        "Total number of rows yielded by streaming cursors",
        &["stream"]
    )
    .expect("failed to register STREAM_ROWS_TOTAL")
});

/// End-to-end stream duration, recorded once at close.
/// Labels: stream
pub static STREAM_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "bulkflow_stream_duration_seconds",
        "Lifetime of a streaming cursor from open to close",
        &["stream"],
        vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0, 120.0, 600.0]
    )
    .expect("failed to register STREAM_DURATION")
});
