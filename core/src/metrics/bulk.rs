//! Bulk-execution metric helpers.

use std::time::Duration;

use super::definitions::{
    BATCH_DURATION, BULK_ROWS_TOTAL, MEMORY_PRESSURE, THROTTLE_ACTIVATIONS_TOTAL,
};

/// Record a memory pressure sample taken by the chunking policy.
pub fn record_memory_pressure(pressure_pct: f64) {
    MEMORY_PRESSURE.set(pressure_pct);
}

/// Record one producer throttle pause.
pub fn record_throttle_activation() {
    THROTTLE_ACTIVATIONS_TOTAL.inc();
}

/// Record a completed batch: its duration and per-row outcomes.
pub fn record_batch(
    table: &str,
    operation: &str,
    succeeded: usize,
    failed: usize,
    duration: Duration,
) {
    BATCH_DURATION.with_label_values(&[table, operation]).observe(duration.as_secs_f64());

    if succeeded > 0 {
        BULK_ROWS_TOTAL.with_label_values(&[table, operation, "success"]).inc_by(succeeded as f64);
    }
    if failed > 0 {
        BULK_ROWS_TOTAL.with_label_values(&[table, operation, "failed"]).inc_by(failed as f64);
    }
}
