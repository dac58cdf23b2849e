//! Prometheus metrics for bulkflow observability.
//!
//! The engine only emits counter/gauge/histogram calls; storage and
//! exposition belong to the embedding service. `encode_metrics` is provided
//! for callers that want the default registry in text form.

pub mod bulk;
pub mod definitions;
pub mod streams;

use prometheus::{Encoder, TextEncoder};

/// Encode all metrics in the default registry to Prometheus text format.
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_includes_registered_metrics() {
        bulk::record_memory_pressure(42.0);

        let output = encode_metrics().expect("should encode metrics");
        assert!(output.contains("bulkflow_memory_pressure_percent"));
    }

    #[test]
    fn batch_recording_counts_rows() {
        bulk::record_batch("metrics_test_table", "INSERT", 90, 10, std::time::Duration::from_millis(5));

        let output = encode_metrics().unwrap();
        assert!(output.contains("bulkflow_bulk_rows_total"));
        assert!(output.contains("bulkflow_batch_duration_seconds"));
    }

    #[test]
    fn stream_rows_counter_accumulates() {
        let before = streams::rows_streamed("metrics-test-stream");
        streams::record_row_streamed("metrics-test-stream");
        streams::record_row_streamed("metrics-test-stream");
        let after = streams::rows_streamed("metrics-test-stream");
        assert_eq!((after - before) as u64, 2);
    }
}
