//! Metrics and observability utilities
//!
//! Counters for the ETL stages with standardized naming conventions,
//! emitted through the `metrics` facade.

use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};

/// Metrics prefix for all Qualtrics ETL metrics
pub const METRICS_PREFIX: &str = "qualtrics_etl";

/// Register all metric descriptions
pub fn register_metrics() {
    describe_counter!(
        format!("{}_exports_total", METRICS_PREFIX),
        Unit::Count,
        "Total response export attempts"
    );

    describe_histogram!(
        format!("{}_export_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "End-to-end export latency, start to stored file"
    );

    describe_counter!(
        format!("{}_definitions_fetched_total", METRICS_PREFIX),
        Unit::Count,
        "Definitions fetches, including already-mapped skips"
    );

    describe_counter!(
        format!("{}_mappings_loaded_total", METRICS_PREFIX),
        Unit::Count,
        "Mapping load operations by action"
    );

    describe_counter!(
        format!("{}_responses_loaded_total", METRICS_PREFIX),
        Unit::Count,
        "Response rows inserted"
    );

    describe_counter!(
        format!("{}_duplicate_downloads_total", METRICS_PREFIX),
        Unit::Count,
        "Transforms skipped because the download matched the previous hash"
    );

    tracing::info!("Metrics registered");
}

/// Record one response export attempt
pub fn record_export(duration_secs: f64, success: bool) {
    let status = if success { "success" } else { "error" };

    counter!(
        format!("{}_exports_total", METRICS_PREFIX),
        "status" => status.to_string()
    )
    .increment(1);

    if success {
        histogram!(format!("{}_export_duration_seconds", METRICS_PREFIX)).record(duration_secs);
    }
}

/// Record one definitions fetch (or skip)
pub fn record_definitions(skipped: bool) {
    let outcome = if skipped { "skipped" } else { "extracted" };

    counter!(
        format!("{}_definitions_fetched_total", METRICS_PREFIX),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record one mapping load by its reported action
pub fn record_mappings_load(action: &str) {
    counter!(
        format!("{}_mappings_loaded_total", METRICS_PREFIX),
        "action" => action.to_string()
    )
    .increment(1);
}

/// Record inserted response rows
pub fn record_responses_loaded(inserted: u64) {
    counter!(format!("{}_responses_loaded_total", METRICS_PREFIX)).increment(inserted);
}

/// Record a transform skipped as a duplicate download
pub fn record_duplicate_skip() {
    counter!(format!("{}_duplicate_downloads_total", METRICS_PREFIX)).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_never_panics_without_a_recorder() {
        register_metrics();
        record_export(1.25, true);
        record_export(0.0, false);
        record_definitions(true);
        record_mappings_load("created");
        record_responses_loaded(42);
        record_duplicate_skip();
    }
}
