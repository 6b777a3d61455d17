//! Prometheus metrics for dispatch-service.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_histogram_vec, register_int_counter, CounterVec, HistogramVec,
    IntCounter, TextEncoder,
};

/// HTTP request counter by method, route and status.
pub static HTTP_REQUESTS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "dispatch_http_requests_total",
        "Total number of HTTP requests",
        &["method", "route", "status"]
    )
    .expect("Failed to register http_requests_total")
});

/// HTTP request duration histogram by method and route.
pub static HTTP_REQUEST_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "dispatch_http_request_duration_seconds",
        "HTTP request duration in seconds",
        &["method", "route"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]
    )
    .expect("Failed to register http_request_duration")
});

/// Database query duration histogram.
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "dispatch_db_query_duration_seconds",
        "Database query duration in seconds",
        &["operation"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]
    )
    .expect("Failed to register db_query_duration")
});

/// Completion submissions by mode and outcome.
pub static COMPLETIONS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "dispatch_completions_total",
        "Total number of order completion submissions",
        &["mode", "status"]
    )
    .expect("Failed to register completions_total")
});

/// Item transitions written to the ledger, by action.
pub static ITEM_TRANSITIONS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "dispatch_item_transitions_total",
        "Total number of inventory ledger transitions",
        &["action"]
    )
    .expect("Failed to register item_transitions_total")
});

/// Rollbacks of unbound or retracted items, by outcome.
pub static ITEM_ROLLBACKS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "dispatch_item_rollbacks_total",
        "Total number of item rollbacks",
        &["outcome"]  // restored, normalized, purged
    )
    .expect("Failed to register item_rollbacks_total")
});

/// Material reconciliations that left a technician in deficit.
pub static MATERIAL_DEFICITS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "dispatch_material_deficits_total",
        "Total number of material stock deficits reported"
    )
    .expect("Failed to register material_deficits_total")
});

/// Bulk import rows by outcome.
pub static IMPORT_ROWS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "dispatch_import_rows_total",
        "Total number of imported order rows",
        &["outcome"]  // created, skipped, failed
    )
    .expect("Failed to register import_rows_total")
});

/// Error counter for alerting.
pub static ERRORS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "dispatch_errors_total",
        "Total number of errors by type",
        &["error_type"]
    )
    .expect("Failed to register errors_total")
});

/// Initialize all metrics (forces lazy initialization).
pub fn init_metrics() {
    Lazy::force(&HTTP_REQUESTS_TOTAL);
    Lazy::force(&HTTP_REQUEST_DURATION);
    Lazy::force(&DB_QUERY_DURATION);
    Lazy::force(&COMPLETIONS_TOTAL);
    Lazy::force(&ITEM_TRANSITIONS_TOTAL);
    Lazy::force(&ITEM_ROLLBACKS_TOTAL);
    Lazy::force(&MATERIAL_DEFICITS_TOTAL);
    Lazy::force(&IMPORT_ROWS_TOTAL);
    Lazy::force(&ERRORS_TOTAL);
}

/// Get metrics in Prometheus text format.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder
        .encode_to_string(&metric_families)
        .unwrap_or_default()
}

/// Record an error by its `AppError` kind.
pub fn record_error(error_type: &str) {
    ERRORS_TOTAL.with_label_values(&[error_type]).inc();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exported_text_contains_registered_families() {
        init_metrics();
        ITEM_TRANSITIONS_TOTAL
            .with_label_values(&["ISSUED"])
            .inc();
        let text = get_metrics();
        assert!(text.contains("dispatch_item_transitions_total"));
    }
}
