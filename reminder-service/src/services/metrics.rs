//! Prometheus metrics for reminder-service.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_histogram, register_histogram_vec, CounterVec, Histogram,
    HistogramVec, TextEncoder,
};

/// Reminder outcomes by terminal status (sent, failed, cancelled).
pub static REMINDERS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "reminder_reminders_total",
        "Total number of reminder records finalized, by outcome",
        &["outcome"]
    )
    .expect("Failed to register reminders_total")
});

/// Dispatch sweep duration.
pub static SWEEP_DURATION: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "reminder_sweep_duration_seconds",
        "Dispatch sweep duration in seconds",
        vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]
    )
    .expect("Failed to register sweep_duration")
});

/// Invoices settled during a sweep via partial payments.
pub static INVOICES_SETTLED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "reminder_invoices_settled_total",
        "Invoices transitioned to paid by the dispatch pre-filter",
        &["trigger"]
    )
    .expect("Failed to register invoices_settled_total")
});

/// Late fee milestones written or corrected.
pub static LATE_FEES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "reminder_late_fees_total",
        "Late fee milestones by action (applied, corrected)",
        &["action"]
    )
    .expect("Failed to register late_fees_total")
});

/// Database query duration histogram.
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "reminder_db_query_duration_seconds",
        "Database query duration in seconds",
        &["operation"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]
    )
    .expect("Failed to register db_query_duration")
});

/// Error counter for alerting.
pub static ERRORS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "reminder_errors_total",
        "Total number of errors by type",
        &["error_type"]
    )
    .expect("Failed to register errors_total")
});

/// Initialize all metrics (forces lazy initialization).
pub fn init_metrics() {
    Lazy::force(&REMINDERS_TOTAL);
    Lazy::force(&SWEEP_DURATION);
    Lazy::force(&INVOICES_SETTLED_TOTAL);
    Lazy::force(&LATE_FEES_TOTAL);
    Lazy::force(&DB_QUERY_DURATION);
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
