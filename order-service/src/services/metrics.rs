//! Metrics module for order-service.
//! Provides Prometheus metrics for import throughput and order operations.

use once_cell::sync::Lazy;
use prometheus::{
    Encoder, Histogram, HistogramVec, IntCounterVec, TextEncoder, histogram_opts,
    register_histogram, register_histogram_vec, register_int_counter_vec,
};
use std::sync::OnceLock;

/// Database query duration histogram
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        histogram_opts!("orders_db_query_duration_seconds", "Database query duration"),
        &["operation"]
    )
    .expect("Failed to register DB_QUERY_DURATION")
});

/// Import runs counter by terminal status
pub static IMPORTS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Imported rows counter by outcome
pub static IMPORT_ROWS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// End-to-end import duration histogram
pub static IMPORT_DURATION: OnceLock<Histogram> = OnceLock::new();

/// Single-order operations counter
pub static ORDER_OPERATIONS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Initialize all metrics. Call once at startup.
pub fn init_metrics() {
    IMPORTS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            prometheus::opts!(
                "orders_imports_total",
                "Total CSV import runs by terminal status"
            ),
            &["status"]
        )
        .expect("Failed to register IMPORTS_TOTAL")
    });

    IMPORT_ROWS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            prometheus::opts!(
                "orders_import_rows_total",
                "Total imported CSV rows by outcome"
            ),
            &["outcome"]
        )
        .expect("Failed to register IMPORT_ROWS_TOTAL")
    });

    IMPORT_DURATION.get_or_init(|| {
        register_histogram!(histogram_opts!(
            "orders_import_duration_seconds",
            "End-to-end duration of one CSV import",
            vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0]
        ))
        .expect("Failed to register IMPORT_DURATION")
    });

    ORDER_OPERATIONS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            prometheus::opts!(
                "orders_operations_total",
                "Total single-order operations by type"
            ),
            &["operation"]
        )
        .expect("Failed to register ORDER_OPERATIONS_TOTAL")
    });

    // Force initialization of lazy statics
    let _ = &*DB_QUERY_DURATION;
}

/// Get metrics in Prometheus text format.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .expect("Failed to encode metrics");
    String::from_utf8(buffer).expect("Failed to convert metrics to string")
}

/// Record a finished import run.
pub fn record_import(status: &str) {
    if let Some(counter) = IMPORTS_TOTAL.get() {
        counter.with_label_values(&[status]).inc();
    }
}

/// Record imported rows by outcome.
pub fn record_import_rows(outcome: &str, count: u64) {
    if let Some(counter) = IMPORT_ROWS_TOTAL.get() {
        counter.with_label_values(&[outcome]).inc_by(count);
    }
}

/// Record how long an import took.
pub fn observe_import_duration(seconds: f64) {
    if let Some(histogram) = IMPORT_DURATION.get() {
        histogram.observe(seconds);
    }
}

/// Record a single-order operation.
pub fn record_order_operation(operation: &str) {
    if let Some(counter) = ORDER_OPERATIONS_TOTAL.get() {
        counter.with_label_values(&[operation]).inc();
    }
}
