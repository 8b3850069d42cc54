//! Prometheus metrics for receivables-service.

use once_cell::sync::Lazy;
use prometheus::{register_counter_vec, CounterVec, TextEncoder};

/// Invoice counter by lifecycle event.
pub static INVOICES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "receivables_invoices_total",
        "Total number of invoice lifecycle events",
        &["event"] // created, sent, voided
    )
    .expect("Failed to register invoices_total")
});

/// Payment counter by method.
pub static PAYMENTS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "receivables_payments_total",
        "Total number of payments by method",
        &["method"]
    )
    .expect("Failed to register payments_total")
});

/// Credit note counter by lifecycle event.
pub static CREDIT_NOTES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "receivables_credit_notes_total",
        "Total number of credit note lifecycle events",
        &["event"] // created, approved, applied, refunded, voided
    )
    .expect("Failed to register credit_notes_total")
});

/// Arrangement counter by lifecycle event.
pub static ARRANGEMENTS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "receivables_arrangements_total",
        "Total number of arrangement lifecycle events",
        &["event"] // created, activated, completed, cancelled, defaulted
    )
    .expect("Failed to register arrangements_total")
});

/// Initialize all metrics (forces lazy initialization).
pub fn init_metrics() {
    Lazy::force(&INVOICES_TOTAL);
    Lazy::force(&PAYMENTS_TOTAL);
    Lazy::force(&CREDIT_NOTES_TOTAL);
    Lazy::force(&ARRANGEMENTS_TOTAL);
}

/// Get metrics in Prometheus text format.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder
        .encode_to_string(&metric_families)
        .unwrap_or_default()
}
