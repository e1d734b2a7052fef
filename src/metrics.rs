//! Spend and budget metrics for Prometheus.

use once_cell::sync::Lazy;
use prometheus::{
    register_int_counter, register_int_counter_vec, IntCounter, IntCounterVec,
};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

/// Counter for recorded spend, in cents, labeled by API and tier
static SPEND_RECORDED_CENTS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "tierce_spend_recorded_cents_total",
        "Total spend recorded against budget ledgers (in cents)",
        &["api_name", "tier"]
    )
    .expect("Failed to register tierce_spend_recorded_cents_total metric")
});

/// Counter for usage records successfully appended
static USAGE_RECORDS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "tierce_usage_records_total",
        "Total usage records appended",
        &["api_name", "tier"]
    )
    .expect("Failed to register tierce_usage_records_total metric")
});

/// Counter for usage-record appends that failed after the spend was applied
static RECORD_ERRORS: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "tierce_record_errors_total",
        "Total usage record write failures after spend was applied"
    )
    .expect("Failed to register tierce_record_errors_total metric")
});

/// Counter for requests observed with spend at or above the configured budget
static CEILING_CROSSED: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "tierce_budget_ceiling_crossed_total",
        "Times a recorded spend left the ledger above its configured budget",
        &["api_name"]
    )
    .expect("Failed to register tierce_budget_ceiling_crossed_total metric")
});

/// Record a successful spend application.
///
/// The amount is converted to whole cents for the counter; sub-cent costs
/// accumulate rounding per call, which is acceptable for an operational
/// counter (the ledger itself keeps exact decimals).
pub fn record_spend(api_name: &str, tier: &str, amount: Decimal) {
    let cents = (amount * Decimal::from(100))
        .round()
        .to_i64()
        .unwrap_or(0)
        .max(0);
    SPEND_RECORDED_CENTS
        .with_label_values(&[api_name, tier])
        .inc_by(cents as u64);
}

/// Record a successfully appended usage record.
pub fn record_usage_appended(api_name: &str, tier: &str) {
    USAGE_RECORDS.with_label_values(&[api_name, tier]).inc();
}

/// Record a usage-record append failure.
pub fn record_append_error() {
    RECORD_ERRORS.inc();
}

/// Record that a ledger is over its configured budget after a spend.
pub fn record_ceiling_crossed(api_name: &str) {
    CEILING_CROSSED.with_label_values(&[api_name]).inc();
}
