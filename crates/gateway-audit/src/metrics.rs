use prometheus::{
    register_histogram_vec, register_int_counter_vec, register_int_gauge_vec, Encoder,
    HistogramVec, IntCounterVec, IntGaugeVec, TextEncoder,
};
use std::sync::LazyLock;

pub static PAYMENT_DECISIONS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "gateway_payment_decisions_total",
        "Payment decisions by outcome branch",
        &["branch"]
    )
    .unwrap()
});

pub static ADMISSION_DENIALS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "gateway_admission_denials_total",
        "Rate-limiter admission denials",
        &["tier"]
    )
    .unwrap()
});

pub static CIRCUIT_STATE: LazyLock<IntGaugeVec> = LazyLock::new(|| {
    register_int_gauge_vec!(
        "gateway_circuit_state",
        "Circuit breaker state per provider/model (0=closed,1=half_open,2=open)",
        &["provider", "model"]
    )
    .unwrap()
});

pub static SETTLEMENT_LATENCY: LazyLock<HistogramVec> = LazyLock::new(|| {
    register_histogram_vec!(
        "gateway_settlement_duration_seconds",
        "Settlement oracle round-trip latency",
        &["result"],
        vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]
    )
    .unwrap()
});

pub static RECONCILIATION_DIVERGENCES: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "gateway_reconciliation_divergences_total",
        "Balance divergences corrected during reconciliation",
        &["account_kind"]
    )
    .unwrap()
});

pub fn metrics_output() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if encoder.encode(&metric_families, &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
