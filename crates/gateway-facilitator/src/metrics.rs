use prometheus::{register_histogram_vec, register_int_counter_vec, Encoder, HistogramVec, IntCounterVec, TextEncoder};
use std::sync::LazyLock;

pub static ORACLE_QUERIES: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!("gateway_facilitator_oracle_queries_total", "Settlement oracle queries by outcome", &["outcome"]).unwrap()
});

pub static ORACLE_LATENCY: LazyLock<HistogramVec> = LazyLock::new(|| {
    register_histogram_vec!(
        "gateway_facilitator_oracle_duration_seconds",
        "Settlement oracle round-trip latency",
        &["outcome"],
        vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]
    )
    .unwrap()
});

pub static HMAC_FAILURES: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!("gateway_facilitator_hmac_failures_total", "HMAC authentication failures", &["reason"]).unwrap()
});

pub static WEBHOOKS_FIRED: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!("gateway_facilitator_webhooks_fired_total", "Settlement webhooks dispatched", &["event"]).unwrap()
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
