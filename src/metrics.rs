//! Prometheus metrics for the proxy
//!
//! Exposed in text format on `GET /metrics`.

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, Encoder, HistogramVec, TextEncoder,
};

lazy_static! {
    /// Counter: pagination cache decisions (hit/fetch/exhausted)
    pub static ref CACHE_OPERATIONS: CounterVec = register_counter_vec!(
        "tonproxy_cache_operations_total",
        "Pagination cache operations by type",
        &["operation"]
    )
    .expect("Failed to create cache_operations metric");

    /// Counter: upstream event fetches by outcome
    pub static ref UPSTREAM_FETCHES: CounterVec = register_counter_vec!(
        "tonproxy_upstream_fetches_total",
        "Upstream event fetches by outcome",
        &["outcome"]
    )
    .expect("Failed to create upstream_fetches metric");

    /// Histogram: upstream fetch duration (seconds)
    pub static ref FETCH_DURATION: HistogramVec = register_histogram_vec!(
        "tonproxy_upstream_fetch_duration_seconds",
        "Duration of upstream event fetches",
        &["kind"],
        vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]
    )
    .expect("Failed to create fetch_duration metric");

    /// Counter: HTTP requests by route and status
    pub static ref HTTP_REQUESTS: CounterVec = register_counter_vec!(
        "tonproxy_http_requests_total",
        "HTTP requests by route and status",
        &["route", "status"]
    )
    .expect("Failed to create http_requests metric");
}

/// Page served entirely from cache
pub fn record_cache_hit() {
    CACHE_OPERATIONS.with_label_values(&["hit"]).inc();
}

/// Page required an upstream fetch
pub fn record_cache_fetch() {
    CACHE_OPERATIONS.with_label_values(&["fetch"]).inc();
}

/// Page requested beyond a complete record
pub fn record_cache_exhausted() {
    CACHE_OPERATIONS.with_label_values(&["exhausted"]).inc();
}

/// Record the outcome of one upstream fetch (`ok`, `rate_limited`, `error`)
pub fn record_upstream_fetch(outcome: &str) {
    UPSTREAM_FETCHES.with_label_values(&[outcome]).inc();
}

/// Record an upstream fetch duration; `kind` is `initial` or `extend`
pub fn record_fetch_duration(kind: &str, duration_secs: f64) {
    FETCH_DURATION
        .with_label_values(&[kind])
        .observe(duration_secs);
}

pub fn record_http_request(route: &str, status: u16) {
    HTTP_REQUESTS
        .with_label_values(&[route, &status.to_string()])
        .inc();
}

/// Encode all metrics as Prometheus text format
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::warn!(error = %e, "Failed to encode metrics");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        record_cache_hit();
        record_cache_fetch();
        record_cache_exhausted();
        record_upstream_fetch("ok");
        record_fetch_duration("initial", 0.2);
        record_http_request("/api/v1/ton/getTransactions", 200);
    }

    #[test]
    fn test_encode_metrics() {
        record_cache_hit();
        record_upstream_fetch("rate_limited");

        let output = encode_metrics();
        assert!(output.contains("tonproxy_cache_operations_total"));
        assert!(output.contains("tonproxy_upstream_fetches_total"));
    }
}
