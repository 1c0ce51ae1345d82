//! Metrics collection and exposition.
//!
//! # Metrics
//! - `api_requests_total` (counter): requests by method and status
//! - `api_request_duration_seconds` (histogram): latency distribution
//! - `api_rate_limited_total` (counter): rejections by limiter kind
//! - `api_sessions_created_total` (counter): newly minted sessions
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; without an installed
//!   recorder every call is a no-op
//! - The Prometheus exporter serves its own HTTP listener

use std::net::SocketAddr;
use std::time::Duration;

use ::metrics::Label;
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its scrape endpoint on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "metrics endpoint listening"),
        Err(err) => tracing::error!(address = %addr, error = %err, "failed to install metrics exporter"),
    }
}

pub fn record_request(method: &str, status: u16, elapsed: Duration) {
    let labels = vec![
        Label::new("method", method.to_string()),
        Label::new("status", status.to_string()),
    ];
    ::metrics::counter!("api_requests_total", labels.clone()).increment(1);
    ::metrics::histogram!("api_request_duration_seconds", labels).record(elapsed.as_secs_f64());
}

/// `kind` names the limiter: `ip`, `session` or `url`.
pub fn record_rate_limited(kind: &'static str) {
    ::metrics::counter!("api_rate_limited_total", "kind" => kind).increment(1);
}

pub fn record_session_created() {
    ::metrics::counter!("api_sessions_created_total").increment(1);
}
