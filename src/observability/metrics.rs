//! Metrics collection and exposition.
//!
//! # Metrics
//! - `guard_requests_total` (counter): requests by method, status
//! - `guard_request_duration_seconds` (histogram): latency distribution
//! - `guard_rate_limited_total` (counter): rejections by scope
//! - `guard_csrf_failures_total` (counter): CSRF rejections by reason
//! - `security_events_total` (counter): logged events by type
//! - `security_events_dropped_total` (counter): malformed/failed events by reason
//! - `csp_reports_total` (counter): violation reports by outcome
//! - `guard_rate_limit_keys` (gauge): tracked rate limit keys
//! - `csp_manifest_hashes` (gauge): style hashes in the active policy
//!
//! # Design Decisions
//! - Recording is a no-op until an exporter is installed
//! - Labels are static strings to keep cardinality bounded

use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::Instant;

/// Install the Prometheus exporter listening on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(method: &str, status: u16, start: Instant) {
    ::metrics::counter!(
        "guard_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    ::metrics::histogram!("guard_request_duration_seconds", "method" => method.to_string())
        .record(start.elapsed().as_secs_f64());
}

pub fn record_rate_limited(scope: &'static str) {
    ::metrics::counter!("guard_rate_limited_total", "scope" => scope).increment(1);
}

pub fn record_csrf_failure(reason: &'static str) {
    ::metrics::counter!("guard_csrf_failures_total", "reason" => reason).increment(1);
}

pub fn record_security_event(kind: &'static str) {
    ::metrics::counter!("security_events_total", "type" => kind).increment(1);
}

pub fn record_dropped_event(reason: &'static str) {
    ::metrics::counter!("security_events_dropped_total", "reason" => reason).increment(1);
}

pub fn record_csp_report(outcome: &'static str) {
    ::metrics::counter!("csp_reports_total", "outcome" => outcome).increment(1);
}

pub fn record_rate_limit_keys(keys: usize) {
    ::metrics::gauge!("guard_rate_limit_keys").set(keys as f64);
}

pub fn record_manifest_hashes(hashes: usize) {
    ::metrics::gauge!("csp_manifest_hashes").set(hashes as f64);
}
