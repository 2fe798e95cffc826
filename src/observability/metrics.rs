//! Metrics collection and exposition.
//!
//! # Metrics
//! - `proxy_requests_total` (counter): requests by route, status, backend
//! - `proxy_request_duration_seconds` (histogram): time to response headers
//! - `proxy_quota_decisions_total` (counter): admitted, idempotent, exempt, rejected, fail_open
//! - `proxy_affinity_lookups_total` (counter): hit, miss
//! - `proxy_affinity_evictions_total` (counter)
//! - `proxy_artifacts_rewritten_total` (counter): by backend
//! - `proxy_stream_frames_passthrough_total` (counter): malformed, oversized
//! - `proxy_active_streams` (gauge)
//! - `proxy_sweep_removed_total` (counter): by table
//!
//! Recording is a no-op until a recorder is installed, so library code and
//! tests call these freely.

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its scrape listener.
pub fn init_metrics(addr: SocketAddr) {
    let builder = PrometheusBuilder::new().with_http_listener(addr);
    match builder.install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(route: &str, status: u16, backend: &str, start: Instant) {
    let labels = [
        ("route", route.to_string()),
        ("status", status.to_string()),
        ("backend", backend.to_string()),
    ];
    counter!("proxy_requests_total", &labels).increment(1);
    histogram!("proxy_request_duration_seconds", "route" => route.to_string())
        .record(start.elapsed().as_secs_f64());
}

pub fn record_quota_decision(outcome: &'static str) {
    counter!("proxy_quota_decisions_total", "outcome" => outcome).increment(1);
}

pub fn record_affinity_lookup(hit: bool) {
    let result = if hit { "hit" } else { "miss" };
    counter!("proxy_affinity_lookups_total", "result" => result).increment(1);
}

pub fn record_affinity_eviction() {
    counter!("proxy_affinity_evictions_total").increment(1);
}

pub fn record_artifacts_rewritten(backend: &str, count: usize) {
    counter!("proxy_artifacts_rewritten_total", "backend" => backend.to_string())
        .increment(count as u64);
}

pub fn record_frame_passthrough(reason: &'static str) {
    counter!("proxy_stream_frames_passthrough_total", "reason" => reason).increment(1);
}

pub fn stream_opened() {
    gauge!("proxy_active_streams").increment(1.0);
}

pub fn stream_closed() {
    gauge!("proxy_active_streams").decrement(1.0);
}

pub fn record_sweep(table: &'static str, removed: usize) {
    if removed > 0 {
        counter!("proxy_sweep_removed_total", "table" => table).increment(removed as u64);
    }
}
