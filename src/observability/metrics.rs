//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define mesh metrics (call counts, latency, downstream outcomes)
//! - Expose Prometheus-compatible metrics endpoint
//!
//! # Metrics
//! - `mesh_rpc_requests_total` (counter): inbound RPC calls by method, code
//! - `mesh_rpc_request_duration_seconds` (histogram): inbound RPC latency by method
//! - `mesh_http_requests_total` (counter): gateway requests by method, status
//! - `mesh_http_request_duration_seconds` (histogram): gateway latency by method
//! - `mesh_downstream_calls_total` (counter): outbound calls by target, method, code
//! - `mesh_downstream_call_duration_seconds` (histogram): outbound latency by target
//!
//! # Design Decisions
//! - Recording is a no-op until a recorder is installed, so tests need no setup
//! - Labels stay low-cardinality: method names and codes, never ids or emails

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::rpc::status::Code;

/// Install the Prometheus recorder and its scrape listener on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint started"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_rpc_request(method: &str, code: Code, start: Instant) {
    let method = method.to_string();
    counter!(
        "mesh_rpc_requests_total",
        "method" => method.clone(),
        "code" => code.as_str()
    )
    .increment(1);
    histogram!("mesh_rpc_request_duration_seconds", "method" => method)
        .record(start.elapsed().as_secs_f64());
}

pub fn record_http_request(method: &str, status: u16, start: Instant) {
    let method = method.to_string();
    counter!(
        "mesh_http_requests_total",
        "method" => method.clone(),
        "status" => status.to_string()
    )
    .increment(1);
    histogram!("mesh_http_request_duration_seconds", "method" => method)
        .record(start.elapsed().as_secs_f64());
}

pub fn record_downstream_call(target: &str, method: &str, code: Code, start: Instant) {
    let target = target.to_string();
    counter!(
        "mesh_downstream_calls_total",
        "target" => target.clone(),
        "method" => method.to_string(),
        "code" => code.as_str()
    )
    .increment(1);
    histogram!("mesh_downstream_call_duration_seconds", "target" => target)
        .record(start.elapsed().as_secs_f64());
}
