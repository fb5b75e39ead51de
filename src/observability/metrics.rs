//! Metrics collection and exposition.
//!
//! # Metrics
//! - `relay_active_connections` (gauge): registered client connections
//! - `relay_messages_received_total` (counter): messages read from upstream
//! - `relay_messages_broadcast_total` (counter): per-client enqueues
//! - `relay_send_failures_total` (counter): failed enqueues by reason
//! - `relay_upstream_reconnects_total` (counter): successful reconnects
//! - `relay_upstream_errors_total` (counter): upstream errors by kind

use std::net::SocketAddr;

use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus exporter with its own HTTP listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_active_connections(count: usize) {
    gauge!("relay_active_connections").set(count as f64);
}

pub fn record_message_received() {
    counter!("relay_messages_received_total").increment(1);
}

pub fn record_broadcast(delivered: usize) {
    counter!("relay_messages_broadcast_total").increment(delivered as u64);
}

pub fn record_send_failure(reason: &'static str) {
    counter!("relay_send_failures_total", "reason" => reason).increment(1);
}

pub fn record_upstream_reconnect() {
    counter!("relay_upstream_reconnects_total").increment(1);
}

pub fn record_upstream_error(kind: &'static str) {
    counter!("relay_upstream_errors_total", "kind" => kind).increment(1);
}
