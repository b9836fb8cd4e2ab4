//! Mesh metrics.
//!
//! # Metrics
//! - `mesh_requests_total` (counter): dispatched requests by service, outcome
//! - `mesh_request_duration_seconds` (histogram): dispatch latency
//! - `mesh_inflight_requests` (gauge): requests awaiting a response
//! - `mesh_load_shed_total` (counter): dispatches rejected by admission
//! - `mesh_handshake_failures_total` (counter): handshake timeouts by step
//! - `mesh_routes` (gauge): routes known to the coordinator
//!
//! Recording is a no-op until the host installs a `metrics` recorder.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

static ENABLED: AtomicBool = AtomicBool::new(true);

/// Turn recording on or off process-wide.
pub fn set_enabled(enabled: bool) {
    ENABLED.store(enabled, Ordering::Relaxed);
}

fn enabled() -> bool {
    ENABLED.load(Ordering::Relaxed)
}

pub fn record_request(service: &str, outcome: &'static str, elapsed: Duration) {
    if !enabled() {
        return;
    }
    ::metrics::counter!("mesh_requests_total", "service" => service.to_string(), "outcome" => outcome)
        .increment(1);
    ::metrics::histogram!("mesh_request_duration_seconds", "service" => service.to_string())
        .record(elapsed.as_secs_f64());
}

pub fn record_load_shed(service: &str) {
    if !enabled() {
        return;
    }
    ::metrics::counter!("mesh_load_shed_total", "service" => service.to_string()).increment(1);
}

pub fn record_handshake_failure(step: &'static str) {
    if !enabled() {
        return;
    }
    ::metrics::counter!("mesh_handshake_failures_total", "step" => step).increment(1);
}

pub fn record_routes(count: usize) {
    if !enabled() {
        return;
    }
    ::metrics::gauge!("mesh_routes").set(count as f64);
}

/// Tracks one outgoing request in `mesh_inflight_requests` until dropped.
#[derive(Debug)]
pub struct InflightGauge {
    recorded: bool,
}

impl InflightGauge {
    pub fn start() -> Self {
        let recorded = enabled();
        if recorded {
            ::metrics::gauge!("mesh_inflight_requests").increment(1.0);
        }
        Self { recorded }
    }
}

impl Drop for InflightGauge {
    fn drop(&mut self) {
        if self.recorded {
            ::metrics::gauge!("mesh_inflight_requests").decrement(1.0);
        }
    }
}
