//! Metrics collection and exposition.
//!
//! # Metrics
//! - `guard_requests_total` (counter): pipeline decisions by outcome
//! - `guard_rate_limited_total` (counter): denials by policy
//! - `guard_security_events_total` (counter): events by type and severity
//! - `guard_ssrf_blocked_total` (counter): URL rejections by reason
//! - `guard_throttle_delay_ms` (histogram): injected latency
//! - `guard_suspicious_clients` (gauge): size of the suspicious set
//!
//! Recording is a no-op until a recorder is installed, so library users and
//! tests that never call [`init_metrics`] pay nothing.

use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::Duration;

use crate::error::{GuardError, GuardResult};

/// Install the Prometheus exporter listening on `addr`.
pub fn init_metrics(addr: SocketAddr) -> GuardResult<()> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| GuardError::Metrics(e.to_string()))?;
    tracing::info!(address = %addr, "Metrics exporter listening");
    Ok(())
}

pub fn record_decision(outcome: &'static str) {
    metrics::counter!("guard_requests_total", "decision" => outcome).increment(1);
}

pub fn record_rate_limited(policy: &'static str) {
    metrics::counter!("guard_rate_limited_total", "policy" => policy).increment(1);
}

pub fn record_security_event(event_type: &str, severity: &'static str) {
    metrics::counter!(
        "guard_security_events_total",
        "event_type" => event_type.to_string(),
        "severity" => severity
    )
    .increment(1);
}

pub fn record_ssrf_blocked(reason: &'static str) {
    metrics::counter!("guard_ssrf_blocked_total", "reason" => reason).increment(1);
}

pub fn record_throttle_delay(delay: Duration) {
    metrics::histogram!("guard_throttle_delay_ms").record(delay.as_millis() as f64);
}

pub fn record_suspicious_clients(count: usize) {
    metrics::gauge!("guard_suspicious_clients").set(count as f64);
}
