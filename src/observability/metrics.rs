//! Metrics collection and exposition.
//!
//! # Metrics
//! - `gateway_unary_requests_total` (counter): unary calls by service, status
//! - `gateway_unary_request_duration_seconds` (histogram): unary latency by service
//! - `gateway_pass_through_total` (counter): pass-through requests by service, status
//! - `gateway_pass_through_duration_seconds` (histogram): pass-through latency by service
//! - `gateway_tunnels_active` (gauge): tunnels not yet torn down
//! - `gateway_tunnels_total` (counter): tunnel attempts by outcome
//! - `gateway_tunnel_frames_total` (counter): relayed frames by direction
//!
//! Without an installed recorder every call here is a no-op.

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::tunnel::Direction;

/// Install the Prometheus recorder and its HTTP scrape listener.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics exporter listening");
    Ok(())
}

pub fn record_unary(service: &str, status: u16, start: Instant) {
    counter!(
        "gateway_unary_requests_total",
        "service" => service.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    histogram!("gateway_unary_request_duration_seconds", "service" => service.to_string())
        .record(start.elapsed().as_secs_f64());
}

pub fn record_pass_through(service: &str, status: u16, start: Instant) {
    counter!(
        "gateway_pass_through_total",
        "service" => service.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    histogram!("gateway_pass_through_duration_seconds", "service" => service.to_string())
        .record(start.elapsed().as_secs_f64());
}

/// How a tunnel attempt ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelOutcome {
    Established,
    DialFailed,
    HandshakeFailed,
    RejectedOrigin,
}

impl TunnelOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            TunnelOutcome::Established => "established",
            TunnelOutcome::DialFailed => "dial_failed",
            TunnelOutcome::HandshakeFailed => "handshake_failed",
            TunnelOutcome::RejectedOrigin => "rejected_origin",
        }
    }
}

pub fn record_tunnel_outcome(outcome: TunnelOutcome) {
    counter!("gateway_tunnels_total", "outcome" => outcome.as_str()).increment(1);
}

pub fn tunnel_opened() {
    gauge!("gateway_tunnels_active").increment(1.0);
}

pub fn tunnel_closed() {
    gauge!("gateway_tunnels_active").decrement(1.0);
}

pub fn record_tunnel_frame(direction: Direction) {
    counter!("gateway_tunnel_frames_total", "direction" => direction.as_str()).increment(1);
}
