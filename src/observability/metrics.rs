//! Metrics collection and exposition.
//!
//! # Metrics
//! - `scanwire_http_requests_total` (counter): requests by handler, method, code
//! - `scanwire_http_request_duration_seconds` (histogram): latency by handler, method
//! - `scanwire_http_in_flight_requests` (gauge): requests currently being served
//! - `scanwire_http_rejected_requests_total` (counter): 429s from the concurrency limiter
//! - `scanwire_codec_pool_misses_total` (counter): pool checkouts that allocated

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus exporter with its own HTTP listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "failed to install metrics exporter"),
    }
}

/// Record one finished request.
pub fn record_request(handler: &str, method: &str, status: u16, start: Instant) {
    counter!(
        "scanwire_http_requests_total",
        "handler" => handler.to_string(),
        "method" => method.to_string(),
        "code" => status.to_string()
    )
    .increment(1);
    histogram!(
        "scanwire_http_request_duration_seconds",
        "handler" => handler.to_string(),
        "method" => method.to_string()
    )
    .record(start.elapsed().as_secs_f64());
}

/// A request refused by the concurrency limiter.
pub fn record_rejected(endpoint: &'static str) {
    counter!("scanwire_http_rejected_requests_total", "endpoint" => endpoint).increment(1);
}

pub fn record_pool_miss(pool: &'static str) {
    counter!("scanwire_codec_pool_misses_total", "pool" => pool).increment(1);
}

/// Gauge that counts a request as in flight until dropped.
pub struct InFlight {
    handler: String,
}

impl InFlight {
    pub fn start(handler: &str) -> Self {
        gauge!("scanwire_http_in_flight_requests", "handler" => handler.to_string()).increment(1.0);
        Self {
            handler: handler.to_string(),
        }
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        gauge!("scanwire_http_in_flight_requests", "handler" => self.handler.clone()).decrement(1.0);
    }
}
