//! Per-route request accounting.
//!
//! Installed with `route_layer`, so the matched route template is known and
//! unmatched paths are not counted.

use std::time::Instant;

use axum::{
    extract::{MatchedPath, Request},
    middleware::Next,
    response::Response,
};

use crate::observability::metrics::{self, InFlight};

pub async fn instrument(req: Request, next: Next) -> Response {
    let start = Instant::now();
    let handler = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let request_id = req
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
        .to_string();

    let _in_flight = InFlight::start(&handler);
    let resp = next.run(req).await;
    let status = resp.status().as_u16();

    metrics::record_request(&handler, method.as_str(), status, start);
    tracing::info!(
        request_id = %request_id,
        method = %method,
        path = %path,
        handler = %handler,
        status,
        duration_ms = start.elapsed().as_millis() as u64,
        "handled HTTP request"
    );
    resp
}
