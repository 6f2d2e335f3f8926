//! Serves the embedded OpenAPI document.

use std::sync::OnceLock;

use axum::body::{Body, Bytes};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::Response;
use axum::routing::get;
use axum::Router;

use super::{method_not_allowed, negotiate, HandlerResult};
use crate::http::conditional::{not_modified, Validator};
use crate::http::request::RequestCtx;

pub const OPENAPI_PATH: &str = "/openapi/v1";

const OPENAPI_TYPES: [&str; 3] = [
    "application/openapi+json",
    "application/json",
    "application/vnd.oai.openapi+json",
];

static OPENAPI_JSON: &str = include_str!("openapi.json");

/// The document with insignificant whitespace removed.
fn compact() -> Bytes {
    static COMPACT: OnceLock<Bytes> = OnceLock::new();
    COMPACT
        .get_or_init(|| {
            serde_json::from_str::<serde_json::Value>(OPENAPI_JSON)
                .and_then(|v| serde_json::to_vec(&v))
                .map(Bytes::from)
                .unwrap_or_else(|e| {
                    tracing::warn!(error = %e, "embedded OpenAPI document is not valid JSON");
                    Bytes::from_static(OPENAPI_JSON.as_bytes())
                })
        })
        .clone()
}

fn validator() -> Validator {
    Validator::new(env!("CARGO_PKG_VERSION"))
}

pub fn routes() -> Router {
    Router::new().route(OPENAPI_PATH, get(openapi).fallback(method_not_allowed))
}

async fn openapi(ctx: RequestCtx, headers: HeaderMap) -> HandlerResult {
    let content_type = negotiate(&ctx, &headers, &OPENAPI_TYPES)?;
    let validator = validator();
    if validator.matches(&headers) {
        return Ok(not_modified(&validator));
    }

    let mut resp = Response::new(Body::from(compact()));
    *resp.status_mut() = StatusCode::OK;
    resp.headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    validator.apply(resp.headers_mut());
    Ok(resp)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_compacts() {
        let doc = compact();
        assert!(!doc.contains(&b'\n'));
        let v: serde_json::Value = serde_json::from_slice(&doc).unwrap();
        assert!(v["paths"].get("/indexer/api/v1/index_report").is_some());
    }
}
