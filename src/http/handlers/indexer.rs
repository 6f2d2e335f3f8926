//! Indexer family: manifest submission, index reports, index state.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::rejection::BytesRejection;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::Router;

use super::{method_not_allowed, negotiate, AffectedQuery, HandlerResult, StateDoc};
use crate::http::body::encoded;
use crate::http::conditional::{not_modified, Validator};
use crate::http::handlers::matcher::VULNERABILITY_REPORT_PATH;
use crate::http::request::RequestCtx;
use crate::services::Indexer;
use crate::types::{Digest, Manifest};

pub const INDEX_REPORT_PATH: &str = "/indexer/api/v1/index_report";
pub const INDEX_STATE_PATH: &str = "/indexer/api/v1/index_state";
pub const AFFECTED_MANIFEST_PATH: &str = "/indexer/api/v1/internal/affected_manifest/";

const INDEX_REPORT_TYPES: [&str; 2] = ["application/vnd.clair.indexreport.v1+json", "application/json"];
const INDEX_STATE_TYPES: [&str; 2] = ["application/vnd.clair.indexstate.v1+json", "application/json"];
const AFFECTED_TYPES: [&str; 2] = ["application/vnd.clair.affectedmanifests.v1+json", "application/json"];

const REL_INDEX_REPORT: &str = "https://projectquay.io/clair/v1/index_report";
const REL_VULNERABILITY_REPORT: &str = "https://projectquay.io/clair/v1/vulnerability_report";

#[derive(Clone)]
pub struct IndexerState {
    pub indexer: Arc<dyn Indexer>,
}

pub fn routes(indexer: Arc<dyn Indexer>) -> Router {
    Router::new()
        .route(
            INDEX_REPORT_PATH,
            post(create_index_report)
                .delete(delete_index_reports)
                .fallback(method_not_allowed),
        )
        .route(
            &format!("{INDEX_REPORT_PATH}/{{digest}}"),
            get(get_index_report)
                .delete(delete_index_report)
                .fallback(method_not_allowed),
        )
        .route(INDEX_STATE_PATH, get(index_state).fallback(method_not_allowed))
        .route(
            AFFECTED_MANIFEST_PATH,
            post(affected_manifests).fallback(method_not_allowed),
        )
        .with_state(IndexerState { indexer })
}

pub(crate) fn parse_digest(ctx: &RequestCtx, raw: &str) -> Result<Digest, axum::response::Response> {
    raw.parse::<Digest>()
        .map_err(|e| ctx.api_error(StatusCode::BAD_REQUEST, format!("malformed path: {e}")))
}

fn link(headers: &mut HeaderMap, target: &str, rel: &str) {
    if let Ok(v) = HeaderValue::from_str(&format!("<{target}>; rel=\"{rel}\"")) {
        headers.append(header::LINK, v);
    }
}

async fn create_index_report(
    State(st): State<IndexerState>,
    ctx: RequestCtx,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> HandlerResult {
    let state = ctx.call(st.indexer.state()).await?;
    let manifest: Manifest = ctx.decode(body, "manifest")?;
    if !manifest.is_valid() {
        return Err(ctx.api_error(StatusCode::BAD_REQUEST, "bogus manifest"));
    }

    let next = format!("{INDEX_REPORT_PATH}/{}", manifest.hash);
    let mut out = HeaderMap::new();
    link(&mut out, &next, REL_INDEX_REPORT);
    link(
        &mut out,
        &format!("{VULNERABILITY_REPORT_PATH}/{}", manifest.hash),
        REL_VULNERABILITY_REPORT,
    );

    let validator = Validator::new(&state);
    if validator.matches(&headers) {
        let mut resp = StatusCode::PRECONDITION_FAILED.into_response();
        resp.headers_mut().extend(out);
        return Ok(resp);
    }

    let report = ctx.call(st.indexer.index(&manifest)).await?;
    tracing::debug!(request_id = %ctx.request_id, manifest = %manifest.hash, state = %report.state, "index requested");

    validator.apply(&mut out);
    if let Ok(v) = HeaderValue::from_str(&next) {
        out.insert(header::LOCATION, v);
    }
    Ok(encoded(StatusCode::CREATED, "application/json", out, &report))
}

async fn delete_index_reports(
    State(st): State<IndexerState>,
    ctx: RequestCtx,
    body: Result<Bytes, BytesRejection>,
) -> HandlerResult {
    let digests: Vec<Digest> = ctx.decode(body, "bulk delete")?;
    let deleted = ctx.call(st.indexer.delete_manifests(&digests)).await?;
    tracing::debug!(request_id = %ctx.request_id, count = deleted.len(), "manifests deleted");
    Ok(encoded(StatusCode::OK, "application/json", HeaderMap::new(), &deleted))
}

async fn get_index_report(
    State(st): State<IndexerState>,
    ctx: RequestCtx,
    Path(raw): Path<String>,
    headers: HeaderMap,
) -> HandlerResult {
    let digest = parse_digest(&ctx, &raw)?;
    let content_type = negotiate(&ctx, &headers, &INDEX_REPORT_TYPES)?;

    let state = ctx.call(st.indexer.state()).await?;
    let validator = Validator::new(&state);
    if validator.matches(&headers) {
        return Ok(not_modified(&validator));
    }

    let Some(report) = ctx.call(st.indexer.index_report(&digest)).await? else {
        return Err(ctx.api_error(StatusCode::NOT_FOUND, "index report not found"));
    };
    let mut out = HeaderMap::new();
    validator.apply(&mut out);
    Ok(encoded(StatusCode::OK, content_type, out, &report))
}

async fn delete_index_report(
    State(st): State<IndexerState>,
    ctx: RequestCtx,
    Path(raw): Path<String>,
) -> HandlerResult {
    let digest = parse_digest(&ctx, &raw)?;
    ctx.call(st.indexer.delete_manifests(std::slice::from_ref(&digest))).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

async fn index_state(State(st): State<IndexerState>, ctx: RequestCtx, headers: HeaderMap) -> HandlerResult {
    let content_type = negotiate(&ctx, &headers, &INDEX_STATE_TYPES)?;
    let state = ctx.call(st.indexer.state()).await?;
    let validator = Validator::new(&state);
    if validator.matches(&headers) {
        return Ok(not_modified(&validator));
    }
    let mut out = HeaderMap::new();
    validator.apply(&mut out);
    Ok(encoded(StatusCode::OK, content_type, out, &StateDoc(&state)))
}

async fn affected_manifests(
    State(st): State<IndexerState>,
    ctx: RequestCtx,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> HandlerResult {
    let content_type = negotiate(&ctx, &headers, &AFFECTED_TYPES)?;
    let query: AffectedQuery = ctx.decode(body, "vulnerabilities")?;
    let affected = ctx.call(st.indexer.affected_manifests(&query.vulnerabilities)).await?;
    Ok(encoded(StatusCode::OK, content_type, HeaderMap::new(), &affected))
}
