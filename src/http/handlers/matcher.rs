//! Matcher family: vulnerability reports and update bookkeeping.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::rejection::QueryRejection;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{delete, get};
use axum::Router;
use serde::Deserialize;
use uuid::Uuid;

use super::indexer::parse_digest;
use super::{method_not_allowed, HandlerResult};
use crate::http::body::encoded;
use crate::http::conditional::{not_modified, Validator};
use crate::http::request::RequestCtx;
use crate::services::{Indexer, Matcher};
use crate::types::UpdateKind;

pub const VULNERABILITY_REPORT_PATH: &str = "/matcher/api/v1/vulnerability_report";
pub const UPDATE_OPERATION_PATH: &str = "/matcher/api/v1/internal/update_operation";
pub const UPDATE_DIFF_PATH: &str = "/matcher/api/v1/internal/update_diff";

#[derive(Clone)]
pub struct MatcherState {
    pub matcher: Arc<dyn Matcher>,
    pub indexer: Arc<dyn Indexer>,
    pub cache_age: Duration,
}

pub fn routes(state: MatcherState) -> Router {
    Router::new()
        .route(
            &format!("{VULNERABILITY_REPORT_PATH}/{{digest}}"),
            get(vulnerability_report).fallback(method_not_allowed),
        )
        .route(
            UPDATE_OPERATION_PATH,
            get(update_operations).fallback(method_not_allowed),
        )
        .route(
            &format!("{UPDATE_OPERATION_PATH}/{{reference}}"),
            delete(delete_update_operation).fallback(method_not_allowed),
        )
        .route(UPDATE_DIFF_PATH, get(update_diff).fallback(method_not_allowed))
        .with_state(state)
}

async fn vulnerability_report(
    State(st): State<MatcherState>,
    ctx: RequestCtx,
    Path(raw): Path<String>,
    headers: HeaderMap,
) -> HandlerResult {
    let digest = parse_digest(&ctx, &raw)?;
    if !ctx.call(st.matcher.initialized()).await? {
        return Ok(StatusCode::ACCEPTED.into_response());
    }

    // The report moves with the index state and with either kind of update.
    let index_state = ctx.call(st.indexer.state()).await?;
    let vulns = ctx
        .call(st.matcher.latest_update_operation(UpdateKind::Vulnerability))
        .await?
        .unwrap_or_default();
    let enrichments = ctx
        .call(st.matcher.latest_update_operation(UpdateKind::Enrichment))
        .await?
        .unwrap_or_default();
    let validator = Validator::new(&format!("{index_state}.{vulns}.{enrichments}"));
    if validator.matches(&headers) {
        return Ok(not_modified(&validator));
    }

    let report = match ctx.call(st.indexer.index_report(&digest)).await? {
        Some(r) if r.is_finished() => r,
        _ => return Err(ctx.api_error(StatusCode::NOT_FOUND, "index report not found")),
    };
    let scanned = ctx.call(st.matcher.scan(&report)).await?;

    let mut out = HeaderMap::new();
    validator.apply(&mut out);
    if let Ok(v) = HeaderValue::from_str(&format!("max-age={}", st.cache_age.as_secs())) {
        out.insert(header::CACHE_CONTROL, v);
    }
    Ok(encoded(StatusCode::OK, "application/json", out, &scanned))
}

#[derive(Debug, Default, Deserialize)]
struct UpdateOperationParams {
    #[serde(default)]
    kind: String,
    #[serde(default)]
    latest: String,
}

fn parse_bool(s: &str) -> Option<bool> {
    match s {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Some(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => Some(false),
        _ => None,
    }
}

async fn update_operations(
    State(st): State<MatcherState>,
    ctx: RequestCtx,
    headers: HeaderMap,
    params: Result<Query<UpdateOperationParams>, QueryRejection>,
) -> HandlerResult {
    let Query(params) = params.map_err(|e| ctx.api_error(StatusCode::BAD_REQUEST, e.body_text()))?;
    let kind = match params.kind.as_str() {
        "" => UpdateKind::Vulnerability,
        k => k
            .parse::<UpdateKind>()
            .map_err(|_| ctx.api_error(StatusCode::BAD_REQUEST, format!("unknown kind: {k:?}")))?,
    };

    let mut out = HeaderMap::new();
    // The validator is an optimization; failing to compute one is not fatal.
    match st.matcher.latest_update_operation(kind).await {
        Ok(Some(reference)) => {
            let validator = Validator::new(&reference.to_string());
            if validator.matches(&headers) {
                return Ok(not_modified(&validator));
            }
            validator.apply(&mut out);
        }
        Ok(None) => {}
        Err(e) => tracing::debug!(request_id = %ctx.request_id, error = %e, "no update operation validator"),
    }

    let ops = if parse_bool(&params.latest).unwrap_or(false) {
        ctx.call(st.matcher.latest_update_operations(kind)).await?
    } else {
        ctx.call(st.matcher.update_operations(kind)).await?
    };
    Ok(encoded(StatusCode::OK, "application/json", out, &ops))
}

async fn delete_update_operation(
    State(st): State<MatcherState>,
    ctx: RequestCtx,
    Path(raw): Path<String>,
) -> HandlerResult {
    let reference = raw
        .parse::<Uuid>()
        .map_err(|e| ctx.api_error(StatusCode::BAD_REQUEST, format!("could not parse update operation reference: {e}")))?;
    let removed = ctx.call(st.matcher.delete_update_operations(&[reference])).await?;
    tracing::debug!(request_id = %ctx.request_id, %reference, removed, "update operations deleted");
    Ok(StatusCode::OK.into_response())
}

#[derive(Debug, Default, Deserialize)]
struct UpdateDiffParams {
    #[serde(default)]
    prev: String,
    #[serde(default)]
    cur: String,
}

async fn update_diff(
    State(st): State<MatcherState>,
    ctx: RequestCtx,
    params: Result<Query<UpdateDiffParams>, QueryRejection>,
) -> HandlerResult {
    let Query(params) = params.map_err(|e| ctx.api_error(StatusCode::BAD_REQUEST, e.body_text()))?;
    let prev = match params.prev.as_str() {
        "" => None,
        p => Some(
            p.parse::<Uuid>()
                .map_err(|e| ctx.api_error(StatusCode::BAD_REQUEST, format!("could not parse \"prev\": {e}")))?,
        ),
    };
    if params.cur.is_empty() {
        return Err(ctx.api_error(StatusCode::BAD_REQUEST, "missing \"cur\" parameter"));
    }
    let cur = params
        .cur
        .parse::<Uuid>()
        .map_err(|e| ctx.api_error(StatusCode::BAD_REQUEST, format!("could not parse \"cur\": {e}")))?;

    let diff = ctx.call(st.matcher.update_diff(prev, cur)).await?;
    Ok(encoded(StatusCode::OK, "application/json", HeaderMap::new(), &diff))
}
