//! Notifier family: paged notifications and webhook signing keys.

use std::sync::Arc;

use axum::extract::rejection::QueryRejection;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use serde::Deserialize;
use uuid::Uuid;

use super::{method_not_allowed, negotiate, HandlerResult, KeySet, NotificationPage};
use crate::http::body::encoded;
use crate::http::request::RequestCtx;
use crate::services::{KeyStore, Notifier};
use crate::types::Page;

pub const NOTIFICATION_PATH: &str = "/notifier/api/v1/notification";
pub const KEYS_PATH: &str = "/notifier/api/v1/services/notifier/keys";

pub const DEFAULT_PAGE_SIZE: u64 = 500;

const NOTIFICATION_TYPES: [&str; 2] = ["application/vnd.clair.notification.v1+json", "application/json"];
const JWK_SET: &str = "application/jwk-set+json";
const JWK: &str = "application/jwk+json";

#[derive(Clone)]
pub struct NotifierState {
    pub notifier: Arc<dyn Notifier>,
}

#[derive(Clone)]
pub struct KeysState {
    pub keys: Arc<dyn KeyStore>,
}

pub fn routes(notifier: Arc<dyn Notifier>, keys: Option<Arc<dyn KeyStore>>) -> Router {
    let router = Router::new()
        .route(
            &format!("{NOTIFICATION_PATH}/{{id}}"),
            get(get_notifications)
                .delete(delete_notifications)
                .fallback(method_not_allowed),
        )
        .with_state(NotifierState { notifier });

    match keys {
        Some(keys) => router.merge(
            Router::new()
                .route(KEYS_PATH, get(list_keys).fallback(method_not_allowed))
                .route(
                    &format!("{KEYS_PATH}/{{id}}"),
                    get(key_by_id).fallback(method_not_allowed),
                )
                .with_state(KeysState { keys }),
        ),
        None => router,
    }
}

fn parse_id(ctx: &RequestCtx, raw: &str, what: &str) -> Result<Uuid, axum::response::Response> {
    raw.parse::<Uuid>()
        .map_err(|e| ctx.api_error(StatusCode::BAD_REQUEST, format!("could not parse {what}: {e}")))
}

#[derive(Debug, Default, Deserialize)]
struct PageParams {
    #[serde(default)]
    page_size: String,
    #[serde(default)]
    next: String,
}

impl PageParams {
    fn page(&self) -> Result<Page, String> {
        let size = match self.page_size.as_str() {
            "" => 0,
            s => s
                .parse::<u64>()
                .map_err(|_| "could not parse \"page_size\" query param into integer".to_string())?,
        };
        let next = match self.next.as_str() {
            "" => None,
            s => {
                let n = s
                    .parse::<Uuid>()
                    .map_err(|_| "could not parse \"next\" query param into uuid".to_string())?;
                (!n.is_nil()).then_some(n)
            }
        };
        Ok(Page {
            size: if size == 0 { DEFAULT_PAGE_SIZE } else { size },
            next,
        })
    }
}

async fn get_notifications(
    State(st): State<NotifierState>,
    ctx: RequestCtx,
    Path(raw): Path<String>,
    headers: HeaderMap,
    params: Result<Query<PageParams>, QueryRejection>,
) -> HandlerResult {
    let id = parse_id(&ctx, &raw, "notification id")?;
    let Query(params) = params.map_err(|e| ctx.api_error(StatusCode::BAD_REQUEST, e.body_text()))?;
    let page = params
        .page()
        .map_err(|msg| ctx.api_error(StatusCode::BAD_REQUEST, msg))?;
    let content_type = negotiate(&ctx, &headers, &NOTIFICATION_TYPES)?;

    let (notifications, page) = ctx.call(st.notifier.notifications(id, page)).await?;
    Ok(encoded(
        StatusCode::OK,
        content_type,
        HeaderMap::new(),
        &NotificationPage { page, notifications },
    ))
}

async fn delete_notifications(
    State(st): State<NotifierState>,
    ctx: RequestCtx,
    Path(raw): Path<String>,
) -> HandlerResult {
    let id = parse_id(&ctx, &raw, "notification id")?;
    ctx.call(st.notifier.delete_notifications(id)).await?;
    Ok(StatusCode::OK.into_response())
}

async fn list_keys(State(st): State<KeysState>, ctx: RequestCtx) -> HandlerResult {
    let keys = ctx.call(st.keys.keys()).await?;
    Ok(encoded(StatusCode::OK, JWK_SET, HeaderMap::new(), &KeySet(keys)))
}

async fn key_by_id(State(st): State<KeysState>, ctx: RequestCtx, Path(raw): Path<String>) -> HandlerResult {
    let id = parse_id(&ctx, &raw, "key id")?;
    match ctx.call(st.keys.key_by_id(id)).await? {
        Some(key) => Ok(encoded(StatusCode::OK, JWK, HeaderMap::new(), &key)),
        None => Err(ctx.api_error(StatusCode::NOT_FOUND, format!("key {id} not found"))),
    }
}
