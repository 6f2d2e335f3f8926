//! Route handlers for the v1 API families.
//!
//! # Data Flow
//! ```text
//! /indexer/api/v1/...   ──▶ indexer.rs   (limited)
//! /matcher/api/v1/...   ──▶ matcher.rs   (compressed)
//! /notifier/api/v1/...  ──▶ notifier.rs  (compressed)
//! /openapi/v1           ──▶ discovery.rs (compressed)
//! ```
//!
//! Handlers return `Result<Response, Response>`: the error side is always an
//! already-rendered problem, so `?` works on every fallible step.

pub mod discovery;
pub mod indexer;
pub mod matcher;
pub mod notifier;

use std::io::Write;

use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::Response;

use crate::codec::machine::{array, record, Machine, State};
use crate::codec::{DecodeError, EncodeError, Marshal, Reader, TokenWriter, Unmarshal};
use crate::http::negotiate::pick_content_type;
use crate::http::request::RequestCtx;
use crate::types::{Key, Notification, Page, Vulnerability};

/// The rendered response on either side.
pub type HandlerResult = Result<Response, Response>;

/// Fallback for every route's unsupported methods.
pub async fn method_not_allowed(ctx: RequestCtx, method: Method) -> Response {
    ctx.api_error(
        StatusCode::METHOD_NOT_ALLOWED,
        format!("method disallowed: {method}"),
    )
}

pub(crate) fn negotiate(ctx: &RequestCtx, headers: &HeaderMap, allow: &[&'static str]) -> Result<&'static str, Response> {
    pick_content_type(headers, allow).map_err(|e| ctx.fail(&e))
}

/// `{"state": ...}`
pub(crate) struct StateDoc<'a>(pub &'a str);

impl Marshal for StateDoc<'_> {
    fn marshal<W: Write>(&self, w: &mut TokenWriter<W>) -> Result<(), EncodeError> {
        w.begin_object()?;
        w.field("state", self.0)?;
        w.end_object()
    }
}

/// Body of an affected-manifests query.
#[derive(Debug, Default)]
pub(crate) struct AffectedQuery {
    pub vulnerabilities: Vec<Vulnerability>,
}

fn affected_query_keys(m: &mut Machine<'_, AffectedQuery>) -> Option<State<AffectedQuery>> {
    match m.key()?.as_str() {
        "vulnerabilities" => Some(array(|v: &mut AffectedQuery| &mut v.vulnerabilities, affected_query_keys)),
        _ => m.skip(affected_query_keys),
    }
}

impl Unmarshal for AffectedQuery {
    fn unmarshal(r: &mut Reader) -> Result<Self, DecodeError> {
        record(r, affected_query_keys)
    }
}

/// One page of notifications plus the page to ask for next.
pub(crate) struct NotificationPage {
    pub page: Page,
    pub notifications: Vec<Notification>,
}

impl Marshal for NotificationPage {
    fn marshal<W: Write>(&self, w: &mut TokenWriter<W>) -> Result<(), EncodeError> {
        w.begin_object()?;
        w.field("page", &self.page)?;
        w.field("notifications", &self.notifications)?;
        w.end_object()
    }
}

/// `{"keys": [jwk, ...]}`
pub(crate) struct KeySet(pub Vec<Key>);

impl Marshal for KeySet {
    fn marshal<W: Write>(&self, w: &mut TokenWriter<W>) -> Result<(), EncodeError> {
        w.begin_object()?;
        w.field("keys", &self.0)?;
        w.end_object()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec;

    #[test]
    fn notification_page_always_lists() {
        let page = NotificationPage {
            page: Page { size: 500, next: None },
            notifications: Vec::new(),
        };
        let out = codec::to_vec(&page).unwrap();
        assert_eq!(out, br#"{"page":{"size":500},"notifications":[]}"#);
    }

    #[test]
    fn affected_query_reads_vulnerabilities() {
        let q: AffectedQuery =
            codec::from_slice(br#"{"vulnerabilities":[{"id":"1","name":"CVE-1"}],"extra":true}"#).unwrap();
        assert_eq!(q.vulnerabilities.len(), 1);
        assert_eq!(q.vulnerabilities[0].name, "CVE-1");
    }

    #[test]
    fn state_doc() {
        assert_eq!(codec::to_vec(&StateDoc("abc")).unwrap(), br#"{"state":"abc"}"#);
    }
}
