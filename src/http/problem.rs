//! RFC 9457 problem details.
//!
//! Every error response goes through [`report`]: the error type answers
//! whichever of the [`ProblemDetails`] questions it cares about and the
//! rest fall back to defaults. The object is written with the codec's token
//! writer in one pass.

use std::fmt;

use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::Response;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::codec::{DecodeError, EncodeError, TokenWriter};
use crate::http::body::{advertise_trailer, TrailerBody};
use crate::http::middleware::cancel::Disconnect;
use crate::http::negotiate::NegotiateError;
use crate::services::ServiceError;

pub const PROBLEM_JSON: &str = "application/problem+json";

/// Nonstandard status recorded when the client went away first.
pub const STATUS_CLIENT_CLOSED_REQUEST: u16 = 499;

pub fn client_closed_request() -> StatusCode {
    StatusCode::from_u16(STATUS_CLIENT_CLOSED_REQUEST).unwrap_or(StatusCode::BAD_REQUEST)
}

/// Optional capabilities an error can expose to the reporter.
pub trait ProblemDetails: fmt::Display {
    fn status(&self) -> StatusCode {
        StatusCode::INTERNAL_SERVER_ERROR
    }

    /// URI reference identifying the problem type.
    fn problem_type(&self) -> Option<String> {
        None
    }

    fn title(&self) -> Option<String> {
        None
    }

    fn detail(&self) -> String {
        self.to_string()
    }

    fn instance(&self) -> Option<String> {
        None
    }

    fn extensions(&self) -> Option<Map<String, Value>> {
        None
    }
}

/// An error raised directly by a handler.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{detail}")]
pub struct ApiError {
    pub status: StatusCode,
    pub detail: String,
}

impl ApiError {
    pub fn new(status: StatusCode, detail: impl Into<String>) -> Self {
        Self {
            status,
            detail: detail.into(),
        }
    }
}

impl ProblemDetails for ApiError {
    fn status(&self) -> StatusCode {
        self.status
    }

    fn title(&self) -> Option<String> {
        self.status.canonical_reason().map(str::to_string)
    }
}

impl ProblemDetails for ServiceError {
    fn status(&self) -> StatusCode {
        match self {
            ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
            ServiceError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            ServiceError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn title(&self) -> Option<String> {
        self.status().canonical_reason().map(str::to_string)
    }
}

impl ProblemDetails for DecodeError {
    fn status(&self) -> StatusCode {
        match self {
            DecodeError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        }
    }

    fn title(&self) -> Option<String> {
        Some("Malformed request body".to_string())
    }
}

impl ProblemDetails for NegotiateError {
    fn status(&self) -> StatusCode {
        match self {
            NegotiateError::NoCommonMediaType { .. } => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            NegotiateError::NoAcceptableEncoding => StatusCode::NOT_ACCEPTABLE,
        }
    }

    fn title(&self) -> Option<String> {
        self.status().canonical_reason().map(str::to_string)
    }
}

/// Report `err`, or 499 with no body when the client has gone.
pub fn report<E: ProblemDetails + ?Sized>(disconnect: &Disconnect, err: &E) -> Response {
    report_with(disconnect, HeaderMap::new(), err)
}

/// Like [`report`], starting from headers the handler already staged.
pub fn report_with<E: ProblemDetails + ?Sized>(disconnect: &Disconnect, headers: HeaderMap, err: &E) -> Response {
    if disconnect.is_disconnected() {
        tracing::debug!(error = %err, "client disconnected, dropping error response");
        let mut resp = Response::new(Body::empty());
        *resp.status_mut() = client_closed_request();
        return resp;
    }
    render_with(headers, err)
}

/// Render `err` without consulting a disconnect signal.
pub fn render<E: ProblemDetails + ?Sized>(err: &E) -> Response {
    render_with(HeaderMap::new(), err)
}

fn render_with<E: ProblemDetails + ?Sized>(mut headers: HeaderMap, err: &E) -> Response {
    let status = err.status();
    if status.is_server_error() {
        tracing::error!(status = status.as_u16(), error = %err, "request failed");
    } else {
        tracing::debug!(status = status.as_u16(), error = %err, "request rejected");
    }

    headers.remove(header::LINK);
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(PROBLEM_JSON));
    headers.insert(header::X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff"));
    advertise_trailer(&mut headers);

    let mut w = TokenWriter::new(Vec::with_capacity(128));
    let error = write_problem(&mut w, status, err).err().map(|e| {
        tracing::warn!(error = %e, "writing problem details failed");
        e.to_string()
    });

    let mut resp = Response::new(Body::new(TrailerBody::new(w.into_inner(), error)));
    *resp.status_mut() = status;
    *resp.headers_mut() = headers;
    resp
}

fn write_problem<E: ProblemDetails + ?Sized>(
    w: &mut TokenWriter<Vec<u8>>,
    status: StatusCode,
    err: &E,
) -> Result<(), EncodeError> {
    w.begin_object()?;
    if let Some(t) = err.problem_type() {
        w.key("type")?;
        w.string(&t)?;
    }
    if let Some(t) = err.title() {
        w.key("title")?;
        w.string(&t)?;
    }
    w.key("status")?;
    w.u64(u64::from(status.as_u16()))?;
    w.key("detail")?;
    w.string(&err.detail())?;
    if let Some(i) = err.instance() {
        w.key("instance")?;
        w.string(&i)?;
    }
    if let Some(ext) = err.extensions() {
        for (k, v) in &ext {
            w.key(k)?;
            w.value(v)?;
        }
    }
    w.end_object()
}
