//! Request-scoped context for handlers.
//!
//! # Design Decisions
//! - The request id comes from `x-request-id`, set by the request-id layer
//!   at the edge of the stack
//! - Every collaborator call goes through [`RequestCtx::call`], which gives up
//!   as soon as the client disconnects and reports 499 instead

use std::convert::Infallible;
use std::future::Future;

use axum::body::Bytes;
use axum::extract::rejection::BytesRejection;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::{HeaderMap, StatusCode};
use axum::response::Response;

use crate::codec::{self, Unmarshal};
use crate::http::middleware::cancel::Disconnect;
use crate::http::problem::{self, client_closed_request, ApiError, ProblemDetails};

pub const X_REQUEST_ID: &str = "x-request-id";

#[derive(Debug, Clone, Default)]
pub struct RequestCtx {
    pub request_id: String,
    pub disconnect: Disconnect,
}

impl<S: Send + Sync> FromRequestParts<S> for RequestCtx {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let request_id = parts
            .headers
            .get(X_REQUEST_ID)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("unknown")
            .to_string();
        let disconnect = parts.extensions.get::<Disconnect>().cloned().unwrap_or_default();
        Ok(Self {
            request_id,
            disconnect,
        })
    }
}

impl RequestCtx {
    /// Report `err` as a problem, or 499 if the client has gone.
    pub fn fail<E: ProblemDetails + ?Sized>(&self, err: &E) -> Response {
        problem::report(&self.disconnect, err)
    }

    /// Like [`RequestCtx::fail`], keeping headers already staged.
    pub fn fail_with<E: ProblemDetails + ?Sized>(&self, headers: HeaderMap, err: &E) -> Response {
        problem::report_with(&self.disconnect, headers, err)
    }

    pub fn api_error(&self, status: StatusCode, detail: impl Into<String>) -> Response {
        self.fail(&ApiError::new(status, detail))
    }

    /// Await a collaborator call unless the client disconnects first.
    pub async fn call<T, E, F>(&self, fut: F) -> Result<T, Response>
    where
        F: Future<Output = Result<T, E>>,
        E: ProblemDetails,
    {
        let mut disconnect = self.disconnect.clone();
        tokio::select! {
            res = fut => res.map_err(|e| self.fail(&e)),
            () = disconnect.disconnected() => {
                tracing::debug!(request_id = %self.request_id, "client went away during call");
                Err(self.api_error(client_closed_request(), "client disconnected"))
            }
        }
    }

    /// Decode a buffered request body, mapping every failure to a problem.
    pub fn decode<T: Unmarshal>(&self, body: Result<Bytes, BytesRejection>, what: &str) -> Result<T, Response> {
        let bytes = body.map_err(|rej| self.api_error(rej.status(), rej.body_text()))?;
        codec::from_slice(&bytes).map_err(|e| {
            tracing::debug!(request_id = %self.request_id, error = %e, "failed to decode {what}");
            self.api_error(StatusCode::BAD_REQUEST, format!("failed to deserialize {what}: {e}"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::ServiceError;
    use crate::types::Manifest;
    use axum::http::Request;

    #[tokio::test]
    async fn extracts_request_id() {
        let (mut parts, ()) = Request::builder()
            .header(X_REQUEST_ID, "abc")
            .body(())
            .unwrap()
            .into_parts();
        let ctx = RequestCtx::from_request_parts(&mut parts, &()).await.unwrap();
        assert_eq!(ctx.request_id, "abc");
        assert!(!ctx.disconnect.is_disconnected());
    }

    #[tokio::test]
    async fn call_maps_service_errors() {
        let ctx = RequestCtx::default();
        let err = ctx
            .call(async { Err::<(), _>(ServiceError::NotFound("x".into())) })
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn call_gives_up_on_disconnect() {
        let (guard, disconnect) = Disconnect::pair();
        let ctx = RequestCtx {
            request_id: "r".into(),
            disconnect,
        };
        drop(guard);
        let err = ctx
            .call(std::future::pending::<Result<(), ServiceError>>())
            .await
            .unwrap_err();
        assert_eq!(err.status(), client_closed_request());
    }

    #[test]
    fn decode_failure_is_400() {
        let ctx = RequestCtx::default();
        let err = ctx
            .decode::<Manifest>(Ok(Bytes::from_static(b"{\"hash\":")), "manifest")
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }
}
