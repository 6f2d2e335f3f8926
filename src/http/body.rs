//! Response bodies: encoded payloads with an error trailer, and bodies
//! that hold a guard until they finish.

use std::convert::Infallible;
use std::pin::Pin;
use std::task::{Context, Poll};

use axum::body::{Body, Bytes};
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::Response;
use hyper::body::{Body as HttpBody, Frame, SizeHint};

use crate::codec::{self, Marshal};

/// Trailer carrying an error that happened after the status line was fixed.
pub const ERROR_TRAILER: &str = "scanwire-error";

/// Declare the error trailer on `headers` once.
pub fn advertise_trailer(headers: &mut HeaderMap) {
    let present = headers
        .get_all(header::TRAILER)
        .iter()
        .any(|v| v.as_bytes().eq_ignore_ascii_case(ERROR_TRAILER.as_bytes()));
    if !present {
        headers.append(header::TRAILER, HeaderValue::from_static(ERROR_TRAILER));
    }
}

/// A trailers map holding `msg` under [`ERROR_TRAILER`].
pub fn error_trailers(msg: &str) -> HeaderMap {
    // Header values cannot carry control characters.
    let clean: String = msg
        .chars()
        .map(|c| if c.is_ascii_graphic() || c == ' ' { c } else { ' ' })
        .collect();
    let value = HeaderValue::from_str(clean.trim()).unwrap_or_else(|_| HeaderValue::from_static("error"));
    let mut map = HeaderMap::new();
    map.insert(HeaderName::from_static(ERROR_TRAILER), value);
    map
}

/// A single buffered chunk, then an error trailer if one was recorded.
#[derive(Debug, Default)]
pub struct TrailerBody {
    data: Option<Bytes>,
    error: Option<String>,
}

impl TrailerBody {
    pub fn new(data: impl Into<Bytes>, error: Option<String>) -> Self {
        let data = data.into();
        Self {
            data: (!data.is_empty()).then_some(data),
            error,
        }
    }
}

impl HttpBody for TrailerBody {
    type Data = Bytes;
    type Error = Infallible;

    fn poll_frame(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Bytes>, Infallible>>> {
        let this = self.get_mut();
        if let Some(data) = this.data.take() {
            return Poll::Ready(Some(Ok(Frame::data(data))));
        }
        if let Some(err) = this.error.take() {
            return Poll::Ready(Some(Ok(Frame::trailers(error_trailers(&err)))));
        }
        Poll::Ready(None)
    }

    fn is_end_stream(&self) -> bool {
        self.data.is_none() && self.error.is_none()
    }

    fn size_hint(&self) -> SizeHint {
        match (&self.data, &self.error) {
            (Some(d), None) => SizeHint::with_exact(d.len() as u64),
            (None, None) => SizeHint::with_exact(0),
            _ => SizeHint::default(),
        }
    }
}

/// Encode `v` as the body of a `status` response.
///
/// The status line is already decided when encoding starts, so a failure
/// midway yields the truncated output plus the error trailer.
pub fn encoded<T: Marshal + ?Sized>(
    status: StatusCode,
    content_type: &'static str,
    mut headers: HeaderMap,
    v: &T,
) -> Response {
    let mut enc = codec::encoder();
    let result = enc.encode(v).map(|_| ());
    let data = Bytes::copy_from_slice(enc.written());
    drop(enc);

    let error = match result {
        Ok(()) => None,
        Err(e) => {
            tracing::warn!(error = %e, written = data.len(), "response encoding failed");
            Some(e.to_string())
        }
    };

    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    advertise_trailer(&mut headers);
    let mut resp = Response::new(Body::new(TrailerBody::new(data, error)));
    *resp.status_mut() = status;
    resp.headers_mut().extend(headers);
    resp
}

/// Keeps `guard` alive until the wrapped body finishes or is dropped.
pub struct Guarded<G> {
    inner: Body,
    _guard: G,
}

impl<G: Send + Unpin + 'static> Guarded<G> {
    pub fn wrap(resp: Response, guard: G) -> Response {
        let (parts, inner) = resp.into_parts();
        Response::from_parts(parts, Body::new(Guarded { inner, _guard: guard }))
    }
}

impl<G: Unpin> HttpBody for Guarded<G> {
    type Data = Bytes;
    type Error = axum::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Bytes>, axum::Error>>> {
        Pin::new(&mut self.get_mut().inner).poll_frame(cx)
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}
