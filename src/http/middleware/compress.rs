//! Transparent response compression driven by `Accept-Encoding`.
//!
//! # Design Decisions
//! - Candidates are visited by descending `q`; `q=0` (or an unreadable `q`)
//!   excludes a coding outright
//! - `*` means "anything not excluded": gzip, deflate, snappy, then identity
//! - The wrapper inspects the inner response once when it is built: a
//!   [`FlushFrames`] extension makes it flush after every frame, and inner
//!   trailers are forwarded after the compressed stream
//! - Failures after the status line was sent travel in the error trailer

use std::collections::HashSet;
use std::io::{self, Write};
use std::mem;
use std::pin::Pin;
use std::task::{Context, Poll};

use axum::body::{Body, Bytes};
use axum::extract::Request;
use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode};
use axum::middleware::Next;
use axum::response::Response;
use flate2::write::{DeflateEncoder, GzEncoder};
use flate2::Compression;
use hyper::body::{Body as HttpBody, Frame};

use crate::http::body::{advertise_trailer, error_trailers};
use crate::http::middleware::cancel::Disconnect;
use crate::http::negotiate::NegotiateError;
use crate::http::problem;

/// Codings this server can produce, as advertised to clients.
pub const ACCEPTABLE: &str = "gzip, deflate, snappy";

/// Response extension asking the compressor to flush after every data frame.
#[derive(Debug, Clone, Copy, Default)]
pub struct FlushFrames;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Gzip,
    Deflate,
    Snappy,
    Identity,
}

impl Scheme {
    fn from_token(token: &str) -> Option<Self> {
        match token {
            "gzip" | "x-gzip" => Some(Scheme::Gzip),
            "deflate" => Some(Scheme::Deflate),
            "snappy" => Some(Scheme::Snappy),
            "identity" => Some(Scheme::Identity),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Scheme::Gzip => "gzip",
            Scheme::Deflate => "deflate",
            Scheme::Snappy => "snappy",
            Scheme::Identity => "identity",
        }
    }
}

/// Parsed `Accept-Encoding`: candidates by descending weight plus the
/// excluded codings.
fn parse_accept_encoding(value: &str) -> (Vec<(String, f32)>, HashSet<String>) {
    let mut candidates = Vec::new();
    let mut excluded = HashSet::new();
    for entry in value.split(',') {
        let mut parts = entry.split(';');
        let mut coding = parts.next().unwrap_or_default().trim().to_ascii_lowercase();
        if coding.is_empty() {
            continue;
        }
        // Aliases are tracked under the name they are excluded by.
        if let Some(s) = Scheme::from_token(&coding) {
            coding = s.as_str().to_string();
        }
        let mut q = Some(1.0f32);
        for param in parts {
            if let Some((name, v)) = param.split_once('=') {
                if name.trim().eq_ignore_ascii_case("q") {
                    q = v.trim().parse::<f32>().ok().filter(|q| q.is_finite() && *q > 0.0);
                }
            }
        }
        match q {
            Some(q) => candidates.push((coding, q)),
            None => {
                excluded.insert(coding);
            }
        }
    }
    candidates.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    (candidates, excluded)
}

/// Choose a coding for `value`, or `None` when nothing acceptable remains.
pub fn select(value: &str) -> Option<Scheme> {
    let (candidates, excluded) = parse_accept_encoding(value);
    for (coding, _) in &candidates {
        if coding == "*" {
            return [Scheme::Gzip, Scheme::Deflate, Scheme::Snappy, Scheme::Identity]
                .into_iter()
                .find(|s| !excluded.contains(s.as_str()));
        }
        match Scheme::from_token(coding) {
            Some(s) if !excluded.contains(s.as_str()) => return Some(s),
            _ => {}
        }
    }
    // Nothing usable was named; identity stays acceptable unless ruled out.
    if excluded.contains("identity") || excluded.contains("*") {
        None
    } else {
        Some(Scheme::Identity)
    }
}

/// Middleware compressing response bodies per the request's `Accept-Encoding`.
pub async fn compress(req: Request, next: Next) -> Response {
    let scheme = match req.headers().get(header::ACCEPT_ENCODING) {
        None => Scheme::Identity,
        Some(v) => match select(v.to_str().unwrap_or_default()) {
            Some(s) => s,
            None => {
                let disconnect = req.extensions().get::<Disconnect>().cloned().unwrap_or_default();
                let mut resp = problem::report(&disconnect, &NegotiateError::NoAcceptableEncoding);
                resp.headers_mut()
                    .insert(header::ACCEPT_ENCODING, HeaderValue::from_static(ACCEPTABLE));
                return resp;
            }
        },
    };
    let head = req.method() == Method::HEAD;

    let mut resp = next.run(req).await;
    resp.headers_mut()
        .insert(header::ACCEPT_ENCODING, HeaderValue::from_static(ACCEPTABLE));

    let skip = scheme == Scheme::Identity
        || head
        || matches!(resp.status(), StatusCode::NO_CONTENT | StatusCode::NOT_MODIFIED)
        || resp.headers().contains_key(header::CONTENT_ENCODING)
        || resp.body().is_end_stream();
    if skip {
        return resp;
    }

    let (mut parts, body) = resp.into_parts();
    let flush = parts.extensions.get::<FlushFrames>().is_some();
    parts.headers.remove(header::CONTENT_LENGTH);
    parts
        .headers
        .insert(header::CONTENT_ENCODING, HeaderValue::from_static(scheme.as_str()));
    parts
        .headers
        .append(header::VARY, HeaderValue::from_static("accept-encoding"));
    advertise_trailer(&mut parts.headers);

    Response::from_parts(parts, Body::new(CompressBody::new(body, scheme, flush)))
}

enum Compressor {
    Gzip(GzEncoder<Vec<u8>>),
    Deflate(DeflateEncoder<Vec<u8>>),
    Snappy(snap::write::FrameEncoder<Vec<u8>>),
}

impl Compressor {
    fn new(scheme: Scheme) -> Option<Self> {
        match scheme {
            Scheme::Gzip => Some(Compressor::Gzip(GzEncoder::new(Vec::new(), Compression::fast()))),
            Scheme::Deflate => Some(Compressor::Deflate(DeflateEncoder::new(Vec::new(), Compression::fast()))),
            Scheme::Snappy => Some(Compressor::Snappy(snap::write::FrameEncoder::new(Vec::new()))),
            Scheme::Identity => None,
        }
    }

    fn writer(&mut self) -> &mut dyn Write {
        match self {
            Compressor::Gzip(w) => w,
            Compressor::Deflate(w) => w,
            Compressor::Snappy(w) => w,
        }
    }

    /// Compressed bytes produced so far.
    fn take(&mut self) -> Vec<u8> {
        match self {
            Compressor::Gzip(w) => mem::take(w.get_mut()),
            Compressor::Deflate(w) => mem::take(w.get_mut()),
            Compressor::Snappy(w) => mem::take(w.get_mut()),
        }
    }

    fn finish(self) -> io::Result<Vec<u8>> {
        match self {
            Compressor::Gzip(w) => w.finish(),
            Compressor::Deflate(w) => w.finish(),
            Compressor::Snappy(w) => w
                .into_inner()
                .map_err(|e| io::Error::new(e.error().kind(), e.error().to_string())),
        }
    }
}

/// Body wrapper feeding every inner data frame through a compressor.
struct CompressBody {
    inner: Body,
    enc: Option<Compressor>,
    flush: bool,
    trailers: Option<HeaderMap>,
    done: bool,
}

impl CompressBody {
    fn new(inner: Body, scheme: Scheme, flush: bool) -> Self {
        Self {
            inner,
            enc: Compressor::new(scheme),
            flush,
            trailers: None,
            done: false,
        }
    }

    fn absorb(&mut self, data: &[u8]) -> io::Result<Vec<u8>> {
        let Some(enc) = self.enc.as_mut() else {
            return Ok(Vec::new());
        };
        enc.writer().write_all(data)?;
        if self.flush {
            enc.writer().flush()?;
        }
        Ok(enc.take())
    }

    fn fail(&mut self, err: impl std::fmt::Display) {
        tracing::warn!(error = %err, "compressed response failed midway");
        self.enc = None;
        let mut trailers = self.trailers.take().unwrap_or_default();
        trailers.extend(error_trailers(&err.to_string()));
        self.trailers = Some(trailers);
    }

    fn trailer_frame(&mut self) -> Option<Result<Frame<Bytes>, io::Error>> {
        self.done = true;
        self.trailers.take().map(|t| Ok(Frame::trailers(t)))
    }
}

impl HttpBody for CompressBody {
    type Data = Bytes;
    type Error = io::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Bytes>, io::Error>>> {
        let this = self.get_mut();
        loop {
            if this.done {
                return Poll::Ready(None);
            }
            if this.enc.is_none() {
                return Poll::Ready(this.trailer_frame());
            }
            match Pin::new(&mut this.inner).poll_frame(cx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(Some(Ok(frame))) => match frame.into_data() {
                    Ok(data) => match this.absorb(&data) {
                        Ok(out) if out.is_empty() => continue,
                        Ok(out) => return Poll::Ready(Some(Ok(Frame::data(Bytes::from(out))))),
                        Err(e) => this.fail(e),
                    },
                    Err(frame) => {
                        if let Ok(t) = frame.into_trailers() {
                            this.trailers.get_or_insert_with(HeaderMap::new).extend(t);
                        }
                    }
                },
                Poll::Ready(Some(Err(e))) => this.fail(e),
                Poll::Ready(None) => {
                    let Some(enc) = this.enc.take() else {
                        continue;
                    };
                    match enc.finish() {
                        Ok(tail) if !tail.is_empty() => {
                            return Poll::Ready(Some(Ok(Frame::data(Bytes::from(tail)))))
                        }
                        Ok(_) => {}
                        Err(e) => this.fail(e),
                    }
                }
            }
        }
    }

    fn is_end_stream(&self) -> bool {
        self.done
    }
}
