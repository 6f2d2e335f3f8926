//! Content-type negotiation against the `Accept` header.

use std::cmp::Ordering;

use axum::http::{header, HeaderMap};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NegotiateError {
    #[error("unable to negotiate common media type for {allow:?}")]
    NoCommonMediaType { allow: Vec<&'static str> },

    #[error("no acceptable content encoding")]
    NoAcceptableEncoding,
}

/// One parsed `Accept` media range.
#[derive(Debug, Clone, PartialEq)]
struct MediaRange {
    kind: String,
    subtype: String,
    q: f32,
}

impl MediaRange {
    fn parse(s: &str) -> Option<Self> {
        let mut parts = s.split(';');
        let (kind, subtype) = parts.next()?.trim().split_once('/')?;
        let (kind, subtype) = (kind.trim(), subtype.trim());
        if kind.is_empty() || subtype.is_empty() || (kind == "*" && subtype != "*") {
            return None;
        }
        let mut q = 1.0;
        for param in parts {
            let Some((name, value)) = param.split_once('=') else {
                continue;
            };
            if name.trim().eq_ignore_ascii_case("q") {
                q = value.trim().parse::<f32>().ok().filter(|q| (0.0..=1.0).contains(q))?;
            }
        }
        Some(Self {
            kind: kind.to_ascii_lowercase(),
            subtype: subtype.to_ascii_lowercase(),
            q,
        })
    }

    fn matches(&self, media: &str) -> bool {
        let Some((kind, subtype)) = media.split_once('/') else {
            return false;
        };
        match (self.kind.as_str(), self.subtype.as_str()) {
            ("*", "*") => true,
            (k, "*") => k == kind,
            (k, s) => k == kind && s == subtype,
        }
    }
}

/// Pick the response media type from `allow`, in server preference order.
///
/// With no `Accept` header the first allowed type is used.
pub fn pick_content_type(headers: &HeaderMap, allow: &[&'static str]) -> Result<&'static str, NegotiateError> {
    let mut values = headers.get_all(header::ACCEPT).iter().peekable();
    if values.peek().is_none() {
        return allow.first().copied().ok_or_else(|| no_match(allow));
    }

    let mut ranges: Vec<MediaRange> = values
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(MediaRange::parse)
        .filter(|r| r.q > 0.0)
        .collect();
    // Stable: equal weights keep client order.
    ranges.sort_by(|a, b| b.q.partial_cmp(&a.q).unwrap_or(Ordering::Equal));

    ranges
        .iter()
        .find_map(|r| allow.iter().copied().find(|t| r.matches(t)))
        .ok_or_else(|| no_match(allow))
}

fn no_match(allow: &[&'static str]) -> NegotiateError {
    NegotiateError::NoCommonMediaType { allow: allow.to_vec() }
}
