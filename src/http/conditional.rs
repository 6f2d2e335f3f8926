//! Conditional requests: strong validators compared against `If-None-Match`.

use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};

/// A quoted opaque validator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Validator(String);

impl Validator {
    pub fn new(state: &str) -> Self {
        Self(format!("\"{state}\""))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Exact comparison against every `If-None-Match` entry.
    pub fn matches(&self, headers: &HeaderMap) -> bool {
        headers
            .get_all(header::IF_NONE_MATCH)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(','))
            .any(|tag| tag.trim() == self.0)
    }

    /// Set `etag`. Validators that are not valid header text are left off.
    pub fn apply(&self, headers: &mut HeaderMap) {
        match HeaderValue::from_str(&self.0) {
            Ok(v) => {
                headers.insert(header::ETAG, v);
            }
            Err(_) => tracing::warn!(validator = %self.0, "validator is not a valid header value"),
        }
    }
}

/// Empty 304 carrying the validator.
pub fn not_modified(validator: &Validator) -> Response {
    let mut resp = StatusCode::NOT_MODIFIED.into_response();
    validator.apply(resp.headers_mut());
    resp
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inm(v: &'static str) -> HeaderMap {
        let mut h = HeaderMap::new();
        h.insert(header::IF_NONE_MATCH, HeaderValue::from_static(v));
        h
    }

    #[test]
    fn quoted_and_exact() {
        let v = Validator::new("abc");
        assert_eq!(v.as_str(), "\"abc\"");
        assert!(v.matches(&inm("\"abc\"")));
        assert!(v.matches(&inm("\"x\", \"abc\"")));
        assert!(!v.matches(&inm("abc")));
        assert!(!v.matches(&inm("W/\"abc\"")));
        assert!(!v.matches(&HeaderMap::new()));
    }

    #[test]
    fn not_modified_has_etag_and_no_body() {
        let resp = not_modified(&Validator::new("s1"));
        assert_eq!(resp.status(), StatusCode::NOT_MODIFIED);
        assert_eq!(resp.headers()[header::ETAG], "\"s1\"");
    }
}
