//! Non-blocking per-route concurrency limiting.
//!
//! A request either gets a permit immediately or is refused with 429; it
//! never queues. The permit rides along with the response body so a slow
//! reader keeps its slot until the body is finished or dropped.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{Method, StatusCode},
    middleware::Next,
    response::Response,
};
use dashmap::DashMap;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::http::body::Guarded;
use crate::http::handlers::indexer::INDEX_REPORT_PATH;
use crate::http::middleware::cancel::Disconnect;
use crate::http::problem::{self, ApiError};
use crate::observability::metrics;

/// Where a request is counted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    /// Requests sharing a key share a semaphore.
    pub key: String,
    /// Label on the rejection counter.
    pub endpoint: &'static str,
    /// Concurrent requests allowed; 0 disables limiting.
    pub weight: u32,
}

type Rule = dyn Fn(&Method, &str) -> Option<Route> + Send + Sync;

pub enum Admission {
    /// The route is not limited.
    Unlimited,
    Admitted(OwnedSemaphorePermit),
    Rejected(&'static str),
}

pub struct ConcurrencyLimiter {
    rule: Box<Rule>,
    semaphores: DashMap<String, Arc<Semaphore>>,
}

impl ConcurrencyLimiter {
    pub fn new(rule: impl Fn(&Method, &str) -> Option<Route> + Send + Sync + 'static) -> Self {
        Self {
            rule: Box::new(rule),
            semaphores: DashMap::new(),
        }
    }

    pub fn admit(&self, method: &Method, path: &str) -> Admission {
        let Some(route) = (self.rule)(method, path) else {
            return Admission::Unlimited;
        };
        if route.weight == 0 {
            return Admission::Unlimited;
        }
        let sem = self
            .semaphores
            .entry(route.key)
            .or_insert_with(|| Arc::new(Semaphore::new(route.weight as usize)))
            .clone();
        match sem.try_acquire_owned() {
            Ok(permit) => Admission::Admitted(permit),
            Err(_) => Admission::Rejected(route.endpoint),
        }
    }
}

/// Limit only manifest submissions, `limit` at a time. Zero means unlimited.
pub fn index_report_rule(limit: u32) -> impl Fn(&Method, &str) -> Option<Route> + Send + Sync + 'static {
    move |method, path| {
        (method == Method::POST && path.trim_end_matches('/') == INDEX_REPORT_PATH).then(|| Route {
            key: INDEX_REPORT_PATH.to_string(),
            endpoint: "index_report",
            weight: limit,
        })
    }
}

/// Middleware enforcing the limiter in router state.
pub async fn limit(State(limiter): State<Arc<ConcurrencyLimiter>>, req: Request, next: Next) -> Response {
    match limiter.admit(req.method(), req.uri().path()) {
        Admission::Unlimited => next.run(req).await,
        Admission::Admitted(permit) => Guarded::wrap(next.run(req).await, permit),
        Admission::Rejected(endpoint) => {
            tracing::warn!(endpoint, method = %req.method(), path = req.uri().path(), "concurrency limit reached");
            metrics::record_rejected(endpoint);
            let disconnect = req.extensions().get::<Disconnect>().cloned().unwrap_or_default();
            problem::report(
                &disconnect,
                &ApiError::new(StatusCode::TOO_MANY_REQUESTS, "too many concurrent requests"),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(n: u32) -> ConcurrencyLimiter {
        ConcurrencyLimiter::new(index_report_rule(n))
    }

    #[test]
    fn rejects_past_capacity() {
        let l = limiter(2);
        let a = l.admit(&Method::POST, INDEX_REPORT_PATH);
        let b = l.admit(&Method::POST, INDEX_REPORT_PATH);
        assert!(matches!(a, Admission::Admitted(_)));
        assert!(matches!(b, Admission::Admitted(_)));
        assert!(matches!(
            l.admit(&Method::POST, INDEX_REPORT_PATH),
            Admission::Rejected("index_report")
        ));

        drop(a);
        assert!(matches!(l.admit(&Method::POST, INDEX_REPORT_PATH), Admission::Admitted(_)));
    }

    #[test]
    fn other_routes_pass() {
        let l = limiter(1);
        let _held = l.admit(&Method::POST, INDEX_REPORT_PATH);
        assert!(matches!(l.admit(&Method::GET, INDEX_REPORT_PATH), Admission::Unlimited));
        assert!(matches!(l.admit(&Method::DELETE, INDEX_REPORT_PATH), Admission::Unlimited));
    }

    #[test]
    fn zero_weight_is_unlimited() {
        let l = limiter(0);
        for _ in 0..50 {
            assert!(matches!(l.admit(&Method::POST, INDEX_REPORT_PATH), Admission::Unlimited));
        }
    }

    #[test]
    fn one_semaphore_per_key() {
        let l = Arc::new(limiter(3));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let l = l.clone();
                std::thread::spawn(move || {
                    let _ = l.admit(&Method::POST, INDEX_REPORT_PATH);
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(l.semaphores.len(), 1);
    }
}
