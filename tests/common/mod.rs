//! Shared utilities for the HTTP integration tests.

#![allow(dead_code)]

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, Response};
use axum::Router;
use http_body_util::BodyExt;
use tokio::sync::Semaphore;
use tower::ServiceExt;
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::Layer;
use uuid::Uuid;

use scanwire::services::{Indexer, Matcher, ServiceError, UpdateOperations};
use scanwire::types::{
    AffectedManifests, Digest, IndexReport, Manifest, UpdateDiff, UpdateKind, Vulnerability,
    VulnerabilityReport,
};
use scanwire::{HttpServer, MemoryBackend, ScanwireConfig, Services};

/// Per-operation call counters.
#[derive(Debug, Default)]
pub struct Calls {
    pub state: AtomicUsize,
    pub index: AtomicUsize,
    pub index_report: AtomicUsize,
    pub scan: AtomicUsize,
}

impl Calls {
    pub fn get(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

/// Indexer and matcher over a [`MemoryBackend`] that count calls and can be
/// made to block.
pub struct Mock {
    pub backend: Arc<MemoryBackend>,
    pub calls: Calls,
    /// When set, `index` waits for a permit before doing any work.
    pub index_gate: Option<Arc<Semaphore>>,
    /// When set, `scan` never completes.
    pub hang_scan: bool,
    /// Flipped when a hung `scan` future is dropped.
    pub scan_dropped: Arc<AtomicBool>,
}

impl Mock {
    pub fn new(backend: Arc<MemoryBackend>) -> Self {
        Self {
            backend,
            calls: Calls::default(),
            index_gate: None,
            hang_scan: false,
            scan_dropped: Arc::new(AtomicBool::new(false)),
        }
    }
}

struct DropFlag(Arc<AtomicBool>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl Indexer for Mock {
    async fn index(&self, manifest: &Manifest) -> Result<IndexReport, ServiceError> {
        self.calls.index.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.index_gate {
            let _permit = gate
                .acquire()
                .await
                .map_err(|e| ServiceError::Internal(e.to_string()))?;
        }
        self.backend.index(manifest).await
    }

    async fn index_report(&self, digest: &Digest) -> Result<Option<IndexReport>, ServiceError> {
        self.calls.index_report.fetch_add(1, Ordering::SeqCst);
        self.backend.index_report(digest).await
    }

    async fn state(&self) -> Result<String, ServiceError> {
        self.calls.state.fetch_add(1, Ordering::SeqCst);
        self.backend.state().await
    }

    async fn delete_manifests(&self, digests: &[Digest]) -> Result<Vec<Digest>, ServiceError> {
        self.backend.delete_manifests(digests).await
    }

    async fn affected_manifests(&self, vulns: &[Vulnerability]) -> Result<AffectedManifests, ServiceError> {
        self.backend.affected_manifests(vulns).await
    }
}

#[async_trait]
impl Matcher for Mock {
    async fn initialized(&self) -> Result<bool, ServiceError> {
        self.backend.initialized().await
    }

    async fn scan(&self, report: &IndexReport) -> Result<VulnerabilityReport, ServiceError> {
        self.calls.scan.fetch_add(1, Ordering::SeqCst);
        if self.hang_scan {
            let _flag = DropFlag(self.scan_dropped.clone());
            std::future::pending::<()>().await;
        }
        self.backend.scan(report).await
    }

    async fn update_operations(&self, kind: UpdateKind) -> Result<UpdateOperations, ServiceError> {
        self.backend.update_operations(kind).await
    }

    async fn latest_update_operations(&self, kind: UpdateKind) -> Result<UpdateOperations, ServiceError> {
        self.backend.latest_update_operations(kind).await
    }

    async fn latest_update_operation(&self, kind: UpdateKind) -> Result<Option<Uuid>, ServiceError> {
        self.backend.latest_update_operation(kind).await
    }

    async fn update_diff(&self, prev: Option<Uuid>, cur: Uuid) -> Result<UpdateDiff, ServiceError> {
        self.backend.update_diff(prev, cur).await
    }

    async fn delete_update_operations(&self, refs: &[Uuid]) -> Result<usize, ServiceError> {
        self.backend.delete_update_operations(refs).await
    }
}

/// Statuses logged as `handled HTTP request`, in the order they were logged.
#[derive(Clone, Debug, Default)]
pub struct StatusLog(Arc<Mutex<Vec<u64>>>);

impl StatusLog {
    /// Capture on this thread until the guard drops. `#[tokio::test]` runs
    /// spawned tasks on the test thread, so the request tasks are covered.
    pub fn install(&self) -> tracing::subscriber::DefaultGuard {
        tracing::subscriber::set_default(tracing_subscriber::registry().with(self.clone()))
    }

    pub fn statuses(&self) -> Vec<u64> {
        self.0.lock().unwrap().clone()
    }

    /// Wait until at least `n` requests were logged.
    pub async fn wait_for(&self, n: usize) -> Vec<u64> {
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                let seen = self.statuses();
                if seen.len() >= n {
                    return seen;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("expected {n} logged requests, got {:?}", self.statuses()))
    }
}

#[derive(Default)]
struct HandledRequest {
    matched: bool,
    status: Option<u64>,
}

impl Visit for HandledRequest {
    fn record_u64(&mut self, field: &Field, value: u64) {
        if field.name() == "status" {
            self.status = Some(value);
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" && format!("{value:?}") == "handled HTTP request" {
            self.matched = true;
        }
    }
}

impl<S: Subscriber> Layer<S> for StatusLog {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut seen = HandledRequest::default();
        event.record(&mut seen);
        if let (true, Some(status)) = (seen.matched, seen.status) {
            self.0.lock().unwrap().push(status);
        }
    }
}

/// Services with the mock in front of the indexer and matcher.
pub fn services(mock: &Arc<Mock>) -> Services {
    Services {
        indexer: Some(mock.clone()),
        matcher: Some(mock.clone()),
        notifier: Some(mock.backend.clone()),
        keys: Some(mock.backend.clone()),
    }
}

pub fn router_with(mock: &Arc<Mock>, config: ScanwireConfig) -> Router {
    HttpServer::new(config, services(mock))
        .expect("all services present")
        .router()
}

pub fn router(mock: &Arc<Mock>) -> Router {
    router_with(mock, ScanwireConfig::default())
}

pub async fn send(router: &Router, req: Request<Body>) -> Response<Body> {
    router.clone().oneshot(req).await.expect("router is infallible")
}

pub async fn body_bytes(resp: Response<Body>) -> Vec<u8> {
    resp.into_body().collect().await.expect("body").to_bytes().to_vec()
}

pub async fn body_json(resp: Response<Body>) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(resp).await).expect("json body")
}

pub fn digest(n: u8) -> Digest {
    Digest::sha256([n; 32])
}

pub fn manifest_json(hash: &Digest) -> String {
    format!(
        r#"{{"hash":"{hash}","layers":[{{"hash":"{layer}","uri":"https://registry.example/blob","headers":{{}}}}]}}"#,
        layer = digest(0xee)
    )
}
