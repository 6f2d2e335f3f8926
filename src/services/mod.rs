//! Collaborator services consumed by the HTTP layer.
//!
//! # Data Flow
//! ```text
//! handler ──▶ Arc<dyn Indexer | Matcher | Notifier | KeyStore>
//!                 │
//!                 ├──▶ memory::MemoryBackend (standalone mode, tests)
//!                 └──▶ any other implementation wired in by the embedder
//! ```
//!
//! # Design Decisions
//! - Object-safe async traits so one server can be built over any backend
//! - "Not found" lookups are `Ok(None)`; `ServiceError::NotFound` is reserved
//!   for operations whose target must exist
//! - Validators (`state`, `latest_update_operation`) are cheap and called
//!   before any expensive operation

pub mod memory;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::types::{
    AffectedManifests, Digest, IndexReport, Key, Manifest, Notification, Page, UpdateDiff,
    UpdateKind, UpdateOperation, Vulnerability, VulnerabilityReport,
};

pub use memory::MemoryBackend;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("{0}")]
    Internal(String),
}

/// Update operations grouped by updater name, newest first.
pub type UpdateOperations = BTreeMap<String, Vec<UpdateOperation>>;

#[async_trait]
pub trait Indexer: Send + Sync {
    async fn index(&self, manifest: &Manifest) -> Result<IndexReport, ServiceError>;

    async fn index_report(&self, digest: &Digest) -> Result<Option<IndexReport>, ServiceError>;

    /// Opaque validator that changes whenever any index report may have.
    async fn state(&self) -> Result<String, ServiceError>;

    /// Returns the subset of `digests` that was actually deleted.
    async fn delete_manifests(&self, digests: &[Digest]) -> Result<Vec<Digest>, ServiceError>;

    async fn affected_manifests(&self, vulns: &[Vulnerability]) -> Result<AffectedManifests, ServiceError>;
}

#[async_trait]
pub trait Matcher: Send + Sync {
    /// Whether vulnerability data has been loaded at least once.
    async fn initialized(&self) -> Result<bool, ServiceError>;

    async fn scan(&self, report: &IndexReport) -> Result<VulnerabilityReport, ServiceError>;

    async fn update_operations(&self, kind: UpdateKind) -> Result<UpdateOperations, ServiceError>;

    async fn latest_update_operations(&self, kind: UpdateKind) -> Result<UpdateOperations, ServiceError>;

    /// Reference of the most recent update operation of `kind`, if any.
    async fn latest_update_operation(&self, kind: UpdateKind) -> Result<Option<Uuid>, ServiceError>;

    async fn update_diff(&self, prev: Option<Uuid>, cur: Uuid) -> Result<UpdateDiff, ServiceError>;

    /// Returns how many operations were removed.
    async fn delete_update_operations(&self, refs: &[Uuid]) -> Result<usize, ServiceError>;
}

#[async_trait]
pub trait Notifier: Send + Sync {
    /// One page of the notifications for `id`, and the page to ask for next.
    async fn notifications(&self, id: Uuid, page: Page) -> Result<(Vec<Notification>, Page), ServiceError>;

    async fn delete_notifications(&self, id: Uuid) -> Result<(), ServiceError>;
}

/// Public keys the notifier signs webhook deliveries with.
#[async_trait]
pub trait KeyStore: Send + Sync {
    async fn keys(&self) -> Result<Vec<Key>, ServiceError>;

    async fn key_by_id(&self, id: Uuid) -> Result<Option<Key>, ServiceError>;
}

/// The collaborators a server is built over. Families whose service is
/// absent are not mounted.
#[derive(Clone, Default)]
pub struct Services {
    pub indexer: Option<Arc<dyn Indexer>>,
    pub matcher: Option<Arc<dyn Matcher>>,
    pub notifier: Option<Arc<dyn Notifier>>,
    pub keys: Option<Arc<dyn KeyStore>>,
}

impl Services {
    /// Every family served by one in-process backend.
    pub fn memory(backend: Arc<MemoryBackend>) -> Self {
        Self {
            indexer: Some(backend.clone()),
            matcher: Some(backend.clone()),
            notifier: Some(backend.clone()),
            keys: Some(backend),
        }
    }
}
