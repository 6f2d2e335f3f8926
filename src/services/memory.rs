//! In-process backend implementing every collaborator trait.
//!
//! Holds everything in `DashMap`s. Matching is by package name, narrowed by
//! the vulnerability's version range when both sides carry a normalized
//! version. Good enough for standalone mode and for exercising the HTTP layer.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use uuid::Uuid;

use super::{Indexer, KeyStore, Matcher, Notifier, ServiceError, UpdateOperations};
use crate::types::index::INDEX_FINISHED;
use crate::types::{
    AffectedManifests, Digest, IndexReport, Key, Manifest, Notification, Package, Page,
    UpdateDiff, UpdateKind, UpdateOperation, Vulnerability, VulnerabilityReport,
};

/// One recorded update operation and the vulnerabilities it produced.
struct Snapshot {
    seq: u64,
    op: UpdateOperation,
    vulns: Vec<Vulnerability>,
}

#[derive(Default)]
pub struct MemoryBackend {
    state: AtomicU64,
    manifests: DashMap<Digest, Manifest>,
    reports: DashMap<Digest, IndexReport>,
    seq: AtomicU64,
    updates: DashMap<Uuid, Snapshot>,
    initialized: AtomicBool,
    notifications: DashMap<Uuid, Vec<Notification>>,
    keys: DashMap<Uuid, Key>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn bump(&self) {
        self.state.fetch_add(1, Ordering::AcqRel);
    }

    /// Store a finished report as if it had been indexed.
    pub fn insert_report(&self, report: IndexReport) {
        self.reports.insert(report.hash.clone(), report);
        self.bump();
    }

    /// Record a completed updater run producing `vulns`.
    pub fn record_update(&self, updater: &str, kind: UpdateKind, vulns: Vec<Vulnerability>) -> UpdateOperation {
        let op = UpdateOperation {
            reference: Uuid::new_v4(),
            updater: updater.to_string(),
            fingerprint: Vec::new(),
            date: Utc::now(),
            kind,
        };
        let seq = self.seq.fetch_add(1, Ordering::AcqRel);
        self.updates.insert(
            op.reference,
            Snapshot {
                seq,
                op: op.clone(),
                vulns,
            },
        );
        self.initialized.store(true, Ordering::Release);
        op
    }

    /// Mark the matcher ready without loading any data.
    pub fn set_initialized(&self) {
        self.initialized.store(true, Ordering::Release);
    }

    pub fn push_notifications(&self, id: Uuid, mut batch: Vec<Notification>) {
        self.notifications.entry(id).or_default().append(&mut batch);
    }

    pub fn insert_key(&self, key: Key) {
        self.keys.insert(key.id, key);
    }

    /// Snapshots of `kind` ordered newest first.
    fn snapshots(&self, kind: UpdateKind) -> Vec<(u64, UpdateOperation)> {
        let mut out: Vec<_> = self
            .updates
            .iter()
            .filter(|s| s.op.kind == kind)
            .map(|s| (s.seq, s.op.clone()))
            .collect();
        out.sort_by(|a, b| b.0.cmp(&a.0));
        out
    }

    /// The vulnerabilities currently known: the latest run of every updater.
    fn current_vulnerabilities(&self) -> Vec<Vulnerability> {
        let mut latest: BTreeMap<String, (u64, Uuid)> = BTreeMap::new();
        for s in self.updates.iter().filter(|s| s.op.kind == UpdateKind::Vulnerability) {
            let slot = latest.entry(s.op.updater.clone()).or_insert((s.seq, s.op.reference));
            if s.seq > slot.0 {
                *slot = (s.seq, s.op.reference);
            }
        }
        latest
            .values()
            .filter_map(|(_, r)| self.updates.get(r).map(|s| s.vulns.clone()))
            .flatten()
            .collect()
    }

    fn vulns_of(&self, reference: Uuid) -> Result<Vec<Vulnerability>, ServiceError> {
        self.updates
            .get(&reference)
            .map(|s| s.vulns.clone())
            .ok_or_else(|| ServiceError::NotFound(format!("update operation {reference}")))
    }
}

fn affects(v: &Vulnerability, pkg: &Package) -> bool {
    let Some(target) = &v.package else {
        return false;
    };
    if target.name != pkg.name {
        return false;
    }
    match &v.range {
        Some(range) if !pkg.normalized_version.is_zero() => range.contains(&pkg.normalized_version),
        _ => true,
    }
}

fn group(ops: Vec<(u64, UpdateOperation)>, latest_only: bool) -> UpdateOperations {
    let mut out = UpdateOperations::new();
    for (_, op) in ops {
        let list = out.entry(op.updater.clone()).or_default();
        if !latest_only || list.is_empty() {
            list.push(op);
        }
    }
    out
}

#[async_trait]
impl Indexer for MemoryBackend {
    async fn index(&self, manifest: &Manifest) -> Result<IndexReport, ServiceError> {
        if !manifest.is_valid() {
            return Err(ServiceError::InvalidInput("manifest has no hash or layers".into()));
        }
        self.manifests.insert(manifest.hash.clone(), manifest.clone());
        let report = self
            .reports
            .entry(manifest.hash.clone())
            .or_insert_with(|| IndexReport {
                hash: manifest.hash.clone(),
                state: INDEX_FINISHED.to_string(),
                success: true,
                ..Default::default()
            })
            .clone();
        self.bump();
        tracing::debug!(manifest = %manifest.hash, layers = manifest.layers.len(), "indexed manifest");
        Ok(report)
    }

    async fn index_report(&self, digest: &Digest) -> Result<Option<IndexReport>, ServiceError> {
        Ok(self.reports.get(digest).map(|r| r.clone()))
    }

    async fn state(&self) -> Result<String, ServiceError> {
        Ok(format!("{:016x}", self.state.load(Ordering::Acquire)))
    }

    async fn delete_manifests(&self, digests: &[Digest]) -> Result<Vec<Digest>, ServiceError> {
        let mut deleted = Vec::new();
        for d in digests {
            let had_manifest = self.manifests.remove(d).is_some();
            let had_report = self.reports.remove(d).is_some();
            if had_manifest || had_report {
                deleted.push(d.clone());
            }
        }
        if !deleted.is_empty() {
            self.bump();
        }
        Ok(deleted)
    }

    async fn affected_manifests(&self, vulns: &[Vulnerability]) -> Result<AffectedManifests, ServiceError> {
        let mut out = AffectedManifests::default();
        for report in self.reports.iter() {
            for v in vulns {
                if report.packages.values().any(|p| affects(v, p)) {
                    out.vulnerabilities.insert(v.id.clone(), v.clone());
                    out.vulnerable_manifests
                        .entry(report.hash.to_string())
                        .or_default()
                        .push(v.id.clone());
                }
            }
        }
        Ok(out)
    }
}

#[async_trait]
impl Matcher for MemoryBackend {
    async fn initialized(&self) -> Result<bool, ServiceError> {
        Ok(self.initialized.load(Ordering::Acquire))
    }

    async fn scan(&self, report: &IndexReport) -> Result<VulnerabilityReport, ServiceError> {
        let mut out = VulnerabilityReport {
            hash: report.hash.clone(),
            packages: report.packages.clone(),
            distributions: report.distributions.clone(),
            repositories: report.repositories.clone(),
            environments: report.environments.clone(),
            ..Default::default()
        };
        let known = self.current_vulnerabilities();
        for (id, pkg) in &report.packages {
            for v in known.iter().filter(|v| affects(v, pkg)) {
                out.vulnerabilities.insert(v.id.clone(), v.clone());
                out.package_vulnerabilities.entry(id.clone()).or_default().push(v.id.clone());
            }
        }
        Ok(out)
    }

    async fn update_operations(&self, kind: UpdateKind) -> Result<UpdateOperations, ServiceError> {
        Ok(group(self.snapshots(kind), false))
    }

    async fn latest_update_operations(&self, kind: UpdateKind) -> Result<UpdateOperations, ServiceError> {
        Ok(group(self.snapshots(kind), true))
    }

    async fn latest_update_operation(&self, kind: UpdateKind) -> Result<Option<Uuid>, ServiceError> {
        Ok(self.snapshots(kind).first().map(|(_, op)| op.reference))
    }

    async fn update_diff(&self, prev: Option<Uuid>, cur: Uuid) -> Result<UpdateDiff, ServiceError> {
        let cur_op = self
            .updates
            .get(&cur)
            .map(|s| s.op.clone())
            .ok_or_else(|| ServiceError::NotFound(format!("update operation {cur}")))?;
        let cur_vulns = self.vulns_of(cur)?;

        let (prev_op, prev_vulns) = match prev {
            Some(p) => {
                let op = self
                    .updates
                    .get(&p)
                    .map(|s| s.op.clone())
                    .ok_or_else(|| ServiceError::NotFound(format!("update operation {p}")))?;
                if op.updater != cur_op.updater {
                    return Err(ServiceError::InvalidInput(format!(
                        "operations belong to different updaters: {} and {}",
                        op.updater, cur_op.updater
                    )));
                }
                (Some(op), self.vulns_of(p)?)
            }
            None => (None, Vec::new()),
        };

        let before: BTreeSet<&str> = prev_vulns.iter().map(|v| v.id.as_str()).collect();
        let after: BTreeSet<&str> = cur_vulns.iter().map(|v| v.id.as_str()).collect();
        let added = cur_vulns
            .iter()
            .filter(|v| !before.contains(v.id.as_str()))
            .cloned()
            .collect();
        let removed = prev_vulns
            .iter()
            .filter(|v| !after.contains(v.id.as_str()))
            .cloned()
            .collect();

        Ok(UpdateDiff {
            prev: prev_op,
            cur: cur_op,
            added,
            removed,
        })
    }

    async fn delete_update_operations(&self, refs: &[Uuid]) -> Result<usize, ServiceError> {
        Ok(refs.iter().filter(|r| self.updates.remove(r).is_some()).count())
    }
}

#[async_trait]
impl Notifier for MemoryBackend {
    async fn notifications(&self, id: Uuid, page: Page) -> Result<(Vec<Notification>, Page), ServiceError> {
        let all = self
            .notifications
            .get(&id)
            .ok_or_else(|| ServiceError::NotFound(format!("notification {id}")))?;

        let start = match page.next {
            Some(next) => all
                .iter()
                .position(|n| n.id == next)
                .ok_or_else(|| ServiceError::InvalidInput(format!("unknown page token {next}")))?,
            None => 0,
        };
        let size = usize::try_from(page.size).unwrap_or(usize::MAX).max(1);
        let end = start.saturating_add(size).min(all.len());
        let out = all[start..end].to_vec();
        let next = all.get(end).map(|n| n.id);

        Ok((
            out,
            Page {
                size: page.size,
                next,
            },
        ))
    }

    async fn delete_notifications(&self, id: Uuid) -> Result<(), ServiceError> {
        self.notifications.remove(&id);
        Ok(())
    }
}

#[async_trait]
impl KeyStore for MemoryBackend {
    async fn keys(&self) -> Result<Vec<Key>, ServiceError> {
        let mut keys: Vec<Key> = self.keys.iter().map(|k| k.clone()).collect();
        keys.sort_by_key(|k| k.id);
        Ok(keys)
    }

    async fn key_by_id(&self, id: Uuid) -> Result<Option<Key>, ServiceError> {
        Ok(self.keys.get(&id).map(|k| k.clone()))
    }
}
