//! Per-type encoders. Zero-valued optional fields are omitted.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::io::Write;

use base64::prelude::{Engine, BASE64_STANDARD};
use chrono::{DateTime, SecondsFormat, Utc};
use uuid::Uuid;

use super::{EncodeError, Marshal, TokenWriter};
use crate::types::{
    AffectedManifests, ArchOp, Cpe, Digest, Distribution, Environment, IndexReport, Key, Layer,
    Manifest, Notification, Package, Page, RawDocument, Reason, Repository, Severity,
    UpdateDiff, UpdateKind, UpdateOperation, Version, VulnSummary, Vulnerability,
    VulnerabilityReport,
};

type Result = std::result::Result<(), EncodeError>;

macro_rules! marshal_text {
    ($($t:ty),* $(,)?) => {$(
        impl Marshal for $t {
            fn marshal<W: Write>(&self, w: &mut TokenWriter<W>) -> Result {
                w.text(self)
            }
        }
    )*};
}

marshal_text!(Digest, Uuid, Version, Cpe, Severity, ArchOp, UpdateKind, Reason);

impl Marshal for str {
    fn marshal<W: Write>(&self, w: &mut TokenWriter<W>) -> Result {
        w.string(self)
    }
}

impl Marshal for String {
    fn marshal<W: Write>(&self, w: &mut TokenWriter<W>) -> Result {
        w.string(self)
    }
}

impl Marshal for bool {
    fn marshal<W: Write>(&self, w: &mut TokenWriter<W>) -> Result {
        w.bool(*self)
    }
}

impl Marshal for u64 {
    fn marshal<W: Write>(&self, w: &mut TokenWriter<W>) -> Result {
        w.u64(*self)
    }
}

impl Marshal for RawDocument {
    fn marshal<W: Write>(&self, w: &mut TokenWriter<W>) -> Result {
        w.raw(&self.0)
    }
}

impl<T: Marshal + ?Sized> Marshal for Box<T> {
    fn marshal<W: Write>(&self, w: &mut TokenWriter<W>) -> Result {
        (**self).marshal(w)
    }
}

impl<T: Marshal> Marshal for Option<T> {
    fn marshal<W: Write>(&self, w: &mut TokenWriter<W>) -> Result {
        match self {
            Some(v) => v.marshal(w),
            None => w.null(),
        }
    }
}

impl<T: Marshal> Marshal for [T] {
    fn marshal<W: Write>(&self, w: &mut TokenWriter<W>) -> Result {
        w.begin_array()?;
        for v in self {
            v.marshal(w)?;
        }
        w.end_array()
    }
}

impl<T: Marshal> Marshal for Vec<T> {
    fn marshal<W: Write>(&self, w: &mut TokenWriter<W>) -> Result {
        self.as_slice().marshal(w)
    }
}

impl<T: Marshal> Marshal for BTreeMap<String, T> {
    fn marshal<W: Write>(&self, w: &mut TokenWriter<W>) -> Result {
        w.begin_object()?;
        for (k, v) in self {
            w.field(k, v)?;
        }
        w.end_object()
    }
}

fn rfc3339(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

/// `key: value` for a map, skipped when empty.
fn field_map<W: Write, T: Marshal>(w: &mut TokenWriter<W>, key: &str, m: &BTreeMap<String, T>) -> Result {
    if m.is_empty() {
        return Ok(());
    }
    w.field(key, m)
}

/// `key: value` for a list, skipped when empty.
fn field_list<W: Write, T: Marshal>(w: &mut TokenWriter<W>, key: &str, l: &[T]) -> Result {
    if l.is_empty() {
        return Ok(());
    }
    w.field(key, l)
}

/// `key: value` for a nested record, skipped when absent.
fn field_opt<W: Write, T: Marshal>(w: &mut TokenWriter<W>, key: &str, v: &Option<T>) -> Result {
    match v {
        Some(v) => w.field(key, v),
        None => Ok(()),
    }
}

impl Marshal for Manifest {
    fn marshal<W: Write>(&self, w: &mut TokenWriter<W>) -> Result {
        w.begin_object()?;
        w.field("hash", &self.hash)?;
        field_list(w, "layers", &self.layers)?;
        w.end_object()
    }
}

impl Marshal for Layer {
    fn marshal<W: Write>(&self, w: &mut TokenWriter<W>) -> Result {
        w.begin_object()?;
        w.field("hash", &self.hash)?;
        w.field("uri", &self.uri)?;
        field_map(w, "headers", &self.headers)?;
        w.end_object()
    }
}

impl Marshal for IndexReport {
    fn marshal<W: Write>(&self, w: &mut TokenWriter<W>) -> Result {
        w.begin_object()?;
        w.field("manifest_hash", &self.hash)?;
        w.field("state", &self.state)?;
        w.field("success", &self.success)?;
        w.field_str("err", &self.err)?;
        field_map(w, "packages", &self.packages)?;
        field_map(w, "distributions", &self.distributions)?;
        field_map(w, "repository", &self.repositories)?;
        field_map(w, "environments", &self.environments)?;
        w.end_object()
    }
}

impl Marshal for Package {
    fn marshal<W: Write>(&self, w: &mut TokenWriter<W>) -> Result {
        w.begin_object()?;
        w.field_str("id", &self.id)?;
        w.field_str("name", &self.name)?;
        w.field_str("version", &self.version)?;
        w.field_str("kind", &self.kind)?;
        w.field_str("module", &self.module)?;
        w.field_str("arch", &self.arch)?;
        w.field_text("normalized_version", &self.normalized_version)?;
        w.field_text("cpe", &self.cpe)?;
        field_opt(w, "source", &self.source)?;
        w.end_object()
    }
}

impl Marshal for Distribution {
    fn marshal<W: Write>(&self, w: &mut TokenWriter<W>) -> Result {
        w.begin_object()?;
        w.field_str("id", &self.id)?;
        w.field_str("did", &self.did)?;
        w.field_str("name", &self.name)?;
        w.field_str("version", &self.version)?;
        w.field_str("version_code_name", &self.version_code_name)?;
        w.field_str("version_id", &self.version_id)?;
        w.field_str("arch", &self.arch)?;
        w.field_text("cpe", &self.cpe)?;
        w.field_str("pretty_name", &self.pretty_name)?;
        w.end_object()
    }
}

impl Marshal for Repository {
    fn marshal<W: Write>(&self, w: &mut TokenWriter<W>) -> Result {
        w.begin_object()?;
        w.field_str("id", &self.id)?;
        w.field_str("name", &self.name)?;
        w.field_str("key", &self.key)?;
        w.field_str("uri", &self.uri)?;
        w.field_text("cpe", &self.cpe)?;
        w.end_object()
    }
}

impl Marshal for Environment {
    fn marshal<W: Write>(&self, w: &mut TokenWriter<W>) -> Result {
        w.begin_object()?;
        w.field_str("package_db", &self.package_db)?;
        w.field_str("distribution_id", &self.distribution_id)?;
        w.field_text("introduced_in", &self.introduced_in)?;
        field_list(w, "repository_ids", &self.repository_ids)?;
        w.end_object()
    }
}

impl Marshal for Vulnerability {
    fn marshal<W: Write>(&self, w: &mut TokenWriter<W>) -> Result {
        w.begin_object()?;
        w.field_str("id", &self.id)?;
        w.field_str("updater", &self.updater)?;
        w.field_str("name", &self.name)?;
        w.field_str("description", &self.description)?;
        w.field_str("links", &self.links)?;
        w.field_str("severity", &self.severity)?;
        w.field_str("fixed_in_version", &self.fixed_in_version)?;
        w.field("normalized_severity", &self.normalized_severity)?;
        if let Some(issued) = &self.issued {
            w.key("issued")?;
            w.string(&rfc3339(issued))?;
        }
        field_opt(w, "package", &self.package)?;
        field_opt(w, "distribution", &self.distribution)?;
        field_opt(w, "repository", &self.repository)?;
        field_opt(w, "range", &self.range)?;
        field_opt(w, "arch_op", &self.arch_op)?;
        w.end_object()
    }
}

impl Marshal for crate::types::Range {
    fn marshal<W: Write>(&self, w: &mut TokenWriter<W>) -> Result {
        w.begin_object()?;
        w.field_text("[", &self.lower)?;
        w.field_text(")", &self.upper)?;
        w.end_object()
    }
}

impl Marshal for VulnerabilityReport {
    fn marshal<W: Write>(&self, w: &mut TokenWriter<W>) -> Result {
        w.begin_object()?;
        w.field("manifest_hash", &self.hash)?;
        field_map(w, "packages", &self.packages)?;
        field_map(w, "distributions", &self.distributions)?;
        field_map(w, "repository", &self.repositories)?;
        field_map(w, "environments", &self.environments)?;
        field_map(w, "vulnerabilities", &self.vulnerabilities)?;
        field_map(w, "package_vulnerabilities", &self.package_vulnerabilities)?;
        field_map(w, "enrichments", &self.enrichments)?;
        w.end_object()
    }
}

impl Marshal for AffectedManifests {
    fn marshal<W: Write>(&self, w: &mut TokenWriter<W>) -> Result {
        w.begin_object()?;
        field_map(w, "vulnerabilities", &self.vulnerabilities)?;
        field_map(w, "vulnerable_manifests", &self.vulnerable_manifests)?;
        w.end_object()
    }
}

impl Marshal for UpdateOperation {
    fn marshal<W: Write>(&self, w: &mut TokenWriter<W>) -> Result {
        w.begin_object()?;
        w.field("ref", &self.reference)?;
        w.field("updater", &self.updater)?;
        w.key("fingerprint")?;
        w.string(&fingerprint_text(&self.fingerprint))?;
        w.key("date")?;
        w.string(&rfc3339(&self.date))?;
        w.field("kind", &self.kind)?;
        w.end_object()
    }
}

impl Marshal for UpdateDiff {
    fn marshal<W: Write>(&self, w: &mut TokenWriter<W>) -> Result {
        w.begin_object()?;
        field_opt(w, "prev", &self.prev)?;
        w.field("cur", &self.cur)?;
        field_list(w, "added", &self.added)?;
        field_list(w, "removed", &self.removed)?;
        w.end_object()
    }
}

impl Marshal for Notification {
    fn marshal<W: Write>(&self, w: &mut TokenWriter<W>) -> Result {
        w.begin_object()?;
        w.field("id", &self.id)?;
        w.field("manifest", &self.manifest)?;
        w.field("reason", &self.reason)?;
        w.field("vulnerability", &self.vulnerability)?;
        w.end_object()
    }
}

impl Marshal for VulnSummary {
    fn marshal<W: Write>(&self, w: &mut TokenWriter<W>) -> Result {
        w.begin_object()?;
        w.field_str("name", &self.name)?;
        w.field_str("fixed_in_version", &self.fixed_in_version)?;
        w.field_str("links", &self.links)?;
        w.field_str("description", &self.description)?;
        w.field("normalized_severity", &self.normalized_severity)?;
        field_opt(w, "package", &self.package)?;
        field_opt(w, "distribution", &self.distribution)?;
        field_opt(w, "repository", &self.repository)?;
        w.end_object()
    }
}

impl Marshal for Page {
    fn marshal<W: Write>(&self, w: &mut TokenWriter<W>) -> Result {
        w.begin_object()?;
        w.field("size", &self.size)?;
        field_opt(w, "next", &self.next)?;
        w.end_object()
    }
}

/// A key is served as its JWK document.
impl Marshal for Key {
    fn marshal<W: Write>(&self, w: &mut TokenWriter<W>) -> Result {
        w.raw(&self.jwk.0)
    }
}

/// Whether `text` reads back as base64: it is the canonical base64 of bytes
/// that would not have been written out as plain text themselves.
fn is_base64_form(text: &str) -> bool {
    if text.is_empty() {
        return false;
    }
    match BASE64_STANDARD.decode(text) {
        Ok(bytes) if BASE64_STANDARD.encode(&bytes) == text => match std::str::from_utf8(&bytes) {
            Ok(inner) => is_base64_form(inner),
            Err(_) => true,
        },
        _ => false,
    }
}

/// Wire text of a fingerprint: the bytes as UTF-8 when that reads back
/// unchanged, otherwise their base64.
pub(crate) fn fingerprint_text(bytes: &[u8]) -> Cow<'_, str> {
    match std::str::from_utf8(bytes) {
        Ok(s) if !is_base64_form(s) => Cow::Borrowed(s),
        _ => Cow::Owned(BASE64_STANDARD.encode(bytes)),
    }
}

/// Inverse of [`fingerprint_text`].
pub(crate) fn fingerprint_bytes(text: String) -> Vec<u8> {
    if is_base64_form(&text) {
        if let Ok(bytes) = BASE64_STANDARD.decode(&text) {
            return bytes;
        }
    }
    text.into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::to_vec;

    fn json<T: Marshal + ?Sized>(v: &T) -> String {
        String::from_utf8(to_vec(v).unwrap()).unwrap()
    }

    #[test]
    fn zero_records_are_minimal() {
        assert_eq!(json(&Package::default()), "{}");
        assert_eq!(json(&Distribution::default()), "{}");
        assert_eq!(json(&Repository::default()), "{}");
        assert_eq!(json(&Environment::default()), "{}");
        assert_eq!(json(&Vulnerability::default()), r#"{"normalized_severity":"Unknown"}"#);
        assert_eq!(json(&AffectedManifests::default()), "{}");
        assert_eq!(
            json(&IndexReport::default()),
            r#"{"manifest_hash":"","state":"","success":false}"#
        );
    }

    #[test]
    fn range_uses_interval_keys() {
        let r = crate::types::Range {
            lower: Version::new("semver", &[1]),
            upper: Version::default(),
        };
        assert_eq!(json(&r), r#"{"[":"semver:1.0.0.0.0.0.0.0.0.0"}"#);
    }

    #[test]
    fn fingerprint_text_or_base64() {
        let mut op = UpdateOperation {
            fingerprint: b"etag-1".to_vec(),
            ..Default::default()
        };
        assert!(json(&op).contains(r#""fingerprint":"etag-1""#));

        op.fingerprint = vec![0xff, 0xfe, 0x00];
        assert!(json(&op).contains(r#""fingerprint":"//4A""#));
    }

    #[test]
    fn fingerprint_text_reads_back() {
        let cases: [&[u8]; 7] = [
            b"",
            b"etag-1",
            b"abcd",
            &[0xff, 0xfe, 0x00],
            // Plain text that happens to spell the base64 of binary bytes.
            b"//4A",
            b"Ly80QQ==",
            &[0x80],
        ];
        for bytes in cases {
            let text = fingerprint_text(bytes).into_owned();
            assert_eq!(fingerprint_bytes(text.clone()), bytes, "via {text:?}");
        }
        assert_eq!(fingerprint_text(b"//4A"), "Ly80QQ==");
    }

    #[test]
    fn update_operation_layout() {
        let op = UpdateOperation {
            reference: Uuid::nil(),
            updater: "alpine".into(),
            fingerprint: Vec::new(),
            date: DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
            kind: UpdateKind::Enrichment,
        };
        assert_eq!(
            json(&op),
            concat!(
                r#"{"ref":"00000000-0000-0000-0000-000000000000","updater":"alpine","#,
                r#""fingerprint":"","date":"2023-11-14T22:13:20Z","kind":"enrichment"}"#
            )
        );
    }
}
