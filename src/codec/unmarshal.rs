//! Per-type decoders: one "keys" state per record.

use std::collections::BTreeMap;
use std::fmt::Display;
use std::str::FromStr;

use uuid::Uuid;

use super::machine::{array, done, map, record, run, Machine, State};
use super::marshal::fingerprint_bytes;
use super::{DecodeError, Reader, Token, Unmarshal};
use crate::types::{
    AffectedManifests, Digest, Distribution, Environment, IndexReport, Layer, Manifest,
    Notification, Package, Page, Range, RawDocument, Reason, Repository, UpdateDiff,
    UpdateKind, UpdateOperation, VulnSummary, Vulnerability, VulnerabilityReport,
};

/// Decode a bare string through `FromStr`.
fn text<T>(r: &mut Reader) -> Result<T, DecodeError>
where
    T: FromStr + Default,
    T::Err: Display,
{
    match r.read_token()? {
        Token::String(s) => s.parse().map_err(|e: T::Err| DecodeError::InvalidValue {
            pointer: r.pointer(),
            msg: e.to_string(),
        }),
        Token::Null => Ok(T::default()),
        _ => Err(DecodeError::UnexpectedToken(r.pointer())),
    }
}

macro_rules! unmarshal_text {
    ($($t:ty),* $(,)?) => {$(
        impl Unmarshal for $t {
            fn unmarshal(r: &mut Reader) -> Result<Self, DecodeError> {
                text(r)
            }
        }
    )*};
}

unmarshal_text!(Digest, Uuid, UpdateKind, Reason);

impl Unmarshal for String {
    fn unmarshal(r: &mut Reader) -> Result<Self, DecodeError> {
        match r.read_token()? {
            Token::String(s) => Ok(s),
            Token::Null => Ok(String::new()),
            _ => Err(DecodeError::UnexpectedToken(r.pointer())),
        }
    }
}

impl Unmarshal for RawDocument {
    fn unmarshal(r: &mut Reader) -> Result<Self, DecodeError> {
        r.read_raw().map(RawDocument)
    }
}

impl<T: Unmarshal> Unmarshal for Box<T> {
    fn unmarshal(r: &mut Reader) -> Result<Self, DecodeError> {
        T::unmarshal(r).map(Box::new)
    }
}

impl<T: Unmarshal + 'static> Unmarshal for Vec<T> {
    fn unmarshal(r: &mut Reader) -> Result<Self, DecodeError> {
        let mut out = Vec::new();
        run(r, &mut out, array(|v: &mut Vec<T>| v, done))?;
        Ok(out)
    }
}

impl<T: Unmarshal + 'static> Unmarshal for BTreeMap<String, T> {
    fn unmarshal(r: &mut Reader) -> Result<Self, DecodeError> {
        let mut out = BTreeMap::new();
        run(r, &mut out, map(|v: &mut BTreeMap<String, T>| v, done))?;
        Ok(out)
    }
}

macro_rules! unmarshal_record {
    ($($t:ty => $keys:ident),* $(,)?) => {$(
        impl Unmarshal for $t {
            fn unmarshal(r: &mut Reader) -> Result<Self, DecodeError> {
                record(r, $keys)
            }
        }
    )*};
}

unmarshal_record!(
    Manifest => manifest_keys,
    Layer => layer_keys,
    IndexReport => index_report_keys,
    Package => package_keys,
    Distribution => distribution_keys,
    Repository => repository_keys,
    Environment => environment_keys,
    Vulnerability => vulnerability_keys,
    Range => range_keys,
    VulnerabilityReport => vulnerability_report_keys,
    AffectedManifests => affected_manifests_keys,
    UpdateOperation => update_operation_keys,
    UpdateDiff => update_diff_keys,
    Notification => notification_keys,
    VulnSummary => vuln_summary_keys,
    Page => page_keys,
);

fn manifest_keys(m: &mut Machine<'_, Manifest>) -> Option<State<Manifest>> {
    match m.key()?.as_str() {
        "hash" => m.text(|v| &mut v.hash, manifest_keys),
        "layers" => Some(array(|v: &mut Manifest| &mut v.layers, manifest_keys)),
        _ => m.skip(manifest_keys),
    }
}

fn layer_keys(m: &mut Machine<'_, Layer>) -> Option<State<Layer>> {
    match m.key()?.as_str() {
        "hash" => m.text(|v| &mut v.hash, layer_keys),
        "uri" => m.string(|v| &mut v.uri, layer_keys),
        "headers" => Some(map(|v: &mut Layer| &mut v.headers, layer_keys)),
        _ => m.skip(layer_keys),
    }
}

fn index_report_keys(m: &mut Machine<'_, IndexReport>) -> Option<State<IndexReport>> {
    match m.key()?.as_str() {
        "manifest_hash" => m.text(|v| &mut v.hash, index_report_keys),
        "state" => m.string(|v| &mut v.state, index_report_keys),
        "success" => m.bool(|v| &mut v.success, index_report_keys),
        "err" => m.string(|v| &mut v.err, index_report_keys),
        "packages" => Some(map(|v: &mut IndexReport| &mut v.packages, index_report_keys)),
        "distributions" => Some(map(|v: &mut IndexReport| &mut v.distributions, index_report_keys)),
        "repository" => Some(map(|v: &mut IndexReport| &mut v.repositories, index_report_keys)),
        "environments" => Some(map(|v: &mut IndexReport| &mut v.environments, index_report_keys)),
        _ => m.skip(index_report_keys),
    }
}

fn package_keys(m: &mut Machine<'_, Package>) -> Option<State<Package>> {
    match m.key()?.as_str() {
        "id" => m.string(|v| &mut v.id, package_keys),
        "name" => m.string(|v| &mut v.name, package_keys),
        "version" => m.string(|v| &mut v.version, package_keys),
        "kind" => m.string(|v| &mut v.kind, package_keys),
        "module" => m.string(|v| &mut v.module, package_keys),
        "arch" => m.string(|v| &mut v.arch, package_keys),
        "normalized_version" => m.text(|v| &mut v.normalized_version, package_keys),
        "cpe" => m.text(|v| &mut v.cpe, package_keys),
        "source" => m.optional(|v| &mut v.source, package_keys),
        _ => m.skip(package_keys),
    }
}

fn distribution_keys(m: &mut Machine<'_, Distribution>) -> Option<State<Distribution>> {
    match m.key()?.as_str() {
        "id" => m.string(|v| &mut v.id, distribution_keys),
        "did" => m.string(|v| &mut v.did, distribution_keys),
        "name" => m.string(|v| &mut v.name, distribution_keys),
        "version" => m.string(|v| &mut v.version, distribution_keys),
        "version_code_name" => m.string(|v| &mut v.version_code_name, distribution_keys),
        "version_id" => m.string(|v| &mut v.version_id, distribution_keys),
        "arch" => m.string(|v| &mut v.arch, distribution_keys),
        "cpe" => m.text(|v| &mut v.cpe, distribution_keys),
        "pretty_name" => m.string(|v| &mut v.pretty_name, distribution_keys),
        _ => m.skip(distribution_keys),
    }
}

fn repository_keys(m: &mut Machine<'_, Repository>) -> Option<State<Repository>> {
    match m.key()?.as_str() {
        "id" => m.string(|v| &mut v.id, repository_keys),
        "name" => m.string(|v| &mut v.name, repository_keys),
        "key" => m.string(|v| &mut v.key, repository_keys),
        "uri" => m.string(|v| &mut v.uri, repository_keys),
        "cpe" => m.text(|v| &mut v.cpe, repository_keys),
        _ => m.skip(repository_keys),
    }
}

fn environment_keys(m: &mut Machine<'_, Environment>) -> Option<State<Environment>> {
    match m.key()?.as_str() {
        "package_db" => m.string(|v| &mut v.package_db, environment_keys),
        "distribution_id" => m.string(|v| &mut v.distribution_id, environment_keys),
        "introduced_in" => m.text(|v| &mut v.introduced_in, environment_keys),
        "repository_ids" => Some(array(|v: &mut Environment| &mut v.repository_ids, environment_keys)),
        _ => m.skip(environment_keys),
    }
}

fn vulnerability_keys(m: &mut Machine<'_, Vulnerability>) -> Option<State<Vulnerability>> {
    match m.key()?.as_str() {
        "id" => m.string(|v| &mut v.id, vulnerability_keys),
        "updater" => m.string(|v| &mut v.updater, vulnerability_keys),
        "name" => m.string(|v| &mut v.name, vulnerability_keys),
        "description" => m.string(|v| &mut v.description, vulnerability_keys),
        "links" => m.string(|v| &mut v.links, vulnerability_keys),
        "severity" => m.string(|v| &mut v.severity, vulnerability_keys),
        "fixed_in_version" => m.string(|v| &mut v.fixed_in_version, vulnerability_keys),
        "normalized_severity" => m.text(|v| &mut v.normalized_severity, vulnerability_keys),
        "issued" => m.opt_text(|v| &mut v.issued, vulnerability_keys),
        "package" => m.optional(|v| &mut v.package, vulnerability_keys),
        "distribution" => m.optional(|v| &mut v.distribution, vulnerability_keys),
        "repository" => m.optional(|v| &mut v.repository, vulnerability_keys),
        "range" => m.optional(|v| &mut v.range, vulnerability_keys),
        "arch_op" => m.opt_text(|v| &mut v.arch_op, vulnerability_keys),
        _ => m.skip(vulnerability_keys),
    }
}

fn range_keys(m: &mut Machine<'_, Range>) -> Option<State<Range>> {
    match m.key()?.as_str() {
        "[" => m.text(|v| &mut v.lower, range_keys),
        ")" => m.text(|v| &mut v.upper, range_keys),
        _ => m.skip(range_keys),
    }
}

fn vulnerability_report_keys(m: &mut Machine<'_, VulnerabilityReport>) -> Option<State<VulnerabilityReport>> {
    type R = VulnerabilityReport;
    let next = vulnerability_report_keys;
    match m.key()?.as_str() {
        "manifest_hash" => m.text(|v| &mut v.hash, next),
        "packages" => Some(map(|v: &mut R| &mut v.packages, next)),
        "distributions" => Some(map(|v: &mut R| &mut v.distributions, next)),
        "repository" => Some(map(|v: &mut R| &mut v.repositories, next)),
        "environments" => Some(map(|v: &mut R| &mut v.environments, next)),
        "vulnerabilities" => Some(map(|v: &mut R| &mut v.vulnerabilities, next)),
        "package_vulnerabilities" => Some(map(|v: &mut R| &mut v.package_vulnerabilities, next)),
        "enrichments" => Some(map(|v: &mut R| &mut v.enrichments, next)),
        _ => m.skip(next),
    }
}

fn affected_manifests_keys(m: &mut Machine<'_, AffectedManifests>) -> Option<State<AffectedManifests>> {
    match m.key()?.as_str() {
        "vulnerabilities" => Some(map(
            |v: &mut AffectedManifests| &mut v.vulnerabilities,
            affected_manifests_keys,
        )),
        "vulnerable_manifests" => Some(map(
            |v: &mut AffectedManifests| &mut v.vulnerable_manifests,
            affected_manifests_keys,
        )),
        _ => m.skip(affected_manifests_keys),
    }
}

fn update_operation_keys(m: &mut Machine<'_, UpdateOperation>) -> Option<State<UpdateOperation>> {
    match m.key()?.as_str() {
        "ref" => m.text(|v| &mut v.reference, update_operation_keys),
        "updater" => m.string(|v| &mut v.updater, update_operation_keys),
        "fingerprint" => match m.token()? {
            Token::String(s) => {
                m.out.fingerprint = fingerprint_bytes(s);
                Some(State::Keys(update_operation_keys))
            }
            Token::Null => Some(State::Keys(update_operation_keys)),
            _ => m.unexpected(),
        },
        "date" => m.text(|v| &mut v.date, update_operation_keys),
        "kind" => m.text(|v| &mut v.kind, update_operation_keys),
        _ => m.skip(update_operation_keys),
    }
}

fn update_diff_keys(m: &mut Machine<'_, UpdateDiff>) -> Option<State<UpdateDiff>> {
    match m.key()?.as_str() {
        "prev" => m.optional(|v| &mut v.prev, update_diff_keys),
        "cur" => m.value(|v| &mut v.cur, update_diff_keys),
        "added" => Some(array(|v: &mut UpdateDiff| &mut v.added, update_diff_keys)),
        "removed" => Some(array(|v: &mut UpdateDiff| &mut v.removed, update_diff_keys)),
        _ => m.skip(update_diff_keys),
    }
}

fn notification_keys(m: &mut Machine<'_, Notification>) -> Option<State<Notification>> {
    match m.key()?.as_str() {
        "id" => m.text(|v| &mut v.id, notification_keys),
        "manifest" => m.text(|v| &mut v.manifest, notification_keys),
        "reason" => m.text(|v| &mut v.reason, notification_keys),
        "vulnerability" => m.value(|v| &mut v.vulnerability, notification_keys),
        _ => m.skip(notification_keys),
    }
}

fn vuln_summary_keys(m: &mut Machine<'_, VulnSummary>) -> Option<State<VulnSummary>> {
    match m.key()?.as_str() {
        "name" => m.string(|v| &mut v.name, vuln_summary_keys),
        "fixed_in_version" => m.string(|v| &mut v.fixed_in_version, vuln_summary_keys),
        "links" => m.string(|v| &mut v.links, vuln_summary_keys),
        "description" => m.string(|v| &mut v.description, vuln_summary_keys),
        "normalized_severity" => m.text(|v| &mut v.normalized_severity, vuln_summary_keys),
        "package" => m.optional(|v| &mut v.package, vuln_summary_keys),
        "distribution" => m.optional(|v| &mut v.distribution, vuln_summary_keys),
        "repository" => m.optional(|v| &mut v.repository, vuln_summary_keys),
        _ => m.skip(vuln_summary_keys),
    }
}

fn page_keys(m: &mut Machine<'_, Page>) -> Option<State<Page>> {
    match m.key()?.as_str() {
        "size" => m.u64(|v| &mut v.size, page_keys),
        "next" => m.opt_text(|v| &mut v.next, page_keys),
        _ => m.skip(page_keys),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{from_slice, to_vec};
    use crate::types::{Cpe, Severity, Version};

    fn package(name: &str) -> Package {
        Package {
            id: "1".into(),
            name: name.into(),
            version: "1.2.3".into(),
            kind: "binary".into(),
            normalized_version: Version::new("semver", &[1, 2, 3]),
            cpe: "cpe:/a:example:openssl:1.2.3".parse::<Cpe>().unwrap(),
            source: Some(Box::new(Package {
                id: "2".into(),
                name: format!("{name}-src"),
                kind: "source".into(),
                ..Default::default()
            })),
            ..Default::default()
        }
    }

    #[test]
    fn index_report_round_trips() {
        let mut report = IndexReport {
            hash: Digest::sha256([7; 32]),
            state: "IndexFinished".into(),
            success: true,
            ..Default::default()
        };
        report.packages.insert("1".into(), package("openssl"));
        report.distributions.insert(
            "3".into(),
            Distribution {
                id: "3".into(),
                did: "debian".into(),
                version_id: "12".into(),
                ..Default::default()
            },
        );
        report.environments.insert(
            "1".into(),
            vec![Environment {
                package_db: "var/lib/dpkg/status".into(),
                distribution_id: "3".into(),
                introduced_in: Digest::sha256([9; 32]),
                repository_ids: vec!["r1".into(), "r2".into()],
            }],
        );

        let bytes = to_vec(&report).unwrap();
        let back: IndexReport = from_slice(&bytes).unwrap();
        assert_eq!(back, report);
    }

    #[test]
    fn manifest_with_multi_valued_headers() {
        let body = br#"{
            "hash": "sha256:0707070707070707070707070707070707070707070707070707070707070707",
            "layers": [{
                "hash": "sha256:0909090909090909090909090909090909090909090909090909090909090909",
                "uri": "https://registry.example/blobs/1",
                "headers": {"Authorization": ["Bearer a", "Bearer b"]}
            }]
        }"#;
        let m: Manifest = from_slice(body).unwrap();
        assert_eq!(m.hash, Digest::sha256([7; 32]));
        assert_eq!(m.layers.len(), 1);
        assert_eq!(m.layers[0].headers["Authorization"], vec!["Bearer a", "Bearer b"]);
        assert!(m.is_valid());
    }

    #[test]
    fn vulnerability_round_trips() {
        let v = Vulnerability {
            id: "42".into(),
            updater: "osv".into(),
            name: "CVE-2024-0001".into(),
            issued: chrono::DateTime::from_timestamp(1_700_000_000, 500_000_000),
            normalized_severity: Severity::High,
            package: Some(package("zlib")),
            range: Some(Range {
                lower: Version::new("semver", &[1]),
                upper: Version::new("semver", &[2]),
            }),
            arch_op: Some("pattern match".parse().unwrap()),
            ..Default::default()
        };
        let back: Vulnerability = from_slice(&to_vec(&v).unwrap()).unwrap();
        assert_eq!(back, v);
    }

    #[test]
    fn zero_values_round_trip() {
        let back: IndexReport = from_slice(&to_vec(&IndexReport::default()).unwrap()).unwrap();
        assert_eq!(back, IndexReport::default());
        let back: Vulnerability = from_slice(&to_vec(&Vulnerability::default()).unwrap()).unwrap();
        assert_eq!(back, Vulnerability::default());
        let back: UpdateDiff = from_slice(&to_vec(&UpdateDiff::default()).unwrap()).unwrap();
        assert_eq!(back, UpdateDiff::default());
    }

    #[test]
    fn unknown_keys_are_skipped() {
        let body = br#"{"name":"x","future":{"a":[1,2,{"b":null}]},"version":"1"}"#;
        let p: Package = from_slice(body).unwrap();
        assert_eq!(p.name, "x");
        assert_eq!(p.version, "1");
    }

    #[test]
    fn digest_list() {
        let body = br#"["sha256:0707070707070707070707070707070707070707070707070707070707070707"]"#;
        let ds: Vec<Digest> = from_slice(body).unwrap();
        assert_eq!(ds, vec![Digest::sha256([7; 32])]);
        let empty: Vec<Digest> = from_slice(b"[]").unwrap();
        assert!(empty.is_empty());
    }

    #[test]
    fn bad_value_reports_pointer() {
        let body = br#"{"packages":{"1":{"name":"a"},"2":{"name":7}}}"#;
        let err = from_slice::<IndexReport>(body).unwrap_err();
        assert!(err.to_string().contains("/packages/2/name"), "{err}");

        let body = br#"{"hash":"md5:abcd"}"#;
        let err = from_slice::<Manifest>(body).unwrap_err();
        assert!(matches!(err, DecodeError::InvalidValue { .. }), "{err}");
    }

    #[test]
    fn trailing_data_is_rejected() {
        assert!(from_slice::<Package>(br#"{"name":"x"} {"#).is_err());
        assert!(from_slice::<Package>(br#"{"name":"x""#).is_err());
    }

    #[test]
    fn fingerprint_keeps_text_bytes() {
        let op: UpdateOperation = from_slice(
            br#"{"ref":"6ba7b810-9dad-11d1-80b4-00c04fd430c8","fingerprint":"etag-1","kind":"enrichment"}"#,
        )
        .unwrap();
        assert_eq!(op.fingerprint, b"etag-1");
        assert_eq!(op.kind, UpdateKind::Enrichment);
    }

    #[test]
    fn binary_fingerprint_survives_round_trip() {
        let op = UpdateOperation {
            reference: "6ba7b810-9dad-11d1-80b4-00c04fd430c8".parse().unwrap(),
            updater: "osv".into(),
            fingerprint: vec![0xff, 0xfe, 0x00],
            kind: UpdateKind::Vulnerability,
            ..Default::default()
        };
        let encoded = to_vec(&op).unwrap();
        let back: UpdateOperation = from_slice(&encoded).unwrap();
        assert_eq!(back, op);
    }

    #[test]
    fn page_next_is_optional() {
        let p: Page = from_slice(br#"{"size":500}"#).unwrap();
        assert_eq!(p, Page { size: 500, next: None });
        let p: Page = from_slice(br#"{"size":1,"next":"6ba7b810-9dad-11d1-80b4-00c04fd430c8"}"#).unwrap();
        assert!(p.next.is_some());
    }
}
