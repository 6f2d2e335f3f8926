//! Vulnerabilities and the reports that attach them to packages.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde_json::value::RawValue;

use super::{Digest, Distribution, Environment, Package, ParseError, Repository, Version};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Vulnerability {
    pub id: String,
    pub updater: String,
    pub name: String,
    pub description: String,
    pub issued: Option<DateTime<Utc>>,
    pub links: String,
    pub severity: String,
    pub normalized_severity: Severity,
    pub package: Option<Package>,
    pub distribution: Option<Distribution>,
    pub repository: Option<Repository>,
    pub fixed_in_version: String,
    pub range: Option<Range>,
    pub arch_op: Option<ArchOp>,
}

/// Affected versions, lower bound inclusive and upper bound exclusive.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Range {
    pub lower: Version,
    pub upper: Version,
}

impl Range {
    pub fn contains(&self, v: &Version) -> bool {
        let above = self.lower.is_zero() || matches!(self.lower.partial_cmp(v), Some(o) if o.is_le());
        let below = self.upper.is_zero() || matches!(v.partial_cmp(&self.upper), Some(o) if o.is_lt());
        above && below
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    #[default]
    Unknown,
    Negligible,
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Unknown => "Unknown",
            Severity::Negligible => "Negligible",
            Severity::Low => "Low",
            Severity::Medium => "Medium",
            Severity::High => "High",
            Severity::Critical => "Critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "Unknown" | "" => Severity::Unknown,
            "Negligible" => Severity::Negligible,
            "Low" => Severity::Low,
            "Medium" => Severity::Medium,
            "High" => Severity::High,
            "Critical" => Severity::Critical,
            _ => return Err(ParseError::new("severity", s, "unknown severity")),
        })
    }
}

/// How a vulnerability's architecture is compared against a package's.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArchOp {
    Equals,
    NotEquals,
    PatternMatch,
}

impl fmt::Display for ArchOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ArchOp::Equals => "equals",
            ArchOp::NotEquals => "not equals",
            ArchOp::PatternMatch => "pattern match",
        })
    }
}

impl FromStr for ArchOp {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "equals" => Ok(ArchOp::Equals),
            "not equals" => Ok(ArchOp::NotEquals),
            "pattern match" => Ok(ArchOp::PatternMatch),
            _ => Err(ParseError::new("arch_op", s, "unknown operation")),
        }
    }
}

/// An opaque JSON document carried through untouched.
#[derive(Debug, Clone)]
pub struct RawDocument(pub Box<RawValue>);

impl RawDocument {
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        RawValue::from_string(s.to_string()).map(Self)
    }

    pub fn get(&self) -> &str {
        self.0.get()
    }
}

impl PartialEq for RawDocument {
    fn eq(&self, other: &Self) -> bool {
        self.get() == other.get()
    }
}

/// The result of matching an index report against known vulnerabilities.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VulnerabilityReport {
    pub hash: Digest,
    pub packages: BTreeMap<String, Package>,
    pub distributions: BTreeMap<String, Distribution>,
    pub repositories: BTreeMap<String, Repository>,
    pub environments: BTreeMap<String, Vec<Environment>>,
    pub vulnerabilities: BTreeMap<String, Vulnerability>,
    /// Package id to the ids of vulnerabilities affecting it.
    pub package_vulnerabilities: BTreeMap<String, Vec<String>>,
    /// Updater name to the enrichment documents it produced.
    pub enrichments: BTreeMap<String, Vec<RawDocument>>,
}

/// Which indexed manifests a set of vulnerabilities affects.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AffectedManifests {
    pub vulnerabilities: BTreeMap<String, Vulnerability>,
    /// Vulnerability id to manifest digests.
    pub vulnerable_manifests: BTreeMap<String, Vec<String>>,
}
