//! Notifications about manifests whose vulnerability status changed.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{Digest, Distribution, Package, ParseError, RawDocument, Repository, Severity};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Reason {
    #[default]
    Added,
    Removed,
    Changed,
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Reason::Added => "added",
            Reason::Removed => "removed",
            Reason::Changed => "changed",
        })
    }
}

impl FromStr for Reason {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "added" => Ok(Reason::Added),
            "removed" => Ok(Reason::Removed),
            "changed" => Ok(Reason::Changed),
            _ => Err(ParseError::new("reason", s, "unknown reason")),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Notification {
    pub id: Uuid,
    pub manifest: Digest,
    pub reason: Reason,
    pub vulnerability: VulnSummary,
}

/// The subset of a vulnerability a notification carries.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VulnSummary {
    pub name: String,
    pub fixed_in_version: String,
    pub links: String,
    pub description: String,
    pub normalized_severity: Severity,
    pub package: Option<Package>,
    pub distribution: Option<Distribution>,
    pub repository: Option<Repository>,
}

/// Pagination cursor for notification listings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Page {
    pub size: u64,
    pub next: Option<Uuid>,
}

/// A public key used to sign notification deliveries, as a JWK.
#[derive(Debug, Clone, PartialEq)]
pub struct Key {
    pub id: Uuid,
    pub expiration: DateTime<Utc>,
    pub jwk: RawDocument,
}
