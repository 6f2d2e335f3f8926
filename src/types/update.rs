//! Records of vulnerability-data ingestion runs.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{ParseError, Vulnerability};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum UpdateKind {
    #[default]
    Vulnerability,
    Enrichment,
}

impl fmt::Display for UpdateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            UpdateKind::Vulnerability => "vulnerability",
            UpdateKind::Enrichment => "enrichment",
        })
    }
}

impl FromStr for UpdateKind {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "vulnerability" => Ok(UpdateKind::Vulnerability),
            "enrichment" => Ok(UpdateKind::Enrichment),
            _ => Err(ParseError::new("update kind", s, "want vulnerability or enrichment")),
        }
    }
}

/// One completed run of an updater.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateOperation {
    pub reference: Uuid,
    pub updater: String,
    /// Updater-defined marker of the upstream data it consumed.
    pub fingerprint: Vec<u8>,
    pub date: DateTime<Utc>,
    pub kind: UpdateKind,
}

/// The vulnerabilities added and removed between two update operations.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateDiff {
    pub prev: Option<UpdateOperation>,
    pub cur: UpdateOperation,
    pub added: Vec<Vulnerability>,
    pub removed: Vec<Vulnerability>,
}
