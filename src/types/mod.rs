//! Wire records exchanged with clients.
//!
//! # Data Flow
//! ```text
//! request body ──▶ codec::Decoder ──▶ Manifest / [Digest] / AffectedManifests query
//!                                          │
//!                                          ▼
//!                                  collaborator services
//!                                          │
//!                                          ▼
//! response body ◀── codec::Encoder ◀── IndexReport / VulnerabilityReport / ...
//! ```
//!
//! # Design Decisions
//! - Plain owned records; every payload is built fresh per exchange
//! - Maps are `BTreeMap` so encoded output is stable across runs
//! - Self-describing scalars (digests, versions, CPEs, enums) round-trip
//!   through `FromStr` + `Display` rather than per-field logic

pub mod digest;
pub mod index;
pub mod notification;
pub mod update;
pub mod version;
pub mod vulnerability;

pub use digest::Digest;
pub use index::{Distribution, Environment, IndexReport, Layer, Manifest, Package, Repository};
pub use notification::{Key, Notification, Page, Reason, VulnSummary};
pub use update::{UpdateDiff, UpdateKind, UpdateOperation};
pub use version::{Cpe, Version};
pub use vulnerability::{
    AffectedManifests, ArchOp, Range, RawDocument, Severity, Vulnerability, VulnerabilityReport,
};

use thiserror::Error;

/// Failure to parse one of the textual wire scalars.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid {kind} {input:?}: {reason}")]
pub struct ParseError {
    kind: &'static str,
    input: String,
    reason: String,
}

impl ParseError {
    pub(crate) fn new(kind: &'static str, input: &str, reason: impl Into<String>) -> Self {
        Self {
            kind,
            input: input.to_string(),
            reason: reason.into(),
        }
    }
}
