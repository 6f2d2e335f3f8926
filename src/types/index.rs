//! Manifests and the index reports built from them.

use std::collections::BTreeMap;

use super::{Cpe, Digest, Version};

/// State token of an index report whose analysis has completed.
pub const INDEX_FINISHED: &str = "IndexFinished";

/// A container image to analyze: its digest and ordered layers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Manifest {
    pub hash: Digest,
    pub layers: Vec<Layer>,
}

impl Manifest {
    /// Whether the manifest carries enough to be indexed.
    pub fn is_valid(&self) -> bool {
        !self.hash.is_zero() && !self.layers.is_empty()
    }
}

/// One layer of a manifest and how to fetch it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Layer {
    pub hash: Digest,
    pub uri: String,
    pub headers: BTreeMap<String, Vec<String>>,
}

/// The result of analyzing a manifest.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndexReport {
    pub hash: Digest,
    pub state: String,
    pub success: bool,
    pub err: String,
    pub packages: BTreeMap<String, Package>,
    pub distributions: BTreeMap<String, Distribution>,
    pub repositories: BTreeMap<String, Repository>,
    /// Package id to every place the package was found.
    pub environments: BTreeMap<String, Vec<Environment>>,
}

impl IndexReport {
    pub fn is_finished(&self) -> bool {
        self.state == INDEX_FINISHED
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Package {
    pub id: String,
    pub name: String,
    pub version: String,
    pub kind: String,
    /// The source package this binary package was built from.
    pub source: Option<Box<Package>>,
    pub module: String,
    pub arch: String,
    pub normalized_version: Version,
    pub cpe: Cpe,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Distribution {
    pub id: String,
    pub did: String,
    pub name: String,
    pub version: String,
    pub version_code_name: String,
    pub version_id: String,
    pub arch: String,
    pub cpe: Cpe,
    pub pretty_name: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Repository {
    pub id: String,
    pub name: String,
    pub key: String,
    pub uri: String,
    pub cpe: Cpe,
}

/// Where in a manifest a package was found.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Environment {
    pub package_db: String,
    pub distribution_id: String,
    pub introduced_in: Digest,
    pub repository_ids: Vec<String>,
}
