//! Core data model for functions, build artifacts, content hashes, and diffs.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Registry of deployable functions, keyed by unique function name.
///
/// Paths are already resolved to absolute paths by the spec repository.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FunctionSpec {
    pub functions: BTreeMap<String, PathBuf>,
}

impl FunctionSpec {
    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

/// Last persisted hash per function plus the classification that produced it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaselineState {
    #[serde(default)]
    pub hashes: BTreeMap<String, String>,
    #[serde(rename = "lastDiff", default, skip_serializing_if = "Option::is_none")]
    pub last_diff: Option<DiffResult>,
}

impl BaselineState {
    pub fn new(hashes: BTreeMap<String, String>, last_diff: Option<DiffResult>) -> Self {
        Self { hashes, last_diff }
    }
}

/// Compiled output of a single function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildArtifact {
    pub function: String,
    /// Original (shared) source file the function was isolated from.
    pub source_path: PathBuf,
    pub code: String,
}

/// Content identity of one function's compiled code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentHash {
    pub function: String,
    pub hash: String,
}

/// Classification of a single function relative to the baseline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Added,
    Removed,
    Changed,
    Unchanged,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::Added => "added",
            ChangeKind::Removed => "removed",
            ChangeKind::Changed => "changed",
            ChangeKind::Unchanged => "unchanged",
        }
    }
}

/// Four disjoint name sets partitioning `keys(baseline) ∪ keys(current)`.
///
/// Sets are ordered so serialization and redeploy output never depend on
/// iteration or completion order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffResult {
    #[serde(default)]
    pub added: BTreeSet<String>,
    #[serde(default)]
    pub removed: BTreeSet<String>,
    #[serde(default)]
    pub changed: BTreeSet<String>,
    #[serde(default)]
    pub unchanged: BTreeSet<String>,
}

impl DiffResult {
    /// Look up which set a function landed in.
    pub fn kind_of(&self, function: &str) -> Option<ChangeKind> {
        if self.added.contains(function) {
            Some(ChangeKind::Added)
        } else if self.removed.contains(function) {
            Some(ChangeKind::Removed)
        } else if self.changed.contains(function) {
            Some(ChangeKind::Changed)
        } else if self.unchanged.contains(function) {
            Some(ChangeKind::Unchanged)
        } else {
            None
        }
    }

    /// Iterate the four components in a fixed order, for reporting.
    pub fn components(&self) -> [(ChangeKind, &BTreeSet<String>); 4] {
        [
            (ChangeKind::Added, &self.added),
            (ChangeKind::Removed, &self.removed),
            (ChangeKind::Changed, &self.changed),
            (ChangeKind::Unchanged, &self.unchanged),
        ]
    }

    /// Functions to redeploy: `added` followed by `changed`.
    pub fn redeploy_set(&self) -> Vec<&str> {
        self.added.iter().chain(self.changed.iter()).map(String::as_str).collect()
    }

    /// Format the redeploy set as a single machine-readable line.
    pub fn redeploy_line(&self, prefix: &str, separator: &str) -> String {
        self.redeploy_set()
            .into_iter()
            .map(|name| format!("{prefix}{name}"))
            .collect::<Vec<_>>()
            .join(separator)
    }

    pub fn total(&self) -> usize {
        self.added.len() + self.removed.len() + self.changed.len() + self.unchanged.len()
    }
}
