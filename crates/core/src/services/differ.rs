use std::collections::BTreeMap;

use crate::model::DiffResult;

/// Whether the baseline takes part in the diff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DiffMode {
    #[default]
    Incremental,
    /// Treat the baseline as empty so every current function is `added`.
    Force,
}

/// Classify every function in `baseline ∪ current`.
///
/// - only in `current` → `added`
/// - only in `baseline` → `removed`
/// - in both, equal hash → `unchanged`
/// - in both, different hash → `changed`
pub fn diff(baseline: &BTreeMap<String, String>, current: &BTreeMap<String, String>) -> DiffResult {
    let mut result = DiffResult::default();

    for (name, hash) in current {
        match baseline.get(name) {
            None => result.added.insert(name.clone()),
            Some(previous) if previous == hash => result.unchanged.insert(name.clone()),
            Some(_) => result.changed.insert(name.clone()),
        };
    }

    for name in baseline.keys() {
        if !current.contains_key(name) {
            result.removed.insert(name.clone());
        }
    }

    result
}

pub fn diff_with_mode(
    baseline: &BTreeMap<String, String>,
    current: &BTreeMap<String, String>,
    mode: DiffMode,
) -> DiffResult {
    match mode {
        DiffMode::Incremental => diff(baseline, current),
        DiffMode::Force => diff(&BTreeMap::new(), current),
    }
}
