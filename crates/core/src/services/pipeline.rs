use std::collections::BTreeMap;

use thiserror::Error;
use tracing::{debug, error, info};

use crate::model::{BaselineState, DiffResult, FunctionSpec};
use crate::services::bundlers::Bundler;
use crate::services::differ::{diff_with_mode, DiffMode};
use crate::services::hasher::{hash_all, ContentHasher, HashError};
use crate::services::isolator::{Isolator, DEFAULT_NAME_SEPARATOR};
use crate::services::orchestrator::{BuildFailure, BuildJob, BuildOrchestrator};
use crate::spec::{load_baseline, load_spec, save_baseline, ParseError, ProjectLayout, WriteError};

/// Explicit run configuration threaded into the pipeline at construction.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub layout: ProjectLayout,
    /// Persist the new baseline at the end of a successful run.
    pub write_baseline: bool,
    /// Ignore the recorded baseline.
    pub force: bool,
    /// Maximum builds in flight; `None` means one per function.
    pub concurrency: Option<usize>,
    /// Separator splitting hierarchical function names.
    pub name_separator: String,
}

impl PipelineConfig {
    pub fn new(layout: ProjectLayout) -> Self {
        Self {
            layout,
            write_baseline: true,
            force: false,
            concurrency: None,
            name_separator: DEFAULT_NAME_SEPARATOR.to_string(),
        }
    }

    pub fn diff_mode(&self) -> DiffMode {
        if self.force {
            DiffMode::Force
        } else {
            DiffMode::Incremental
        }
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Spec(#[from] ParseError),

    #[error(transparent)]
    Build(#[from] BuildFailure),

    #[error("{} function(s) failed to hash", .errors.len())]
    Hash { errors: Vec<HashError> },
}

/// Result of a successful run.
#[derive(Debug)]
pub struct RunOutcome {
    pub spec: FunctionSpec,
    pub hashes: BTreeMap<String, String>,
    pub diff: DiffResult,
    /// `true` when the new baseline reached disk.
    pub baseline_written: bool,
    /// Set when persistence was requested and failed; the diff stays valid.
    pub write_error: Option<WriteError>,
}

impl RunOutcome {
    /// `added` then `changed`, each prefixed and joined with `separator`.
    pub fn redeploy_line(&self, prefix: &str, separator: &str) -> String {
        self.diff.redeploy_line(prefix, separator)
    }
}

/// Coordinator that sequences spec loading, builds, hashing, diffing and persistence.
pub struct Pipeline<'a> {
    pub config: PipelineConfig,
    pub bundler: &'a dyn Bundler,
    pub hasher: &'a dyn ContentHasher,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        config: PipelineConfig,
        bundler: &'a dyn Bundler,
        hasher: &'a dyn ContentHasher,
    ) -> Self {
        Self { config, bundler, hasher }
    }

    pub async fn run(&self) -> Result<RunOutcome, PipelineError> {
        let layout = &self.config.layout;

        info!(path = %layout.spec_path.display(), "parsing spec");
        let spec = load_spec(&layout.spec_path).map_err(|err| {
            error!(error = %err, "failed to load spec");
            err
        })?;

        info!(path = %layout.lock_path.display(), "parsing baseline");
        let baseline = load_baseline(&layout.lock_path);
        info!(functions = spec.len(), "discovered functions");

        let isolator = Isolator::new(self.config.name_separator.clone());
        let orchestrator = BuildOrchestrator {
            bundler: self.bundler,
            isolator: &isolator,
            concurrency: self.config.concurrency,
        };
        let artifacts = orchestrator.build_all(BuildJob::from_spec(&spec)).await.map_err(|err| {
            error!(error = %err, "aborting: build batch failed");
            err
        })?;

        let (hashes, hash_errors) = hash_all(self.hasher, &artifacts);
        if !hash_errors.is_empty() {
            error!(count = hash_errors.len(), "encountered errors while hashing functions");
            for err in &hash_errors {
                error!(error = %err, "hash failed");
            }
            return Err(PipelineError::Hash { errors: hash_errors });
        }

        let new_hashes: BTreeMap<String, String> =
            hashes.into_iter().map(|h| (h.function, h.hash)).collect();
        let diff = diff_with_mode(&baseline.hashes, &new_hashes, self.config.diff_mode());

        for (function, hash) in &new_hashes {
            debug!(function = %function, hash = %hash, "content hash");
        }
        for (kind, names) in diff.components() {
            info!(component = kind.as_str(), functions = ?names, "diff");
        }

        let mut outcome = RunOutcome {
            spec,
            hashes: new_hashes,
            diff,
            baseline_written: false,
            write_error: None,
        };

        if self.config.write_baseline {
            let state = BaselineState::new(outcome.hashes.clone(), Some(outcome.diff.clone()));
            match save_baseline(&state, &layout.lock_path) {
                Ok(_) => outcome.baseline_written = true,
                Err(err) => {
                    error!(path = %layout.lock_path.display(), error = %err, "failed to update baseline");
                    outcome.write_error = Some(err);
                }
            }
        }

        Ok(outcome)
    }
}
