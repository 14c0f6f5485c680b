use std::path::PathBuf;
use std::time::Instant;

use futures::stream::{self, StreamExt};
use thiserror::Error;
use tracing::{debug, error, info};

use crate::model::{BuildArtifact, FunctionSpec};
use crate::services::bundlers::{BuildError, BundleRequest, Bundler};
use crate::services::isolator::Isolator;

/// One function to isolate and compile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildJob {
    pub function: String,
    pub source_path: PathBuf,
}

impl BuildJob {
    pub fn from_spec(spec: &FunctionSpec) -> Vec<BuildJob> {
        spec.functions
            .iter()
            .map(|(function, source_path)| BuildJob {
                function: function.clone(),
                source_path: source_path.clone(),
            })
            .collect()
    }
}

/// Every build error of a batch. Any error aborts the whole batch.
#[derive(Debug, Error)]
#[error("{} of {total} function builds failed", .errors.len())]
pub struct BuildFailure {
    pub errors: Vec<BuildError>,
    pub total: usize,
}

/// Drives isolate → bundle → cleanup for each function with bounded concurrency.
pub struct BuildOrchestrator<'a> {
    pub bundler: &'a dyn Bundler,
    pub isolator: &'a Isolator,
    /// Maximum builds in flight; `None` means one per function.
    pub concurrency: Option<usize>,
}

impl<'a> BuildOrchestrator<'a> {
    /// Build every job, returning artifacts sorted by function name.
    ///
    /// In-flight siblings of a failed build are left to finish; their errors
    /// are collected as well.
    pub async fn build_all(&self, jobs: Vec<BuildJob>) -> Result<Vec<BuildArtifact>, BuildFailure> {
        let total = jobs.len();
        let limit = self.concurrency.unwrap_or(total).max(1);
        info!(
            functions = total,
            concurrency = limit,
            bundler = self.bundler.name(),
            "building functions"
        );

        let results: Vec<Result<BuildArtifact, BuildError>> = stream::iter(jobs)
            .map(|job| self.build_one(job))
            .buffer_unordered(limit)
            .collect()
            .await;

        let mut artifacts = Vec::with_capacity(total);
        let mut errors = Vec::new();
        for result in results {
            match result {
                Ok(artifact) => artifacts.push(artifact),
                Err(err) => {
                    error!(error = %err, "function build failed");
                    errors.push(err);
                }
            }
        }

        if !errors.is_empty() {
            return Err(BuildFailure { errors, total });
        }

        artifacts.sort_by(|a, b| a.function.cmp(&b.function));
        Ok(artifacts)
    }

    async fn build_one(&self, job: BuildJob) -> Result<BuildArtifact, BuildError> {
        info!(function = %job.function, path = %job.source_path.display(), "processing function");

        let isolated = self
            .isolator
            .isolate(&job.source_path, &job.function)
            .map_err(|source| BuildError::Isolation { function: job.function.clone(), source })?;

        let request = BundleRequest {
            function: job.function.clone(),
            entry_point: isolated.path.clone(),
            source_path: job.source_path.clone(),
        };
        let started = Instant::now();
        let result = self.bundler.bundle(&request).await;
        debug!(
            function = %job.function,
            elapsed_ms = started.elapsed().as_millis() as u64,
            ok = result.is_ok(),
            "bundle finished"
        );

        isolated.cleanup();

        let code = result?;
        Ok(BuildArtifact { function: job.function, source_path: job.source_path, code })
    }
}
