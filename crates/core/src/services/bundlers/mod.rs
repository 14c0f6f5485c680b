//! Bundler abstraction and adapters.
//!
//! The bundler is an external collaborator: it takes an entry file plus
//! configuration and returns compiled code or a build error. Only the
//! `esbuild` CLI adapter ships today.

use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;

use crate::services::isolator::IsolationError;

pub mod esbuild;

pub use esbuild::EsbuildBundler;

/// User-supplied bundler options plus the orchestrator's `concurrency` knob.
///
/// `concurrency` is stripped from `options` at load time so it never reaches
/// the bundler itself.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BundlerConfig {
    pub concurrency: Option<usize>,
    pub options: serde_json::Map<String, serde_json::Value>,
}

/// Request to compile one isolated entry point.
#[derive(Debug, Clone)]
pub struct BundleRequest {
    pub function: String,
    pub entry_point: PathBuf,
    /// Shared source the entry point was isolated from. Outlives the entry point.
    pub source_path: PathBuf,
}

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("Bundler not found: {0}")]
    MissingBundler(String),

    #[error("Failed to isolate `{function}`: {source}")]
    Isolation {
        function: String,
        #[source]
        source: IsolationError,
    },

    #[error("Bundling `{function}` from {source_path} (isolated as {entry}) failed: {message}")]
    Failed { function: String, source_path: PathBuf, entry: PathBuf, message: String },
}

impl BuildError {
    pub fn failed(request: &BundleRequest, message: impl Into<String>) -> Self {
        BuildError::Failed {
            function: request.function.clone(),
            source_path: request.source_path.clone(),
            entry: request.entry_point.clone(),
            message: message.into(),
        }
    }
}

/// Trait implemented by bundler adapters (e.g., the esbuild CLI).
#[async_trait]
pub trait Bundler: Send + Sync {
    /// Compile `request.entry_point` and return the raw compiled text.
    async fn bundle(&self, request: &BundleRequest) -> Result<String, BuildError>;
    fn name(&self) -> &'static str;
}
