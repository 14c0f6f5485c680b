use std::env;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use differ_core::services::bundlers::esbuild::discover_externals;
use differ_core::services::bundlers::EsbuildBundler;
use differ_core::services::hasher::Sha256Hasher;
use differ_core::services::pipeline::{Pipeline, PipelineConfig};
use differ_core::spec::{load_bundler_config, ProjectLayout};
use tracing_subscriber::EnvFilter;

/// Canonicalize the working directory if possible, falling back to the given string
/// relative to the current working directory.
pub fn canonicalize_or_current(dir: &str) -> Result<PathBuf> {
    let path = Path::new(dir);
    if path == Path::new(".") {
        Ok(env::current_dir().context("Failed to get current directory")?)
    } else {
        match path.canonicalize() {
            Ok(p) => Ok(p),
            Err(_) => {
                let cwd = env::current_dir().context("Failed to get current directory")?;
                Ok(cwd.join(path))
            }
        }
    }
}

/// Install the stderr log subscriber. `RUST_LOG` takes precedence over `verbose`.
///
/// Stdout is reserved for the redeploy line.
pub fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    // A second init (e.g. from tests) keeps the first subscriber.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .with_target(false)
        .try_init();
}

/// Everything a run needs, as parsed from the command line.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub dir: String,
    pub write: bool,
    pub prefix: String,
    pub separator: String,
    pub force_deploy: bool,
    pub bundler_config: Option<String>,
    pub concurrency: Option<usize>,
    pub include_modules: Vec<String>,
    pub name_separator: String,
    pub esbuild_bin: Option<PathBuf>,
}

impl RunOptions {
    pub fn new(dir: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            write: true,
            prefix: "functions:".to_string(),
            separator: ",".to_string(),
            force_deploy: false,
            bundler_config: None,
            concurrency: None,
            include_modules: Vec::new(),
            name_separator: "-".to_string(),
            esbuild_bin: None,
        }
    }
}

/// Resolve changed functions and return the redeploy line.
///
/// Fails without touching the baseline on any spec, config, build or hash error.
pub async fn run_command(options: &RunOptions) -> Result<String> {
    if options.dir.trim().is_empty() {
        return Err(anyhow!("Error: dir argument not supplied"));
    }
    if options.concurrency == Some(0) {
        return Err(anyhow!("--concurrency must be at least 1"));
    }

    let root = canonicalize_or_current(&options.dir)?;
    let layout = ProjectLayout::new(&root);
    tracing::debug!(?options, root = %root.display(), "arguments");

    let config_path = options.bundler_config.as_deref().map(|p| layout.resolve(p));
    let bundler_config = load_bundler_config(config_path.as_deref())
        .context("Failed to load bundler configuration")?;

    let externals = discover_externals(&layout.node_modules_dir, &options.include_modules)
        .with_context(|| format!("Failed to read {}", layout.node_modules_dir.display()))?;
    tracing::debug!(count = externals.len(), "external packages");

    let bundler = EsbuildBundler::new(options.esbuild_bin.clone(), &bundler_config, &externals);
    let hasher = Sha256Hasher;

    let mut config = PipelineConfig::new(layout);
    config.write_baseline = options.write;
    config.force = options.force_deploy;
    config.concurrency = options.concurrency.or(bundler_config.concurrency);
    config.name_separator = options.name_separator.clone();

    let outcome = Pipeline::new(config, &bundler, &hasher)
        .run()
        .await
        .context("Failed to resolve changed functions")?;

    Ok(outcome.redeploy_line(&options.prefix, &options.separator))
}
