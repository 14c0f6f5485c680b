use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::model::{BaselineState, FunctionSpec};
use crate::services::bundlers::BundlerConfig;

/// Error raised while loading the spec, baseline, or bundler configuration.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("File does not exist: {0}")]
    NotFound(PathBuf),

    #[error("Failed to read {path}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The file is not valid structured data of the expected shape.
    #[error("Failed to parse {path} as {format}: {message}")]
    InvalidEncoding { path: PathBuf, format: &'static str, message: String },

    #[error("No `functions` object found in spec file {0}")]
    MissingFunctions(PathBuf),

    #[error("Source for function `{function}` does not exist: {path}")]
    MissingSource { function: String, path: PathBuf },
}

/// Error raised while persisting the baseline.
#[derive(Debug, Error)]
pub enum WriteError {
    #[error("Failed to serialize baseline: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Deserialize)]
struct RawSpecFile {
    #[serde(default)]
    functions: Option<BTreeMap<String, String>>,
}

/// Load the function registry and resolve every source path.
///
/// Relative paths are resolved against the directory containing the spec file.
pub fn load_spec(path: &Path) -> Result<FunctionSpec, ParseError> {
    let body = read_existing(path)?;
    let raw: RawSpecFile = serde_json::from_str(&body).map_err(|e| ParseError::InvalidEncoding {
        path: path.to_path_buf(),
        format: "JSON",
        message: e.to_string(),
    })?;
    let functions = raw.functions.ok_or_else(|| ParseError::MissingFunctions(path.to_path_buf()))?;

    let spec_dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut resolved = BTreeMap::new();
    for (name, source) in functions {
        let source_path = resolve_function_path(spec_dir, &source);
        if !source_path.is_file() {
            return Err(ParseError::MissingSource { function: name, path: source_path });
        }
        resolved.insert(name, source_path);
    }

    Ok(FunctionSpec { functions: resolved })
}

/// Resolve a function's source path relative to the spec directory.
pub fn resolve_function_path(spec_dir: &Path, source: &str) -> PathBuf {
    let source = Path::new(source);
    if source.is_absolute() {
        source.to_path_buf()
    } else {
        spec_dir.join(source)
    }
}

/// Load the hash baseline, degrading to an empty baseline on any failure.
///
/// A missing or unreadable baseline must never block a build; the run is then
/// treated as a first-time build.
pub fn load_baseline(path: &Path) -> BaselineState {
    let body = match fs::read_to_string(path) {
        Ok(body) => body,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "no baseline found, starting from an empty one");
            return BaselineState::default();
        }
        Err(err) => {
            warn!(path = %path.display(), error = %err, "baseline unreadable, using an empty one");
            return BaselineState::default();
        }
    };

    let value: serde_json::Value = match serde_json::from_str(&body) {
        Ok(value) => value,
        Err(err) => {
            warn!(path = %path.display(), error = %err, "baseline is not valid JSON, using an empty one");
            return BaselineState::default();
        }
    };
    let Some(hashes) = value.get("hashes") else {
        warn!(path = %path.display(), "baseline has no `hashes` object, using an empty one");
        return BaselineState::default();
    };
    let hashes: BTreeMap<String, String> = match serde_json::from_value(hashes.clone()) {
        Ok(hashes) => hashes,
        Err(err) => {
            warn!(path = %path.display(), error = %err, "baseline `hashes` malformed, using an empty one");
            return BaselineState::default();
        }
    };

    // `lastDiff` is informational; a bad one never costs the recorded hashes.
    let last_diff = match value.get("lastDiff") {
        None | Some(serde_json::Value::Null) => None,
        Some(raw) => serde_json::from_value(raw.clone())
            .map_err(|err| {
                warn!(path = %path.display(), error = %err, "ignoring malformed `lastDiff`");
            })
            .ok(),
    };

    BaselineState::new(hashes, last_diff)
}

/// Persist the baseline, replacing the file in full. Returns the written contents.
///
/// Contents go to a temporary sibling first and are renamed into place, so a
/// failure never leaves a partially written baseline behind.
pub fn save_baseline(state: &BaselineState, path: &Path) -> Result<String, WriteError> {
    let contents = serde_json::to_string_pretty(state)?;
    let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or_else(|| Path::new("."));
    let io_err = |source| WriteError::Io { path: path.to_path_buf(), source };

    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(io_err)?;
    tmp.write_all(contents.as_bytes()).map_err(io_err)?;
    tmp.write_all(b"\n").map_err(io_err)?;
    tmp.as_file().sync_all().map_err(io_err)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        // Keep the replaced file's mode; new baselines are 0644.
        let mode = fs::metadata(path).map(|m| m.permissions().mode() & 0o777).unwrap_or(0o644);
        tmp.as_file().set_permissions(fs::Permissions::from_mode(mode)).map_err(io_err)?;
    }
    tmp.persist(path).map_err(|e| io_err(e.error))?;

    Ok(contents)
}

/// Load the optional bundler configuration.
///
/// `None` yields the default configuration. Files ending in `.yaml`/`.yml` are
/// parsed as YAML, everything else as JSON. The top level must be an object.
pub fn load_bundler_config(path: Option<&Path>) -> Result<BundlerConfig, ParseError> {
    let Some(path) = path else {
        return Ok(BundlerConfig::default());
    };

    let body = read_existing(path)?;
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or_default();
    let (format, parsed): (&'static str, Result<serde_json::Value, String>) =
        if matches!(ext, "yaml" | "yml") {
            ("YAML", serde_yaml::from_str(&body).map_err(|e| e.to_string()))
        } else {
            ("JSON", serde_json::from_str(&body).map_err(|e| e.to_string()))
        };
    let invalid = |message: String| ParseError::InvalidEncoding {
        path: path.to_path_buf(),
        format,
        message,
    };

    let serde_json::Value::Object(mut options) = parsed.map_err(invalid)? else {
        return Err(invalid("bundler configuration must be an object".to_string()));
    };

    let concurrency = match options.remove("concurrency") {
        None | Some(serde_json::Value::Null) => None,
        Some(value) => match value.as_u64() {
            Some(n) if n > 0 => Some(n as usize),
            _ => return Err(invalid(format!("`concurrency` must be a positive integer, got {value}"))),
        },
    };

    Ok(BundlerConfig { concurrency, options })
}

fn read_existing(path: &Path) -> Result<String, ParseError> {
    if fs::metadata(path).is_err() {
        return Err(ParseError::NotFound(path.to_path_buf()));
    }
    fs::read_to_string(path)
        .map_err(|source| ParseError::Unreadable { path: path.to_path_buf(), source })
}
