use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::process::Command;
use tracing::debug;

use crate::services::bundlers::{BuildError, BundleRequest, Bundler, BundlerConfig};

/// Options the bundler must never receive: output always goes to stdout.
const STRIPPED_OPTIONS: &[&str] = &["write", "outdir", "outfile", "entryPoints", "metafile"];

/// List options esbuild takes as a single comma-separated flag value.
const COMMA_LIST_OPTIONS: &[&str] =
    &["target", "mainFields", "conditions", "resolveExtensions", "dropLabels"];

/// esbuild-backed bundler that shells out to the `esbuild` CLI and captures stdout.
#[derive(Debug, Clone)]
pub struct EsbuildBundler {
    binary: PathBuf,
    flags: Vec<String>,
}

impl EsbuildBundler {
    /// Build an adapter from user configuration and the externals discovered for this run.
    ///
    /// `binary` falls back to `ESBUILD_BIN`, then to `esbuild` on `PATH`.
    pub fn new(binary: Option<PathBuf>, config: &BundlerConfig, externals: &[String]) -> Self {
        let binary = binary.unwrap_or_else(resolve_esbuild_path);
        let options = merged_options(&config.options, externals);
        Self { binary, flags: option_flags(&options) }
    }
}

#[async_trait]
impl Bundler for EsbuildBundler {
    async fn bundle(&self, request: &BundleRequest) -> Result<String, BuildError> {
        let output = Command::new(&self.binary)
            .arg(&request.entry_point)
            .args(&self.flags)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| match e.kind() {
                io::ErrorKind::NotFound => {
                    BuildError::MissingBundler(self.binary.display().to_string())
                }
                _ => BuildError::failed(request, format!("failed to spawn esbuild: {e}")),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(BuildError::failed(
                request,
                format!("esbuild exited with {}: {}", output.status, stderr),
            ));
        }

        String::from_utf8(output.stdout)
            .map_err(|e| BuildError::failed(request, format!("esbuild produced non UTF-8 output: {e}")))
    }

    fn name(&self) -> &'static str {
        "esbuild"
    }
}

fn resolve_esbuild_path() -> PathBuf {
    std::env::var_os("ESBUILD_BIN").map(PathBuf::from).unwrap_or_else(|| PathBuf::from("esbuild"))
}

/// Default node-platform options overlaid with user overrides.
///
/// User keys win, except that output location keys are dropped and `external`
/// is extended with the discovered externals rather than replaced.
pub fn merged_options(user: &Map<String, Value>, externals: &[String]) -> Map<String, Value> {
    let mut options = Map::new();
    options.insert("bundle".into(), Value::Bool(true));
    options.insert("platform".into(), Value::String("node".into()));
    options.insert("format".into(), Value::String("cjs".into()));
    options.insert("minify".into(), Value::Bool(true));
    options.insert("treeShaking".into(), Value::Bool(true));

    for (key, value) in user {
        if STRIPPED_OPTIONS.contains(&key.as_str()) {
            debug!(option = %key, "ignoring bundler option that controls output location");
            continue;
        }
        options.insert(key.clone(), value.clone());
    }

    let mut external: Vec<Value> = match options.remove("external") {
        Some(Value::Array(items)) => items,
        Some(Value::String(item)) => vec![Value::String(item)],
        _ => Vec::new(),
    };
    external.extend(externals.iter().cloned().map(Value::String));
    if !external.is_empty() {
        options.insert("external".into(), Value::Array(external));
    }

    options
}

/// Translate an options object into esbuild CLI flags.
///
/// - `true` → `--key`, `false` → `--key=false`
/// - strings and numbers → `--key=value`
/// - arrays → `--key=a,b` for list options such as `target`, otherwise one
///   `--key:item` per item
/// - objects → one `--key:name=value` per entry
/// - `null` is skipped
pub fn option_flags(options: &Map<String, Value>) -> Vec<String> {
    let mut flags = Vec::new();
    for (key, value) in options {
        let flag = kebab_case(key);
        match value {
            Value::Null => {}
            Value::Bool(true) => flags.push(format!("--{flag}")),
            Value::Bool(false) => flags.push(format!("--{flag}=false")),
            Value::Array(items) if COMMA_LIST_OPTIONS.contains(&key.as_str()) => {
                if !items.is_empty() {
                    let joined: Vec<String> = items.iter().map(scalar).collect();
                    flags.push(format!("--{flag}={}", joined.join(",")));
                }
            }
            Value::Array(items) => {
                flags.extend(items.iter().map(|item| format!("--{flag}:{}", scalar(item))));
            }
            Value::Object(entries) => {
                flags.extend(
                    entries.iter().map(|(name, item)| format!("--{flag}:{name}={}", scalar(item))),
                );
            }
            other => flags.push(format!("--{flag}={}", scalar(other))),
        }
    }
    flags
}

fn scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn kebab_case(key: &str) -> String {
    let mut out = String::with_capacity(key.len() + 4);
    for ch in key.chars() {
        if ch.is_ascii_uppercase() {
            out.push('-');
            out.push(ch.to_ascii_lowercase());
        } else {
            out.push(ch);
        }
    }
    out
}

/// List top-level `node_modules` packages the bundler should leave external.
///
/// Every package directory is external except those named in `include`, which
/// get bundled into each function. Scope directories (`@org`) become `@org/*`.
/// A missing `node_modules` directory yields no externals.
pub fn discover_externals(node_modules_dir: &Path, include: &[String]) -> io::Result<Vec<String>> {
    let entries = match fs::read_dir(node_modules_dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            debug!(dir = %node_modules_dir.display(), "no node_modules directory, nothing external");
            return Ok(Vec::new());
        }
        Err(err) => return Err(err),
    };

    let mut externals = Vec::new();
    for entry in entries {
        let entry = entry?;
        if !entry.path().is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        if name.starts_with('.') || include.contains(&name) {
            continue;
        }
        if name.starts_with('@') {
            externals.push(format!("{name}/*"));
        } else {
            externals.push(name);
        }
    }

    externals.sort();
    Ok(externals)
}
