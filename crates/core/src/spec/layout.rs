use std::path::{Path, PathBuf};

/// File name of the declarative function registry.
pub const SPEC_FILE_NAME: &str = ".differspec.json";
/// File name of the persisted hash baseline.
pub const LOCK_FILE_NAME: &str = ".differspec.lock.json";

/// Logical layout of a functions project on disk.
///
/// This is derived from a chosen working directory. It does *not* perform any IO itself.
#[derive(Debug, Clone)]
pub struct ProjectLayout {
    /// Working directory of the project.
    pub root: PathBuf,
    /// Path to the function registry (`.differspec.json`).
    pub spec_path: PathBuf,
    /// Path to the hash baseline (`.differspec.lock.json`).
    pub lock_path: PathBuf,
    /// Directory scanned for packages the bundler should leave external.
    pub node_modules_dir: PathBuf,
}

impl ProjectLayout {
    /// Compute the default layout for a project rooted at `root`.
    ///
    /// This does *not* touch the filesystem.
    pub fn new(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref().to_path_buf();
        let spec_path = root.join(SPEC_FILE_NAME);
        let lock_path = root.join(LOCK_FILE_NAME);
        let node_modules_dir = root.join("node_modules");

        Self { root, spec_path, lock_path, node_modules_dir }
    }

    /// Resolve a user-supplied path (e.g. `--bundler-config`) against the root.
    pub fn resolve(&self, path: impl AsRef<Path>) -> PathBuf {
        let path = path.as_ref();
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }
}
