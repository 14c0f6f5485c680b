//! Spec repository: the function registry, the hash baseline, and bundler configuration.
//!
//! Three files live in a project's working directory:
//! - `.differspec.json`: `{ "functions": { "<name>": "<source path>" } }`.
//! - `.differspec.lock.json`: `{ "hashes": { ... }, "lastDiff": { ... } }`.
//! - an optional bundler configuration file (JSON or YAML).
//!
//! Loading the registry is strict, loading the baseline is lenient (a missing
//! or corrupt baseline is treated as a first build), and saving the baseline
//! replaces the file atomically.

pub mod layout;
pub mod repository;

pub use layout::*;
pub use repository::*;
