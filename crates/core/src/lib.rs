//! differ-core
//!
//! Core library for deciding which independently deployable cloud functions
//! changed since the last recorded build.
//!
//! This crate defines the data model, the spec/baseline repository, function
//! isolation, bundling, hashing, diffing, and the pipeline that sequences them.
//!
//! The goal is to keep all substantive logic here so it is fully testable and
//! reusable from multiple frontends (CLI, CI plugins, etc.).

pub mod model;
pub mod services;
pub mod spec;
