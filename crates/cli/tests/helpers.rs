use std::fs;

use function_differ::{canonicalize_or_current, RunOptions};
use tempfile::tempdir;

#[test]
fn canonicalize_or_current_handles_dot_and_relative_paths() {
    let original = std::env::current_dir().expect("cwd");
    let tmp = tempdir().expect("tempdir");
    let subdir = tmp.path().join("functions");
    fs::create_dir_all(&subdir).expect("create functions dir");
    std::env::set_current_dir(tmp.path()).expect("chdir tmp");

    let dot = canonicalize_or_current(".").expect("canonicalize").canonicalize().expect("canon");
    let nested = canonicalize_or_current("functions").expect("canonicalize nested");
    let missing = canonicalize_or_current("not-there").expect("fallback");

    std::env::set_current_dir(original).expect("restore cwd");

    assert_eq!(dot, tmp.path().canonicalize().expect("canon tmp"));
    assert_eq!(nested, subdir.canonicalize().expect("canonicalize subdir"));
    assert!(missing.ends_with("not-there"));
}

#[test]
fn run_options_defaults_match_cli_defaults() {
    let options = RunOptions::new("functions");
    assert!(options.write);
    assert!(!options.force_deploy);
    assert_eq!(options.prefix, "functions:");
    assert_eq!(options.separator, ",");
    assert_eq!(options.name_separator, "-");
    assert!(options.concurrency.is_none());
    assert!(options.include_modules.is_empty());
}
