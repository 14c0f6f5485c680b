use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use differ_core::services::bundlers::{BuildError, BundleRequest, Bundler};
use differ_core::services::isolator::Isolator;
use differ_core::services::orchestrator::{BuildJob, BuildOrchestrator};
use tempfile::tempdir;

/// Returns the isolated entry point verbatim, optionally failing for one function.
struct EchoBundler {
    fail_for: Option<&'static str>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl EchoBundler {
    fn new(fail_for: Option<&'static str>) -> Self {
        Self { fail_for, in_flight: AtomicUsize::new(0), max_in_flight: AtomicUsize::new(0) }
    }
}

#[async_trait]
impl Bundler for EchoBundler {
    async fn bundle(&self, request: &BundleRequest) -> Result<String, BuildError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(10)).await;
        let result = if self.fail_for == Some(request.function.as_str()) {
            Err(BuildError::failed(request, "Could not resolve \"./missing\""))
        } else {
            tokio::fs::read_to_string(&request.entry_point)
                .await
                .map_err(|e| BuildError::failed(request, e.to_string()))
        };
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    fn name(&self) -> &'static str {
        "echo"
    }
}

fn project(dir: &Path) -> Vec<BuildJob> {
    let index = dir.join("index.ts");
    fs::write(
        &index,
        "export const a = 1;\nexport const b = 2;\nexport const c = 3;\nexport const d = 4;\n",
    )
    .unwrap();
    ["d", "b", "c", "a"]
        .iter()
        .map(|name| BuildJob { function: name.to_string(), source_path: index.clone() })
        .collect()
}

fn dir_entries(dir: &Path) -> Vec<PathBuf> {
    let mut entries: Vec<PathBuf> = fs::read_dir(dir).unwrap().map(|e| e.unwrap().path()).collect();
    entries.sort();
    entries
}

#[tokio::test]
async fn build_all_returns_sorted_artifacts_and_cleans_up() {
    let tmp = tempdir().unwrap();
    let jobs = project(tmp.path());
    let bundler = EchoBundler::new(None);
    let isolator = Isolator::default();
    let orchestrator = BuildOrchestrator { bundler: &bundler, isolator: &isolator, concurrency: None };

    let artifacts = orchestrator.build_all(jobs).await.expect("build");

    let names: Vec<&str> = artifacts.iter().map(|a| a.function.as_str()).collect();
    assert_eq!(names, vec!["a", "b", "c", "d"]);
    assert_eq!(artifacts[1].code, "export const b = 2;\n");
    assert_eq!(artifacts[1].source_path, tmp.path().join("index.ts"));

    // Only the shared source remains; every isolated copy was removed.
    assert_eq!(dir_entries(tmp.path()), vec![tmp.path().join("index.ts")]);
    assert_eq!(isolator.cached_sources(), 1);
}

#[tokio::test]
async fn build_all_respects_concurrency_limit() {
    let tmp = tempdir().unwrap();
    let jobs = project(tmp.path());
    let bundler = EchoBundler::new(None);
    let isolator = Isolator::default();
    let orchestrator = BuildOrchestrator { bundler: &bundler, isolator: &isolator, concurrency: Some(2) };

    orchestrator.build_all(jobs).await.expect("build");
    let max = bundler.max_in_flight.load(Ordering::SeqCst);
    assert!(max <= 2, "saw {max} builds in flight");
    assert!(max >= 1);
}

#[tokio::test]
async fn build_all_fans_out_by_default() {
    let tmp = tempdir().unwrap();
    let jobs = project(tmp.path());
    let bundler = EchoBundler::new(None);
    let isolator = Isolator::default();
    let orchestrator = BuildOrchestrator { bundler: &bundler, isolator: &isolator, concurrency: None };

    orchestrator.build_all(jobs).await.expect("build");
    assert_eq!(bundler.max_in_flight.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn build_all_aborts_batch_on_any_failure() {
    let tmp = tempdir().unwrap();
    let jobs = project(tmp.path());
    let bundler = EchoBundler::new(Some("c"));
    let isolator = Isolator::default();
    let orchestrator = BuildOrchestrator { bundler: &bundler, isolator: &isolator, concurrency: Some(1) };

    let failure = orchestrator.build_all(jobs).await.unwrap_err();
    assert_eq!(failure.total, 4);
    assert_eq!(failure.errors.len(), 1);
    match &failure.errors[0] {
        BuildError::Failed { function, source_path, entry, message } => {
            assert_eq!(function, "c");
            assert_eq!(source_path, &tmp.path().join("index.ts"));
            assert_eq!(entry, &tmp.path().join("index[-]c[-].ts"));
            assert!(message.contains("Could not resolve"));
        }
        other => panic!("expected Failed, got {other:?}"),
    }
    assert_eq!(failure.to_string(), "1 of 4 function builds failed");

    // Failed builds clean up their isolated copy too.
    assert_eq!(dir_entries(tmp.path()), vec![tmp.path().join("index.ts")]);
}

#[tokio::test]
async fn build_all_reports_isolation_errors_per_function() {
    let tmp = tempdir().unwrap();
    let bundler = EchoBundler::new(None);
    let isolator = Isolator::default();
    let orchestrator = BuildOrchestrator { bundler: &bundler, isolator: &isolator, concurrency: None };

    let jobs = vec![BuildJob { function: "ghost".into(), source_path: tmp.path().join("ghost.ts") }];
    let failure = orchestrator.build_all(jobs).await.unwrap_err();
    assert!(matches!(&failure.errors[0], BuildError::Isolation { function, .. } if function == "ghost"));
}
