use std::fs;
use std::path::Path;

use async_trait::async_trait;
use differ_core::model::ContentHash;
use differ_core::services::bundlers::{BuildError, BundleRequest, Bundler};
use differ_core::services::hasher::{sha256_hex, ContentHasher, HashError, Sha256Hasher};
use differ_core::services::pipeline::{Pipeline, PipelineConfig, PipelineError};
use differ_core::spec::{load_baseline, ParseError, ProjectLayout};
use tempfile::tempdir;

struct EchoBundler;

#[async_trait]
impl Bundler for EchoBundler {
    async fn bundle(&self, request: &BundleRequest) -> Result<String, BuildError> {
        tokio::fs::read_to_string(&request.entry_point)
            .await
            .map_err(|e| BuildError::failed(request, e.to_string()))
    }

    fn name(&self) -> &'static str {
        "echo"
    }
}

struct BrokenBundler;

#[async_trait]
impl Bundler for BrokenBundler {
    async fn bundle(&self, request: &BundleRequest) -> Result<String, BuildError> {
        Err(BuildError::failed(request, "syntax error"))
    }

    fn name(&self) -> &'static str {
        "broken"
    }
}

struct RejectingHasher;

impl ContentHasher for RejectingHasher {
    fn hash(&self, function: &str, code: &str) -> Result<ContentHash, HashError> {
        if function == "api-b" {
            return Err(HashError { function: function.into(), reason: "digest failure".into() });
        }
        Sha256Hasher.hash(function, code)
    }

    fn name(&self) -> &'static str {
        "rejecting"
    }
}

const INDEX: &str = "export const a = () => 1;\nexport const b = () => 2;\n";

fn setup(root: &Path, functions: &[(&str, &str)]) -> ProjectLayout {
    fs::create_dir_all(root.join("src")).unwrap();
    if !root.join("src/index.ts").exists() {
        fs::write(root.join("src/index.ts"), INDEX).unwrap();
    }
    let map: serde_json::Map<String, serde_json::Value> = functions
        .iter()
        .map(|(k, v)| (k.to_string(), serde_json::Value::String(v.to_string())))
        .collect();
    let layout = ProjectLayout::new(root);
    fs::write(&layout.spec_path, serde_json::json!({ "functions": map }).to_string()).unwrap();
    layout
}

fn both(root: &Path) -> ProjectLayout {
    setup(root, &[("api-a", "src/index.ts"), ("api-b", "src/index.ts")])
}

#[tokio::test]
async fn first_run_adds_everything_and_writes_baseline() {
    let tmp = tempdir().unwrap();
    let layout = both(tmp.path());

    let outcome = Pipeline::new(PipelineConfig::new(layout.clone()), &EchoBundler, &Sha256Hasher)
        .run()
        .await
        .expect("run");

    assert_eq!(outcome.redeploy_line("functions:", ","), "functions:api-a,functions:api-b");
    assert!(outcome.baseline_written);
    assert!(outcome.write_error.is_none());
    assert_eq!(outcome.hashes["api-a"], sha256_hex(b"export const a = () => 1;\n"));

    let baseline = load_baseline(&layout.lock_path);
    assert_eq!(baseline.hashes, outcome.hashes);
    assert_eq!(baseline.last_diff.as_ref(), Some(&outcome.diff));
}

#[tokio::test]
async fn second_run_only_reports_edited_functions() {
    let tmp = tempdir().unwrap();
    let layout = both(tmp.path());
    let config = PipelineConfig::new(layout.clone());

    Pipeline::new(config.clone(), &EchoBundler, &Sha256Hasher).run().await.expect("first");
    let quiet = Pipeline::new(config.clone(), &EchoBundler, &Sha256Hasher).run().await.expect("second");
    assert_eq!(quiet.redeploy_line("functions:", ","), "");
    assert_eq!(quiet.diff.unchanged.len(), 2);

    fs::write(tmp.path().join("src/index.ts"), INDEX.replace("() => 2", "() => 22")).unwrap();
    let edited = Pipeline::new(config, &EchoBundler, &Sha256Hasher).run().await.expect("third");
    assert_eq!(edited.redeploy_line("functions:", ","), "functions:api-b");
    assert!(edited.diff.unchanged.contains("api-a"));
}

#[tokio::test]
async fn removed_functions_are_reported_but_not_redeployed() {
    let tmp = tempdir().unwrap();
    let layout = both(tmp.path());
    Pipeline::new(PipelineConfig::new(layout), &EchoBundler, &Sha256Hasher).run().await.unwrap();

    let layout = setup(tmp.path(), &[("api-a", "src/index.ts")]);
    let outcome =
        Pipeline::new(PipelineConfig::new(layout), &EchoBundler, &Sha256Hasher).run().await.unwrap();
    assert!(outcome.diff.removed.contains("api-b"));
    assert_eq!(outcome.redeploy_line("functions:", ","), "");
}

#[tokio::test]
async fn force_mode_redeploys_unchanged_functions() {
    let tmp = tempdir().unwrap();
    let layout = both(tmp.path());
    let mut config = PipelineConfig::new(layout);
    Pipeline::new(config.clone(), &EchoBundler, &Sha256Hasher).run().await.unwrap();

    config.force = true;
    let outcome = Pipeline::new(config, &EchoBundler, &Sha256Hasher).run().await.unwrap();
    assert_eq!(outcome.diff.added.len(), 2);
    assert!(outcome.diff.unchanged.is_empty());
    assert_eq!(outcome.redeploy_line("", " "), "api-a api-b");
}

#[tokio::test]
async fn write_disabled_leaves_baseline_alone() {
    let tmp = tempdir().unwrap();
    let layout = both(tmp.path());
    let mut config = PipelineConfig::new(layout.clone());
    config.write_baseline = false;

    let outcome = Pipeline::new(config, &EchoBundler, &Sha256Hasher).run().await.unwrap();
    assert!(!outcome.baseline_written);
    assert!(!layout.lock_path.exists());
}

#[tokio::test]
async fn hash_failure_aborts_without_touching_baseline() {
    let tmp = tempdir().unwrap();
    let layout = both(tmp.path());
    fs::write(&layout.lock_path, r#"{"hashes": {"api-a": "old"}}"#).unwrap();

    let err = Pipeline::new(PipelineConfig::new(layout.clone()), &EchoBundler, &RejectingHasher)
        .run()
        .await
        .unwrap_err();

    match err {
        PipelineError::Hash { errors } => {
            assert_eq!(errors.len(), 1);
            assert_eq!(errors[0].function, "api-b");
        }
        other => panic!("expected hash failure, got {other:?}"),
    }
    assert_eq!(fs::read_to_string(&layout.lock_path).unwrap(), r#"{"hashes": {"api-a": "old"}}"#);
}

#[tokio::test]
async fn build_failure_aborts_without_touching_baseline() {
    let tmp = tempdir().unwrap();
    let layout = both(tmp.path());

    let err = Pipeline::new(PipelineConfig::new(layout.clone()), &BrokenBundler, &Sha256Hasher)
        .run()
        .await
        .unwrap_err();

    match err {
        PipelineError::Build(failure) => assert_eq!(failure.errors.len(), 2),
        other => panic!("expected build failure, got {other:?}"),
    }
    assert!(!layout.lock_path.exists());
}

#[tokio::test]
async fn missing_spec_is_fatal() {
    let tmp = tempdir().unwrap();
    let layout = ProjectLayout::new(tmp.path());

    let err = Pipeline::new(PipelineConfig::new(layout), &EchoBundler, &Sha256Hasher)
        .run()
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::Spec(ParseError::NotFound(_))), "got {err:?}");
}

#[tokio::test]
async fn baseline_write_failure_keeps_the_redeploy_decision() {
    let tmp = tempdir().unwrap();
    let layout = both(tmp.path());
    // A directory where the baseline file should be makes the final rename fail.
    fs::create_dir_all(&layout.lock_path).unwrap();

    let outcome = Pipeline::new(PipelineConfig::new(layout), &EchoBundler, &Sha256Hasher)
        .run()
        .await
        .expect("run succeeds despite write failure");
    assert!(!outcome.baseline_written);
    assert!(outcome.write_error.is_some());
    assert_eq!(outcome.redeploy_line("functions:", ","), "functions:api-a,functions:api-b");
}

#[tokio::test]
async fn hierarchical_names_with_custom_separator() {
    let tmp = tempdir().unwrap();
    let layout = setup(tmp.path(), &[("group.a", "src/index.ts")]);
    let mut config = PipelineConfig::new(layout);
    config.name_separator = ".".into();

    let outcome = Pipeline::new(config, &EchoBundler, &Sha256Hasher).run().await.unwrap();
    assert_eq!(outcome.hashes["group.a"], sha256_hex(b"export const a = () => 1;\n"));
}
