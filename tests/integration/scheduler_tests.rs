use crate::support::{options, services, StubBundler};
use async_trait::async_trait;
use libpack::core::context::SharedContext;
use libpack::core::models::{BuildReport, Concurrency, Format};
use libpack::core::services::{run_build, BuildExecutor, NoopObserver, SecondaryStage, TaskScheduler};
use libpack::core::targets;
use libpack::utils::{LibpackError, Result};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Records whether it ran and whether every primary output existed at that point
struct RecordingStage {
    outputs: Vec<PathBuf>,
    ran: AtomicBool,
    saw_all_outputs: AtomicBool,
}

impl RecordingStage {
    fn new(outputs: Vec<PathBuf>) -> Self {
        Self {
            outputs,
            ran: AtomicBool::new(false),
            saw_all_outputs: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl SecondaryStage for RecordingStage {
    fn should_run(&self, _context: &SharedContext) -> bool {
        true
    }

    async fn run(&self, _context: &SharedContext) -> Result<Vec<BuildReport>> {
        self.ran.store(true, Ordering::SeqCst);
        let all = self.outputs.iter().all(|output| output.is_file());
        self.saw_all_outputs.store(all, Ordering::SeqCst);
        Ok(Vec::new())
    }
}

#[tokio::test]
async fn test_secondary_stage_runs_after_every_target() {
    let dir = tempfile::tempdir().unwrap();
    let options = Arc::new(options(dir.path()));
    let targets = targets::plan(&options).unwrap();
    let stage = RecordingStage::new(targets.iter().map(|t| t.output.clone()).collect());

    let bundler = Arc::new(StubBundler {
        delay: Duration::from_millis(30),
        ..StubBundler::new()
    });
    let executor = BuildExecutor::new(options, services(bundler));
    let scheduler = TaskScheduler::new(Concurrency::Unbounded, Arc::new(NoopObserver));

    let summary = scheduler
        .run_all(&executor, targets.clone(), Arc::new(SharedContext::new()), Some(&stage))
        .await
        .unwrap();

    assert!(stage.ran.load(Ordering::SeqCst));
    assert!(stage.saw_all_outputs.load(Ordering::SeqCst));

    // Reports come back in target order regardless of completion order
    let outputs: Vec<_> = summary.targets.iter().map(|r| r.output.clone()).collect();
    let expected: Vec<_> = targets.iter().map(|t| t.output.clone()).collect();
    assert_eq!(outputs, expected);
}

#[tokio::test]
async fn test_failed_target_skips_secondary_stage() {
    let dir = tempfile::tempdir().unwrap();
    let options = Arc::new(options(dir.path()));
    let targets = targets::plan(&options).unwrap();
    let stage = RecordingStage::new(Vec::new());

    let bundler = Arc::new(StubBundler {
        fail_on: Some(Format::Cjs),
        ..StubBundler::new()
    });
    let executor = BuildExecutor::new(options, services(bundler));
    let scheduler = TaskScheduler::new(Concurrency::Unbounded, Arc::new(NoopObserver));

    let err = scheduler
        .run_all(&executor, targets, Arc::new(SharedContext::new()), Some(&stage))
        .await
        .unwrap_err();

    assert!(matches!(err, LibpackError::Build { ref message } if message.contains("cannot emit cjs")));
    assert!(!stage.ran.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_fail_fast_lets_running_siblings_finish() {
    let dir = tempfile::tempdir().unwrap();
    let options = Arc::new(options(dir.path()));
    let targets = targets::plan(&options).unwrap();
    let es_output = targets
        .iter()
        .find(|target| target.format == Format::Es)
        .map(|target| target.output.clone())
        .unwrap();

    let bundler = Arc::new(StubBundler {
        fail_on: Some(Format::Cjs),
        slow_format: Some((Format::Es, Duration::from_millis(300))),
        ..StubBundler::new()
    });
    let executor = BuildExecutor::new(options, services(bundler));
    let scheduler = TaskScheduler::new(Concurrency::Unbounded, Arc::new(NoopObserver));

    let err = scheduler
        .run_all(&executor, targets, Arc::new(SharedContext::new()), None)
        .await
        .unwrap_err();

    // The failure is reported without waiting for the slow target
    assert!(matches!(err, LibpackError::Build { ref message } if message.contains("cannot emit cjs")));
    assert!(!es_output.exists());

    tokio::time::sleep(Duration::from_millis(800)).await;
    assert!(es_output.is_file());
}

#[tokio::test]
async fn test_bounded_concurrency_limits_in_flight_targets() {
    let dir = tempfile::tempdir().unwrap();
    let options = Arc::new(options(dir.path()));
    let targets = targets::plan(&options).unwrap();
    assert_eq!(targets.len(), 4);

    let bundler = Arc::new(StubBundler {
        delay: Duration::from_millis(40),
        ..StubBundler::new()
    });
    let executor = BuildExecutor::new(options, services(bundler.clone()));
    let scheduler = TaskScheduler::new(Concurrency::Bounded(2), Arc::new(NoopObserver));

    let summary = scheduler
        .run_all(&executor, targets, Arc::new(SharedContext::new()), None)
        .await
        .unwrap();

    assert_eq!(summary.targets.len(), 4);
    assert!(bundler.max_in_flight.load(Ordering::SeqCst) <= 2);
}

#[tokio::test]
async fn test_unbounded_runs_every_target_at_once() {
    let dir = tempfile::tempdir().unwrap();
    let options = Arc::new(options(dir.path()));
    let targets = targets::plan(&options).unwrap();

    let bundler = Arc::new(StubBundler {
        delay: Duration::from_millis(100),
        ..StubBundler::new()
    });
    let executor = BuildExecutor::new(options, services(bundler.clone()));
    let scheduler = TaskScheduler::new(Concurrency::Unbounded, Arc::new(NoopObserver));

    scheduler
        .run_all(&executor, targets, Arc::new(SharedContext::new()), None)
        .await
        .unwrap();

    assert_eq!(bundler.max_in_flight.load(Ordering::SeqCst), 4);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_stylesheet_claimed_by_exactly_one_target() {
    let dir = tempfile::tempdir().unwrap();
    let mut options = options(dir.path());
    options.formats = vec![Format::Es, Format::Cjs, Format::Umd, Format::Amd, Format::Iife];
    options.compress = vec![Format::Umd, Format::Iife];

    std::fs::write(dir.path().join("src/style.css"), ".widget { color: red; }\n").unwrap();

    let bundler = Arc::new(StubBundler {
        imports_stylesheet: true,
        ..StubBundler::new()
    });
    let summary = run_build(Arc::new(options), services(bundler.clone()), Arc::new(NoopObserver))
        .await
        .unwrap();

    assert_eq!(summary.targets.len(), 7);
    assert_eq!(bundler.css_enabled_count(), 1);

    let outdir = dir.path().join("dist");
    let compiled = std::fs::read_to_string(outdir.join("widgets.css")).unwrap();
    let minified = std::fs::read_to_string(outdir.join("widgets.min.css")).unwrap();
    assert!(compiled.contains(".widget"));
    assert_eq!(minified, ".widget{color:red}");
    assert_eq!(summary.secondary.len(), 2);
}

#[tokio::test]
async fn test_no_stylesheet_means_no_css_outputs() {
    let dir = tempfile::tempdir().unwrap();
    let options = options(dir.path());

    let bundler = Arc::new(StubBundler::new());
    let summary = run_build(Arc::new(options), services(bundler), Arc::new(NoopObserver))
        .await
        .unwrap();

    assert!(summary.secondary.is_empty());
    assert!(!dir.path().join("dist/widgets.css").exists());
}

#[tokio::test]
async fn test_version_is_stamped_into_outputs() {
    let dir = tempfile::tempdir().unwrap();
    let options = options(dir.path());

    let bundler = Arc::new(StubBundler::new());
    run_build(Arc::new(options), services(bundler), Arc::new(NoopObserver))
        .await
        .unwrap();

    let es = std::fs::read_to_string(dir.path().join("dist/widgets.es.js")).unwrap();
    assert!(es.starts_with("/**\n * @acme/widgets v1.4.0\n"));
    assert!(es.contains("var version = '1.4.0';"));

    let minified = std::fs::read_to_string(dir.path().join("dist/widgets.min.js")).unwrap();
    assert!(minified.starts_with("/**\n * @acme/widgets v1.4.0\n"));
    assert!(minified.contains("1.4.0"));
}
