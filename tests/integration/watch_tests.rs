use crate::support::{options, services, StubBundler};
use futures::StreamExt;
use libpack::core::models::Format;
use libpack::core::services::BuildExecutor;
use libpack::core::targets;
use libpack::core::watch::{WatchEvent, WatchOptions, WatchSession};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

async fn next_cycle(session: &mut WatchSession) -> Vec<WatchEvent> {
    let mut events = Vec::new();
    while events.len() < 4 {
        let event = tokio::time::timeout(Duration::from_secs(5), session.next())
            .await
            .expect("watch event not delivered")
            .expect("session ended early");
        events.push(event);
    }
    events
}

fn codes(events: &[WatchEvent]) -> Vec<&'static str> {
    events.iter().map(WatchEvent::code).collect()
}

#[tokio::test]
async fn test_watch_rebuilds_on_change() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().canonicalize().unwrap();
    let options = Arc::new(options(&root));
    let target = targets::plan(&options).unwrap().remove(0);

    let bundler = Arc::new(StubBundler::new());
    let executor = BuildExecutor::new(options.clone(), services(bundler.clone()));
    let watch = WatchOptions {
        paths: vec![root.join("src")],
        ignore: Vec::new(),
        debounce: Duration::from_millis(50),
    };
    let mut session = executor.watch(target.clone(), &watch).unwrap();

    let first = next_cycle(&mut session).await;
    assert_eq!(codes(&first), ["START", "BUNDLE_START", "BUNDLE_END", "END"]);
    assert!(first.iter().all(|event| event.output() == target.output));
    assert!(target.output.is_file());

    tokio::time::sleep(Duration::from_millis(100)).await;
    std::fs::write(root.join("src/index.js"), "export const value = 2;\n").unwrap();

    let second = next_cycle(&mut session).await;
    assert_eq!(codes(&second), ["START", "BUNDLE_START", "BUNDLE_END", "END"]);
    assert_eq!(bundler.bundles.load(Ordering::SeqCst), 2);

    session.close().await;
}

#[tokio::test]
async fn test_failed_cycle_keeps_watching() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().canonicalize().unwrap();
    let options = Arc::new(options(&root));
    let target = targets::plan(&options)
        .unwrap()
        .into_iter()
        .find(|target| target.format == Format::Cjs)
        .unwrap();

    let bundler = Arc::new(StubBundler {
        fail_on: Some(Format::Cjs),
        ..StubBundler::new()
    });
    let executor = BuildExecutor::new(options, services(bundler.clone()));
    let watch = WatchOptions {
        paths: vec![root.join("src")],
        ignore: Vec::new(),
        debounce: Duration::from_millis(50),
    };
    let mut session = executor.watch(target.clone(), &watch).unwrap();

    let first = next_cycle(&mut session).await;
    assert_eq!(codes(&first), ["START", "BUNDLE_START", "ERROR", "END"]);
    assert!(matches!(&first[2], WatchEvent::Error { error, .. } if error.to_string().contains("cannot emit cjs")));
    assert!(!target.output.exists());

    tokio::time::sleep(Duration::from_millis(100)).await;
    std::fs::write(root.join("src/index.js"), "export const value = 3;\n").unwrap();

    let second = next_cycle(&mut session).await;
    assert_eq!(codes(&second)[0], "START");
    assert_eq!(bundler.bundles.load(Ordering::SeqCst), 2);

    session.close().await;
}

#[tokio::test]
async fn test_missing_watch_path_still_builds() {
    let dir = tempfile::tempdir().unwrap();
    let options = Arc::new(options(dir.path()));
    let target = targets::plan(&options).unwrap().remove(0);

    let executor = BuildExecutor::new(options, services(Arc::new(StubBundler::new())));
    let watch = WatchOptions {
        paths: vec![dir.path().join("does-not-exist")],
        ignore: Vec::new(),
        debounce: Duration::from_millis(10),
    };
    let mut session = executor.watch(target, &watch).unwrap();

    let first = next_cycle(&mut session).await;
    assert_eq!(codes(&first), ["START", "BUNDLE_START", "BUNDLE_END", "END"]);
    session.close().await;
}

#[tokio::test]
async fn test_writing_outputs_does_not_trigger_a_rebuild() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().canonicalize().unwrap();
    let mut options = options(&root);
    options.input = root.join("index.js");
    options.outdir = root.join("lib");
    std::fs::write(&options.input, "export const value = 1;\n").unwrap();
    let options = Arc::new(options);
    let target = targets::plan(&options).unwrap().remove(0);

    let bundler = Arc::new(StubBundler::new());
    let executor = BuildExecutor::new(options.clone(), services(bundler.clone()));
    let watch = WatchOptions {
        debounce: Duration::from_millis(50),
        ..WatchOptions::for_input(&options.input)
    };
    assert_eq!(watch.paths, vec![root.clone()]);
    let mut session = executor.watch(target.clone(), &watch).unwrap();

    let first = next_cycle(&mut session).await;
    assert_eq!(codes(&first), ["START", "BUNDLE_START", "BUNDLE_END", "END"]);
    assert!(target.output.starts_with(root.join("lib")));
    assert!(target.output.is_file());

    let quiet = tokio::time::timeout(Duration::from_millis(600), session.next()).await;
    assert!(quiet.is_err(), "writing the output started another cycle");
    assert_eq!(bundler.bundles.load(Ordering::SeqCst), 1);

    session.close().await;
}

async fn edit_after_stop(root: &std::path::Path, bundler: &StubBundler) {
    tokio::time::sleep(Duration::from_millis(100)).await;
    std::fs::write(root.join("src/index.js"), "export const value = 4;\n").unwrap();
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(bundler.bundles.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_closed_session_stops_rebuilding() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().canonicalize().unwrap();
    let options = Arc::new(options(&root));
    let target = targets::plan(&options).unwrap().remove(0);

    let bundler = Arc::new(StubBundler::new());
    let executor = BuildExecutor::new(options, services(bundler.clone()));
    let watch = WatchOptions {
        paths: vec![root.join("src")],
        ignore: Vec::new(),
        debounce: Duration::from_millis(50),
    };
    let mut session = executor.watch(target, &watch).unwrap();
    next_cycle(&mut session).await;

    session.close().await;
    edit_after_stop(&root, &bundler).await;
}

#[tokio::test]
async fn test_dropped_session_stops_rebuilding() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().canonicalize().unwrap();
    let options = Arc::new(options(&root));
    let target = targets::plan(&options).unwrap().remove(0);

    let bundler = Arc::new(StubBundler::new());
    let executor = BuildExecutor::new(options, services(bundler.clone()));
    let watch = WatchOptions {
        paths: vec![root.join("src")],
        ignore: Vec::new(),
        debounce: Duration::from_millis(50),
    };
    let mut session = executor.watch(target, &watch).unwrap();
    next_cycle(&mut session).await;

    drop(session);
    edit_after_stop(&root, &bundler).await;
}
