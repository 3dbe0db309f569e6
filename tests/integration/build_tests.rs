use libpack::core::banner::ProjectMetadata;
use libpack::core::services::{run_build, NoopObserver};
use libpack::infrastructure::default_services;
use libpack::utils::diagnostics::format_error;
use libpack::utils::{CliOverrides, ConfigLoader, LibpackError};
use std::path::Path;
use std::sync::Arc;

const PACKAGE_JSON: &str = r#"{
  "name": "@acme/widgets",
  "version": "1.4.0",
  "author": "Ada Lovelace <ada@example.com>",
  "license": "Apache-2.0"
}"#;

const CONFIG: &str = r#"{
  "formats": ["es", "cjs", "umd"],
  "compress": ["umd"],
  "cjs": { "file": "{outdir}/{name}.common.js" },
  "umd.min": { "plugins": { "strip": true } }
}"#;

const ENTRY: &str = "import './style.css';
import { double } from './math.js';

export const version = '__VERSION__';
export const mode = process.env.NODE_ENV;

export function run(x) {
  console.log('running');
  return double(x);
}
";

fn write_project(root: &Path, entry: &str) {
    let files = [
        ("package.json", PACKAGE_JSON),
        ("libpack.config.json", CONFIG),
        ("src/index.js", entry),
        ("src/math.js", "export function double(x) {\n  return x * 2;\n}\n"),
        ("src/style.css", ".widget {\n  color: red;\n}\n"),
    ];
    for (name, content) in files {
        let path = root.join(name);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }
}

async fn build(root: &Path) -> libpack::utils::Result<libpack::core::services::RunSummary> {
    let metadata = Arc::new(ProjectMetadata::load(root)?);
    let config = ConfigLoader::load(root, None)?;
    let options = ConfigLoader::build_options(config, &CliOverrides::default(), root, metadata)?;
    run_build(Arc::new(options), default_services(), Arc::new(NoopObserver)).await
}

#[tokio::test]
async fn test_library_project_build() {
    let dir = tempfile::tempdir().unwrap();
    write_project(dir.path(), ENTRY);

    let summary = build(dir.path()).await.unwrap();
    assert_eq!(summary.targets.len(), 4);
    assert_eq!(summary.secondary.len(), 2);

    let dist = dir.path().join("dist");
    let read = |name: &str| std::fs::read_to_string(dist.join(name)).unwrap();

    let es = read("widgets.es.js");
    assert!(es.starts_with("/**\n * @acme/widgets v1.4.0\n"));
    assert!(es.contains("Ada Lovelace"));
    assert!(es.contains("@license Apache-2.0"));
    assert!(es.contains("const version = '1.4.0';"));
    assert!(es.contains("process.env.NODE_ENV"));
    assert!(es.find("function double(x)").unwrap() < es.find("function run(x)").unwrap());
    assert!(!es.contains("style.css"));

    let cjs = read("widgets.common.js");
    assert!(cjs.contains("exports.run = run;"));
    assert!(!dist.join("widgets.cjs.js").exists());

    let umd = read("widgets.js");
    assert!(umd.contains("Widgets"));
    assert!(umd.contains("\"development\""));
    assert!(umd.contains("console.log('running')"));

    let minified = read("widgets.min.js");
    assert!(minified.starts_with("/**\n * @acme/widgets v1.4.0\n"));
    assert!(minified.contains("production"));
    assert!(!minified.contains("console.log"));
    assert!(minified.len() < umd.len());

    assert!(read("widgets.css").contains(".widget"));
    assert_eq!(read("widgets.min.css"), ".widget{color:red}");
}

#[tokio::test]
async fn test_syntax_error_reports_code_frame() {
    let dir = tempfile::tempdir().unwrap();
    write_project(dir.path(), "export const a = 1;\nexport const b = ;\n");

    let err = build(dir.path()).await.unwrap_err();
    let LibpackError::Syntax(syntax) = &err else {
        panic!("expected a syntax error, got {:?}", err);
    };
    assert_eq!(syntax.line, 2);

    let report = format_error(&err);
    assert!(report.contains("index.js:2:"));
    assert!(report.contains("2 | export const b = ;"));
    assert!(report.contains('^'));
    assert!(!dir.path().join("dist/widgets.css").exists());
}

#[tokio::test]
async fn test_unknown_plugin_is_a_config_error() {
    let dir = tempfile::tempdir().unwrap();
    write_project(dir.path(), ENTRY);
    std::fs::write(dir.path().join("libpack.config.json"), r#"{ "plugins": { "vue": true } }"#).unwrap();

    let err = build(dir.path()).await.unwrap_err();
    assert!(err.is_config());
    assert!(!dir.path().join("dist").exists());
}

#[tokio::test]
async fn test_non_ascii_source_survives_minification() {
    let dir = tempfile::tempdir().unwrap();
    write_project(dir.path(), "export const greeting = 'héllo 👋';\n");

    build(dir.path()).await.unwrap();

    let es = std::fs::read_to_string(dir.path().join("dist/widgets.es.js")).unwrap();
    assert!(es.contains("'héllo 👋'"));

    let minified = std::fs::read_to_string(dir.path().join("dist/widgets.min.js")).unwrap();
    assert!(minified.is_ascii());
}
