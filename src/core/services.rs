use crate::core::banner;
use crate::core::context::{SharedContext, COMPILED_STYLESHEET, STYLESHEET};
use crate::core::interfaces::*;
use crate::core::models::*;
use crate::core::plugin::{resolve_plugins, PluginRegistry, TargetIdentity};
use crate::core::targets;
use crate::utils::{LibpackError, Logger, Result, Timer};
use async_trait::async_trait;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::Write;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// The external collaborators a build runs against
#[derive(Clone)]
pub struct BuildServices {
    pub fs: Arc<dyn FileSystemService>,
    pub bundler: Arc<dyn Bundler>,
    pub minifier: Arc<dyn Minifier>,
    pub stylesheets: Arc<dyn StylesheetMinifier>,
    pub registry: Arc<PluginRegistry>,
}

/// Builds one target: bundle, generate, optionally minify, write
#[derive(Clone)]
pub struct BuildExecutor {
    options: Arc<BuildOptions>,
    services: BuildServices,
}

impl BuildExecutor {
    pub fn new(options: Arc<BuildOptions>, services: BuildServices) -> Self {
        Self { options, services }
    }

    pub fn options(&self) -> &BuildOptions {
        &self.options
    }

    /// Build one target; errors from the bundler or minifier propagate unchanged
    pub async fn build(&self, target: &Target, context: &SharedContext) -> Result<BuildReport> {
        let _timer = Timer::start(&format!("Building {}", target.output.display()));
        let options = &self.options;

        let identity = TargetIdentity {
            format: target.format,
            outdir: &options.outdir,
            name: &options.name,
            compress: target.compress,
            context,
        };
        let resolved = resolve_plugins(&options.plugins, &target.plugin_overrides, &identity);
        let plugins = self.services.registry.instantiate(resolved)?;

        let graph = self
            .services
            .bundler
            .bundle(BundleInput {
                entry: options.input.clone(),
                plugins,
                external: options.external.clone(),
            })
            .await?;

        let banner = banner::generate(&options.metadata, options.include_contributors);
        let generated = graph
            .generate(&GenerateOptions {
                format: target.format,
                banner: &banner,
                exports: options.exports,
                globals: &options.globals,
                name: &options.module_name,
            })
            .await?;

        let code = if target.compress {
            self.minify(generated.code, banner, target.format).await?
        } else {
            generated.code
        };

        self.services.fs.write_file(&target.output, &code).await?;

        let gzipped = if target.compress {
            Some(gzip_size(&code)?)
        } else {
            None
        };
        Logger::target_complete(&target.output, code.len(), gzipped);

        Ok(BuildReport {
            output: target.output.clone(),
            size: code.len(),
            gzipped,
        })
    }

    async fn minify(&self, code: String, banner: String, format: Format) -> Result<String> {
        let minifier = self.services.minifier.clone();

        // Minification is CPU bound, keep it off the async workers
        tokio::task::spawn_blocking(move || {
            minifier.minify(
                &code,
                &MinifyOptions {
                    preserve_comment: &banner,
                    ascii_only: true,
                    module: format.is_module(),
                },
            )
        })
        .await
        .map_err(|e| LibpackError::build(format!("Minification task failed: {}", e)))?
    }
}

/// Byte length of the gzip-compressed payload, for reporting only
pub fn gzip_size(code: &str) -> Result<usize> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(code.as_bytes())?;
    Ok(encoder.finish()?.len())
}

/// Progress callbacks for scheduled targets
pub trait TaskObserver: Send + Sync {
    fn waiting(&self, _target: &Target) {}
    fn started(&self, _target: &Target) {}
    fn finished(&self, _target: &Target, _report: &BuildReport) {}
    fn failed(&self, _target: &Target, _error: &LibpackError) {}
    fn artifact_written(&self, _report: &BuildReport) {}
}

pub struct NoopObserver;

impl TaskObserver for NoopObserver {}

/// Work that depends on side artifacts populated by the primary targets
#[async_trait]
pub trait SecondaryStage: Send + Sync {
    fn should_run(&self, context: &SharedContext) -> bool;
    async fn run(&self, context: &SharedContext) -> Result<Vec<BuildReport>>;
}

/// Compile then minify the stylesheet collected by the `css` plugin
pub struct StylesheetStage {
    options: Arc<BuildOptions>,
    stylesheets: Arc<dyn StylesheetMinifier>,
    fs: Arc<dyn FileSystemService>,
}

impl StylesheetStage {
    pub fn new(options: Arc<BuildOptions>, services: &BuildServices) -> Self {
        Self {
            options,
            stylesheets: services.stylesheets.clone(),
            fs: services.fs.clone(),
        }
    }

    async fn write(&self, compress: bool, content: &str) -> Result<BuildReport> {
        let output = self.options.stylesheet_path(compress);
        self.fs.write_file(&output, content).await?;
        let gzipped = if compress { Some(gzip_size(content)?) } else { None };
        Ok(BuildReport {
            output,
            size: content.len(),
            gzipped,
        })
    }
}

#[async_trait]
impl SecondaryStage for StylesheetStage {
    fn should_run(&self, context: &SharedContext) -> bool {
        context
            .artifact(STYLESHEET)
            .is_some_and(|css| !css.trim().is_empty())
    }

    async fn run(&self, context: &SharedContext) -> Result<Vec<BuildReport>> {
        let _timer = Timer::start("Stylesheet stage");
        let collected = context.artifact(STYLESHEET).unwrap_or_default();
        Logger::stylesheet_stage(collected.len());

        let compiled = self.stylesheets.compile(&collected).await?;
        let compiled_report = self.write(false, &compiled).await?;
        context.publish(COMPILED_STYLESHEET, compiled);

        let compiled = context.artifact(COMPILED_STYLESHEET).unwrap_or_default();
        let minified = self.stylesheets.minify(&compiled).await?;
        let minified_report = self.write(true, &minified).await?;

        Ok(vec![compiled_report, minified_report])
    }
}

/// Reports from one scheduled run, primary targets in target order
#[derive(Debug, Default)]
pub struct RunSummary {
    pub targets: Vec<BuildReport>,
    pub secondary: Vec<BuildReport>,
}

/// Runs targets concurrently, then the secondary stage once all succeeded
pub struct TaskScheduler {
    concurrency: Concurrency,
    observer: Arc<dyn TaskObserver>,
}

impl TaskScheduler {
    pub fn new(concurrency: Concurrency, observer: Arc<dyn TaskObserver>) -> Self {
        Self { concurrency, observer }
    }

    /// Fails on the first failed target; siblings already running are left to finish
    pub async fn run_all(
        &self,
        executor: &BuildExecutor,
        targets: Vec<Target>,
        context: Arc<SharedContext>,
        secondary: Option<&dyn SecondaryStage>,
    ) -> Result<RunSummary> {
        let semaphore = match self.concurrency {
            Concurrency::Unbounded => None,
            Concurrency::Bounded(0) => {
                return Err(LibpackError::config("concurrency must be at least 1"));
            }
            Concurrency::Bounded(limit) => Some(Arc::new(Semaphore::new(limit))),
        };

        let mut join_set = JoinSet::new();
        for (index, target) in targets.iter().cloned().enumerate() {
            self.observer.waiting(&target);
            join_set.spawn(run_target(
                index,
                target,
                executor.clone(),
                context.clone(),
                semaphore.clone(),
                self.observer.clone(),
            ));
        }

        let mut reports: Vec<Option<BuildReport>> = vec![None; targets.len()];
        while let Some(joined) = join_set.join_next().await {
            let outcome = joined
                .map_err(|e| LibpackError::build(format!("Build task panicked: {}", e)))
                .and_then(|result| result);

            match outcome {
                Ok((index, report)) => reports[index] = Some(report),
                Err(error) => {
                    join_set.detach_all();
                    return Err(error);
                }
            }
        }

        let mut summary = RunSummary {
            targets: reports.into_iter().flatten().collect(),
            secondary: Vec::new(),
        };

        if let Some(stage) = secondary {
            if stage.should_run(&context) {
                summary.secondary = stage.run(&context).await?;
                for report in &summary.secondary {
                    self.observer.artifact_written(report);
                }
            }
        }

        Ok(summary)
    }
}

async fn run_target(
    index: usize,
    target: Target,
    executor: BuildExecutor,
    context: Arc<SharedContext>,
    semaphore: Option<Arc<Semaphore>>,
    observer: Arc<dyn TaskObserver>,
) -> Result<(usize, BuildReport)> {
    let _permit = match semaphore {
        Some(semaphore) => Some(
            semaphore
                .acquire_owned()
                .await
                .map_err(|e| LibpackError::build(format!("Scheduler closed: {}", e)))?,
        ),
        None => None,
    };

    Logger::target_bundling(&target.output);
    observer.started(&target);

    match executor.build(&target, &context).await {
        Ok(report) => {
            observer.finished(&target, &report);
            Ok((index, report))
        }
        Err(error) => {
            observer.failed(&target, &error);
            Err(error)
        }
    }
}

/// Validate, expand and run every target, then the stylesheet stage
pub async fn run_build(
    options: Arc<BuildOptions>,
    services: BuildServices,
    observer: Arc<dyn TaskObserver>,
) -> Result<RunSummary> {
    let targets = targets::plan(&options)?;
    validate_plugins(&options, &services.registry)?;

    Logger::build_start(&options.input, &options.outdir, targets.len());
    for target in &targets {
        Logger::target_waiting(&target.output);
    }

    let stage = StylesheetStage::new(options.clone(), &services);
    let executor = BuildExecutor::new(options.clone(), services);
    let scheduler = TaskScheduler::new(options.concurrency, observer);

    scheduler
        .run_all(&executor, targets, Arc::new(SharedContext::new()), Some(&stage))
        .await
}

/// Every enabled plugin name must have a constructor before anything is scheduled
pub fn validate_plugins(options: &BuildOptions, registry: &PluginRegistry) -> Result<()> {
    registry.validate(options.plugins.enabled_names())?;
    for layer in options.overrides.values() {
        registry.validate(layer.plugins.enabled_names())?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::banner::ProjectMetadata;
    use crate::core::plugin::PluginSpec;
    use crate::infrastructure::TokioFileSystemService;
    use parking_lot::Mutex;
    use std::path::Path;

    struct EchoGraph;

    #[async_trait]
    impl ModuleGraph for EchoGraph {
        async fn generate(&self, options: &GenerateOptions<'_>) -> Result<GeneratedCode> {
            Ok(GeneratedCode {
                code: format!("{}// {}\nconsole.log('héllo');\n", options.banner, options.format),
            })
        }
    }

    struct EchoBundler {
        seen_plugins: Mutex<Vec<Vec<String>>>,
    }

    #[async_trait]
    impl Bundler for EchoBundler {
        async fn bundle(&self, input: BundleInput) -> Result<Box<dyn ModuleGraph>> {
            self.seen_plugins
                .lock()
                .push(input.plugins.iter().map(|p| p.name().to_string()).collect());
            Ok(Box::new(EchoGraph))
        }
    }

    struct UpperMinifier;

    impl Minifier for UpperMinifier {
        fn minify(&self, code: &str, options: &MinifyOptions<'_>) -> Result<String> {
            assert!(options.ascii_only);
            let body = code.strip_prefix(options.preserve_comment).unwrap_or(code);
            Ok(format!("{}{}", options.preserve_comment, body.trim().replace('é', "\\u00e9")))
        }
    }

    struct PassthroughCss;

    #[async_trait]
    impl StylesheetMinifier for PassthroughCss {
        async fn compile(&self, css: &str) -> Result<String> {
            Ok(css.to_string())
        }
        async fn minify(&self, css: &str) -> Result<String> {
            Ok(css.split_whitespace().collect::<Vec<_>>().join(""))
        }
    }

    fn services(bundler: Arc<EchoBundler>) -> BuildServices {
        BuildServices {
            fs: Arc::new(TokioFileSystemService),
            bundler,
            minifier: Arc::new(UpperMinifier),
            stylesheets: Arc::new(PassthroughCss),
            registry: Arc::new(PluginRegistry::with_builtins()),
        }
    }

    fn options(outdir: &Path) -> BuildOptions {
        let metadata = ProjectMetadata {
            name: "mylib".to_string(),
            version: "2.0.0".to_string(),
            ..Default::default()
        };
        let mut options = BuildOptions::new("src/index.js", Arc::new(metadata));
        options.outdir = outdir.to_path_buf();
        options
    }

    #[tokio::test]
    async fn test_build_writes_uncompressed_target() {
        let dir = tempfile::tempdir().unwrap();
        let options = Arc::new(options(dir.path()));
        let bundler = Arc::new(EchoBundler { seen_plugins: Mutex::new(Vec::new()) });
        let executor = BuildExecutor::new(options.clone(), services(bundler));

        let target = targets::plan(&options).unwrap().remove(0);
        let report = executor.build(&target, &SharedContext::new()).await.unwrap();

        let written = std::fs::read_to_string(&report.output).unwrap();
        assert!(written.starts_with("/**\n * mylib v2.0.0\n"));
        assert!(written.contains("console.log('héllo');"));
        assert_eq!(report.size, written.len());
        assert!(report.gzipped.is_none());
    }

    #[tokio::test]
    async fn test_build_minifies_compressed_target() {
        let dir = tempfile::tempdir().unwrap();
        let options = Arc::new(options(dir.path()));
        let bundler = Arc::new(EchoBundler { seen_plugins: Mutex::new(Vec::new()) });
        let executor = BuildExecutor::new(options.clone(), services(bundler));

        let target = targets::plan(&options)
            .unwrap()
            .into_iter()
            .find(|t| t.compress)
            .unwrap();
        let report = executor.build(&target, &SharedContext::new()).await.unwrap();

        let written = std::fs::read_to_string(&report.output).unwrap();
        assert!(report.output.ends_with("mylib.min.js"));
        assert!(written.starts_with("/**"));
        assert!(written.contains("\\u00e9"));
        assert!(report.gzipped.is_some());
    }

    #[tokio::test]
    async fn test_unknown_plugin_fails_before_scheduling() {
        let dir = tempfile::tempdir().unwrap();
        let mut options = options(dir.path());
        options.plugins = PluginSpec::new().with("vue", serde_json::json!(true).into());

        let bundler = Arc::new(EchoBundler { seen_plugins: Mutex::new(Vec::new()) });
        let err = run_build(Arc::new(options), services(bundler.clone()), Arc::new(NoopObserver))
            .await
            .unwrap_err();

        assert!(err.is_config());
        assert!(bundler.seen_plugins.lock().is_empty());
        assert!(std::fs::read_dir(dir.path()).unwrap().next().is_none());
    }

    #[tokio::test]
    async fn test_disabled_unknown_plugin_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut options = options(dir.path());
        options.plugins = PluginSpec::new()
            .with("vue", serde_json::json!(false).into())
            .with("strip", serde_json::json!(true).into());

        let bundler = Arc::new(EchoBundler { seen_plugins: Mutex::new(Vec::new()) });
        let summary = run_build(Arc::new(options), services(bundler.clone()), Arc::new(NoopObserver))
            .await
            .unwrap();

        assert!(!summary.targets.is_empty());
        let seen = bundler.seen_plugins.lock();
        assert!(seen.iter().all(|names| names == &["strip".to_string()]));
    }

    #[tokio::test]
    async fn test_bounded_zero_is_rejected() {
        let scheduler = TaskScheduler::new(Concurrency::Bounded(0), Arc::new(NoopObserver));
        let dir = tempfile::tempdir().unwrap();
        let options = Arc::new(options(dir.path()));
        let bundler = Arc::new(EchoBundler { seen_plugins: Mutex::new(Vec::new()) });
        let executor = BuildExecutor::new(options, services(bundler));

        let err = scheduler
            .run_all(&executor, Vec::new(), Arc::new(SharedContext::new()), None)
            .await
            .unwrap_err();
        assert!(err.is_config());
    }

    #[tokio::test]
    async fn test_stylesheet_stage_writes_both_files() {
        let dir = tempfile::tempdir().unwrap();
        let options = Arc::new(options(dir.path()));
        let bundler = Arc::new(EchoBundler { seen_plugins: Mutex::new(Vec::new()) });
        let stage = StylesheetStage::new(options, &services(bundler));

        let context = SharedContext::new();
        assert!(!stage.should_run(&context));

        context.claim(STYLESHEET).unwrap().append("a { color: red; }");
        assert!(stage.should_run(&context));

        let reports = stage.run(&context).await.unwrap();
        assert_eq!(reports.len(), 2);
        assert_eq!(std::fs::read_to_string(dir.path().join("mylib.css")).unwrap(), "a { color: red; }\n");
        assert_eq!(std::fs::read_to_string(dir.path().join("mylib.min.css")).unwrap(), "a{color:red;}");
        assert!(context.artifact(COMPILED_STYLESHEET).is_some());
    }

    #[test]
    fn test_gzip_size() {
        let code = "a".repeat(10_000);
        let size = gzip_size(&code).unwrap();
        assert!(size > 0 && size < code.len());
    }
}
