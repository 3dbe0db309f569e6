use async_trait::async_trait;
use libpack::core::banner::ProjectMetadata;
use libpack::core::interfaces::*;
use libpack::core::models::{BuildOptions, Format};
use libpack::core::plugin::PluginRegistry;
use libpack::core::services::BuildServices;
use libpack::infrastructure::{LightningCssMinifier, OxcMinifier, TokioFileSystemService};
use libpack::plugins::default_plugins;
use libpack::utils::{LibpackError, Result};
use parking_lot::Mutex;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Bundler double: records plugins, can stall or fail per format
#[derive(Default)]
pub struct StubBundler {
    pub delay: Duration,
    pub fail_on: Option<Format>,
    /// Extra time spent generating one format
    pub slow_format: Option<(Format, Duration)>,
    /// Prefix the entry with `import './style.css';`
    pub imports_stylesheet: bool,
    pub bundles: AtomicUsize,
    pub seen_plugins: Mutex<Vec<Vec<String>>>,
    pub in_flight: Arc<AtomicUsize>,
    pub max_in_flight: Arc<AtomicUsize>,
}

impl StubBundler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn css_enabled_count(&self) -> usize {
        self.seen_plugins
            .lock()
            .iter()
            .filter(|names| names.iter().any(|name| name == "css"))
            .count()
    }
}

#[async_trait]
impl Bundler for StubBundler {
    async fn bundle(&self, input: BundleInput) -> Result<Box<dyn ModuleGraph>> {
        self.bundles.fetch_add(1, Ordering::SeqCst);
        self.seen_plugins
            .lock()
            .push(input.plugins.iter().map(|p| p.name().to_string()).collect());

        let mut source = "var version = '__VERSION__';\n".to_string();
        if self.imports_stylesheet {
            source = format!("import './style.css';\n{}", source);
        }
        for plugin in &input.plugins {
            if let Some(transformed) = plugin.transform(&source, &input.entry).await? {
                source = transformed;
            }
        }
        // Unconsumed stylesheet imports are dropped, as the real bundler does
        source = source
            .lines()
            .filter(|line| !line.starts_with("import "))
            .map(|line| format!("{}\n", line))
            .collect();

        Ok(Box::new(StubGraph {
            source,
            delay: self.delay,
            fail_on: self.fail_on,
            slow_format: self.slow_format,
            in_flight: self.in_flight.clone(),
            max_in_flight: self.max_in_flight.clone(),
        }))
    }
}

struct StubGraph {
    source: String,
    delay: Duration,
    fail_on: Option<Format>,
    slow_format: Option<(Format, Duration)>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

#[async_trait]
impl ModuleGraph for StubGraph {
    async fn generate(&self, options: &GenerateOptions<'_>) -> Result<GeneratedCode> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        if let Some((format, extra)) = self.slow_format {
            if format == options.format {
                tokio::time::sleep(extra).await;
            }
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.fail_on == Some(options.format) {
            return Err(LibpackError::build(format!("cannot emit {}", options.format)));
        }
        Ok(GeneratedCode {
            code: format!("{}// {}\n{}", options.banner, options.format, self.source),
        })
    }
}

pub fn metadata() -> Arc<ProjectMetadata> {
    Arc::new(ProjectMetadata {
        name: "@acme/widgets".to_string(),
        version: "1.4.0".to_string(),
        ..Default::default()
    })
}

/// Options rooted in a scratch project with an entry module at src/index.js
pub fn options(root: &Path) -> BuildOptions {
    let entry = root.join("src/index.js");
    std::fs::create_dir_all(root.join("src")).unwrap();
    if !entry.exists() {
        std::fs::write(&entry, "export const value = 1;\n").unwrap();
    }

    let metadata = metadata();
    let mut options = BuildOptions::new(entry, metadata.clone());
    options.outdir = root.join("dist");
    options.plugins = default_plugins(&metadata);
    options
}

pub fn services(bundler: Arc<dyn Bundler>) -> BuildServices {
    BuildServices {
        fs: Arc::new(TokioFileSystemService),
        bundler,
        minifier: Arc::new(OxcMinifier::new()),
        stylesheets: Arc::new(LightningCssMinifier::new()),
        registry: Arc::new(PluginRegistry::with_builtins()),
    }
}
