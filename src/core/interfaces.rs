use crate::core::models::{ExportMode, Format};
use crate::core::plugin::Plugin;
use crate::utils::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// File system operations interface
#[async_trait]
pub trait FileSystemService: Send + Sync {
    async fn read_file(&self, path: &Path) -> Result<String>;
    /// Resolves once the content is fully written
    async fn write_file(&self, path: &Path, content: &str) -> Result<()>;
    async fn create_directory(&self, path: &Path) -> Result<()>;
    fn file_exists(&self, path: &Path) -> bool;
}

/// What the bundler needs to build a module graph
pub struct BundleInput {
    pub entry: PathBuf,
    pub plugins: Vec<Arc<dyn Plugin>>,
    pub external: Vec<String>,
}

/// Code generation settings for one target
#[derive(Debug, Clone, Copy)]
pub struct GenerateOptions<'a> {
    pub format: Format,
    pub banner: &'a str,
    pub exports: ExportMode,
    pub globals: &'a BTreeMap<String, String>,
    /// Global variable name for iife/umd
    pub name: &'a str,
}

#[derive(Debug, Clone)]
pub struct GeneratedCode {
    pub code: String,
}

/// Module bundling, resolved entry point to in-memory graph
#[async_trait]
pub trait Bundler: Send + Sync {
    async fn bundle(&self, input: BundleInput) -> Result<Box<dyn ModuleGraph>>;
}

/// A bundled module graph that can emit code in any format
#[async_trait]
pub trait ModuleGraph: Send + Sync {
    async fn generate(&self, options: &GenerateOptions<'_>) -> Result<GeneratedCode>;
}

#[derive(Debug, Clone, Copy)]
pub struct MinifyOptions<'a> {
    /// Emitted verbatim before the minified code
    pub preserve_comment: &'a str,
    /// Escape every non-ASCII character
    pub ascii_only: bool,
    /// Parse the input as an ES module
    pub module: bool,
}

/// JavaScript minification, synchronous and CPU bound
pub trait Minifier: Send + Sync {
    fn minify(&self, code: &str, options: &MinifyOptions<'_>) -> Result<String>;
}

/// Stylesheet compilation and minification
#[async_trait]
pub trait StylesheetMinifier: Send + Sync {
    async fn compile(&self, css: &str) -> Result<String>;
    async fn minify(&self, css: &str) -> Result<String>;
}
