use crate::core::banner::ProjectMetadata;
use crate::core::plugin::PluginSpec;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

/// Module interoperability shape of generated code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    Es,
    Cjs,
    Umd,
    Amd,
    Iife,
}

impl Format {
    pub const ALL: [Format; 5] = [Format::Es, Format::Cjs, Format::Umd, Format::Amd, Format::Iife];

    pub fn as_str(&self) -> &'static str {
        match self {
            Format::Es => "es",
            Format::Cjs => "cjs",
            Format::Umd => "umd",
            Format::Amd => "amd",
            Format::Iife => "iife",
        }
    }

    /// Whether the generated code is an ES module rather than a script
    pub fn is_module(&self) -> bool {
        matches!(self, Format::Es)
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Format {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Format::ALL
            .into_iter()
            .find(|format| format.as_str() == s)
            .ok_or_else(|| format!("unknown format '{}'", s))
    }
}

/// How the entry module's exports are exposed by non-ES formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ExportMode {
    #[default]
    Auto,
    Default,
    Named,
    None,
}

/// Identity of one build unit; unique per scheduled run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TargetKey {
    pub format: Format,
    pub compress: bool,
}

impl TargetKey {
    pub fn new(format: Format, compress: bool) -> Self {
        Self { format, compress }
    }

    /// `umd`, `umd.min`, ... as used for per-format override keys
    pub fn label(&self) -> String {
        if self.compress {
            format!("{}.min", self.format)
        } else {
            self.format.to_string()
        }
    }
}

/// Inputs to the file naming function
#[derive(Debug, Clone, Copy)]
pub struct FileNameParts<'a> {
    pub outdir: &'a Path,
    pub name: &'a str,
    pub format: Format,
    pub compress: bool,
}

pub type FileNamer = Arc<dyn Fn(&FileNameParts<'_>) -> PathBuf + Send + Sync>;

/// `{outdir}/{name}{.format unless umd}{.min}.js`
pub fn default_file_name(parts: &FileNameParts<'_>) -> PathBuf {
    let mut file = parts.name.to_string();
    if parts.format != Format::Umd {
        file.push('.');
        file.push_str(parts.format.as_str());
    }
    if parts.compress {
        file.push_str(".min");
    }
    file.push_str(".js");
    parts.outdir.join(file)
}

/// `{outdir}/{name}.css` or `{outdir}/{name}.min.css`
pub fn default_stylesheet_name(outdir: &Path, name: &str, compress: bool) -> PathBuf {
    let suffix = if compress { ".min.css" } else { ".css" };
    outdir.join(format!("{}{}", name, suffix))
}

pub fn default_file_namer() -> FileNamer {
    Arc::new(|parts: &FileNameParts<'_>| default_file_name(parts))
}

/// File namer driven by a `{outdir}/{name}.{format}{min}.js` style template
pub fn template_file_namer(template: impl Into<String>) -> FileNamer {
    let template = template.into();
    Arc::new(move |parts: &FileNameParts<'_>| {
        let rendered = template
            .replace("{outdir}", &parts.outdir.to_string_lossy())
            .replace("{name}", parts.name)
            .replace("{format}", parts.format.as_str())
            .replace("{min}", if parts.compress { ".min" } else { "" });
        PathBuf::from(rendered)
    })
}

/// Plugin and naming overrides for one format, or one `format.min` variant
#[derive(Clone, Default)]
pub struct FormatOverride {
    pub plugins: PluginSpec,
    pub file: Option<FileNamer>,
}

impl fmt::Debug for FormatOverride {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FormatOverride")
            .field("plugins", &self.plugins)
            .field("file", &self.file.as_ref().map(|_| "<fn>"))
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Concurrency {
    #[default]
    Unbounded,
    Bounded(usize),
}

/// Process-wide options, constructed once per invocation and never mutated
#[derive(Clone)]
pub struct BuildOptions {
    pub input: PathBuf,
    pub outdir: PathBuf,
    /// Artifact name used for output files
    pub name: String,
    /// Global variable name for iife/umd bundles
    pub module_name: String,
    pub exports: ExportMode,
    pub external: Vec<String>,
    pub globals: BTreeMap<String, String>,
    pub plugins: PluginSpec,
    /// Keyed by `format` or `format.min`
    pub overrides: HashMap<String, FormatOverride>,
    pub file: FileNamer,
    pub watch: bool,
    pub compress: Vec<Format>,
    pub formats: Vec<Format>,
    pub concurrency: Concurrency,
    pub include_contributors: bool,
    pub metadata: Arc<ProjectMetadata>,
}

impl BuildOptions {
    /// Options with the conventional defaults for a project
    pub fn new(input: impl Into<PathBuf>, metadata: Arc<ProjectMetadata>) -> Self {
        Self {
            input: input.into(),
            outdir: PathBuf::from("dist"),
            name: metadata.artifact_name(),
            module_name: metadata.module_name(),
            exports: ExportMode::Auto,
            external: Vec::new(),
            globals: BTreeMap::new(),
            plugins: PluginSpec::new(),
            overrides: HashMap::new(),
            file: default_file_namer(),
            watch: false,
            compress: vec![Format::Umd],
            formats: vec![Format::Es, Format::Umd, Format::Cjs],
            concurrency: Concurrency::Unbounded,
            include_contributors: false,
            metadata,
        }
    }

    pub fn stylesheet_path(&self, compress: bool) -> PathBuf {
        default_stylesheet_name(&self.outdir, &self.name, compress)
    }
}

impl fmt::Debug for BuildOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuildOptions")
            .field("input", &self.input)
            .field("outdir", &self.outdir)
            .field("name", &self.name)
            .field("module_name", &self.module_name)
            .field("exports", &self.exports)
            .field("external", &self.external)
            .field("formats", &self.formats)
            .field("compress", &self.compress)
            .field("watch", &self.watch)
            .field("concurrency", &self.concurrency)
            .finish_non_exhaustive()
    }
}

/// One concrete build unit, derived from `BuildOptions` by the target expander
#[derive(Debug, Clone)]
pub struct Target {
    pub format: Format,
    pub compress: bool,
    pub output: PathBuf,
    /// Format-specific plugin overrides, layered over the base plugins at build time
    pub plugin_overrides: PluginSpec,
}

/// Outcome of writing one artifact
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildReport {
    pub output: PathBuf,
    pub size: usize,
    /// Only computed for compressed artifacts
    pub gzipped: Option<usize>,
}
