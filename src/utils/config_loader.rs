use crate::core::banner::ProjectMetadata;
use crate::core::models::{
    template_file_namer, BuildOptions, Concurrency, ExportMode, Format, FormatOverride, TargetKey,
};
use crate::core::plugin::PluginSpec;
use crate::plugins::default_plugins;
use crate::utils::{LibpackError, Logger, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const CONFIG_FILE: &str = "libpack.config.json";
const PACKAGE_KEY: &str = "libpack";

/// Configuration file format (libpack.config.json or the "libpack" key of package.json)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LibpackConfig {
    /// Entry module (default: "src/index.js")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<String>,

    /// Output directory (default: "dist")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outdir: Option<String>,

    /// Artifact name used in file names (default: package name without scope)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Global variable name for iife/umd bundles
    #[serde(skip_serializing_if = "Option::is_none")]
    pub module_name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub formats: Option<Vec<Format>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub compress: Option<Vec<Format>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub exports: Option<ExportMode>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub external: Option<Vec<String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub globals: Option<BTreeMap<String, String>>,

    /// Plugin name → options; `false` disables, `true` enables with defaults
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plugins: Option<Map<String, Value>>,

    /// File name template, e.g. "{outdir}/{name}.{format}{min}.js"
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub banner: Option<BannerConfig>,

    /// Maximum number of targets built at once (default: all)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub concurrency: Option<usize>,

    /// Per-format overrides keyed by "umd", "umd.min", ...
    #[serde(flatten)]
    pub overrides: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BannerConfig {
    #[serde(default)]
    pub include_contributors: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct OverrideConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plugins: Option<Map<String, Value>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}

/// Command line values; anything set here wins over the config file
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub input: Option<PathBuf>,
    pub outdir: Option<PathBuf>,
    pub module_name: Option<String>,
    pub formats: Vec<Format>,
    pub compress: Option<Vec<Format>>,
    pub exports: Option<ExportMode>,
    pub external: Vec<String>,
    pub globals: Vec<(String, String)>,
    pub watch: bool,
    pub concurrency: Option<usize>,
    pub include_contributors: bool,
}

/// Config loader that supports config files with CLI override
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load the explicit file, else libpack.config.json, else package.json's "libpack" key
    pub fn load(root: &Path, explicit: Option<&Path>) -> Result<Option<LibpackConfig>> {
        if let Some(path) = explicit {
            return Self::load_file(path).map(Some);
        }

        let config_path = root.join(CONFIG_FILE);
        if config_path.is_file() {
            return Self::load_file(&config_path).map(Some);
        }

        let package_path = root.join("package.json");
        if package_path.is_file() {
            let content = std::fs::read_to_string(&package_path)?;
            let mut package: Value = serde_json::from_str(&content).map_err(|e| {
                LibpackError::config(format!("Failed to parse {}: {}", package_path.display(), e))
            })?;
            if let Some(section) = package.get_mut(PACKAGE_KEY).map(Value::take) {
                Logger::debug(&format!("Loading config from the \"{}\" key of {}", PACKAGE_KEY, package_path.display()));
                return serde_json::from_value(section).map(Some).map_err(|e| {
                    LibpackError::config(format!("Invalid \"{}\" section in package.json: {}", PACKAGE_KEY, e))
                });
            }
        }

        Logger::debug("No libpack configuration found, using defaults");
        Ok(None)
    }

    fn load_file(path: &Path) -> Result<LibpackConfig> {
        Logger::debug(&format!("Loading config from {}", path.display()));

        let content = std::fs::read_to_string(path)
            .map_err(|e| LibpackError::config(format!("Cannot read {}: {}", path.display(), e)))?;

        serde_json::from_str(&content)
            .map_err(|e| LibpackError::config(format!("Failed to parse {}: {}", path.display(), e)))
    }

    /// Layer defaults, file config and CLI values into the options for one invocation
    pub fn build_options(
        config: Option<LibpackConfig>,
        cli: &CliOverrides,
        root: &Path,
        metadata: Arc<ProjectMetadata>,
    ) -> Result<BuildOptions> {
        let config = config.unwrap_or_default();

        let input = cli
            .input
            .clone()
            .or_else(|| config.input.as_ref().map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from("src/index.js"));
        let mut options = BuildOptions::new(resolve_path(root, input), metadata.clone());

        let outdir = cli
            .outdir
            .clone()
            .or_else(|| config.outdir.as_ref().map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from("dist"));
        options.outdir = resolve_path(root, outdir);

        if let Some(name) = config.name {
            options.name = name;
        }
        if let Some(module_name) = cli.module_name.clone().or(config.module_name) {
            options.module_name = module_name;
        }

        if !cli.formats.is_empty() {
            options.formats = cli.formats.clone();
        } else if let Some(formats) = config.formats {
            options.formats = formats;
        }
        if options.formats.is_empty() {
            return Err(LibpackError::config("at least one output format is required"));
        }

        if let Some(compress) = cli.compress.clone().or(config.compress) {
            options.compress = compress;
        }
        if let Some(exports) = cli.exports.or(config.exports) {
            options.exports = exports;
        }

        options.external = config.external.unwrap_or_default();
        for id in &cli.external {
            if !options.external.contains(id) {
                options.external.push(id.clone());
            }
        }

        options.globals = config.globals.unwrap_or_default();
        options.globals.extend(cli.globals.iter().cloned());

        options.plugins = default_plugins(&metadata).merge(&plugin_spec(config.plugins));
        if let Some(template) = config.file {
            options.file = template_file_namer(template);
        }

        for (key, value) in config.overrides {
            validate_override_key(&key)?;
            let layer: OverrideConfig = serde_json::from_value(value)
                .map_err(|e| LibpackError::config(format!("Invalid \"{}\" override: {}", key, e)))?;
            options.overrides.insert(
                key,
                FormatOverride {
                    plugins: plugin_spec(layer.plugins),
                    file: layer.file.map(template_file_namer),
                },
            );
        }

        options.watch = cli.watch;
        options.concurrency = match cli.concurrency.or(config.concurrency) {
            None => Concurrency::Unbounded,
            Some(0) => return Err(LibpackError::config("concurrency must be at least 1")),
            Some(limit) => Concurrency::Bounded(limit),
        };
        options.include_contributors = cli.include_contributors
            || config.banner.map(|banner| banner.include_contributors).unwrap_or(false);

        Ok(options)
    }

    /// Generate example config file
    pub fn generate_example() -> String {
        let example = LibpackConfig {
            input: Some("src/index.js".to_string()),
            outdir: Some("dist".to_string()),
            formats: Some(vec![Format::Es, Format::Umd, Format::Cjs]),
            compress: Some(vec![Format::Umd]),
            plugins: Some(Map::from_iter([("strip".to_string(), Value::Bool(false))])),
            ..Default::default()
        };
        serde_json::to_string_pretty(&example).unwrap_or_default()
    }
}

fn plugin_spec(plugins: Option<Map<String, Value>>) -> PluginSpec {
    plugins.unwrap_or_default().into_iter().collect()
}

fn resolve_path(root: &Path, path: PathBuf) -> PathBuf {
    if path.is_absolute() {
        path
    } else {
        root.join(path)
    }
}

/// Override keys are a format name, optionally followed by ".min"
fn validate_override_key(key: &str) -> Result<TargetKey> {
    let (format, compress) = match key.strip_suffix(".min") {
        Some(format) => (format, true),
        None => (key, false),
    };
    format
        .parse::<Format>()
        .map(|format| TargetKey::new(format, compress))
        .map_err(|_| LibpackError::config(format!("unknown configuration key '{}'", key)))
}
