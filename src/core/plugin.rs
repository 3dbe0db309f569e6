// Plugin system: per-target resolution of plugin settings into plugin instances

use crate::core::context::{ArtifactClaim, SharedContext};
use crate::core::models::Format;
use crate::utils::{LibpackError, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

/// A transformation hooked into the bundler's module loading
#[async_trait::async_trait]
pub trait Plugin: Send + Sync {
    /// Unique name for this plugin
    fn name(&self) -> &str;

    /// Transform module source
    ///
    /// Return Some(transformed_code) to replace the content,
    /// or None to leave it unchanged.
    async fn transform(&self, _code: &str, _file_path: &Path) -> Result<Option<String>> {
        Ok(None)
    }
}

/// What a resolver function sees of the target it is configuring
#[derive(Clone, Copy)]
pub struct TargetIdentity<'a> {
    pub format: Format,
    pub outdir: &'a Path,
    pub name: &'a str,
    pub compress: bool,
    pub context: &'a SharedContext,
}

/// Evaluated options handed to a plugin constructor
#[derive(Debug)]
pub enum PluginOptions {
    Disabled,
    /// Enabled with the plugin's own defaults
    Default,
    Value(Value),
    /// Exclusive right to populate a side artifact
    Capture(ArtifactClaim),
}

impl PluginOptions {
    pub fn is_disabled(&self) -> bool {
        matches!(self, PluginOptions::Disabled)
    }
}

impl From<Value> for PluginOptions {
    fn from(value: Value) -> Self {
        match value {
            Value::Bool(true) => PluginOptions::Default,
            value if is_falsy(&value) => PluginOptions::Disabled,
            value => PluginOptions::Value(value),
        }
    }
}

pub type PluginResolver = Arc<dyn Fn(&TargetIdentity<'_>) -> PluginOptions + Send + Sync>;

/// Configured value of one plugin entry, before evaluation against a target
#[derive(Clone)]
pub enum PluginSetting {
    Static(Value),
    Resolved(PluginResolver),
}

impl PluginSetting {
    pub fn resolver<F>(resolver: F) -> Self
    where
        F: Fn(&TargetIdentity<'_>) -> PluginOptions + Send + Sync + 'static,
    {
        PluginSetting::Resolved(Arc::new(resolver))
    }

    fn is_falsy(&self) -> bool {
        match self {
            PluginSetting::Static(value) => is_falsy(value),
            PluginSetting::Resolved(_) => false,
        }
    }

    fn evaluate(&self, identity: &TargetIdentity<'_>) -> PluginOptions {
        match self {
            PluginSetting::Static(value) => PluginOptions::from(value.clone()),
            PluginSetting::Resolved(resolver) => resolver(identity),
        }
    }
}

impl From<Value> for PluginSetting {
    fn from(value: Value) -> Self {
        PluginSetting::Static(value)
    }
}

impl fmt::Debug for PluginSetting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PluginSetting::Static(value) => write!(f, "Static({})", value),
            PluginSetting::Resolved(_) => f.write_str("Resolved(<fn>)"),
        }
    }
}

fn is_falsy(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(enabled) => !enabled,
        Value::Number(number) => number.as_f64() == Some(0.0),
        Value::String(text) => text.is_empty(),
        Value::Array(_) | Value::Object(_) => false,
    }
}

/// Ordered plugin name → setting map; order is evaluation order
#[derive(Debug, Clone, Default)]
pub struct PluginSpec {
    entries: Vec<(String, PluginSetting)>,
}

impl PluginSpec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an entry; a replaced entry keeps its position
    pub fn set(&mut self, name: impl Into<String>, setting: PluginSetting) {
        let name = name.into();
        match self.entries.iter_mut().find(|(existing, _)| *existing == name) {
            Some((_, slot)) => *slot = setting,
            None => self.entries.push((name, setting)),
        }
    }

    pub fn with(mut self, name: impl Into<String>, setting: PluginSetting) -> Self {
        self.set(name, setting);
        self
    }

    pub fn get(&self, name: &str) -> Option<&PluginSetting> {
        self.entries
            .iter()
            .find(|(existing, _)| existing == name)
            .map(|(_, setting)| setting)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }

    /// Names of entries not switched off by a falsy static value
    pub fn enabled_names(&self) -> impl Iterator<Item = &str> {
        self.entries
            .iter()
            .filter(|(_, setting)| !setting.is_falsy())
            .map(|(name, _)| name.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Shallow merge; `overrides` replaces same-named entries wholesale
    pub fn merge(&self, overrides: &PluginSpec) -> PluginSpec {
        let mut merged = self.clone();
        for (name, setting) in &overrides.entries {
            merged.set(name.clone(), setting.clone());
        }
        merged
    }
}

impl FromIterator<(String, Value)> for PluginSpec {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        let mut spec = PluginSpec::new();
        for (name, value) in iter {
            spec.set(name, PluginSetting::from(value));
        }
        spec
    }
}

/// A plugin entry that survived resolution
#[derive(Debug)]
pub struct ResolvedPlugin {
    pub name: String,
    pub options: PluginOptions,
}

/// Merge `base` and `overrides`, then evaluate every enabled entry for one target
///
/// Falsy static values are dropped before evaluation and resolvers that
/// return `Disabled` are dropped after it. Merged key order is preserved.
pub fn resolve_plugins(
    base: &PluginSpec,
    overrides: &PluginSpec,
    identity: &TargetIdentity<'_>,
) -> Vec<ResolvedPlugin> {
    base.merge(overrides)
        .entries
        .iter()
        .filter(|(_, setting)| !setting.is_falsy())
        .filter_map(|(name, setting)| {
            let options = setting.evaluate(identity);
            if options.is_disabled() {
                tracing::debug!("Plugin '{}' disabled for {} target", name, identity.format);
                None
            } else {
                Some(ResolvedPlugin {
                    name: name.clone(),
                    options,
                })
            }
        })
        .collect()
}

pub type PluginFactory = Arc<dyn Fn(PluginOptions) -> Result<Arc<dyn Plugin>> + Send + Sync>;

/// Named plugin constructors
#[derive(Clone, Default)]
pub struct PluginRegistry {
    factories: HashMap<String, PluginFactory>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the plugins that ship with libpack
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("replace", |options| {
            Ok(Arc::new(crate::plugins::ReplacePlugin::from_options(options)?) as Arc<dyn Plugin>)
        });
        registry.register("css", |options| {
            Ok(Arc::new(crate::plugins::CssPlugin::from_options(options)?) as Arc<dyn Plugin>)
        });
        registry.register("strip", |options| {
            Ok(Arc::new(crate::plugins::StripPlugin::from_options(options)?) as Arc<dyn Plugin>)
        });
        registry
    }

    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(PluginOptions) -> Result<Arc<dyn Plugin>> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Arc::new(factory));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Fail on the first plugin name without a registered constructor
    pub fn validate<'a>(&self, names: impl IntoIterator<Item = &'a str>) -> Result<()> {
        for name in names {
            if !self.contains(name) {
                return Err(LibpackError::UnknownPlugin(name.to_string()));
            }
        }
        Ok(())
    }

    pub fn instantiate(&self, resolved: Vec<ResolvedPlugin>) -> Result<Vec<Arc<dyn Plugin>>> {
        resolved
            .into_iter()
            .map(|plugin| {
                let factory = self
                    .factories
                    .get(&plugin.name)
                    .ok_or_else(|| LibpackError::UnknownPlugin(plugin.name.clone()))?;
                factory(plugin.options)
            })
            .collect()
    }
}
