// Target expansion: requested formats × compression → concrete build targets

use crate::core::models::{BuildOptions, FileNameParts, Format, Target, TargetKey};
use crate::core::plugin::PluginSpec;
use crate::utils::{LibpackError, Result};
use std::collections::HashSet;

/// Uncompressed targets in configured order, then compressed variants of requested formats
pub fn expand_formats(formats: &[Format], compress: &[Format]) -> Result<Vec<TargetKey>> {
    if formats.is_empty() {
        return Err(LibpackError::config("at least one output format is required"));
    }

    let mut seen = HashSet::new();
    let plain = formats.iter().map(|format| TargetKey::new(*format, false));
    let compressed = compress
        .iter()
        .filter(|format| formats.contains(format))
        .map(|format| TargetKey::new(*format, true));

    Ok(plain.chain(compressed).filter(|key| seen.insert(*key)).collect())
}

pub fn expand(options: &BuildOptions) -> Result<Vec<TargetKey>> {
    expand_formats(&options.formats, &options.compress)
}

/// Expand and attach output paths and per-format overrides
pub fn plan(options: &BuildOptions) -> Result<Vec<Target>> {
    Ok(expand(options)?
        .into_iter()
        .map(|key| target_for(options, key))
        .collect())
}

fn target_for(options: &BuildOptions, key: TargetKey) -> Target {
    let format_override = options.overrides.get(key.format.as_str());
    let min_override = if key.compress {
        options.overrides.get(&key.label())
    } else {
        None
    };

    let mut plugin_overrides = PluginSpec::new();
    for layer in [format_override, min_override].into_iter().flatten() {
        plugin_overrides = plugin_overrides.merge(&layer.plugins);
    }

    let namer = min_override
        .and_then(|layer| layer.file.clone())
        .or_else(|| format_override.and_then(|layer| layer.file.clone()))
        .unwrap_or_else(|| options.file.clone());

    let output = namer(&FileNameParts {
        outdir: &options.outdir,
        name: &options.name,
        format: key.format,
        compress: key.compress,
    });

    Target {
        format: key.format,
        compress: key.compress,
        output,
        plugin_overrides,
    }
}
