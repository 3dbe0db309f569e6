// Built-in plugins

pub mod css_plugin;
pub mod replace_plugin;
pub mod strip_plugin;

pub use css_plugin::CssPlugin;
pub use replace_plugin::ReplacePlugin;
pub use strip_plugin::StripPlugin;

use crate::core::banner::ProjectMetadata;
use crate::core::context::STYLESHEET;
use crate::core::models::Format;
use crate::core::plugin::{PluginOptions, PluginSetting, PluginSpec};
use serde_json::json;

/// Base plugins every build starts from
///
/// `replace` stamps `__VERSION__` everywhere and `process.env.NODE_ENV` in
/// bundles meant to run without a downstream bundler. `css` is enabled only
/// for the first target that claims the stylesheet.
pub fn default_plugins(metadata: &ProjectMetadata) -> PluginSpec {
    let version = metadata.version.clone();

    PluginSpec::new()
        .with(
            "replace",
            PluginSetting::resolver(move |target| {
                let mut replacements = json!({ "__VERSION__": version });
                if matches!(target.format, Format::Umd | Format::Iife) {
                    let env = if target.compress { "production" } else { "development" };
                    replacements["process.env.NODE_ENV"] = json!(format!("\"{}\"", env));
                }
                PluginOptions::Value(replacements)
            }),
        )
        .with(
            "css",
            PluginSetting::resolver(|target| {
                target
                    .context
                    .claim(STYLESHEET)
                    .map(PluginOptions::Capture)
                    .unwrap_or(PluginOptions::Disabled)
            }),
        )
}
