// Replace Plugin: substitutes configured identifiers in module source

use crate::core::plugin::{Plugin, PluginOptions};
use crate::utils::{LibpackError, Result};
use regex::{Captures, Regex};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;

/// Plain-text replacement of `search → replacement` pairs in JavaScript modules
///
/// Longer keys win over keys they contain. String values are inserted
/// verbatim, any other JSON value is inserted as its JSON text.
pub struct ReplacePlugin {
    pattern: Option<Regex>,
    replacements: HashMap<String, String>,
}

impl ReplacePlugin {
    pub fn new<I, K, V>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let replacements: HashMap<String, String> = pairs
            .into_iter()
            .map(|(key, value)| (key.into(), value.into()))
            .filter(|(key, _)| !key.is_empty())
            .collect();

        let mut keys: Vec<&String> = replacements.keys().collect();
        keys.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));

        let pattern = if keys.is_empty() {
            None
        } else {
            let alternation = keys
                .iter()
                .map(|key| bounded(key))
                .collect::<Vec<_>>()
                .join("|");
            Some(
                Regex::new(&alternation)
                    .map_err(|e| LibpackError::config(format!("Invalid replace pattern: {}", e)))?,
            )
        };

        Ok(Self {
            pattern,
            replacements,
        })
    }

    pub fn from_options(options: PluginOptions) -> Result<Self> {
        match options {
            PluginOptions::Disabled | PluginOptions::Default => Self::new(Vec::<(String, String)>::new()),
            PluginOptions::Value(Value::Object(map)) => Self::new(map.into_iter().map(|(key, value)| {
                let replacement = match value {
                    Value::String(text) => text,
                    other => other.to_string(),
                };
                (key, replacement)
            })),
            PluginOptions::Value(other) => Err(LibpackError::config(format!(
                "replace plugin expects an object of replacements, got {}",
                other
            ))),
            PluginOptions::Capture(claim) => Err(LibpackError::config(format!(
                "replace plugin cannot capture the '{}' artifact",
                claim.name()
            ))),
        }
    }
}

/// Escape `key` and anchor it at word boundaries where it starts or ends with a word character
fn bounded(key: &str) -> String {
    let is_word = |c: char| c.is_alphanumeric() || c == '_' || c == '$';
    let start = if key.starts_with(is_word) { r"\b" } else { "" };
    let end = if key.ends_with(is_word) { r"\b" } else { "" };
    format!("{}{}{}", start, regex::escape(key), end)
}

pub(crate) fn is_script(file_path: &Path) -> bool {
    matches!(
        file_path.extension().and_then(|s| s.to_str()),
        Some("js" | "mjs" | "cjs" | "jsx" | "ts" | "tsx")
    )
}

#[async_trait::async_trait]
impl Plugin for ReplacePlugin {
    fn name(&self) -> &str {
        "replace"
    }

    async fn transform(&self, code: &str, file_path: &Path) -> Result<Option<String>> {
        let Some(pattern) = &self.pattern else {
            return Ok(None);
        };
        if !is_script(file_path) || !pattern.is_match(code) {
            return Ok(None);
        }

        let replaced = pattern.replace_all(code, |caps: &Captures| {
            self.replacements
                .get(&caps[0])
                .cloned()
                .unwrap_or_else(|| caps[0].to_string())
        });
        Ok(Some(replaced.into_owned()))
    }
}
