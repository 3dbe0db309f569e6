// CSS Plugin: moves imported stylesheets out of the module graph into a side artifact

use crate::core::context::ArtifactClaim;
use crate::core::plugin::{Plugin, PluginOptions};
use crate::utils::{LibpackError, Logger, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Path, PathBuf};

static CSS_IMPORT_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?m)^[ \t]*import\s*['"](\.{1,2}/[^'"\n]+\.css)['"][ \t]*;?[ \t]*(?:\n|$)"#)
        .expect("valid css import regex")
});

/// Appends every relative `import './x.css'` to the claimed stylesheet
///
/// Only the target holding the claim gets this plugin; every other target
/// sees the plugin disabled and the bundler drops the import.
pub struct CssPlugin {
    claim: ArtifactClaim,
}

impl CssPlugin {
    pub fn new(claim: ArtifactClaim) -> Self {
        Self { claim }
    }

    pub fn from_options(options: PluginOptions) -> Result<Self> {
        match options {
            PluginOptions::Capture(claim) => Ok(Self::new(claim)),
            _ => Err(LibpackError::config(
                "css plugin needs a claimed stylesheet artifact; configure it with a resolver",
            )),
        }
    }
}

#[async_trait::async_trait]
impl Plugin for CssPlugin {
    fn name(&self) -> &str {
        "css"
    }

    async fn transform(&self, code: &str, file_path: &Path) -> Result<Option<String>> {
        if !CSS_IMPORT_REGEX.is_match(code) {
            return Ok(None);
        }

        let base = file_path.parent().unwrap_or_else(|| Path::new(""));
        let stylesheets: Vec<PathBuf> = CSS_IMPORT_REGEX
            .captures_iter(code)
            .map(|caps| base.join(&caps[1]))
            .collect();

        let mut collected = Vec::with_capacity(stylesheets.len());
        for stylesheet in stylesheets {
            let content = tokio::fs::read_to_string(&stylesheet).await.map_err(|e| {
                LibpackError::build(format!(
                    "Cannot read stylesheet {} imported by {}: {}",
                    stylesheet.display(),
                    file_path.display(),
                    e
                ))
            })?;
            Logger::debug(&format!("Collected stylesheet {}", stylesheet.display()));
            collected.push(content);
        }

        for content in &collected {
            self.claim.append(content);
        }
        Ok(Some(CSS_IMPORT_REGEX.replace_all(code, "").into_owned()))
    }
}
