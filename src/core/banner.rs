// Project metadata and the license banner prepended to every bundle

use crate::utils::{LibpackError, Logger, Result};
use chrono::Datelike;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::path::{Path, PathBuf};

static AUTHOR_CONTACT_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s*(?:<[^>]*>|\([^)]*\))").expect("valid author regex"));

/// A package.json person: either `"Name <mail> (url)"` or `{ "name": ... }`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum Person {
    Text(String),
    Detailed { name: String },
}

impl Person {
    /// Display name without email or url
    pub fn name(&self) -> String {
        let raw = match self {
            Person::Text(text) => text.as_str(),
            Person::Detailed { name } => name.as_str(),
        };
        AUTHOR_CONTACT_REGEX.replace_all(raw, "").trim().to_string()
    }
}

/// The subset of package.json the build cares about
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProjectMetadata {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub author: Option<Person>,
    #[serde(default)]
    pub contributors: Vec<Person>,
    #[serde(default)]
    pub license: Option<String>,
}

impl ProjectMetadata {
    /// Walk up from `start` to the first directory holding a package.json
    pub fn find_root(start: &Path) -> Option<PathBuf> {
        start
            .ancestors()
            .find(|dir| dir.join("package.json").is_file())
            .map(Path::to_path_buf)
    }

    pub fn load(root: &Path) -> Result<Self> {
        let path = root.join("package.json");
        let content = std::fs::read_to_string(&path).map_err(|e| {
            LibpackError::config(format!("Cannot read {}: {}", path.display(), e))
        })?;

        let metadata: ProjectMetadata = serde_json::from_str(&content).map_err(|e| {
            LibpackError::config(format!("Failed to parse {}: {}", path.display(), e))
        })?;

        if metadata.name.is_empty() {
            Logger::warn(&format!("{} has no \"name\" field", path.display()));
        }
        Ok(metadata)
    }

    pub fn author_name(&self) -> Option<String> {
        self.author.as_ref().map(Person::name).filter(|name| !name.is_empty())
    }

    /// Package name without its `@scope/` prefix
    pub fn artifact_name(&self) -> String {
        let unscoped = self.name.rsplit('/').next().unwrap_or(&self.name);
        if unscoped.is_empty() {
            "index".to_string()
        } else {
            unscoped.to_string()
        }
    }

    /// UpperCamelCase global name derived from the package name
    pub fn module_name(&self) -> String {
        self.artifact_name()
            .split(|c: char| !c.is_ascii_alphanumeric())
            .filter(|word| !word.is_empty())
            .map(|word| {
                let mut chars = word.chars();
                match chars.next() {
                    Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                    None => String::new(),
                }
            })
            .collect()
    }
}

/// Build the comment header for the current year
pub fn generate(metadata: &ProjectMetadata, include_contributors: bool) -> String {
    generate_for_year(metadata, include_contributors, chrono::Local::now().year())
}

pub fn generate_for_year(metadata: &ProjectMetadata, include_contributors: bool, year: i32) -> String {
    let mut banner = String::from("/**\n");
    banner.push_str(&format!(" * {} v{}\n", metadata.name, metadata.version));

    match metadata.author_name() {
        Some(author) => banner.push_str(&format!(" * (c) {} {}\n", year, author)),
        None => banner.push_str(&format!(" * (c) {}\n", year)),
    }

    if include_contributors {
        let contributors: Vec<String> = metadata
            .contributors
            .iter()
            .map(Person::name)
            .filter(|name| !name.is_empty())
            .collect();
        if !contributors.is_empty() {
            banner.push_str(&format!(" * Contributors: {}\n", contributors.join(", ")));
        }
    }

    let license = metadata.license.as_deref().unwrap_or("MIT");
    banner.push_str(&format!(" * @license {}\n", license));
    banner.push_str(" */\n");
    banner
}
