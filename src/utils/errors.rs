use std::path::PathBuf;
use thiserror::Error;

/// Position metadata for a source file that failed to parse
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntaxError {
    pub message: String,
    /// File the failure was raised for
    pub source_id: PathBuf,
    /// Byte offset where the failing construct starts
    pub pos: usize,
    /// Byte offset where the parser gave up, if it reported one
    pub raised_at: Option<usize>,
    /// 1-based line of `pos`
    pub line: usize,
    /// 0-based column of `pos`
    pub column: usize,
}

impl SyntaxError {
    /// Build a syntax error from byte offsets, deriving line and column from `source`
    pub fn from_offsets(
        message: impl Into<String>,
        source_id: PathBuf,
        source: &str,
        pos: usize,
        raised_at: Option<usize>,
    ) -> Self {
        let pos = pos.min(source.len());
        let before = &source[..floor_char_boundary(source, pos)];
        let line = before.matches('\n').count() + 1;
        let column = before
            .rfind('\n')
            .map(|newline| before.len() - newline - 1)
            .unwrap_or(before.len());

        Self {
            message: message.into(),
            source_id,
            pos,
            raised_at,
            line,
            column,
        }
    }
}

impl std::fmt::Display for SyntaxError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} ({}:{}:{})",
            self.message,
            self.source_id.display(),
            self.line,
            self.column
        )
    }
}

fn floor_char_boundary(source: &str, mut index: usize) -> usize {
    while index > 0 && !source.is_char_boundary(index) {
        index -= 1;
    }
    index
}

#[derive(Error, Debug)]
pub enum LibpackError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Syntax error: {0}")]
    Syntax(SyntaxError),

    #[error("Build error: {message}")]
    Build { message: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unknown plugin: {0}")]
    UnknownPlugin(String),

    #[error("Watch error: {0}")]
    Watch(String),
}

impl LibpackError {
    /// Create a generic build error
    pub fn build(message: impl Into<String>) -> Self {
        Self::Build {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Configuration errors are raised before any target is scheduled
    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config(_) | Self::UnknownPlugin(_))
    }
}

pub type Result<T> = std::result::Result<T, LibpackError>;

impl From<SyntaxError> for LibpackError {
    fn from(err: SyntaxError) -> Self {
        LibpackError::Syntax(err)
    }
}

impl From<anyhow::Error> for LibpackError {
    fn from(err: anyhow::Error) -> Self {
        LibpackError::build(err.to_string())
    }
}

impl From<serde_json::Error> for LibpackError {
    fn from(err: serde_json::Error) -> Self {
        LibpackError::config(err.to_string())
    }
}
