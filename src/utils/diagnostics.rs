// Error reporting: turns build failures into something a person can act on

use crate::utils::{LibpackError, Result, SyntaxError};

/// Lines of context shown before and after the failing line
const CONTEXT_LINES: usize = 2;

/// Classification of a failed build at the reporting boundary
#[derive(Debug)]
pub enum ErrorClass<'a> {
    /// Source could not be parsed; carries position metadata
    Structural(&'a SyntaxError),
    /// Anything else; surfaced with its own message
    Generic(&'a LibpackError),
}

/// Decide whether an error carries enough metadata for a code frame
pub fn classify(error: &LibpackError) -> ErrorClass<'_> {
    match error {
        LibpackError::Syntax(syntax) => ErrorClass::Structural(syntax),
        other => ErrorClass::Generic(other),
    }
}

/// Read the failing source file and render an annotated code frame
pub fn render(error: &SyntaxError) -> Result<String> {
    let source = std::fs::read_to_string(&error.source_id)?;
    Ok(render_frame(&source, error))
}

/// Render a line-numbered snippet with a caret run under the failure
pub fn render_frame(source: &str, error: &SyntaxError) -> String {
    let mut lines: Vec<&str> = source.lines().collect();
    // Failing at EOF after a trailing newline points one past the last line
    if error.line == lines.len() + 1 {
        lines.push("");
    }
    let start = error.line.saturating_sub(CONTEXT_LINES + 1);
    let end = lines.len().min(error.line + CONTEXT_LINES);

    if start >= end {
        return String::new();
    }

    let width = end.to_string().len();
    let gutter = width + 3;
    let carets = error
        .raised_at
        .map(|raised| (raised.saturating_sub(error.pos) + 1).max(1))
        .unwrap_or(1);

    let mut output = String::new();
    for (index, text) in lines[start..end].iter().enumerate() {
        let number = start + index + 1;
        output.push_str(&format!("{:>width$} | {}\n", number, text, width = width));

        if number == error.line {
            output.push_str(&" ".repeat(gutter + error.column));
            output.push_str(&"^".repeat(carets));
            output.push('\n');
        }
    }

    output
}

/// Format any build failure for display, with a code frame for syntax errors
pub fn format_error(error: &LibpackError) -> String {
    match classify(error) {
        ErrorClass::Structural(syntax) => {
            let mut output = format!(
                "{}\n{}:{}:{}\n",
                syntax.message,
                syntax.source_id.display(),
                syntax.line,
                syntax.column
            );
            match render(syntax) {
                Ok(frame) => output.push_str(&frame),
                Err(e) => tracing::debug!("Could not read {} for code frame: {}", syntax.source_id.display(), e),
            }
            output
        }
        ErrorClass::Generic(other) => other.to_string(),
    }
}
