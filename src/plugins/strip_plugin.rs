// Strip Plugin: removes debugging statements from module source

use crate::core::plugin::{Plugin, PluginOptions};
use crate::plugins::replace_plugin::is_script;
use crate::utils::{LibpackError, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::path::Path;

static DEBUGGER_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^[ \t]*debugger[ \t]*;?[ \t]*(?:\n|$)").expect("valid debugger regex"));

/// Start of a `console.*(` call in statement position
static CONSOLE_CALL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)(?:^|[;{}])[ \t]*(console\.[\w$]+[ \t]*\()").expect("valid console regex")
});

pub struct StripPlugin {
    console: bool,
    debugger: bool,
}

impl StripPlugin {
    pub fn new(console: bool, debugger: bool) -> Self {
        Self { console, debugger }
    }

    /// `{ "console": bool, "debugger": bool }`, both default to true
    pub fn from_options(options: PluginOptions) -> Result<Self> {
        match options {
            PluginOptions::Disabled | PluginOptions::Default => Ok(Self::new(true, true)),
            PluginOptions::Value(Value::Object(map)) => {
                let flag = |key: &str| map.get(key).and_then(Value::as_bool).unwrap_or(true);
                Ok(Self::new(flag("console"), flag("debugger")))
            }
            PluginOptions::Value(other) => Err(LibpackError::config(format!(
                "strip plugin expects an object, got {}",
                other
            ))),
            PluginOptions::Capture(claim) => Err(LibpackError::config(format!(
                "strip plugin cannot capture the '{}' artifact",
                claim.name()
            ))),
        }
    }
}

#[async_trait::async_trait]
impl Plugin for StripPlugin {
    fn name(&self) -> &str {
        "strip"
    }

    async fn transform(&self, code: &str, file_path: &Path) -> Result<Option<String>> {
        if !is_script(file_path) {
            return Ok(None);
        }

        let mut stripped = code.to_string();
        if self.debugger {
            stripped = DEBUGGER_REGEX.replace_all(&stripped, "").into_owned();
        }
        if self.console {
            stripped = strip_console_calls(&stripped);
        }

        Ok((stripped != code).then_some(stripped))
    }
}

/// Removes each console call up to its balanced `)` and optional `;`. A call
/// alone on its line takes the line with it.
fn strip_console_calls(code: &str) -> String {
    let mut out = String::with_capacity(code.len());
    let mut cursor = 0;

    while let Some(caps) = CONSOLE_CALL.captures_at(code, cursor) {
        let Some(call) = caps.get(1) else { break };
        let Some(close) = matching_paren(code, call.end() - 1) else {
            out.push_str(&code[cursor..call.end()]);
            cursor = call.end();
            continue;
        };

        let mut end = close + 1;
        end += leading_blanks(&code[end..]);
        if code[end..].starts_with(';') {
            end += 1;
        }
        end += leading_blanks(&code[end..]);

        let line_start = code[..call.start()].rfind('\n').map_or(0, |newline| newline + 1);
        let alone = code[line_start..call.start()].trim().is_empty()
            && (end == code.len() || code[end..].starts_with('\n'));

        if alone {
            out.push_str(&code[cursor..line_start.max(cursor)]);
            cursor = (end + 1).min(code.len());
        } else {
            out.push_str(&code[cursor..call.start()]);
            cursor = end;
        }
    }

    out.push_str(&code[cursor..]);
    out
}

fn leading_blanks(text: &str) -> usize {
    text.len() - text.trim_start_matches([' ', '\t']).len()
}

/// Index of the `)` closing the paren at `open`, skipping string literals
fn matching_paren(code: &str, open: usize) -> Option<usize> {
    let bytes = code.as_bytes();
    let mut depth = 0usize;
    let mut quote: Option<u8> = None;
    let mut index = open;

    while index < bytes.len() {
        let byte = bytes[index];
        match quote {
            Some(_) if byte == b'\\' => index += 1,
            Some(q) if byte == q => quote = None,
            Some(_) => {}
            None => match byte {
                b'\'' | b'"' | b'`' => quote = Some(byte),
                b'(' => depth += 1,
                b')' => {
                    depth = depth.saturating_sub(1);
                    if depth == 0 {
                        return Some(index);
                    }
                }
                _ => {}
            },
        }
        index += 1;
    }
    None
}
