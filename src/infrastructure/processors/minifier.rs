use crate::core::interfaces::{Minifier, MinifyOptions};
use crate::utils::{LibpackError, Result};
use oxc_allocator::Allocator;
use oxc_codegen::{Codegen, CodegenOptions};
use oxc_minifier::{CompressOptions, MangleOptions, Minifier as OxcAstMinifier, MinifierOptions};
use oxc_parser::Parser;
use oxc_span::SourceType;

/// JavaScript minification using oxc
pub struct OxcMinifier;

impl OxcMinifier {
    pub fn new() -> Self {
        Self
    }

    fn minify_source(&self, source_code: &str, module: bool) -> Result<String> {
        let allocator = Allocator::default();
        let source_type = if module { SourceType::mjs() } else { SourceType::cjs() };

        let parse_result = Parser::new(&allocator, source_code, source_type).parse();
        if !parse_result.errors.is_empty() {
            let errors: Vec<String> = parse_result
                .errors
                .iter()
                .map(|e| format!("Parse error: {}", e))
                .collect();
            return Err(LibpackError::build(errors.join("\n")));
        }

        let mut program = parse_result.program;
        let options = MinifierOptions {
            mangle: Some(MangleOptions::default()),
            compress: Some(CompressOptions::default()),
        };
        let minified = OxcAstMinifier::new(options).minify(&allocator, &mut program);

        Ok(Codegen::new()
            .with_options(CodegenOptions::minify())
            .with_scoping(minified.scoping)
            .build(&program)
            .code)
    }
}

impl Default for OxcMinifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Minifier for OxcMinifier {
    fn minify(&self, code: &str, options: &MinifyOptions<'_>) -> Result<String> {
        // The banner is re-emitted verbatim, never fed through the compressor
        let body = code.strip_prefix(options.preserve_comment).unwrap_or(code);

        let mut minified = self.minify_source(body, options.module)?;
        let mut banner = options.preserve_comment.to_string();
        if options.ascii_only {
            minified = escape_non_ascii(&minified);
            banner = escape_non_ascii(&banner);
        }

        let mut output = String::with_capacity(banner.len() + minified.len() + 1);
        output.push_str(&banner);
        output.push_str(minified.trim_end());
        output.push('\n');
        Ok(output)
    }
}

/// Replace every non-ASCII character with `\uXXXX` escapes, as surrogate pairs when needed
pub fn escape_non_ascii(code: &str) -> String {
    if code.is_ascii() {
        return code.to_string();
    }

    let mut escaped = String::with_capacity(code.len() + 16);
    let mut units = [0u16; 2];
    for ch in code.chars() {
        if ch.is_ascii() {
            escaped.push(ch);
        } else {
            for unit in ch.encode_utf16(&mut units) {
                escaped.push_str(&format!("\\u{:04x}", unit));
            }
        }
    }
    escaped
}
