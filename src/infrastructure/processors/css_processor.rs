use crate::core::interfaces::StylesheetMinifier;
use crate::utils::{LibpackError, Result, Timer};
use lightningcss::{
    printer::PrinterOptions,
    stylesheet::{MinifyOptions, ParserOptions as CssParserOptions, StyleSheet},
};

/// Stylesheet compile and minify steps backed by lightningcss
pub struct LightningCssMinifier;

impl LightningCssMinifier {
    pub fn new() -> Self {
        Self
    }

    fn process(&self, content: &str, minify: bool) -> Result<String> {
        let mut stylesheet = StyleSheet::parse(content, CssParserOptions::default())
            .map_err(|e| LibpackError::build(format!("CSS parse error: {}", e)))?;

        if minify {
            stylesheet
                .minify(MinifyOptions::default())
                .map_err(|e| LibpackError::build(format!("CSS minification failed: {}", e)))?;
        }

        let result = stylesheet
            .to_css(PrinterOptions {
                minify,
                ..Default::default()
            })
            .map_err(|e| LibpackError::build(format!("CSS printing failed: {}", e)))?;

        Ok(result.code)
    }
}

impl Default for LightningCssMinifier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl StylesheetMinifier for LightningCssMinifier {
    /// Normalize the collected text into one well-formed stylesheet
    async fn compile(&self, css: &str) -> Result<String> {
        let _timer = Timer::start("Compiling stylesheet");
        self.process(css, false)
    }

    async fn minify(&self, css: &str) -> Result<String> {
        let _timer = Timer::start("Minifying stylesheet");
        self.process(css, true)
    }
}
