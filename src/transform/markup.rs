use minify_html::Cfg;

use super::{FileOutcome, SourceFile, Transform};

/// Collapses whitespace in HTML documents.
///
/// Closing tags and `<html>`/`<head>` openers are kept so the output stays
/// valid for strict parsers. Inline `<style>` and `<script>` are untouched.
#[derive(Clone)]
pub struct MinifyHtml {
    cfg: Cfg,
}

impl MinifyHtml {
    pub fn new() -> Self {
        let mut cfg = Cfg::new();
        cfg.keep_closing_tags = true;
        cfg.keep_html_and_head_opening_tags = true;
        Self { cfg }
    }
}

impl Default for MinifyHtml {
    fn default() -> Self {
        Self::new()
    }
}

impl Transform for MinifyHtml {
    fn name(&self) -> &'static str {
        "minify-html"
    }

    fn apply(&self, file: SourceFile) -> FileOutcome {
        if let Err(e) = file.text() {
            return FileOutcome::Failed(e);
        }
        let minified = minify_html::minify(&file.contents, &self.cfg);
        FileOutcome::Emit(SourceFile::new(file.path, minified))
    }
}
