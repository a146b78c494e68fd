//! Stylesheet transforms: Sass compilation, vendor prefixing, minification.

use std::path::PathBuf;

use lightningcss::stylesheet::{MinifyOptions, ParserOptions, PrinterOptions, StyleSheet};
use lightningcss::targets::{Browsers, Targets};

use super::{FileOutcome, SourceFile, Transform};

/// Compiles `.scss` sources to `.css`.
///
/// Partials (`_name.scss`) are only meant to be imported and are skipped.
#[derive(Debug, Clone)]
pub struct CompileSass {
    /// Directory the stage's source pattern is anchored at. Imports resolve
    /// against the importing file's directory first, then this base.
    base: PathBuf,
}

impl CompileSass {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    fn is_partial(file: &SourceFile) -> bool {
        file.path
            .file_name()
            .map(|name| name.to_string_lossy().starts_with('_'))
            .unwrap_or(false)
    }
}

impl Transform for CompileSass {
    fn name(&self) -> &'static str {
        "compile-sass"
    }

    fn apply(&self, file: SourceFile) -> FileOutcome {
        if Self::is_partial(&file) {
            return FileOutcome::Skip;
        }

        let source = match file.text() {
            Ok(text) => text.to_owned(),
            Err(e) => return FileOutcome::Failed(e),
        };

        let file_dir = match file.path.parent() {
            Some(parent) => self.base.join(parent),
            None => self.base.clone(),
        };
        let options = grass::Options::default()
            .load_path(&file_dir)
            .load_path(&self.base)
            .style(grass::OutputStyle::Expanded);

        match grass::from_string(source, &options) {
            Ok(css) => FileOutcome::Emit(SourceFile::new(file.path.with_extension("css"), css)),
            Err(e) => FileOutcome::Failed(e.to_string()),
        }
    }
}

/// Browser support used for prefixing and minification.
fn default_targets() -> Targets {
    Targets::from(Browsers {
        chrome: Some(90 << 16),
        edge: Some(90 << 16),
        firefox: Some(78 << 16),
        safari: Some(12 << 16),
        ios_saf: Some(12 << 16),
        samsung: Some(14 << 16),
        ..Browsers::default()
    })
}

/// Parse, run lightningcss' rule handlers for `targets`, then print.
fn process_css(file: &SourceFile, minify: bool) -> Result<String, String> {
    let source = file.text()?;
    let targets = default_targets();

    let mut sheet = StyleSheet::parse(
        source,
        ParserOptions {
            filename: file.path.to_string_lossy().into_owned(),
            ..ParserOptions::default()
        },
    )
    .map_err(|e| e.to_string())?;

    sheet
        .minify(MinifyOptions {
            targets,
            ..MinifyOptions::default()
        })
        .map_err(|e| e.to_string())?;

    let printed = sheet
        .to_css(PrinterOptions {
            minify,
            targets,
            ..PrinterOptions::default()
        })
        .map_err(|e| e.to_string())?;

    Ok(printed.code)
}

/// Adds vendor prefixes for the supported browser set. Output stays readable.
#[derive(Debug, Clone, Copy, Default)]
pub struct Prefix;

impl Transform for Prefix {
    fn name(&self) -> &'static str {
        "prefix"
    }

    fn apply(&self, file: SourceFile) -> FileOutcome {
        FileOutcome::from_result(
            process_css(&file, false).map(|css| SourceFile::new(file.path.clone(), css)),
        )
    }
}

/// Minifies stylesheets.
#[derive(Debug, Clone, Copy, Default)]
pub struct MinifyCss;

impl Transform for MinifyCss {
    fn name(&self) -> &'static str {
        "minify-css"
    }

    fn apply(&self, file: SourceFile) -> FileOutcome {
        FileOutcome::from_result(
            process_css(&file, true).map(|css| SourceFile::new(file.path.clone(), css)),
        )
    }
}
