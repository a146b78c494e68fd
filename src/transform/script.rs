use super::{FileOutcome, SourceFile, Transform};

/// Minifies JavaScript sources.
#[derive(Debug, Clone, Copy, Default)]
pub struct MinifyJs;

impl Transform for MinifyJs {
    fn name(&self) -> &'static str {
        "minify-js"
    }

    fn apply(&self, file: SourceFile) -> FileOutcome {
        let minified = match file.text() {
            Ok(source) => minifier::js::minify(source).to_string(),
            Err(e) => return FileOutcome::Failed(e),
        };
        FileOutcome::Emit(SourceFile::new(file.path, minified))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minify(source: &str) -> String {
        match MinifyJs.apply(SourceFile::new("app.js", source)) {
            FileOutcome::Emit(file) => String::from_utf8(file.contents).unwrap(),
            other => panic!("expected emitted file, got {:?}", other),
        }
    }

    #[test]
    fn strips_comments_and_whitespace() {
        let source = "// greet the user\nfunction greet(name) {\n    return 'hi ' + name;\n}\n";
        let out = minify(source);

        assert!(out.len() < source.len());
        assert!(!out.contains("greet the user"));
        assert!(out.contains("function greet(name)"));
    }

    #[test]
    fn is_idempotent() {
        let once = minify("const a = 1;\n\nlet b = a + 2;   // sum\n");
        assert_eq!(minify(&once), once);
    }

    #[test]
    fn rejects_non_utf8() {
        let outcome = MinifyJs.apply(SourceFile::new("bin.js", vec![0xc3, 0x28]));
        assert!(matches!(outcome, FileOutcome::Failed(_)));
    }
}
