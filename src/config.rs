//! Path table and process configuration.
//!
//! The path table maps each [`Category`] to one source pattern and one
//! destination directory. It is built once at startup and never changes.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

use thiserror::Error;

use crate::models::Category;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid source pattern for {category}: {message}")]
    InvalidPattern { category: Category, message: String },

    #[error("{first} and {second} both write to {}", dest.display())]
    SharedDestination {
        first: Category,
        second: Category,
        dest: PathBuf,
    },

    #[error("{inner} writes inside {outer}'s destination {} without being excluded from it", dest.display())]
    NestedDestination {
        outer: Category,
        inner: Category,
        dest: PathBuf,
    },

    #[error("no path entry for category {0}")]
    MissingCategory(Category),
}

/// Source pattern and destination directory for one category.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathEntry {
    pub source: String,
    pub dest: PathBuf,
    /// Source directories this entry never reads from, even when the pattern
    /// matches below them.
    pub exclude: Vec<PathBuf>,
}

impl PathEntry {
    pub fn new(source: impl Into<String>, dest: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            dest: dest.into(),
            exclude: vec![],
        }
    }

    pub fn excluding(mut self, dir: impl Into<PathBuf>) -> Self {
        self.exclude.push(dir.into());
        self
    }

    /// The directory the pattern is anchored at.
    pub fn base(&self) -> PathBuf {
        glob_base(&self.source)
    }

    /// Whether `path` lies under one of the excluded directories.
    pub fn is_excluded(&self, path: &Path) -> bool {
        let path = normalize(path);
        self.exclude.iter().any(|dir| path.starts_with(normalize(dir)))
    }

    /// Whether the pattern can match files below `dir`.
    fn reaches(&self, dir: &Path) -> bool {
        let (base, rest) = split_pattern(&self.source);
        let Ok(below) = normalize(dir).strip_prefix(normalize(&base)).map(Path::to_path_buf) else {
            return false;
        };
        rest.contains("**") || below.components().count() < Path::new(&rest).components().count()
    }
}

/// `path` with `.` components removed.
pub(crate) fn normalize(path: &Path) -> PathBuf {
    path.components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect()
}

/// The literal text of a pattern component, or `None` when it holds a
/// wildcard. Escapes produced by [`glob::Pattern::escape`] count as literal.
fn literal(part: &str) -> Option<String> {
    let chars: Vec<char> = part.chars().collect();
    let mut out = String::with_capacity(part.len());
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '*' | '?' => return None,
            '[' => match (chars.get(i + 1), chars.get(i + 2)) {
                (Some(&c), Some(']')) if matches!(c, '[' | ']' | '*' | '?') => {
                    out.push(c);
                    i += 3;
                }
                _ => return None,
            },
            c => {
                out.push(c);
                i += 1;
            }
        }
    }
    Some(out)
}

/// Split `pattern` into its literal base directory and the remaining pattern.
pub fn split_pattern(pattern: &str) -> (PathBuf, String) {
    let mut base = PathBuf::new();
    let mut components = Path::new(pattern).components().peekable();
    while let Some(component) = components.peek() {
        match component {
            Component::Normal(part) => match literal(&part.to_string_lossy()) {
                Some(text) => base.push(text),
                None => break,
            },
            other => base.push(other),
        }
        components.next();
    }
    let rest: PathBuf = components.collect();

    // A pattern with no wildcard names a single file.
    if rest.as_os_str().is_empty() {
        if let Some(name) = base.file_name().map(|n| n.to_string_lossy().into_owned()) {
            base.pop();
            return (base, glob::Pattern::escape(&name));
        }
    }
    (base, rest.to_string_lossy().into_owned())
}

/// Returns the leading components of `pattern` that contain no wildcard.
///
/// `src/public/scss/**/*.scss` has base `src/public/scss`. Output paths keep
/// their structure relative to this base.
pub fn glob_base(pattern: &str) -> PathBuf {
    split_pattern(pattern).0
}

/// A glob pattern matching `rel` below the literal directory `root`.
pub fn pattern_under(root: &Path, rel: &str) -> String {
    let root = glob::Pattern::escape(&root.to_string_lossy());
    Path::new(&root).join(rel).to_string_lossy().into_owned()
}

/// Immutable category → (pattern, destination) mapping.
#[derive(Debug, Clone)]
pub struct PathTable {
    entries: BTreeMap<Category, PathEntry>,
}

impl PathTable {
    /// Build a table from explicit entries, validating it.
    pub fn new(
        entries: impl IntoIterator<Item = (Category, PathEntry)>,
    ) -> Result<Self, ConfigError> {
        let table = Self {
            entries: entries.into_iter().collect(),
        };
        table.validate()?;
        Ok(table)
    }

    /// The standard project layout rooted at `src_root` and `dist_root`.
    ///
    /// The script category is only present when `scripts` is set.
    pub fn standard(
        src_root: impl AsRef<Path>,
        dist_root: impl AsRef<Path>,
        scripts: bool,
    ) -> Result<Self, ConfigError> {
        let src = src_root.as_ref();
        let dist = dist_root.as_ref();
        let pattern = |rel: &str| pattern_under(src, rel);

        let mut entries = vec![
            (
                Category::Sass,
                PathEntry::new(pattern("public/scss/**/*.scss"), src.join("public/css")),
            ),
            (
                Category::Style,
                PathEntry::new(pattern("public/css/**/*.css"), dist.join("public/css")),
            ),
            (
                Category::Image,
                PathEntry::new(pattern("public/img/**/*"), dist.join("public/img")),
            ),
            (
                Category::Font,
                PathEntry::new(pattern("public/font/**/*"), dist.join("public/font")),
            ),
        ];
        if scripts {
            entries.push((
                Category::Script,
                PathEntry::new(pattern("public/js/**/*.js"), dist.join("public/js")),
            ));
        }

        // Markup covers the whole source tree, so it stays out of every
        // directory another category writes into the output from.
        let markup = entries
            .iter()
            .filter(|(_, entry)| entry.dest.starts_with(dist))
            .fold(PathEntry::new(pattern("**/*.html"), dist), |markup, (_, entry)| {
                markup.excluding(entry.base())
            });
        entries.push((Category::Markup, markup));

        Self::new(entries)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (category, entry) in &self.entries {
            glob::Pattern::new(&entry.source).map_err(|e| ConfigError::InvalidPattern {
                category: *category,
                message: e.to_string(),
            })?;
        }

        let entries: Vec<_> = self.entries.iter().collect();
        for (i, (first, a)) in entries.iter().enumerate() {
            for (second, b) in &entries[i + 1..] {
                if normalize(&a.dest) == normalize(&b.dest) {
                    return Err(ConfigError::SharedDestination {
                        first: **first,
                        second: **second,
                        dest: a.dest.clone(),
                    });
                }
                check_nesting(**first, a, **second, b)?;
                check_nesting(**second, b, **first, a)?;
            }
        }
        Ok(())
    }

    pub fn get(&self, category: Category) -> Option<&PathEntry> {
        self.entries.get(&category)
    }

    pub fn require(&self, category: Category) -> Result<&PathEntry, ConfigError> {
        self.get(category)
            .ok_or(ConfigError::MissingCategory(category))
    }

    pub fn contains(&self, category: Category) -> bool {
        self.entries.contains_key(&category)
    }

    pub fn categories(&self) -> impl Iterator<Item = Category> + '_ {
        self.entries.keys().copied()
    }
}

/// Fails when `inner` writes below `outer`'s destination and `outer` could
/// produce a file at the same path.
///
/// Under `outer`, the inner destination corresponds to a "shadow" source
/// directory. The pair is safe when `outer` cannot reach that directory or
/// explicitly excludes it.
fn check_nesting(
    outer_category: Category,
    outer: &PathEntry,
    inner_category: Category,
    inner: &PathEntry,
) -> Result<(), ConfigError> {
    let Ok(rel) = normalize(&inner.dest)
        .strip_prefix(normalize(&outer.dest))
        .map(Path::to_path_buf)
    else {
        return Ok(());
    };
    let shadow = outer.base().join(rel);
    if outer.reaches(&shadow) && !outer.is_excluded(&shadow) {
        return Err(ConfigError::NestedDestination {
            outer: outer_category,
            inner: inner_category,
            dest: inner.dest.clone(),
        });
    }
    Ok(())
}

/// Process-wide settings, loaded from the environment and overridden by CLI flags.
#[derive(Clone, Debug)]
pub struct PipelineConfig {
    /// Source root (from PAGESMITH_SRC)
    pub src_root: PathBuf,
    /// Build output root (from PAGESMITH_DIST)
    pub dist_root: PathBuf,
    /// Dev server port (from PAGESMITH_PORT)
    pub port: u16,
    /// Whether the script category is enabled (from PAGESMITH_SCRIPTS)
    pub scripts: bool,
    /// Watcher debounce window in milliseconds (from PAGESMITH_DEBOUNCE_MS)
    pub debounce_ms: u64,
}

impl PipelineConfig {
    pub const DEFAULT_PORT: u16 = 3000;

    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::defaults();

        let src_root = std::env::var("PAGESMITH_SRC")
            .map(PathBuf::from)
            .unwrap_or(defaults.src_root);
        let dist_root = std::env::var("PAGESMITH_DIST")
            .map(PathBuf::from)
            .unwrap_or(defaults.dist_root);
        let port = std::env::var("PAGESMITH_PORT")
            .ok()
            .and_then(|s| s.parse::<u16>().ok())
            .unwrap_or(defaults.port);
        let scripts = std::env::var("PAGESMITH_SCRIPTS")
            .map(|s| matches!(s.trim(), "1" | "true" | "yes"))
            .unwrap_or(defaults.scripts);
        let debounce_ms = std::env::var("PAGESMITH_DEBOUNCE_MS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(defaults.debounce_ms);

        Self {
            src_root,
            dist_root,
            port,
            scripts,
            debounce_ms,
        }
    }

    /// Built-in defaults, ignoring the environment.
    pub fn defaults() -> Self {
        Self {
            src_root: PathBuf::from("./src/"),
            dist_root: PathBuf::from("./dist/"),
            port: Self::DEFAULT_PORT,
            scripts: false,
            debounce_ms: 200,
        }
    }

    /// Config rooted at a project directory (used by tests and embedders).
    pub fn rooted_at(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        Self {
            src_root: root.join("src"),
            dist_root: root.join("dist"),
            ..Self::defaults()
        }
    }

    pub fn with_scripts(mut self, scripts: bool) -> Self {
        self.scripts = scripts;
        self
    }

    pub fn path_table(&self) -> Result<PathTable, ConfigError> {
        PathTable::standard(&self.src_root, &self.dist_root, self.scripts)
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::from_env()
    }
}
