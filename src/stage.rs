//! Transform stages.
//!
//! A stage reads every file matching its source pattern, folds it through its
//! transform chain and writes the result under its destination, keeping the
//! path relative to the pattern's base. Per-file failures are recorded in the
//! report and never stop the batch.

use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::config::{glob_base, normalize, PathEntry};
use crate::models::{Category, FileFailure, StageReport};
use crate::transform::{run_chain, FileOutcome, SourceFile, Transform, TransformChain};

#[derive(Debug, Error)]
pub enum StageError {
    #[error("invalid source pattern {pattern}: {message}")]
    Pattern { pattern: String, message: String },

    #[error("file discovery for {pattern} did not finish: {message}")]
    Discovery { pattern: String, message: String },

    #[error("cannot write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Where a stage's results go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutput {
    /// Write results under this directory.
    Write(PathBuf),
    /// Run the chain but write nothing. The matched source paths are reported
    /// so the browser can be told about them.
    Announce,
}

/// A named transform pipeline bound to a source pattern and an output.
#[derive(Clone)]
pub struct Stage {
    pub name: String,
    pub category: Category,
    pub source: String,
    /// Matched files below these directories are left alone.
    pub exclude: Vec<PathBuf>,
    pub output: StageOutput,
    pub transforms: TransformChain,
    /// When set, triggered runs only pick up files modified since the last run.
    pub incremental: bool,
}

impl std::fmt::Debug for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let transforms: Vec<_> = self.transforms.iter().map(|t| t.name()).collect();
        f.debug_struct("Stage")
            .field("name", &self.name)
            .field("category", &self.category)
            .field("source", &self.source)
            .field("exclude", &self.exclude)
            .field("output", &self.output)
            .field("transforms", &transforms)
            .field("incremental", &self.incremental)
            .finish()
    }
}

impl Stage {
    /// A copy stage writing `entry.source` to `entry.dest`.
    pub fn new(name: impl Into<String>, category: Category, entry: &PathEntry) -> Self {
        Self {
            name: name.into(),
            category,
            source: entry.source.clone(),
            exclude: entry.exclude.clone(),
            output: StageOutput::Write(entry.dest.clone()),
            transforms: vec![],
            incremental: true,
        }
    }

    pub fn then(mut self, transform: impl Transform + 'static) -> Self {
        self.transforms.push(std::sync::Arc::new(transform));
        self
    }

    pub fn announce_only(mut self) -> Self {
        self.output = StageOutput::Announce;
        self
    }

    pub fn incremental(mut self, incremental: bool) -> Self {
        self.incremental = incremental;
        self
    }

    /// Run the stage over every matching file.
    ///
    /// `since` limits an incremental stage to files modified at or after that
    /// instant. Non-incremental stages ignore it.
    pub async fn run(&self, since: Option<DateTime<Utc>>) -> Result<StageReport, StageError> {
        let mut report = StageReport::new(&self.name, self.category);
        let base = glob_base(&self.source);
        let since = since.filter(|_| self.incremental);

        for path in self.matched_files(since).await? {
            report.processed += 1;

            let contents = match tokio::fs::read(&path).await {
                Ok(contents) => contents,
                Err(e) => {
                    self.record_failure(&mut report, &path, format!("read failed: {}", e));
                    continue;
                }
            };

            let file = SourceFile::new(relative_to(&path, &base), contents);
            let chain = self.transforms.clone();
            let outcome = match tokio::task::spawn_blocking(move || run_chain(&chain, file)).await
            {
                Ok(outcome) => outcome,
                Err(e) => FileOutcome::Failed(format!("transform panicked: {}", e)),
            };

            match outcome {
                FileOutcome::Emit(file) => match &self.output {
                    StageOutput::Write(dest) => {
                        if !is_contained(&file.path) {
                            let message = format!(
                                "output path {} escapes the destination",
                                file.path.display()
                            );
                            self.record_failure(&mut report, &path, message);
                            continue;
                        }
                        let target = dest.join(&file.path);
                        write_file(&target, &file.contents).await?;
                        report.written.push(target);
                    }
                    StageOutput::Announce => report.written.push(path.clone()),
                },
                FileOutcome::Skip => report.skipped += 1,
                FileOutcome::Failed(message) => self.record_failure(&mut report, &path, message),
            }
        }

        tracing::info!(
            "[{}] {} matched, {} out, {} skipped, {} failed",
            self.name,
            report.processed,
            report.written.len(),
            report.skipped,
            report.failures.len()
        );
        Ok(report)
    }

    async fn matched_files(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<PathBuf>, StageError> {
        let walker = Walker {
            name: self.name.clone(),
            pattern: self.source.clone(),
            exclude: self.exclude.iter().map(|dir| normalize(dir)).collect(),
            since,
        };
        tokio::task::spawn_blocking(move || walker.walk())
            .await
            .map_err(|e| StageError::Discovery {
                pattern: self.source.clone(),
                message: e.to_string(),
            })?
    }

    fn record_failure(&self, report: &mut StageReport, path: &Path, message: String) {
        let failure = FileFailure {
            category: self.category,
            path: path.to_path_buf(),
            message,
        };
        tracing::warn!("[{}] {}", self.name, failure);
        report.failures.push(failure);
    }
}

/// Directory walk for one stage run. Runs on the blocking pool.
struct Walker {
    name: String,
    pattern: String,
    exclude: Vec<PathBuf>,
    since: Option<DateTime<Utc>>,
}

impl Walker {
    fn walk(&self) -> Result<Vec<PathBuf>, StageError> {
        let entries = glob::glob(&self.pattern).map_err(|e| StageError::Pattern {
            pattern: self.pattern.clone(),
            message: e.to_string(),
        })?;

        let mut files = Vec::new();
        for entry in entries {
            let path = match entry {
                Ok(path) => path,
                Err(e) => {
                    tracing::warn!("[{}] skipping unreadable entry: {}", self.name, e);
                    continue;
                }
            };
            if self.exclude.iter().any(|dir| normalize(&path).starts_with(dir)) {
                continue;
            }
            let Ok(meta) = std::fs::metadata(&path) else {
                continue;
            };
            if !meta.is_file() {
                continue;
            }
            if let Some(since) = self.since {
                let modified = meta.modified().map(DateTime::<Utc>::from).ok();
                if modified.is_some_and(|m| m < since) {
                    continue;
                }
            }
            files.push(path);
        }
        Ok(files)
    }
}

async fn write_file(target: &Path, contents: &[u8]) -> Result<(), StageError> {
    let to_err = |source| StageError::Write {
        path: target.to_path_buf(),
        source,
    };
    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(to_err)?;
    }
    tokio::fs::write(target, contents).await.map_err(to_err)
}

/// `path` relative to `base`, ignoring `.` components on either side.
fn relative_to(path: &Path, base: &Path) -> PathBuf {
    let (path, base) = (normalize(path), normalize(base));
    match path.strip_prefix(&base) {
        Ok(rel) => rel.to_path_buf(),
        Err(_) => path.file_name().map(PathBuf::from).unwrap_or(path),
    }
}

/// A relative output path that stays inside its destination.
fn is_contained(rel: &Path) -> bool {
    let mut components = rel.components().peekable();
    components.peek().is_some() && components.all(|c| matches!(c, Component::Normal(_)))
}
