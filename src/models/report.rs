use std::path::PathBuf;

use serde::Serialize;

use super::Category;

/// A single file that could not be transformed.
///
/// Failures are scoped to the file: the rest of the batch still runs and the
/// file is left out of the output.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct FileFailure {
    pub category: Category,
    pub path: PathBuf,
    pub message: String,
}

impl std::fmt::Display for FileFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}: {}", self.category, self.path.display(), self.message)
    }
}

/// Outcome of one stage run.
#[derive(Debug, Clone, Serialize)]
pub struct StageReport {
    pub stage: String,
    pub category: Category,
    /// Files that matched the source pattern and were considered.
    pub processed: usize,
    /// Output paths (or, for announce-only stages, the source paths) that
    /// made it through the transform chain.
    pub written: Vec<PathBuf>,
    /// Files the chain dropped on purpose (e.g. Sass partials).
    pub skipped: usize,
    pub failures: Vec<FileFailure>,
}

impl StageReport {
    pub fn new(stage: impl Into<String>, category: Category) -> Self {
        Self {
            stage: stage.into(),
            category,
            processed: 0,
            written: vec![],
            skipped: 0,
            failures: vec![],
        }
    }

    /// True when no file failed.
    pub fn success(&self) -> bool {
        self.failures.is_empty()
    }

    /// Whether the run produced anything a browser should hear about.
    pub fn touched_files(&self) -> bool {
        !self.written.is_empty()
    }
}

/// Aggregate of every stage run by a production build.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BuildReport {
    pub stages: Vec<StageReport>,
}

impl BuildReport {
    pub fn files_written(&self) -> usize {
        self.stages.iter().map(|s| s.written.len()).sum()
    }

    pub fn failures(&self) -> impl Iterator<Item = &FileFailure> {
        self.stages.iter().flat_map(|s| s.failures.iter())
    }

    pub fn stage(&self, name: &str) -> Option<&StageReport> {
        self.stages.iter().find(|s| s.stage == name)
    }
}
