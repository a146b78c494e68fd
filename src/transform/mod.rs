//! Per-file transforms and the chain that threads a file through them.
//!
//! A stage owns an ordered list of transforms. Each file is folded through the
//! list independently: `Skip` or `Failed` stops that file only, never the batch.

mod markup;
mod raster;
mod script;
mod style;

use std::path::PathBuf;
use std::sync::Arc;

pub use markup::MinifyHtml;
pub use raster::OptimizeImage;
pub use script::MinifyJs;
pub use style::{CompileSass, MinifyCss, Prefix};

/// A file moving through a transform chain.
///
/// `path` is relative to the stage's source base, so it doubles as the output
/// path relative to the destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    pub path: PathBuf,
    pub contents: Vec<u8>,
}

impl SourceFile {
    pub fn new(path: impl Into<PathBuf>, contents: impl Into<Vec<u8>>) -> Self {
        Self {
            path: path.into(),
            contents: contents.into(),
        }
    }

    /// Contents as UTF-8, or a failure naming the file.
    pub fn text(&self) -> Result<&str, String> {
        std::str::from_utf8(&self.contents)
            .map_err(|e| format!("{} is not valid UTF-8: {}", self.path.display(), e))
    }
}

/// Result of applying one transform (or a whole chain) to one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileOutcome {
    /// Replacement file, possibly renamed.
    Emit(SourceFile),
    /// Intentionally dropped from the output.
    Skip,
    /// The transform rejected the file.
    Failed(String),
}

impl FileOutcome {
    pub fn from_result(result: Result<SourceFile, String>) -> Self {
        match result {
            Ok(file) => Self::Emit(file),
            Err(message) => Self::Failed(message),
        }
    }
}

/// A pure function from one file to an outcome.
///
/// Implementations hold no mutable state between calls.
pub trait Transform: Send + Sync {
    fn name(&self) -> &'static str;

    fn apply(&self, file: SourceFile) -> FileOutcome;
}

pub type TransformChain = Vec<Arc<dyn Transform>>;

/// Fold `file` through `chain` in order.
///
/// An empty chain is a byte-for-byte passthrough.
pub fn run_chain(chain: &[Arc<dyn Transform>], file: SourceFile) -> FileOutcome {
    chain
        .iter()
        .try_fold(file, |file, transform| match transform.apply(file) {
            FileOutcome::Emit(next) => Ok(next),
            FileOutcome::Failed(message) => {
                Err(FileOutcome::Failed(format!("{}: {}", transform.name(), message)))
            }
            FileOutcome::Skip => Err(FileOutcome::Skip),
        })
        .map_or_else(|outcome| outcome, FileOutcome::Emit)
}
