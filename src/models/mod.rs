//! Domain models for the asset pipeline.
//!
//! # Core Concepts
//!
//! - [`Category`]: a logical asset kind (Sass sources, styles, markup, scripts,
//!   images, fonts). Each category owns exactly one source pattern and one
//!   destination in the path table.
//! - [`StageReport`]: what a single stage run touched, skipped and rejected.
//! - [`FileFailure`]: a per-file transform or read error. Scoped to that file.
//! - [`ReloadEvent`]: the notification pushed to connected browsers after a
//!   stage run.
//!
//! None of these outlive the process. The output directory is the only thing
//! left on disk.

mod category;
mod reload;
mod report;

pub use category::*;
pub use reload::*;
pub use report::*;
