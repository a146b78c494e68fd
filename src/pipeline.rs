//! Pipeline composer: `clean`, `build` and `dev`.
//!
//! The composer owns all run-time state in a [`PipelineContext`]: the path
//! table, the reload channel and the per-category last-run timestamps. Watch
//! tasks and the dev server get clones of it.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::config::{ConfigError, PathTable, PipelineConfig};
use crate::models::{BuildReport, Category, StageReport};
use crate::reload::ReloadChannel;
use crate::server;
use crate::stage::{Stage, StageError};
use crate::transform::{CompileSass, MinifyCss, MinifyHtml, MinifyJs, OptimizeImage, Prefix};
use crate::watcher::{watch_stage, ChangeSource, NotifySource, WatchError, WatchSet};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("clean failed for {}: {source}", path.display())]
    Clean {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("stage {stage} failed: {source}")]
    Stage {
        stage: String,
        #[source]
        source: StageError,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Watch(#[from] WatchError),

    #[error("dev server error: {0}")]
    Server(#[source] std::io::Error),
}

/// Hint printed when no command is given.
pub fn usage() -> &'static str {
    "No default behaviour. Run `pagesmith build` for a production build or \
     `pagesmith dev` for the live-reload server; see --help for more information."
}

/// State shared by the composer, its watch tasks and the dev server.
#[derive(Clone, Debug)]
pub struct PipelineContext {
    paths: Arc<PathTable>,
    reload: ReloadChannel,
    serve_root: PathBuf,
    last_runs: Arc<Mutex<HashMap<Category, DateTime<Utc>>>>,
}

impl PipelineContext {
    pub fn new(paths: PathTable, serve_root: impl Into<PathBuf>) -> Self {
        Self {
            paths: Arc::new(paths),
            reload: ReloadChannel::new(),
            serve_root: serve_root.into(),
            last_runs: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn paths(&self) -> &PathTable {
        &self.paths
    }

    pub fn reload(&self) -> &ReloadChannel {
        &self.reload
    }

    pub fn serve_root(&self) -> &Path {
        &self.serve_root
    }

    pub fn last_run(&self, category: Category) -> Option<DateTime<Utc>> {
        self.last_runs
            .lock()
            .expect("last-run lock poisoned")
            .get(&category)
            .copied()
    }

    pub fn mark_run(&self, category: Category, at: DateTime<Utc>) {
        self.last_runs
            .lock()
            .expect("last-run lock poisoned")
            .insert(category, at);
    }
}

/// Stage definitions for each category.
///
/// Production stages write minified output. Dev stages leave sources in place
/// (the dev server serves them directly) and only announce changes, except
/// Sass, which always has to be compiled to be servable.
pub mod stages {
    use super::*;

    pub fn compile_styles(table: &PathTable) -> Option<Stage> {
        let entry = table.get(Category::Sass)?;
        Some(
            Stage::new("compile-styles", Category::Sass, entry)
                .then(CompileSass::new(entry.base()))
                .incremental(false),
        )
    }

    pub fn minify_styles(table: &PathTable) -> Option<Stage> {
        let entry = table.get(Category::Style)?;
        Some(
            Stage::new("minify-styles", Category::Style, entry)
                .then(Prefix)
                .then(MinifyCss),
        )
    }

    pub fn minify_markup(table: &PathTable) -> Option<Stage> {
        let entry = table.get(Category::Markup)?;
        Some(Stage::new("minify-markup", Category::Markup, entry).then(MinifyHtml::new()))
    }

    pub fn minify_scripts(table: &PathTable) -> Option<Stage> {
        let entry = table.get(Category::Script)?;
        Some(Stage::new("minify-scripts", Category::Script, entry).then(MinifyJs))
    }

    pub fn minify_images(table: &PathTable) -> Option<Stage> {
        let entry = table.get(Category::Image)?;
        Some(Stage::new("minify-images", Category::Image, entry).then(OptimizeImage))
    }

    pub fn copy_fonts(table: &PathTable) -> Option<Stage> {
        let entry = table.get(Category::Font)?;
        Some(Stage::new("copy-fonts", Category::Font, entry))
    }

    /// Unminified passthrough for dev mode: nothing is written, matched
    /// sources are announced to the browser.
    pub fn announce(table: &PathTable, category: Category) -> Option<Stage> {
        let entry = table.get(category)?;
        Some(Stage::new(format!("watch-{}", category), category, entry).announce_only())
    }

    /// Stages the dev watcher runs, one per category.
    ///
    /// Compiled Sass lands in the style source directory, so when Sass is
    /// configured the style category is not watched separately; otherwise
    /// every compile would be announced twice.
    pub fn dev(table: &PathTable) -> Vec<Stage> {
        table
            .categories()
            .filter_map(|category| match category {
                Category::Sass => compile_styles(table),
                Category::Style if table.contains(Category::Sass) => None,
                other => announce(table, other),
            })
            .collect()
    }

    /// Stages re-run by `build --watch`.
    pub fn rebuild(table: &PathTable) -> Vec<Stage> {
        [compile_styles(table), minify_styles(table), minify_markup(table)]
            .into_iter()
            .flatten()
            .collect()
    }
}

/// Recursively delete `dist_root`. A missing directory is already clean.
pub async fn clean(dist_root: &Path) -> Result<(), PipelineError> {
    match tokio::fs::remove_dir_all(dist_root).await {
        Ok(()) => {
            tracing::info!("Cleaned {}", dist_root.display());
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(PipelineError::Clean {
            path: dist_root.to_path_buf(),
            source,
        }),
    }
}

async fn run_stage(stage: Option<&Stage>) -> Result<Option<StageReport>, PipelineError> {
    let Some(stage) = stage else {
        return Ok(None);
    };
    stage
        .run(None)
        .await
        .map(Some)
        .map_err(|source| PipelineError::Stage {
            stage: stage.name.clone(),
            source,
        })
}

/// The composer.
pub struct Pipeline {
    config: PipelineConfig,
    ctx: PipelineContext,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Result<Self, PipelineError> {
        let paths = config.path_table()?;
        let ctx = PipelineContext::new(paths, config.src_root.clone());
        Ok(Self { config, ctx })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn context(&self) -> &PipelineContext {
        &self.ctx
    }

    pub async fn clean(&self) -> Result<(), PipelineError> {
        clean(&self.config.dist_root).await
    }

    /// Clean, then run every production stage.
    ///
    /// Markup, styles, fonts, images and scripts run concurrently once Clean
    /// has finished; the Sass compile strictly precedes prefixing and
    /// minifying styles. Returns after every stage has finished.
    pub async fn build(&self) -> Result<BuildReport, PipelineError> {
        self.clean().await?;

        let table = self.ctx.paths();
        let markup = stages::minify_markup(table);
        let sass = stages::compile_styles(table);
        let style = stages::minify_styles(table);
        let font = stages::copy_fonts(table);
        let image = stages::minify_images(table);
        let script = stages::minify_scripts(table);

        let styles = async {
            let compiled = run_stage(sass.as_ref()).await?;
            let minified = run_stage(style.as_ref()).await?;
            Ok::<_, PipelineError>([compiled, minified])
        };

        let (markup, styles, font, image, script) = tokio::join!(
            run_stage(markup.as_ref()),
            styles,
            run_stage(font.as_ref()),
            run_stage(image.as_ref()),
            run_stage(script.as_ref())
        );

        let mut report = BuildReport::default();
        report.stages.extend(markup?);
        report.stages.extend(styles?.into_iter().flatten());
        report.stages.extend(font?);
        report.stages.extend(image?);
        report.stages.extend(script?);

        let failures = report.failures().count();
        if failures > 0 {
            tracing::warn!(
                "Build finished: {} files written, {} files failed",
                report.files_written(),
                failures
            );
        } else {
            tracing::info!("Build finished: {} files written", report.files_written());
        }
        Ok(report)
    }

    /// Attach production watchers (Sass, styles, markup) after a build.
    pub fn watch_build(&self, source: &mut dyn ChangeSource) -> Result<WatchSet, PipelineError> {
        self.attach(stages::rebuild(self.ctx.paths()), source)
    }

    /// Compile Sass once, then watch every category in passthrough mode.
    ///
    /// A category whose directory does not exist is skipped with a warning.
    pub async fn start_dev(&self, source: &mut dyn ChangeSource) -> Result<WatchSet, PipelineError> {
        if let Some(sass) = stages::compile_styles(self.ctx.paths()) {
            if let Err(e) = sass.run(None).await {
                tracing::error!("[{}] {}", sass.name, e);
            }
        }
        self.attach(stages::dev(self.ctx.paths()), source)
    }

    fn attach(
        &self,
        stages: Vec<Stage>,
        source: &mut dyn ChangeSource,
    ) -> Result<WatchSet, PipelineError> {
        let mut set = WatchSet::default();
        for stage in stages {
            let name = stage.name.clone();
            match watch_stage(stage, source, &self.ctx) {
                Ok(handle) => set.insert(name, handle),
                Err(WatchError::SourceNotFound(path)) => {
                    tracing::warn!("[{}] not watching, {} does not exist", name, path.display());
                }
                Err(e) => return Err(e.into()),
            }
        }
        tracing::info!("Watching {} categories for changes", set.len());
        Ok(set)
    }

    /// Keep re-running production stages on change until interrupted. Runs
    /// already started when the signal arrives finish first.
    pub async fn watch_until_shutdown(&self) -> Result<(), PipelineError> {
        let mut source = NotifySource::new(Duration::from_millis(self.config.debounce_ms));
        let watchers = self.watch_build(&mut source)?;
        shutdown_signal().await;

        drop(source);
        watchers.drain().await;
        Ok(())
    }

    /// Dev mode: compile Sass, watch sources and serve them with live reload
    /// until interrupted. In-flight stage runs finish before it returns.
    pub async fn dev(&self) -> Result<(), PipelineError> {
        let mut source = NotifySource::new(Duration::from_millis(self.config.debounce_ms));
        let watchers = self.start_dev(&mut source).await?;

        let app = server::create_router(&self.config.src_root, self.ctx.reload().clone());
        let listener = tokio::net::TcpListener::bind(("127.0.0.1", self.config.port))
            .await
            .map_err(PipelineError::Server)?;
        tracing::info!(
            "Serving {} on http://127.0.0.1:{}",
            self.config.src_root.display(),
            self.config.port
        );

        let served = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(PipelineError::Server);

        drop(source);
        watchers.drain().await;
        served
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}
