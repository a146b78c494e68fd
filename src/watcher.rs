//! Change watcher.
//!
//! A [`ChangeSource`] turns "tell me when something under pattern P changes"
//! into a stream of path batches. [`spawn_watch`] binds one such stream to a
//! stage: every batch re-runs the stage, updates the category's last-run time
//! and notifies the reload channel. Each category gets its own task, so a slow
//! or failing stage never holds up another.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use notify_debouncer_mini::{new_debouncer, DebounceEventResult, DebouncedEventKind, Debouncer};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::{pattern_under, split_pattern};
use crate::pipeline::PipelineContext;
use crate::stage::Stage;

/// Paths reported together by one (debounced) notification.
pub type ChangeBatch = Vec<PathBuf>;

#[derive(Debug, Error)]
pub enum WatchError {
    #[error("failed to initialize file watcher: {0}")]
    WatcherInit(#[source] notify::Error),

    #[error("failed to watch {}: {source}", path.display())]
    WatchPath {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },

    #[error("watch directory not found: {}", .0.display())]
    SourceNotFound(PathBuf),

    #[error("invalid watch pattern {pattern}: {message}")]
    Pattern { pattern: String, message: String },
}

/// Something that can report file changes under a glob pattern.
pub trait ChangeSource: Send {
    fn subscribe(&mut self, pattern: &str) -> Result<mpsc::UnboundedReceiver<ChangeBatch>, WatchError>;
}

fn compile_pattern(pattern: &str) -> Result<glob::Pattern, WatchError> {
    glob::Pattern::new(pattern).map_err(|e| WatchError::Pattern {
        pattern: pattern.to_string(),
        message: e.to_string(),
    })
}

/// Native file-system events, debounced.
pub struct NotifySource {
    debounce: Duration,
    debouncers: Vec<Debouncer<RecommendedWatcher>>,
}

impl NotifySource {
    pub fn new(debounce: Duration) -> Self {
        Self {
            debounce,
            debouncers: Vec::new(),
        }
    }
}

impl ChangeSource for NotifySource {
    fn subscribe(&mut self, pattern: &str) -> Result<mpsc::UnboundedReceiver<ChangeBatch>, WatchError> {
        let (base, rest) = split_pattern(pattern);
        // Events arrive with canonical paths, so match against the canonical base.
        let root = base
            .canonicalize()
            .map_err(|_| WatchError::SourceNotFound(base.clone()))?;
        let matcher = compile_pattern(&pattern_under(&root, &rest))?;

        let (tx, rx) = mpsc::unbounded_channel();
        let mut debouncer = new_debouncer(self.debounce, move |result: DebounceEventResult| {
            match result {
                Ok(events) => {
                    let paths: ChangeBatch = events
                        .into_iter()
                        .filter(|e| matches!(e.kind, DebouncedEventKind::Any))
                        .map(|e| e.path)
                        .filter(|p| matcher.matches_path(p))
                        .collect();
                    if !paths.is_empty() {
                        let _ = tx.send(paths);
                    }
                }
                // Non-fatal: keep watching
                Err(error) => tracing::warn!("Watch error: {:?}", error),
            }
        })
        .map_err(WatchError::WatcherInit)?;

        debouncer
            .watcher()
            .watch(&root, RecursiveMode::Recursive)
            .map_err(|source| WatchError::WatchPath {
                path: root.clone(),
                source,
            })?;

        tracing::debug!("Watching {} for {}", root.display(), pattern);
        self.debouncers.push(debouncer);
        Ok(rx)
    }
}

/// Hand-driven change source.
///
/// Clones share subscriptions, so one handle can be given to the pipeline and
/// another kept to push changes.
#[derive(Clone, Default)]
pub struct ChannelSource {
    subscribers: Arc<Mutex<Vec<(glob::Pattern, mpsc::UnboundedSender<ChangeBatch>)>>>,
}

impl ChannelSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report a change to `path`. Returns how many subscriptions matched.
    pub fn touch(&self, path: impl AsRef<Path>) -> usize {
        let path = path.as_ref();
        let subscribers = self.subscribers.lock().expect("subscriber lock poisoned");
        subscribers
            .iter()
            .filter(|(pattern, _)| pattern.matches_path(path))
            .filter(|(_, tx)| tx.send(vec![path.to_path_buf()]).is_ok())
            .count()
    }
}

impl ChangeSource for ChannelSource {
    fn subscribe(&mut self, pattern: &str) -> Result<mpsc::UnboundedReceiver<ChangeBatch>, WatchError> {
        let matcher = compile_pattern(pattern)?;
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers
            .lock()
            .expect("subscriber lock poisoned")
            .push((matcher, tx));
        Ok(rx)
    }
}

/// A stage bound to the watcher. Creating one stamps the category's last-run
/// time, so the first triggered pass only sees files changed after startup.
pub struct WatchRegistration {
    pub stage: Stage,
}

impl WatchRegistration {
    pub fn new(stage: Stage, ctx: &PipelineContext) -> Self {
        ctx.mark_run(stage.category, Utc::now());
        Self { stage }
    }
}

/// Subscribe `stage` to `source` and spawn its watch task.
pub fn watch_stage(
    stage: Stage,
    source: &mut dyn ChangeSource,
    ctx: &PipelineContext,
) -> Result<JoinHandle<()>, WatchError> {
    let changes = source.subscribe(&stage.source)?;
    let registration = WatchRegistration::new(stage, ctx);
    Ok(spawn_watch(registration, changes, ctx.clone()))
}

/// Run `registration`'s stage for every batch until the source goes away.
pub fn spawn_watch(
    registration: WatchRegistration,
    mut changes: mpsc::UnboundedReceiver<ChangeBatch>,
    ctx: PipelineContext,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(mut batch) = changes.recv().await {
            // Coalesce whatever piled up while the last run was in flight.
            while let Ok(more) = changes.try_recv() {
                batch.extend(more);
            }
            run_triggered(&registration, &ctx, &batch).await;
        }
        tracing::debug!("[{}] change source closed", registration.stage.name);
    })
}

async fn run_triggered(
    registration: &WatchRegistration,
    ctx: &PipelineContext,
    batch: &[PathBuf],
) {
    let stage = &registration.stage;
    for path in batch {
        tracing::info!("[{}] changed: {}", stage.name, path.display());
    }

    let since = ctx.last_run(stage.category);
    let started = Utc::now();
    let result = stage.run(since).await;
    ctx.mark_run(stage.category, started);

    match result {
        Ok(report) => {
            ctx.reload().notify(&report, ctx.serve_root());
        }
        Err(e) => tracing::error!("[{}] {}", stage.name, e),
    }
}

/// Join handles for a set of watch tasks, keyed by stage name.
///
/// A task ends once its change source is dropped and the pending batches are
/// done. Dropping the set detaches the tasks; [`WatchSet::drain`] waits for
/// them.
#[derive(Default)]
pub struct WatchSet {
    handles: HashMap<String, JoinHandle<()>>,
}

impl WatchSet {
    pub fn insert(&mut self, name: impl Into<String>, handle: JoinHandle<()>) {
        self.handles.insert(name.into(), handle);
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handles.contains_key(name)
    }

    /// Wait for every task to finish its current and pending runs. Call it
    /// after dropping the change source, or it never returns.
    pub async fn drain(self) {
        for (name, handle) in self.handles {
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    tracing::error!("[{}] watch task failed: {}", name, e);
                }
            }
        }
    }

    /// Stop every watch task. In-flight runs are dropped at their next await.
    pub fn abort_all(&self) {
        for handle in self.handles.values() {
            handle.abort();
        }
    }
}
