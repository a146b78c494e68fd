//! Live reload channel.
//!
//! Best-effort fan-out of [`ReloadEvent`]s to connected browsers. With nobody
//! listening, events are dropped; slow listeners lose old events. Neither case
//! affects the pipeline.

use std::path::{Component, Path};

use tokio::sync::broadcast;

use crate::models::{ReloadEvent, ReloadKind, StageReport};

const CHANNEL_CAPACITY: usize = 64;

#[derive(Clone, Debug)]
pub struct ReloadChannel {
    tx: broadcast::Sender<ReloadEvent>,
}

impl ReloadChannel {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ReloadEvent> {
        self.tx.subscribe()
    }

    pub fn client_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Push `event` to every subscriber. Returns how many received it.
    pub fn send(&self, event: ReloadEvent) -> usize {
        match self.tx.send(event) {
            Ok(count) => count,
            Err(broadcast::error::SendError(event)) => {
                tracing::debug!("No live-reload clients, dropping {} event", event.kind.as_str());
                0
            }
        }
    }

    /// Announce the files a stage run touched, as one event.
    ///
    /// Nothing is sent when the run touched no files.
    pub fn notify(&self, report: &StageReport, serve_root: &Path) -> Option<ReloadEvent> {
        let event = event_for(report, serve_root)?;
        self.send(event.clone());
        Some(event)
    }
}

impl Default for ReloadChannel {
    fn default() -> Self {
        Self::new()
    }
}

/// Build the event for a stage run: stylesheets are injected, anything else
/// reloads the page.
pub fn event_for(report: &StageReport, serve_root: &Path) -> Option<ReloadEvent> {
    if !report.touched_files() {
        return None;
    }

    let all_css = report
        .written
        .iter()
        .all(|p| p.extension().is_some_and(|ext| ext == "css"));
    let kind = if all_css {
        ReloadKind::InjectCss
    } else {
        ReloadKind::Reload
    };

    let paths = report
        .written
        .iter()
        .map(|p| url_path(p, serve_root))
        .collect();

    Some(ReloadEvent { kind, paths })
}

/// URL path of `file` as served from `serve_root`.
fn url_path(file: &Path, serve_root: &Path) -> String {
    let normal = |p: &Path| -> Vec<String> {
        p.components()
            .filter_map(|c| match c {
                Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
                _ => None,
            })
            .collect()
    };
    let file = normal(file);
    let root = normal(serve_root);
    let rel = file.strip_prefix(root.as_slice()).unwrap_or(file.as_slice());
    format!("/{}", rel.join("/"))
}
