use std::convert::Infallible;

use axum::{
    extract::State,
    http::header,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse,
    },
};
use futures::{Stream, StreamExt};
use tokio::sync::broadcast::{self, error::RecvError};

use crate::models::{ReloadEvent, ReloadKind};
use crate::reload::ReloadChannel;

/// Browser side of the live-reload channel.
///
/// `inject_css` swaps matching stylesheet links for cache-busted copies;
/// anything else reloads the page.
pub const CLIENT_SCRIPT: &str = r#"(function () {
  var source = new EventSource("/__livereload");
  source.onmessage = function (message) {
    var event = JSON.parse(message.data);
    if (event.kind !== "inject_css") {
      window.location.reload();
      return;
    }
    var links = document.querySelectorAll('link[rel="stylesheet"]');
    var stamp = "livereload=" + Date.now();
    links.forEach(function (link) {
      var url = new URL(link.href, window.location.href);
      var matches = event.paths.length === 0 || event.paths.some(function (path) {
        return url.pathname === path;
      });
      if (!matches) {
        return;
      }
      url.searchParams.delete("livereload");
      link.href = url.pathname + "?" + (url.searchParams.toString() ? url.searchParams.toString() + "&" : "") + stamp;
    });
  };
})();
"#;

/// Reload events as a stream, ending when the channel closes.
///
/// A client that falls behind gets a full reload instead of the events it
/// missed.
pub fn event_stream(rx: broadcast::Receiver<ReloadEvent>) -> impl Stream<Item = ReloadEvent> {
    futures::stream::unfold(rx, |mut rx| async move {
        match rx.recv().await {
            Ok(event) => Some((event, rx)),
            Err(RecvError::Lagged(skipped)) => {
                tracing::debug!("Live-reload client lagged by {} events", skipped);
                let event = ReloadEvent {
                    kind: ReloadKind::Reload,
                    paths: vec![],
                };
                Some((event, rx))
            }
            Err(RecvError::Closed) => None,
        }
    })
}

pub async fn events(
    State(reload): State<ReloadChannel>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = reload.subscribe();
    tracing::info!("Live-reload client connected ({} total)", reload.client_count());

    let stream = event_stream(rx).map(|event| {
        let sse = match Event::default().json_data(&event) {
            Ok(sse) => sse,
            Err(e) => {
                tracing::warn!("Failed to encode reload event: {}", e);
                Event::default().data(r#"{"kind":"reload","paths":[]}"#)
            }
        };
        Ok(sse)
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}

pub async fn client_script() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/javascript; charset=utf-8")],
        CLIENT_SCRIPT,
    )
}
