//! Development HTTP server: serves the source root as static files and pushes
//! live-reload events to connected browsers.

mod handlers;
pub mod middleware;

use std::path::Path;

use axum::{routing::get, Router};
use tower::ServiceBuilder;
use tower_http::{services::ServeDir, trace::TraceLayer};

use crate::reload::ReloadChannel;

pub use handlers::{event_stream, CLIENT_SCRIPT};

/// Route for the Server-Sent Events stream.
pub const EVENTS_PATH: &str = "/__livereload";
/// Route for the browser client.
pub const CLIENT_PATH: &str = "/__livereload.js";

pub fn create_router(serve_root: impl AsRef<Path>, reload: ReloadChannel) -> Router {
    let files = ServeDir::new(serve_root.as_ref()).append_index_html_on_directories(true);

    Router::new()
        .route(EVENTS_PATH, get(handlers::events))
        .route(CLIENT_PATH, get(handlers::client_script))
        .fallback_service(files)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(axum::middleware::from_fn(middleware::inject_reload_script)),
        )
        .with_state(reload)
}
