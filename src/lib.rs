//! Static-asset pipeline: Sass compilation, prefixing and minification of
//! styles, markup, scripts and images, plus a live-reload development server.

pub mod config;
pub mod models;
pub mod pipeline;
pub mod reload;
pub mod server;
pub mod stage;
pub mod transform;
pub mod watcher;
