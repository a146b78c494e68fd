use serde::{Deserialize, Serialize};

/// How the browser should apply a change.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReloadKind {
    /// Full page reload.
    Reload,
    /// Swap stylesheets in place without reloading.
    InjectCss,
}

impl ReloadKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Reload => "reload",
            Self::InjectCss => "inject_css",
        }
    }
}

/// A notification pushed to connected browsers after a stage run.
///
/// `paths` are URL paths relative to the served root (e.g. `/public/css/main.css`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReloadEvent {
    pub kind: ReloadKind,
    pub paths: Vec<String>,
}
