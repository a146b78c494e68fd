use serde::{Deserialize, Serialize};

/// A logical asset category.
///
/// Sass sources and plain stylesheets are separate categories: Sass compiles
/// into the source stylesheet directory, and stylesheets are prefixed and
/// minified from there into the output tree.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Sass,
    Style,
    Markup,
    Script,
    Image,
    Font,
}

impl Category {
    pub const ALL: [Category; 6] = [
        Self::Sass,
        Self::Style,
        Self::Markup,
        Self::Script,
        Self::Image,
        Self::Font,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sass => "sass",
            Self::Style => "style",
            Self::Markup => "markup",
            Self::Script => "script",
            Self::Image => "image",
            Self::Font => "font",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "sass" => Some(Self::Sass),
            "style" => Some(Self::Style),
            "markup" => Some(Self::Markup),
            "script" => Some(Self::Script),
            "image" => Some(Self::Image),
            "font" => Some(Self::Font),
            _ => None,
        }
    }

    /// Whether changes in this category can be hot-swapped in the browser
    /// without a full page reload.
    pub fn is_style(&self) -> bool {
        matches!(self, Self::Sass | Self::Style)
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
