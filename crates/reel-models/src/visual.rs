//! Visual asset references produced by the visual collection stage.

use serde::{Deserialize, Serialize};

/// Media type of a visual asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetKind {
    Video,
    Image,
}

impl AssetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetKind::Video => "video",
            AssetKind::Image => "image",
        }
    }

    /// Infer the kind from a file extension.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "mp4" | "mov" | "webm" | "mkv" => Some(AssetKind::Video),
            "jpg" | "jpeg" | "png" | "webp" => Some(AssetKind::Image),
            _ => None,
        }
    }
}

/// One visual asset found by search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetRef {
    /// Provider-side identifier
    pub id: String,
    pub kind: AssetKind,
    pub source_url: String,
    /// Keyword that found this asset
    pub query: String,
    /// File name under the run's `visuals/` directory once downloaded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<f64>,
    #[serde(default)]
    pub width: u32,
    #[serde(default)]
    pub height: u32,
}

impl AssetRef {
    pub fn is_downloaded(&self) -> bool {
        self.file_name.is_some()
    }
}

/// Manifest written as `visuals.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct VisualSet {
    pub keywords: Vec<String>,
    pub assets: Vec<AssetRef>,
    /// True when the set is the configured fallback instead of search results
    #[serde(default)]
    pub fallback: bool,
}

impl VisualSet {
    pub fn fallback(assets: Vec<AssetRef>) -> Self {
        Self {
            keywords: Vec::new(),
            assets,
            fallback: true,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }
}
