//! Artifact references.
//!
//! An artifact is a file produced by a stage inside its run's working
//! directory. Code outside the storage layer only ever holds an
//! [`ArtifactRef`]; the storage layer resolves it to a filesystem path.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{RunId, StageName};

/// Logical kind of an artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Subject,
    Script,
    VideoMetadata,
    NarrationAudio,
    TimingSignal,
    CaptionsSrt,
    CaptionsVtt,
    VisualManifest,
    VisualAsset,
    FinalVideo,
    Thumbnail,
    PublishReceipt,
}

impl ArtifactKind {
    /// File name used when a stage produces exactly one artifact of this kind.
    pub fn default_file_name(&self) -> &'static str {
        match self {
            ArtifactKind::Subject => "subject.json",
            ArtifactKind::Script => "script.txt",
            ArtifactKind::VideoMetadata => "metadata.json",
            ArtifactKind::NarrationAudio => "narration.mp3",
            ArtifactKind::TimingSignal => "timing.json",
            ArtifactKind::CaptionsSrt => "captions.srt",
            ArtifactKind::CaptionsVtt => "captions.vtt",
            ArtifactKind::VisualManifest => "visuals.json",
            ArtifactKind::VisualAsset => "visuals/asset",
            ArtifactKind::FinalVideo => "final.mp4",
            ArtifactKind::Thumbnail => "thumbnail.jpg",
            ArtifactKind::PublishReceipt => "receipt.json",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactKind::Subject => "subject",
            ArtifactKind::Script => "script",
            ArtifactKind::VideoMetadata => "video_metadata",
            ArtifactKind::NarrationAudio => "narration_audio",
            ArtifactKind::TimingSignal => "timing_signal",
            ArtifactKind::CaptionsSrt => "captions_srt",
            ArtifactKind::CaptionsVtt => "captions_vtt",
            ArtifactKind::VisualManifest => "visual_manifest",
            ArtifactKind::VisualAsset => "visual_asset",
            ArtifactKind::FinalVideo => "final_video",
            ArtifactKind::Thumbnail => "thumbnail",
            ArtifactKind::PublishReceipt => "publish_receipt",
        }
    }
}

/// Reference to an artifact: run id + producing stage + logical kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub run_id: RunId,
    pub stage: StageName,
    pub kind: ArtifactKind,
    /// Path relative to the run directory
    pub file_name: String,
}

impl ArtifactRef {
    /// Reference using the kind's default file name.
    pub fn new(run_id: &RunId, stage: StageName, kind: ArtifactKind) -> Self {
        Self::named(run_id, stage, kind, kind.default_file_name())
    }

    /// Reference with an explicit relative file name.
    pub fn named(
        run_id: &RunId,
        stage: StageName,
        kind: ArtifactKind,
        file_name: impl Into<String>,
    ) -> Self {
        Self {
            run_id: run_id.clone(),
            stage,
            kind,
            file_name: file_name.into(),
        }
    }
}

impl fmt::Display for ArtifactRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.run_id, self.stage, self.file_name)
    }
}
