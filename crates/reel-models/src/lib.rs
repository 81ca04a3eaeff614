//! Shared data models for the reelsmith pipeline.
//!
//! This crate provides Serde-serializable types for:
//! - Run requests and persisted run state
//! - Stage identities, statuses and attempt records
//! - The failure taxonomy
//! - Timing signals and caption segments
//! - Artifact references, subjects and visual assets

pub mod artifact;
pub mod caption;
pub mod failure;
pub mod run;
pub mod stage;
pub mod subject;
pub mod visual;

// Re-export common types
pub use artifact::{ArtifactKind, ArtifactRef};
pub use caption::{CaptionSegment, TimingEvent, TimingSignal};
pub use failure::{Failure, FailureKind, FailureReason};
pub use run::{PrivacyStatus, RunId, RunRequest, RunState, RunStatus};
pub use stage::{
    AttemptOutcome, AttemptRecord, StageName, StageOutput, StageRecord, StageResult, StageStatus,
};
pub use subject::{PublishReceipt, SubjectMetadata, SubjectQuery, VideoMetadata};
pub use visual::{AssetKind, AssetRef, VisualSet};
