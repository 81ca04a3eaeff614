//! Stage identities, per-stage status and attempt records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{ArtifactRef, Failure, FailureKind, RunStatus};

/// The ordered stages of one pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageName {
    Scrape,
    Script,
    Narrate,
    Caption,
    CollectVisuals,
    Compose,
    Upload,
}

impl StageName {
    /// All stages in execution order.
    pub const ALL: [StageName; 7] = [
        StageName::Scrape,
        StageName::Script,
        StageName::Narrate,
        StageName::Caption,
        StageName::CollectVisuals,
        StageName::Compose,
        StageName::Upload,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StageName::Scrape => "scrape",
            StageName::Script => "script",
            StageName::Narrate => "narrate",
            StageName::Caption => "caption",
            StageName::CollectVisuals => "collect_visuals",
            StageName::Compose => "compose",
            StageName::Upload => "upload",
        }
    }

    /// Position of this stage in [`StageName::ALL`].
    pub fn index(&self) -> usize {
        match self {
            StageName::Scrape => 0,
            StageName::Script => 1,
            StageName::Narrate => 2,
            StageName::Caption => 3,
            StageName::CollectVisuals => 4,
            StageName::Compose => 5,
            StageName::Upload => 6,
        }
    }

    /// Run status while this stage is active.
    pub fn phase(&self) -> RunStatus {
        match self {
            StageName::Scrape => RunStatus::Scraping,
            StageName::Script => RunStatus::Scripting,
            StageName::Narrate => RunStatus::Narrating,
            StageName::Caption => RunStatus::Captioning,
            StageName::CollectVisuals => RunStatus::CollectingVisuals,
            StageName::Compose => RunStatus::Composing,
            StageName::Upload => RunStatus::Uploading,
        }
    }

    /// Optional stages degrade to a fallback instead of failing the run.
    pub fn is_optional(&self) -> bool {
        matches!(self, StageName::CollectVisuals)
    }
}

impl fmt::Display for StageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Status of one stage within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    #[default]
    Pending,
    Running,
    Succeeded,
    Failed,
    /// Optional stage replaced by its fallback
    Skipped,
}

impl StageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageStatus::Pending => "pending",
            StageStatus::Running => "running",
            StageStatus::Succeeded => "succeeded",
            StageStatus::Failed => "failed",
            StageStatus::Skipped => "skipped",
        }
    }

    /// Whether the stage's output is available to later stages.
    pub fn is_complete(&self) -> bool {
        matches!(self, StageStatus::Succeeded | StageStatus::Skipped)
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outcome of a single adapter invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AttemptOutcome {
    Succeeded,
    Failed {
        kind: FailureKind,
        message: String,
        retryable: bool,
    },
}

impl From<&Failure> for AttemptOutcome {
    fn from(failure: &Failure) -> Self {
        AttemptOutcome::Failed {
            kind: failure.kind,
            message: failure.message.clone(),
            retryable: failure.retryable,
        }
    }
}

/// One recorded attempt of a stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptRecord {
    /// 1-based attempt number
    pub attempt: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    #[serde(flatten)]
    pub outcome: AttemptOutcome,
}

impl AttemptRecord {
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, AttemptOutcome::Succeeded)
    }
}

/// Persisted record of one stage within a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageRecord {
    pub name: StageName,
    #[serde(default)]
    pub status: StageStatus,
    #[serde(default)]
    pub attempts: Vec<AttemptRecord>,
    #[serde(default)]
    pub artifacts: Vec<ArtifactRef>,
    /// Set when an optional stage fell back to its default output
    #[serde(default)]
    pub degraded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl StageRecord {
    pub fn new(name: StageName) -> Self {
        Self {
            name,
            status: StageStatus::Pending,
            attempts: Vec::new(),
            artifacts: Vec::new(),
            degraded: false,
            started_at: None,
            finished_at: None,
        }
    }

    /// Number of attempts recorded so far.
    pub fn attempt_count(&self) -> u32 {
        self.attempts.len() as u32
    }
}

/// Success payload of a stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct StageOutput {
    pub artifacts: Vec<ArtifactRef>,
    pub degraded: bool,
}

impl StageOutput {
    pub fn new(artifacts: Vec<ArtifactRef>) -> Self {
        Self {
            artifacts,
            degraded: false,
        }
    }

    pub fn degraded(artifacts: Vec<ArtifactRef>) -> Self {
        Self {
            artifacts,
            degraded: true,
        }
    }
}

/// Result of executing one stage.
pub type StageResult = Result<StageOutput, Failure>;
