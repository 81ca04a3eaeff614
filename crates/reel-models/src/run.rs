//! Pipeline run definitions: identity, request and persisted state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;
use validator::{Validate, ValidationError};

use crate::{
    ArtifactKind, ArtifactRef, AttemptRecord, Failure, FailureKind, FailureReason, StageName,
    StageOutput, StageRecord, StageStatus,
};

/// Unique, sortable run identifier derived from the creation time.
///
/// Format: `20261015T080000123Z-1a2b3c4d`. Lexical order matches
/// creation order for ids generated in different milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub String);

impl RunId {
    /// Generate a new id for the current instant.
    pub fn generate() -> Self {
        Self::at(Utc::now())
    }

    /// Generate an id for a given instant.
    pub fn at(time: DateTime<Utc>) -> Self {
        let suffix = Uuid::new_v4().simple().to_string();
        Self(format!(
            "{}-{}",
            time.format("%Y%m%dT%H%M%S%3fZ"),
            &suffix[..8]
        ))
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Visibility of the published video.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PrivacyStatus {
    #[default]
    Public,
    Unlisted,
    Private,
}

impl PrivacyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PrivacyStatus::Public => "public",
            PrivacyStatus::Unlisted => "unlisted",
            PrivacyStatus::Private => "private",
        }
    }
}

impl FromStr for PrivacyStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "public" => Ok(PrivacyStatus::Public),
            "unlisted" => Ok(PrivacyStatus::Unlisted),
            "private" => Ok(PrivacyStatus::Private),
            other => Err(format!("unknown privacy status: {}", other)),
        }
    }
}

/// Immutable input to a pipeline run, created by the scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[validate(schema(function = "validate_word_range"))]
pub struct RunRequest {
    /// Subject hint, e.g. "trending" or a trending window ("day", "week")
    #[validate(length(min = 1))]
    pub subject_hint: String,

    /// Lower bound of the script length in words
    #[validate(range(min = 50))]
    pub min_words: u32,

    /// Upper bound of the script length in words
    #[validate(range(max = 20000))]
    pub max_words: u32,

    /// Narration voice identifier
    #[validate(length(min = 1))]
    pub voice_id: String,

    /// Desired publish time, if the platform should schedule the release
    #[serde(skip_serializing_if = "Option::is_none")]
    pub publish_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub privacy_status: PrivacyStatus,
}

fn validate_word_range(request: &RunRequest) -> Result<(), ValidationError> {
    if request.min_words > request.max_words {
        return Err(ValidationError::new("min_words_exceeds_max_words"));
    }
    Ok(())
}

impl RunRequest {
    pub fn new(subject_hint: impl Into<String>, voice_id: impl Into<String>) -> Self {
        Self {
            subject_hint: subject_hint.into(),
            min_words: 1500,
            max_words: 2500,
            voice_id: voice_id.into(),
            publish_at: None,
            privacy_status: PrivacyStatus::Public,
        }
    }

    pub fn with_word_range(mut self, min_words: u32, max_words: u32) -> Self {
        self.min_words = min_words;
        self.max_words = max_words;
        self
    }

    pub fn with_privacy(mut self, privacy_status: PrivacyStatus) -> Self {
        self.privacy_status = privacy_status;
        self
    }

    pub fn with_publish_at(mut self, publish_at: DateTime<Utc>) -> Self {
        self.publish_at = Some(publish_at);
        self
    }
}

/// Phase of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    #[default]
    Created,
    Scraping,
    Scripting,
    Narrating,
    Captioning,
    CollectingVisuals,
    Composing,
    Uploading,
    Published,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Created => "created",
            RunStatus::Scraping => "scraping",
            RunStatus::Scripting => "scripting",
            RunStatus::Narrating => "narrating",
            RunStatus::Captioning => "captioning",
            RunStatus::CollectingVisuals => "collecting_visuals",
            RunStatus::Composing => "composing",
            RunStatus::Uploading => "uploading",
            RunStatus::Published => "published",
            RunStatus::Failed => "failed",
        }
    }

    /// Check if this is a terminal state (no more updates expected).
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Published | RunStatus::Failed)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Mutable record of one pipeline run, persisted after every transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunState {
    pub id: RunId,
    pub request: RunRequest,
    pub status: RunStatus,
    /// Index into [`StageName::ALL`] of the stage last entered
    pub current_stage: usize,
    pub stages: Vec<StageRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub published_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RunState {
    /// Create a fresh state with every stage pending.
    pub fn new(id: RunId, request: RunRequest) -> Self {
        let now = Utc::now();
        Self {
            id,
            request,
            status: RunStatus::Created,
            current_stage: 0,
            stages: StageName::ALL.iter().map(|s| StageRecord::new(*s)).collect(),
            failure: None,
            published_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn stage(&self, name: StageName) -> &StageRecord {
        &self.stages[name.index()]
    }

    pub fn stage_mut(&mut self, name: StageName) -> &mut StageRecord {
        &mut self.stages[name.index()]
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// First stage whose output is not yet available.
    pub fn next_stage(&self) -> Option<StageName> {
        self.stages
            .iter()
            .find(|record| !record.status.is_complete())
            .map(|record| record.name)
    }

    /// Enter a stage: the run moves to the stage's phase.
    pub fn begin_stage(&mut self, name: StageName) {
        let now = Utc::now();
        self.status = name.phase();
        self.current_stage = name.index();
        let record = self.stage_mut(name);
        record.status = StageStatus::Running;
        record.started_at.get_or_insert(now);
        self.updated_at = now;
    }

    /// Append an attempt record to a stage.
    pub fn record_attempt(&mut self, name: StageName, attempt: AttemptRecord) {
        self.stage_mut(name).attempts.push(attempt);
        self.updated_at = Utc::now();
    }

    /// Mark a stage complete with its artifacts.
    pub fn complete_stage(&mut self, name: StageName, output: StageOutput) {
        let now = Utc::now();
        let record = self.stage_mut(name);
        record.status = if output.degraded {
            StageStatus::Skipped
        } else {
            StageStatus::Succeeded
        };
        record.degraded = output.degraded;
        record.artifacts = output.artifacts;
        record.finished_at = Some(now);
        self.updated_at = now;
    }

    /// Fail a stage and move the run to its terminal failed state.
    pub fn fail_stage(&mut self, name: StageName, failure: &Failure) {
        let now = Utc::now();
        let record = self.stage_mut(name);
        record.status = StageStatus::Failed;
        record.finished_at = Some(now);
        let attempt = record.attempt_count().max(1);
        self.failure = Some(FailureReason::new(name, failure, attempt));
        self.status = RunStatus::Failed;
        self.updated_at = now;
    }

    /// Mark the run published.
    pub fn mark_published(&mut self, published_id: impl Into<String>) {
        self.published_id = Some(published_id.into());
        self.status = RunStatus::Published;
        self.updated_at = Utc::now();
    }

    /// Discard an interrupted run.
    pub fn abandon(&mut self, message: impl Into<String>) {
        let stage = self.next_stage().unwrap_or(StageName::Upload);
        let failure = Failure::new(FailureKind::Abandoned, message);
        self.fail_stage(stage, &failure);
    }

    /// Prepare an interrupted, non-terminal run for resumption.
    ///
    /// A stage left `Running` lost its in-flight attempt and goes back to
    /// `Pending`. Completed stages are untouched.
    pub fn reset_interrupted(&mut self) {
        for record in &mut self.stages {
            if record.status == StageStatus::Running {
                record.status = StageStatus::Pending;
            }
        }
        if let Some(stage) = self.next_stage() {
            if self.status != RunStatus::Created {
                self.status = stage.phase();
            }
        }
        self.updated_at = Utc::now();
    }

    /// Reopen a run that failed only because a quota was exhausted.
    ///
    /// Returns the stage that will be retried, or `None` if the run is not
    /// eligible.
    pub fn reopen_after_quota(&mut self) -> Option<StageName> {
        let reason = self.failure.as_ref()?;
        if self.status != RunStatus::Failed || reason.kind != FailureKind::QuotaExhausted {
            return None;
        }
        let stage = reason.stage;
        let record = self.stage_mut(stage);
        record.status = StageStatus::Pending;
        record.finished_at = None;
        self.failure = None;
        self.status = stage.phase();
        self.updated_at = Utc::now();
        Some(stage)
    }

    /// Find the first artifact of a given kind across all stages.
    pub fn artifact(&self, kind: ArtifactKind) -> Option<&ArtifactRef> {
        self.artifacts().find(|a| a.kind == kind)
    }

    /// All artifacts produced so far, in stage order.
    pub fn artifacts(&self) -> impl Iterator<Item = &ArtifactRef> {
        self.stages.iter().flat_map(|record| record.artifacts.iter())
    }

    /// Machine-readable failure reason, if the run failed.
    pub fn failure_code(&self) -> Option<String> {
        self.failure.as_ref().map(|f| f.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::AttemptOutcome;

    fn request() -> RunRequest {
        RunRequest::new("trending", "voice-1")
    }

    #[test]
    fn test_run_id_is_sortable() {
        let earlier = RunId::at("2026-10-15T08:00:00Z".parse().unwrap());
        let later = RunId::at("2026-10-15T16:00:00Z".parse().unwrap());
        assert!(earlier < later);
        assert!(earlier.as_str().starts_with("20261015T080000000Z-"));
    }

    #[test]
    fn test_request_validation() {
        assert!(request().validate().is_ok());
        assert!(request().with_word_range(3000, 2000).validate().is_err());

        let mut empty_voice = request();
        empty_voice.voice_id.clear();
        assert!(empty_voice.validate().is_err());
    }

    #[test]
    fn test_next_stage_progression() {
        let mut state = RunState::new(RunId::generate(), request());
        assert_eq!(state.next_stage(), Some(StageName::Scrape));

        state.begin_stage(StageName::Scrape);
        assert_eq!(state.status, RunStatus::Scraping);
        state.complete_stage(StageName::Scrape, StageOutput::default());
        assert_eq!(state.next_stage(), Some(StageName::Script));

        state.begin_stage(StageName::Script);
        state.complete_stage(StageName::Script, StageOutput::default());
        state.begin_stage(StageName::Narrate);
        state.complete_stage(StageName::Narrate, StageOutput::default());
        state.begin_stage(StageName::Caption);
        state.complete_stage(StageName::Caption, StageOutput::default());
        state.begin_stage(StageName::CollectVisuals);
        state.complete_stage(StageName::CollectVisuals, StageOutput::degraded(vec![]));
        assert_eq!(
            state.stage(StageName::CollectVisuals).status,
            StageStatus::Skipped
        );
        assert_eq!(state.next_stage(), Some(StageName::Compose));
    }

    #[test]
    fn test_fail_stage_records_reason() {
        let mut state = RunState::new(RunId::generate(), request());
        state.begin_stage(StageName::Scrape);
        state.record_attempt(
            StageName::Scrape,
            AttemptRecord {
                attempt: 1,
                started_at: Utc::now(),
                finished_at: Utc::now(),
                outcome: AttemptOutcome::Succeeded,
            },
        );
        state.fail_stage(
            StageName::Scrape,
            &Failure::new(FailureKind::InvalidCredential, "401"),
        );

        assert!(state.is_terminal());
        assert_eq!(state.status, RunStatus::Failed);
        let reason = state.failure.as_ref().unwrap();
        assert_eq!(reason.code(), "scrape:invalid_credential");
        assert_eq!(reason.attempt, 1);
    }

    #[test]
    fn test_reset_interrupted_keeps_completed_stages() {
        let mut state = RunState::new(RunId::generate(), request());
        state.begin_stage(StageName::Scrape);
        state.complete_stage(StageName::Scrape, StageOutput::default());
        state.begin_stage(StageName::Script);

        state.reset_interrupted();
        assert_eq!(state.stage(StageName::Scrape).status, StageStatus::Succeeded);
        assert_eq!(state.stage(StageName::Script).status, StageStatus::Pending);
        assert_eq!(state.status, RunStatus::Scripting);
        assert!(!state.is_terminal());
    }

    #[test]
    fn test_reopen_after_quota_only_for_quota_failures() {
        let mut state = RunState::new(RunId::generate(), request());
        state.begin_stage(StageName::Scrape);
        state.fail_stage(StageName::Scrape, &Failure::malformed("empty"));
        assert_eq!(state.reopen_after_quota(), None);

        let mut state = RunState::new(RunId::generate(), request());
        state.begin_stage(StageName::Upload);
        state.fail_stage(
            StageName::Upload,
            &Failure::new(FailureKind::QuotaExhausted, "quotaExceeded"),
        );
        assert_eq!(state.reopen_after_quota(), Some(StageName::Upload));
        assert_eq!(state.status, RunStatus::Uploading);
        assert!(state.failure.is_none());
    }

    #[test]
    fn test_state_roundtrips_through_json() {
        let state = RunState::new(RunId::generate(), request());
        let json = serde_json::to_string(&state).unwrap();
        let back: RunState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, state);
    }
}
