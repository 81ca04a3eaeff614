//! Worker configuration.

use reel_models::{PrivacyStatus, RunRequest};
use reel_storage::Retention;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{WorkerError, WorkerResult};
use crate::stage::{BackoffPolicy, StagePolicy};

/// Voice used when `DEFAULT_VOICE_ID` is unset.
pub const FALLBACK_VOICE_ID: &str = "EXAVITQu4vr4xnSDxMaL";

/// What to do with non-terminal runs found at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResumePolicy {
    /// Continue from the first stage that has not completed
    #[default]
    Resume,
    /// Mark the run failed as abandoned
    Discard,
}

impl FromStr for ResumePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "resume" => Ok(Self::Resume),
            "discard" => Ok(Self::Discard),
            other => Err(format!("unknown resume policy: {}", other)),
        }
    }
}

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Root of the run store
    pub work_dir: PathBuf,
    /// Time between scheduled triggers
    pub cadence: Duration,
    /// Runs allowed in flight at once
    pub max_concurrent_runs: usize,
    pub retention: Retention,
    pub resume_policy: ResumePolicy,
    /// Retry quota-failed runs on later triggers
    pub requeue_quota_failures: bool,
    /// Retry policy for API-bound stages
    pub stage_policy: StagePolicy,
    /// Per-attempt timeout for compositing and upload
    pub long_call_timeout: Duration,
    pub caption_max_chars: usize,
    pub caption_max_duration_ms: u64,
    pub caption_pause_break_ms: Option<u64>,
    pub min_words: u32,
    pub max_words: u32,
    pub voice_id: String,
    pub privacy_status: PrivacyStatus,
    /// Assets used when visual search comes back empty
    pub fallback_assets_dir: Option<PathBuf>,
    /// Assets kept per search keyword
    pub visuals_per_keyword: usize,
    pub max_visual_assets: usize,
    /// Graceful shutdown timeout
    pub shutdown_timeout: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from("/tmp/reelsmith"),
            cadence: Duration::from_secs(8 * 3600),
            max_concurrent_runs: 1,
            retention: Retention::Delete,
            resume_policy: ResumePolicy::Resume,
            requeue_quota_failures: true,
            stage_policy: StagePolicy::default(),
            long_call_timeout: Duration::from_secs(3600),
            caption_max_chars: 120,
            caption_max_duration_ms: 5_000,
            caption_pause_break_ms: None,
            min_words: 1500,
            max_words: 2500,
            voice_id: FALLBACK_VOICE_ID.to_string(),
            privacy_status: PrivacyStatus::Public,
            fallback_assets_dir: None,
            visuals_per_keyword: 2,
            max_visual_assets: 12,
            shutdown_timeout: Duration::from_secs(120),
        }
    }
}

fn parsed<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    ///
    /// Unset or unparseable numeric keys fall back to defaults; enum keys
    /// with unknown values are an error.
    pub fn from_env() -> WorkerResult<Self> {
        let defaults = Self::default();
        let backoff = BackoffPolicy {
            base: Duration::from_millis(
                parsed("REEL_BACKOFF_BASE_MS").unwrap_or(defaults.stage_policy.backoff.base.as_millis() as u64),
            ),
            multiplier: parsed("REEL_BACKOFF_MULTIPLIER").unwrap_or(defaults.stage_policy.backoff.multiplier),
            cap: Duration::from_millis(
                parsed("REEL_BACKOFF_CAP_MS").unwrap_or(defaults.stage_policy.backoff.cap.as_millis() as u64),
            ),
        };
        let stage_policy = StagePolicy {
            max_attempts: parsed("REEL_STAGE_MAX_ATTEMPTS")
                .unwrap_or(defaults.stage_policy.max_attempts)
                .max(1),
            backoff,
            call_timeout: Duration::from_secs(
                parsed("REEL_CALL_TIMEOUT_SECS").unwrap_or(defaults.stage_policy.call_timeout.as_secs()),
            ),
        };

        let retention = match std::env::var("REEL_RETENTION") {
            Ok(v) => v.parse().map_err(|e| WorkerError::config_error(format!("{}", e)))?,
            Err(_) => defaults.retention,
        };
        let resume_policy = match std::env::var("REEL_RESUME_POLICY") {
            Ok(v) => v.parse().map_err(WorkerError::config_error)?,
            Err(_) => defaults.resume_policy,
        };
        let privacy_status = match std::env::var("REEL_PRIVACY_STATUS") {
            Ok(v) => v.parse().map_err(WorkerError::config_error)?,
            Err(_) => defaults.privacy_status,
        };

        let config = Self {
            work_dir: std::env::var("REEL_WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.work_dir),
            cadence: Duration::from_secs(
                parsed::<u64>("REEL_CADENCE_HOURS").unwrap_or(8).max(1) * 3600,
            ),
            max_concurrent_runs: parsed("REEL_MAX_CONCURRENT_RUNS")
                .unwrap_or(defaults.max_concurrent_runs)
                .max(1),
            retention,
            resume_policy,
            requeue_quota_failures: std::env::var("REEL_REQUEUE_QUOTA_FAILURES")
                .ok()
                .and_then(|v| parse_bool(&v))
                .unwrap_or(defaults.requeue_quota_failures),
            stage_policy,
            long_call_timeout: Duration::from_secs(
                parsed("REEL_LONG_CALL_TIMEOUT_SECS").unwrap_or(defaults.long_call_timeout.as_secs()),
            ),
            caption_max_chars: parsed("REEL_CAPTION_MAX_CHARS").unwrap_or(defaults.caption_max_chars),
            caption_max_duration_ms: parsed("REEL_CAPTION_MAX_DURATION_MS")
                .unwrap_or(defaults.caption_max_duration_ms),
            caption_pause_break_ms: parsed("REEL_CAPTION_PAUSE_BREAK_MS"),
            min_words: parsed("REEL_MIN_WORDS").unwrap_or(defaults.min_words),
            max_words: parsed("REEL_MAX_WORDS").unwrap_or(defaults.max_words),
            voice_id: std::env::var("DEFAULT_VOICE_ID")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or(defaults.voice_id),
            privacy_status,
            fallback_assets_dir: std::env::var("REEL_FALLBACK_ASSETS_DIR")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from),
            visuals_per_keyword: parsed("REEL_VISUALS_PER_KEYWORD").unwrap_or(defaults.visuals_per_keyword),
            max_visual_assets: parsed("REEL_MAX_VISUAL_ASSETS").unwrap_or(defaults.max_visual_assets),
            shutdown_timeout: Duration::from_secs(
                parsed("REEL_SHUTDOWN_TIMEOUT_SECS").unwrap_or(defaults.shutdown_timeout.as_secs()),
            ),
        };
        Ok(config)
    }

    /// Policy for the compositing and upload stages.
    pub fn long_stage_policy(&self) -> StagePolicy {
        StagePolicy {
            call_timeout: self.long_call_timeout,
            ..self.stage_policy.clone()
        }
    }

    /// The request each scheduled trigger starts a run with.
    pub fn run_request(&self) -> RunRequest {
        RunRequest::new("trending", self.voice_id.clone())
            .with_word_range(self.min_words, self.max_words)
            .with_privacy(self.privacy_status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use validator::Validate;

    #[test]
    fn test_defaults() {
        let config = WorkerConfig::default();
        assert_eq!(config.cadence, Duration::from_secs(8 * 3600));
        assert_eq!(config.max_concurrent_runs, 1);
        assert_eq!(config.stage_policy.max_attempts, 3);
        assert!(config.requeue_quota_failures);
        assert!(config.run_request().validate().is_ok());
    }

    #[test]
    fn test_resume_policy_parse() {
        assert_eq!("Discard".parse::<ResumePolicy>(), Ok(ResumePolicy::Discard));
        assert!("later".parse::<ResumePolicy>().is_err());
    }

    #[test]
    fn test_parse_bool() {
        assert_eq!(parse_bool("on"), Some(true));
        assert_eq!(parse_bool("0"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }

    #[test]
    fn test_long_stage_policy_keeps_backoff() {
        let config = WorkerConfig::default();
        let long = config.long_stage_policy();
        assert_eq!(long.call_timeout, config.long_call_timeout);
        assert_eq!(long.max_attempts, config.stage_policy.max_attempts);
    }
}
