//! Structured run logging.
//!
//! Keeps run lifecycle lines uniform: every line carries the run id and,
//! where relevant, the stage.

use reel_models::{FailureReason, RunId, StageName};
use tracing::{error, info, warn, Span};

/// Logger bound to one pipeline run.
#[derive(Debug, Clone)]
pub struct RunLogger {
    run_id: String,
}

impl RunLogger {
    pub fn new(run_id: &RunId) -> Self {
        Self {
            run_id: run_id.to_string(),
        }
    }

    pub fn log_start(&self, message: &str) {
        info!(run_id = %self.run_id, "Run started: {}", message);
    }

    pub fn log_stage_start(&self, stage: StageName) {
        info!(run_id = %self.run_id, stage = %stage, "Stage started");
    }

    pub fn log_stage_complete(&self, stage: StageName, artifacts: usize, degraded: bool) {
        if degraded {
            warn!(run_id = %self.run_id, stage = %stage, artifacts, "Stage degraded");
        } else {
            info!(run_id = %self.run_id, stage = %stage, artifacts, "Stage succeeded");
        }
    }

    pub fn log_warning(&self, message: &str) {
        warn!(run_id = %self.run_id, "Run warning: {}", message);
    }

    pub fn log_failure(&self, reason: &FailureReason) {
        error!(
            run_id = %self.run_id,
            stage = %reason.stage,
            kind = %reason.kind,
            attempt = reason.attempt,
            "Run failed: {}", reason.message
        );
    }

    pub fn log_completion(&self, message: &str) {
        info!(run_id = %self.run_id, "Run completed: {}", message);
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Span for everything that happens inside this run.
    pub fn create_span(&self) -> Span {
        tracing::info_span!("run", run_id = %self.run_id)
    }
}
