//! Scheduled pipeline worker.
//!
//! This crate provides:
//! - The stage retry wrapper
//! - The pipeline run state machine and its stages
//! - The scheduler with bounded concurrency and resumable state
//! - Adapter health probes
//! - Structured run logging and metrics

pub mod config;
pub mod error;
pub mod health;
pub mod keywords;
pub mod logging;
pub mod metrics;
pub mod pipeline;
pub mod scheduler;
pub mod stage;

pub use config::{ResumePolicy, WorkerConfig};
pub use error::{WorkerError, WorkerResult};
pub use health::{ProbeReport, ProbeStatus};
pub use logging::RunLogger;
pub use pipeline::{Adapters, Pipeline, PipelineSettings, RunOutcome};
pub use scheduler::{Scheduler, SchedulerReport, SchedulerSettings, SchedulerState};
pub use stage::{AttemptContext, BackoffPolicy, StagePolicy};
