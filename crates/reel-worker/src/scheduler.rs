//! Run scheduler.
//!
//! Starts a run every `cadence`, keeps at most `max_concurrent_runs` in
//! flight and persists its own small state next to the runs so that a
//! restart neither loses nor replays triggers.

use chrono::{DateTime, Utc};
use reel_models::{FailureKind, RunId, RunRequest, RunState, StageName};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::{ResumePolicy, WorkerConfig};
use crate::error::{WorkerError, WorkerResult};
use crate::metrics::names;
use crate::pipeline::{Pipeline, RunOutcome};

/// Quota failures a single run may be requeued after.
pub const MAX_QUOTA_REQUEUES: usize = 3;

/// Scheduler state persisted as `scheduler.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchedulerState {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_trigger_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub active_runs: Vec<RunId>,
}

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub cadence: Duration,
    pub max_concurrent_runs: usize,
    pub resume_policy: ResumePolicy,
    pub requeue_quota_failures: bool,
    /// How long in-flight runs may take to reach a stage boundary on shutdown
    pub shutdown_timeout: Duration,
}

impl SchedulerSettings {
    pub fn from_config(config: &WorkerConfig) -> Self {
        Self {
            cadence: config.cadence,
            max_concurrent_runs: config.max_concurrent_runs.max(1),
            resume_policy: config.resume_policy,
            requeue_quota_failures: config.requeue_quota_failures,
            shutdown_timeout: config.shutdown_timeout,
        }
    }
}

/// Counts of what happened during one scheduler session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulerReport {
    pub triggers: u32,
    pub published: u32,
    pub failed: u32,
    pub interrupted: u32,
    /// Runs that stopped on a worker error (storage, bookkeeping)
    pub errors: u32,
}

enum RunTask {
    Fresh(RunState),
    Resume(RunId),
    Requeue(RunId),
}

type Joined = (RunId, WorkerResult<Option<RunOutcome>>);

pub struct Scheduler {
    pipeline: Arc<Pipeline>,
    settings: SchedulerSettings,
    request: RunRequest,
    semaphore: Arc<Semaphore>,
    shutdown: watch::Receiver<bool>,
    state: SchedulerState,
}

impl Scheduler {
    /// `request` is the template every triggered run starts from.
    pub fn new(
        pipeline: Arc<Pipeline>,
        settings: SchedulerSettings,
        request: RunRequest,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let semaphore = Arc::new(Semaphore::new(settings.max_concurrent_runs));
        Self {
            pipeline,
            settings,
            request,
            semaphore,
            shutdown,
            state: SchedulerState::default(),
        }
    }

    pub fn state(&self) -> &SchedulerState {
        &self.state
    }

    /// Trigger forever, until shutdown.
    pub async fn run_forever(&mut self) -> WorkerResult<SchedulerReport> {
        self.run(None).await
    }

    /// Trigger until `max_triggers` runs have been started (or forever when
    /// `None`), then wait for the started runs to finish.
    pub async fn run(&mut self, max_triggers: Option<u32>) -> WorkerResult<SchedulerReport> {
        info!(
            cadence_secs = self.settings.cadence.as_secs(),
            max_concurrent_runs = self.settings.max_concurrent_runs,
            "Starting scheduler"
        );

        let mut report = SchedulerReport::default();
        let mut tasks: JoinSet<Joined> = JoinSet::new();

        self.state = self
            .pipeline
            .store()
            .load_scheduler_state()
            .await?
            .unwrap_or_default();
        self.state.active_runs.clear();
        self.recover(&mut tasks).await?;

        let mut deadline = self.first_deadline();
        let mut shutdown = self.shutdown.clone();
        let mut shutdown_open = true;

        loop {
            if max_triggers.is_some_and(|max| report.triggers >= max) {
                break;
            }
            if *shutdown.borrow() {
                info!("Shutdown signal received, stopping scheduler");
                break;
            }

            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => {
                    report.triggers += 1;
                    if let Err(e) = self.trigger(&mut tasks).await {
                        error!(error = %e, "Trigger failed");
                    }
                    deadline = Instant::now() + self.settings.cadence;
                    self.state.next_trigger_at = chrono::Duration::from_std(self.settings.cadence)
                        .ok()
                        .map(|cadence| Utc::now() + cadence);
                    self.persist().await;
                }
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    self.on_joined(joined, &mut report).await;
                }
                changed = shutdown.changed(), if shutdown_open => {
                    if changed.is_err() {
                        shutdown_open = false;
                    }
                }
            }
        }

        self.drain(&mut tasks, &mut report).await;
        info!(?report, "Scheduler stopped");
        Ok(report)
    }

    /// A persisted trigger time in the past fires once, immediately.
    fn first_deadline(&self) -> Instant {
        let delay = self
            .state
            .next_trigger_at
            .and_then(|at| (at - Utc::now()).to_std().ok())
            .unwrap_or(Duration::ZERO);
        Instant::now() + delay
    }

    /// Pick up runs a previous process left mid-flight.
    async fn recover(&mut self, tasks: &mut JoinSet<Joined>) -> WorkerResult<()> {
        let incomplete = self.pipeline.store().list_incomplete().await?;
        if incomplete.is_empty() {
            return Ok(());
        }
        info!(count = incomplete.len(), policy = ?self.settings.resume_policy, "Found interrupted runs");

        for run in incomplete {
            match self.settings.resume_policy {
                ResumePolicy::Resume => self.spawn(tasks, RunTask::Resume(run.id)),
                ResumePolicy::Discard => {
                    if let Err(e) = self.pipeline.discard(&run.id).await {
                        warn!(run_id = %run.id, error = %e, "Failed to discard run");
                    }
                }
            }
        }
        self.persist().await;
        Ok(())
    }

    async fn trigger(&mut self, tasks: &mut JoinSet<Joined>) -> WorkerResult<()> {
        metrics::counter!(names::TRIGGERS_TOTAL).increment(1);

        if self.settings.requeue_quota_failures {
            for run in self.pipeline.store().list_failed().await? {
                if self.state.active_runs.contains(&run.id) || !requeue_eligible(&run) {
                    continue;
                }
                info!(run_id = %run.id, "Requeueing quota-failed run");
                self.spawn(tasks, RunTask::Requeue(run.id));
            }
        }

        let state = self.pipeline.create(self.request.clone()).await?;
        info!(run_id = %state.id, "Triggered run");
        self.spawn(tasks, RunTask::Fresh(state));
        Ok(())
    }

    /// Queue a run behind the concurrency bound; it starts once a permit
    /// frees up.
    fn spawn(&mut self, tasks: &mut JoinSet<Joined>, task: RunTask) {
        let run_id = match &task {
            RunTask::Fresh(state) => state.id.clone(),
            RunTask::Resume(id) | RunTask::Requeue(id) => id.clone(),
        };
        self.state.active_runs.push(run_id.clone());

        let pipeline = Arc::clone(&self.pipeline);
        let semaphore = Arc::clone(&self.semaphore);
        tasks.spawn(async move {
            let _permit = match semaphore.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    return (
                        run_id,
                        Err(WorkerError::internal("run semaphore closed")),
                    )
                }
            };
            debug!(run_id = %run_id, "Run acquired a slot");
            let result = match task {
                RunTask::Fresh(state) => pipeline.drive(state).await.map(Some),
                RunTask::Resume(id) => pipeline.resume(&id).await.map(Some),
                RunTask::Requeue(id) => pipeline.requeue(&id).await,
            };
            (run_id, result)
        });
    }

    async fn on_joined(
        &mut self,
        joined: Result<Joined, tokio::task::JoinError>,
        report: &mut SchedulerReport,
    ) {
        match joined {
            Ok((run_id, result)) => {
                self.state.active_runs.retain(|id| id != &run_id);
                match result {
                    Ok(Some(RunOutcome::Published { video_id })) => {
                        report.published += 1;
                        info!(run_id = %run_id, video_id = %video_id, "Run published");
                    }
                    Ok(Some(RunOutcome::Failed(reason))) => {
                        report.failed += 1;
                        warn!(run_id = %run_id, reason = %reason, "Run failed");
                    }
                    Ok(Some(RunOutcome::Interrupted)) => report.interrupted += 1,
                    Ok(None) => debug!(run_id = %run_id, "Run no longer eligible for requeue"),
                    Err(e) => {
                        report.errors += 1;
                        error!(run_id = %run_id, error = %e, "Run stopped on worker error");
                    }
                }
            }
            Err(e) => {
                report.errors += 1;
                error!(error = %e, "Run task panicked");
            }
        }
        self.persist().await;
    }

    /// Wait for in-flight runs. On shutdown the wait is bounded; runs still
    /// going after the timeout are aborted and stay resumable on disk.
    async fn drain(&mut self, tasks: &mut JoinSet<Joined>, report: &mut SchedulerReport) {
        if tasks.is_empty() {
            return;
        }
        info!(in_flight = tasks.len(), "Waiting for in-flight runs to complete...");

        let stopping = *self.shutdown.borrow();
        if !stopping {
            while let Some(joined) = tasks.join_next().await {
                self.on_joined(joined, report).await;
            }
            return;
        }

        let deadline = Instant::now() + self.settings.shutdown_timeout;
        loop {
            match tokio::time::timeout_at(deadline, tasks.join_next()).await {
                Ok(Some(joined)) => self.on_joined(joined, report).await,
                Ok(None) => break,
                Err(_) => {
                    warn!(remaining = tasks.len(), "Shutdown timeout reached, aborting runs");
                    tasks.shutdown().await;
                    break;
                }
            }
        }
    }

    async fn persist(&self) {
        if let Err(e) = self.pipeline.store().save_scheduler_state(&self.state).await {
            warn!(error = %e, "Failed to persist scheduler state");
        }
    }
}

/// Number of quota failures recorded for the stage a run failed in.
fn quota_failures(run: &RunState, stage: StageName) -> usize {
    run.stage(stage)
        .attempts
        .iter()
        .filter(|a| {
            matches!(
                &a.outcome,
                reel_models::AttemptOutcome::Failed { kind: FailureKind::QuotaExhausted, .. }
            )
        })
        .count()
}

fn requeue_eligible(run: &RunState) -> bool {
    match &run.failure {
        Some(reason) if reason.kind == FailureKind::QuotaExhausted => {
            quota_failures(run, reason.stage) <= MAX_QUOTA_REQUEUES
        }
        _ => false,
    }
}
