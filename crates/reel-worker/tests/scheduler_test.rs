//! Scheduler behavior across triggers, restarts and quota failures.

mod common;

use common::*;
use reel_adapters::{AdapterError, NarrationRequest};
use reel_models::{FailureKind, PublishReceipt, RunStatus, StageName};
use reel_storage::Retention;
use reel_worker::{Pipeline, ResumePolicy, Scheduler, SchedulerSettings, SchedulerState};
use std::sync::Arc;
use std::time::Duration;

fn scheduler_settings() -> SchedulerSettings {
    SchedulerSettings {
        cadence: Duration::from_secs(3600),
        max_concurrent_runs: 1,
        resume_policy: ResumePolicy::Resume,
        requeue_quota_failures: true,
        shutdown_timeout: Duration::from_secs(60),
    }
}

fn scheduler(harness: &Harness, pipeline: Pipeline, settings: SchedulerSettings) -> Scheduler {
    Scheduler::new(Arc::new(pipeline), settings, request(), harness.shutdown.subscribe())
}

#[tokio::test(start_paused = true)]
async fn test_failed_run_does_not_affect_next_trigger() {
    let harness = Harness::new(Retention::Keep).await;
    let mut fakes = Fakes::happy();
    fakes.narration = Fake::new("elevenlabs", |n, req: &NarrationRequest| {
        if n == 1 {
            Err(AdapterError::from_http_status(404, "voice_not_found"))
        } else {
            Ok(narration(&req.text))
        }
    });
    let pipeline = harness.pipeline(&fakes, settings());
    let mut scheduler = scheduler(&harness, pipeline, scheduler_settings());

    let report = scheduler.run(Some(2)).await.unwrap();
    assert_eq!(report.triggers, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(report.published, 1);
    assert_eq!(report.errors, 0);

    let runs = harness.store.list_runs().await.unwrap();
    assert_eq!(runs.len(), 2);
    let failed = runs.iter().find(|r| r.status == RunStatus::Failed).unwrap();
    let reason = failed.failure.as_ref().unwrap();
    assert_eq!(reason.stage, StageName::Narrate);
    assert_eq!(reason.code(), "narrate:invalid_request");
    assert!(runs.iter().any(|r| r.status == RunStatus::Published));
}

#[tokio::test(start_paused = true)]
async fn test_triggers_wait_for_cadence() {
    let harness = Harness::new(Retention::Delete).await;
    let fakes = Fakes::happy();
    let mut scheduler = scheduler(&harness, harness.pipeline(&fakes, settings()), scheduler_settings());

    let started = tokio::time::Instant::now();
    let report = scheduler.run(Some(3)).await.unwrap();
    assert_eq!(report.published, 3);
    // The first trigger fires immediately, the others one cadence apart.
    assert!(started.elapsed() >= Duration::from_secs(2 * 3600));
    assert!(started.elapsed() < Duration::from_secs(3 * 3600));
}

#[tokio::test(start_paused = true)]
async fn test_scheduler_state_is_persisted() {
    let harness = Harness::new(Retention::Delete).await;
    let fakes = Fakes::happy();
    let mut scheduler = scheduler(&harness, harness.pipeline(&fakes, settings()), scheduler_settings());
    scheduler.run(Some(1)).await.unwrap();

    let saved: SchedulerState = harness.store.load_scheduler_state().await.unwrap().unwrap();
    assert!(saved.next_trigger_at.is_some());
    assert!(saved.active_runs.is_empty());
    assert!(harness.store.root().join("scheduler.json").exists());
}

#[tokio::test(start_paused = true)]
async fn test_pending_trigger_is_not_fired_early_after_restart() {
    let harness = Harness::new(Retention::Delete).await;
    let fakes = Fakes::happy();

    let mut first = scheduler(&harness, harness.pipeline(&fakes, settings()), scheduler_settings());
    first.run(Some(1)).await.unwrap();

    // A restart right away waits out the rest of the cadence.
    let mut second = scheduler(&harness, harness.pipeline(&fakes, settings()), scheduler_settings());
    let started = tokio::time::Instant::now();
    second.run(Some(1)).await.unwrap();
    assert!(started.elapsed() >= Duration::from_secs(3500));
    assert_eq!(fakes.upload.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_quota_failure_is_requeued_on_next_trigger() {
    let harness = Harness::new(Retention::Keep).await;
    let mut fakes = Fakes::happy();
    fakes.upload = Fake::new("youtube", |n, _| {
        if n == 1 {
            Err(AdapterError::from_http_status(403, r#"{"error":{"errors":[{"reason":"uploadLimitExceeded"}]}}"#))
        } else {
            Ok(PublishReceipt::new(format!("vid{}", n)))
        }
    });
    let pipeline = harness.pipeline(&fakes, settings());
    let mut scheduler = scheduler(&harness, pipeline, scheduler_settings());

    let report = scheduler.run(Some(2)).await.unwrap();
    assert_eq!(report.failed, 1);
    assert_eq!(report.published, 2);
    assert_eq!(fakes.upload.calls(), 3);
    // The requeued run resumed at upload; its script was not regenerated.
    assert_eq!(fakes.script.calls(), 2);

    let runs = harness.store.list_runs().await.unwrap();
    assert!(runs.iter().all(|r| r.status == RunStatus::Published));
    let attempts: Vec<u32> = runs.iter().map(|r| r.stage(StageName::Upload).attempt_count()).collect();
    assert!(attempts.contains(&2));
    assert!(attempts.contains(&1));
}

#[tokio::test(start_paused = true)]
async fn test_quota_requeue_can_be_disabled() {
    let harness = Harness::new(Retention::Keep).await;
    let mut fakes = Fakes::happy();
    fakes.upload = Fake::new("youtube", |n, _| {
        if n == 1 {
            Err(AdapterError::QuotaExhausted("daily upload limit".into()))
        } else {
            Ok(PublishReceipt::new(format!("vid{}", n)))
        }
    });
    let mut scheduler = scheduler(
        &harness,
        harness.pipeline(&fakes, settings()),
        SchedulerSettings {
            requeue_quota_failures: false,
            ..scheduler_settings()
        },
    );

    let report = scheduler.run(Some(2)).await.unwrap();
    assert_eq!(report.failed, 1);
    assert_eq!(report.published, 1);
    let runs = harness.store.list_runs().await.unwrap();
    let failed = runs.iter().find(|r| r.status == RunStatus::Failed).unwrap();
    assert_eq!(failed.failure.as_ref().map(|f| f.kind), Some(FailureKind::QuotaExhausted));
}

#[tokio::test(start_paused = true)]
async fn test_interrupted_run_is_resumed_on_startup() {
    let harness = Harness::new(Retention::Keep).await;
    let fakes = Fakes::happy();
    let pipeline = harness.pipeline(&fakes, settings());
    let left_behind = pipeline.create(request()).await.unwrap();

    let mut scheduler = scheduler(&harness, pipeline, scheduler_settings());
    let report = scheduler.run(Some(1)).await.unwrap();
    assert_eq!(report.published, 2);

    let state = harness.store.load_state(&left_behind.id).await.unwrap();
    assert_eq!(state.status, RunStatus::Published);
}

#[tokio::test(start_paused = true)]
async fn test_discard_policy_abandons_interrupted_runs() {
    let harness = Harness::new(Retention::Keep).await;
    let fakes = Fakes::happy();
    let pipeline = harness.pipeline(&fakes, settings());
    let left_behind = pipeline.create(request()).await.unwrap();

    let mut scheduler = scheduler(
        &harness,
        pipeline,
        SchedulerSettings {
            resume_policy: ResumePolicy::Discard,
            ..scheduler_settings()
        },
    );
    let report = scheduler.run(Some(0)).await.unwrap();
    assert_eq!(report.triggers, 0);

    let state = harness.store.load_state(&left_behind.id).await.unwrap();
    assert_eq!(state.status, RunStatus::Failed);
    assert_eq!(state.failure.map(|f| f.kind), Some(FailureKind::Abandoned));
    assert_eq!(fakes.subject.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_leaves_runs_resumable() {
    let harness = Harness::new(Retention::Keep).await;
    let shutdown = Arc::clone(&harness.shutdown);
    let mut fakes = Fakes::happy();
    fakes.script = Fake::new("openai", move |_, _| {
        let _ = shutdown.send(true);
        Ok(draft(SCRIPT))
    });
    let mut scheduler = scheduler(&harness, harness.pipeline(&fakes, settings()), scheduler_settings());

    let report = scheduler.run(None).await.unwrap();
    assert_eq!(report.triggers, 1);
    assert_eq!(report.interrupted, 1);

    let incomplete = harness.store.list_incomplete().await.unwrap();
    assert_eq!(incomplete.len(), 1);
    assert_eq!(incomplete[0].next_stage(), Some(StageName::Narrate));
}
