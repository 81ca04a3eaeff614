//! Stage execution with retry and exponential backoff.
//!
//! A stage wraps one adapter call. Each attempt runs under a timeout, is
//! recorded in the run state and persisted before the next decision is
//! made. Retryable failures back off and try again until the attempt
//! budget is spent; everything else fails the stage at once.

use chrono::Utc;
use reel_models::{AttemptOutcome, AttemptRecord, Failure, FailureKind, RunState, StageName};
use reel_storage::RunStore;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::metrics::names;

/// Exponential backoff: `min(base * multiplier^(attempt-1), cap)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub multiplier: f64,
    pub cap: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(2),
            multiplier: 2.0,
            cap: Duration::from_secs(60),
        }
    }
}

impl BackoffPolicy {
    /// Delay after the given failed attempt (1-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(63) as i32;
        let factor = self.multiplier.max(1.0).powi(exponent);
        let millis = self.base.as_millis() as f64 * factor;
        let cap = self.cap.as_millis() as f64;
        Duration::from_millis(millis.min(cap) as u64)
    }
}

/// Attempt budget, backoff and per-call timeout for one stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StagePolicy {
    pub max_attempts: u32,
    pub backoff: BackoffPolicy,
    pub call_timeout: Duration,
}

impl Default for StagePolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: BackoffPolicy::default(),
            call_timeout: Duration::from_secs(300),
        }
    }
}

impl StagePolicy {
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }
}

/// What an attempt knows about the ones before it.
#[derive(Debug, Clone, PartialEq)]
pub struct AttemptContext {
    /// 1-based attempt number within this execution
    pub attempt: u32,
    pub previous_failure: Option<Failure>,
}

/// Run `call` under `policy`, recording every attempt on `state`.
///
/// Returns the call's value, or the failure that ended the stage. A
/// retryable failure on the last attempt comes back marked fatal.
/// Content-policy rejections get a single retry.
pub async fn execute<T, F, Fut>(
    store: &RunStore,
    state: &mut RunState,
    stage: StageName,
    policy: &StagePolicy,
    mut call: F,
) -> Result<T, Failure>
where
    F: FnMut(AttemptContext) -> Fut,
    Fut: Future<Output = Result<T, Failure>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut previous_failure: Option<Failure> = None;
    let mut content_rejections = 0u32;

    for attempt in 1..=max_attempts {
        let ctx = AttemptContext {
            attempt,
            previous_failure: previous_failure.clone(),
        };

        let started_at = Utc::now();
        let started = Instant::now();
        let result = match tokio::time::timeout(policy.call_timeout, call(ctx)).await {
            Ok(result) => result,
            Err(_) => Err(Failure::transient(format!(
                "call timed out after {}s",
                policy.call_timeout.as_secs()
            ))),
        };

        let outcome = match &result {
            Ok(_) => AttemptOutcome::Succeeded,
            Err(failure) => AttemptOutcome::from(failure),
        };
        let record = AttemptRecord {
            attempt: state.stage(stage).attempt_count() + 1,
            started_at,
            finished_at: Utc::now(),
            outcome,
        };
        state.record_attempt(stage, record);
        if let Err(e) = store.save_state(state).await {
            return Err(Failure::internal(format!("failed to persist attempt: {}", e)));
        }

        let label = match &result {
            Ok(_) => "success",
            Err(f) => f.kind.as_str(),
        };
        metrics::counter!(names::STAGE_ATTEMPTS_TOTAL, "stage" => stage.as_str(), "outcome" => label)
            .increment(1);
        metrics::histogram!(names::STAGE_ATTEMPT_DURATION_SECONDS, "stage" => stage.as_str())
            .record(started.elapsed().as_secs_f64());

        let failure = match result {
            Ok(value) => return Ok(value),
            Err(failure) => failure,
        };

        if !failure.retryable {
            debug!(stage = %stage, attempt, kind = %failure.kind, "Non-retryable failure");
            return Err(failure);
        }
        if failure.kind == FailureKind::ContentPolicyRejection {
            content_rejections += 1;
            if content_rejections > 1 {
                return Err(failure.into_fatal());
            }
        }
        if attempt == max_attempts {
            return Err(failure.into_fatal());
        }

        let delay = retry_delay(&policy.backoff, attempt, &failure);
        warn!(
            stage = %stage,
            attempt,
            max_attempts,
            kind = %failure.kind,
            delay_ms = delay.as_millis() as u64,
            "Stage attempt failed, retrying: {}",
            failure.message
        );
        tokio::time::sleep(delay).await;
        previous_failure = Some(failure);
    }

    Err(Failure::internal("stage ran no attempts"))
}

/// Backoff for `attempt`, stretched to any wait the service asked for.
fn retry_delay(backoff: &BackoffPolicy, attempt: u32, failure: &Failure) -> Duration {
    let delay = backoff.delay_for_attempt(attempt);
    match failure.retry_after_ms {
        Some(ms) => delay.max(Duration::from_millis(ms)),
        None => delay,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reel_models::{RunId, RunRequest, StageStatus};
    use reel_storage::Retention;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tempfile::TempDir;

    async fn setup() -> (TempDir, RunStore, RunState) {
        let dir = TempDir::new().unwrap();
        let store = RunStore::open(dir.path(), Retention::Keep).await.unwrap();
        let state = RunState::new(RunId::generate(), RunRequest::new("trending", "voice"));
        store.create_run(&state).await.unwrap();
        (dir, store, state)
    }

    fn fast_policy(max_attempts: u32) -> StagePolicy {
        StagePolicy {
            max_attempts,
            backoff: BackoffPolicy {
                base: Duration::from_millis(100),
                multiplier: 2.0,
                cap: Duration::from_secs(1),
            },
            call_timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn test_backoff_delay_calculation() {
        let backoff = BackoffPolicy {
            base: Duration::from_millis(100),
            multiplier: 2.0,
            cap: Duration::from_millis(500),
        };
        assert_eq!(backoff.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(backoff.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(backoff.delay_for_attempt(3), Duration::from_millis(400));
        assert_eq!(backoff.delay_for_attempt(4), Duration::from_millis(500));
        assert_eq!(backoff.delay_for_attempt(60), Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_bound_is_exact() {
        let (_dir, store, mut state) = setup().await;
        let calls = AtomicU32::new(0);

        let result: Result<(), Failure> =
            execute(&store, &mut state, StageName::Scrape, &fast_policy(3), |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(Failure::transient("HTTP 503")) }
            })
            .await;

        let failure = result.unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(!failure.retryable);
        assert_eq!(failure.kind, FailureKind::Transient);
        assert_eq!(state.stage(StageName::Scrape).attempts.len(), 3);

        let persisted = store.load_state(&state.id).await.unwrap();
        assert_eq!(persisted.stage(StageName::Scrape).attempts.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_eventual_success_passes_previous_failure() {
        let (_dir, store, mut state) = setup().await;
        let seen = std::sync::Mutex::new(Vec::new());

        let value = execute(&store, &mut state, StageName::Script, &fast_policy(3), |ctx| {
            seen.lock().unwrap().push(ctx.clone());
            async move {
                if ctx.attempt < 2 {
                    Err(Failure::new(FailureKind::LengthOutOfRange, "too short"))
                } else {
                    Ok(42)
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(value, 42);
        let seen = seen.into_inner().unwrap();
        assert!(seen[0].previous_failure.is_none());
        assert_eq!(
            seen[1].previous_failure.as_ref().map(|f| f.kind),
            Some(FailureKind::LengthOutOfRange)
        );
        let attempts = &state.stage(StageName::Script).attempts;
        assert_eq!(attempts.len(), 2);
        assert!(attempts[1].is_success());
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_fails_immediately() {
        let (_dir, store, mut state) = setup().await;
        let calls = AtomicU32::new(0);

        let failure = execute::<(), _, _>(&store, &mut state, StageName::Upload, &fast_policy(5), |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(Failure::new(FailureKind::InvalidCredential, "token revoked")) }
        })
        .await
        .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(failure.kind, FailureKind::InvalidCredential);
    }

    #[tokio::test(start_paused = true)]
    async fn test_content_policy_retried_once() {
        let (_dir, store, mut state) = setup().await;
        let calls = AtomicU32::new(0);

        let failure = execute::<(), _, _>(&store, &mut state, StageName::Script, &fast_policy(5), |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(Failure::new(FailureKind::ContentPolicyRejection, "flagged")) }
        })
        .await
        .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(!failure.retryable);
    }

    #[test]
    fn test_retry_after_stretches_backoff() {
        let backoff = fast_policy(3).backoff;
        let hinted = Failure::transient("HTTP 429").with_retry_after(Some(5000));
        assert_eq!(retry_delay(&backoff, 1, &hinted), Duration::from_secs(5));

        let short_hint = Failure::transient("HTTP 429").with_retry_after(Some(10));
        assert_eq!(retry_delay(&backoff, 2, &short_hint), Duration::from_millis(200));
        assert_eq!(
            retry_delay(&backoff, 1, &Failure::transient("HTTP 503")),
            Duration::from_millis(100)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_waits_for_retry_after() {
        let (_dir, store, mut state) = setup().await;
        let calls = AtomicU32::new(0);
        let started = tokio::time::Instant::now();

        let value = execute(&store, &mut state, StageName::CollectVisuals, &fast_policy(3), |_| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(Failure::transient("HTTP 429").with_retry_after(Some(30_000)))
                } else {
                    Ok("assets")
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(value, "assets");
        assert!(started.elapsed() >= Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_call_times_out_as_transient() {
        let (_dir, store, mut state) = setup().await;
        let policy = StagePolicy {
            call_timeout: Duration::from_secs(1),
            ..fast_policy(2)
        };

        let failure = execute::<(), _, _>(&store, &mut state, StageName::Narrate, &policy, |_| async {
            std::future::pending::<Result<(), Failure>>().await
        })
        .await
        .unwrap_err();

        assert_eq!(failure.kind, FailureKind::Transient);
        assert!(failure.message.contains("timed out"));
        assert_eq!(state.stage(StageName::Narrate).attempts.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_numbers_continue_across_executions() {
        let (_dir, store, mut state) = setup().await;
        let _ = execute::<(), _, _>(&store, &mut state, StageName::Upload, &fast_policy(1), |_| async {
            Err(Failure::new(FailureKind::QuotaExhausted, "quota"))
        })
        .await;
        execute(&store, &mut state, StageName::Upload, &fast_policy(1), |_| async { Ok(()) })
            .await
            .unwrap();

        let attempts = &state.stage(StageName::Upload).attempts;
        assert_eq!(attempts.iter().map(|a| a.attempt).collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(state.stage(StageName::Upload).status, StageStatus::Pending);
    }
}
