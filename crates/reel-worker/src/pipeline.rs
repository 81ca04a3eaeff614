//! Pipeline run state machine.
//!
//! A run walks the stages in order: scrape, script, narrate, caption,
//! collect visuals, compose, upload. Each stage reads its inputs from the
//! artifacts of earlier stages, so a resumed run never repeats a stage
//! that already succeeded. Run state is persisted after every transition.

use reel_adapters::{
    Adapter, NarrationAdapter, NarrationRequest, ScriptAdapter, ScriptAdjustment, ScriptRequest,
    SubjectAdapter, UploadAdapter, UploadRequest, VisualAdapter, VisualRequest,
};
use reel_media::{
    align, clean_script, estimate_timing, probe_media, render_srt, render_vtt, AlignConfig,
    ComposeJob, Compositor, VisualInput, WrapConfig,
};
use reel_models::{
    ArtifactKind, ArtifactRef, AssetKind, AssetRef, Failure, FailureReason, PublishReceipt,
    RunId, RunRequest, RunState, RunStatus, StageName, StageOutput, StageResult, SubjectMetadata,
    SubjectQuery, TimingSignal, VideoMetadata, VisualSet,
};
use reel_storage::RunStore;
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tracing::{debug, warn, Instrument};
use validator::Validate;

use crate::config::WorkerConfig;
use crate::error::{media_failure, storage_failure, WorkerError, WorkerResult};
use crate::keywords::extract_keywords;
use crate::logging::RunLogger;
use crate::metrics::{names, record_run_outcome};
use crate::stage::{execute, StagePolicy};

/// Directory under the run directory holding downloaded visuals.
pub const VISUALS_DIR: &str = "visuals";

/// The external collaborators a run calls out to.
#[derive(Clone)]
pub struct Adapters {
    pub subject: Arc<SubjectAdapter>,
    pub script: Arc<ScriptAdapter>,
    pub narration: Arc<NarrationAdapter>,
    pub visuals: Arc<VisualAdapter>,
    pub upload: Arc<UploadAdapter>,
    pub compositor: Arc<dyn Compositor>,
}

/// Knobs for one pipeline.
#[derive(Debug, Clone, Default)]
pub struct PipelineSettings {
    /// Policy for API-bound stages
    pub stage_policy: StagePolicy,
    /// Policy for compositing and upload
    pub long_stage_policy: StagePolicy,
    pub align: AlignConfig,
    pub wrap: WrapConfig,
    pub visuals_per_keyword: usize,
    pub max_visual_assets: usize,
    pub fallback_assets_dir: Option<PathBuf>,
}

impl PipelineSettings {
    pub fn from_config(config: &WorkerConfig) -> Self {
        let mut align = AlignConfig::new(config.caption_max_chars, config.caption_max_duration_ms);
        if let Some(pause) = config.caption_pause_break_ms {
            align = align.with_pause_break(pause);
        }
        Self {
            stage_policy: config.stage_policy.clone(),
            long_stage_policy: config.long_stage_policy(),
            align,
            wrap: WrapConfig::default(),
            visuals_per_keyword: config.visuals_per_keyword,
            max_visual_assets: config.max_visual_assets,
            fallback_assets_dir: config.fallback_assets_dir.clone(),
        }
    }
}

/// How a call to drive a run ended.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Published { video_id: String },
    Failed(FailureReason),
    /// Shutdown was requested between stages; the run can be resumed
    Interrupted,
}

impl RunOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunOutcome::Published { .. } => "published",
            RunOutcome::Failed(_) => "failed",
            RunOutcome::Interrupted => "interrupted",
        }
    }
}

/// Drives runs through the stages against a run store.
pub struct Pipeline {
    store: Arc<RunStore>,
    adapters: Adapters,
    settings: PipelineSettings,
    shutdown: watch::Receiver<bool>,
}

impl Pipeline {
    pub fn new(
        store: Arc<RunStore>,
        adapters: Adapters,
        settings: PipelineSettings,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            store,
            adapters,
            settings,
            shutdown,
        }
    }

    pub fn store(&self) -> &RunStore {
        &self.store
    }

    /// Validate a request and persist a new run for it.
    pub async fn create(&self, request: RunRequest) -> WorkerResult<RunState> {
        request
            .validate()
            .map_err(|e| WorkerError::invalid_request(e.to_string()))?;
        let state = RunState::new(RunId::generate(), request);
        self.store.create_run(&state).await?;
        Ok(state)
    }

    /// Create a run and drive it to the end.
    pub async fn start(&self, request: RunRequest) -> WorkerResult<(RunId, RunOutcome)> {
        let state = self.create(request).await?;
        let id = state.id.clone();
        let outcome = self.drive(state).await?;
        Ok((id, outcome))
    }

    /// Continue a persisted, non-terminal run from its first incomplete stage.
    pub async fn resume(&self, run_id: &RunId) -> WorkerResult<RunOutcome> {
        let mut state = self.load(run_id).await?;
        if state.is_terminal() {
            return Err(WorkerError::RunFinished(run_id.to_string()));
        }
        state.reset_interrupted();
        self.store.save_state(&state).await?;
        self.drive(state).await
    }

    /// Retry a run that failed on an exhausted quota.
    ///
    /// Only the failed stage is reopened. Returns `None` when the run is
    /// not eligible.
    pub async fn requeue(&self, run_id: &RunId) -> WorkerResult<Option<RunOutcome>> {
        let mut state = self.load(run_id).await?;
        let Some(stage) = state.reopen_after_quota() else {
            return Ok(None);
        };
        debug!(run_id = %run_id, stage = %stage, "Requeueing run after quota failure");
        self.store.save_state(&state).await?;
        Ok(Some(self.drive(state).await?))
    }

    /// Mark an interrupted run failed instead of resuming it.
    pub async fn discard(&self, run_id: &RunId) -> WorkerResult<FailureReason> {
        let mut state = self.load(run_id).await?;
        if state.is_terminal() {
            return Err(WorkerError::RunFinished(run_id.to_string()));
        }
        state.abandon("interrupted run discarded by resume policy");
        self.store.save_state(&state).await?;
        self.store.finalize(&state).await?;
        let reason = state
            .failure
            .clone()
            .ok_or_else(|| WorkerError::internal("abandoned run has no failure reason"))?;
        RunLogger::new(run_id).log_failure(&reason);
        record_run_outcome("abandoned");
        Ok(reason)
    }

    async fn load(&self, run_id: &RunId) -> WorkerResult<RunState> {
        self.store.load_state(run_id).await.map_err(|e| {
            if e.is_not_found() {
                WorkerError::RunNotFound(run_id.to_string())
            } else {
                e.into()
            }
        })
    }

    /// Run stages until the run is terminal or shutdown is requested.
    pub async fn drive(&self, state: RunState) -> WorkerResult<RunOutcome> {
        let logger = RunLogger::new(&state.id);
        let span = logger.create_span();
        metrics::gauge!(names::RUNS_ACTIVE).increment(1.0);
        let result = self.drive_inner(state, &logger).instrument(span).await;
        metrics::gauge!(names::RUNS_ACTIVE).decrement(1.0);
        if let Ok(outcome) = &result {
            record_run_outcome(outcome.as_str());
        }
        result
    }

    async fn drive_inner(&self, mut state: RunState, logger: &RunLogger) -> WorkerResult<RunOutcome> {
        logger.log_start(state.status.as_str());

        while !state.is_terminal() {
            let Some(stage) = state.next_stage() else {
                self.publish_from_receipt(&mut state).await?;
                break;
            };

            let stopping = *self.shutdown.borrow();
            if stopping {
                logger.log_warning("shutdown requested, leaving run resumable");
                self.store.save_state(&state).await?;
                return Ok(RunOutcome::Interrupted);
            }

            state.begin_stage(stage);
            self.store.save_state(&state).await?;
            logger.log_stage_start(stage);

            let started = Instant::now();
            let result = self.run_stage(&mut state, stage).await;
            metrics::histogram!(names::STAGE_DURATION_SECONDS, "stage" => stage.as_str())
                .record(started.elapsed().as_secs_f64());

            match result {
                Ok(output) => {
                    logger.log_stage_complete(stage, output.artifacts.len(), output.degraded);
                    state.complete_stage(stage, output);
                    if stage == StageName::Upload {
                        self.publish_from_receipt(&mut state).await?;
                    }
                    self.store.save_state(&state).await?;
                }
                Err(failure) => {
                    state.fail_stage(stage, &failure);
                    self.store.save_state(&state).await?;
                }
            }
        }

        self.store.finalize(&state).await?;
        match (&state.status, &state.failure, &state.published_id) {
            (RunStatus::Published, _, Some(video_id)) => {
                logger.log_completion(&format!("published {}", video_id));
                Ok(RunOutcome::Published {
                    video_id: video_id.clone(),
                })
            }
            (_, Some(reason), _) => {
                logger.log_failure(reason);
                Ok(RunOutcome::Failed(reason.clone()))
            }
            _ => Err(WorkerError::internal(format!(
                "run {} ended in unexpected status {}",
                state.id, state.status
            ))),
        }
    }

    async fn publish_from_receipt(&self, state: &mut RunState) -> WorkerResult<()> {
        let artifact = state
            .artifact(ArtifactKind::PublishReceipt)
            .cloned()
            .ok_or_else(|| WorkerError::internal("upload finished without a receipt"))?;
        let receipt: PublishReceipt = self.store.read_json(&artifact).await?;
        state.mark_published(receipt.video_id);
        Ok(())
    }

    async fn run_stage(&self, state: &mut RunState, stage: StageName) -> StageResult {
        match stage {
            StageName::Scrape => self.scrape(state).await,
            StageName::Script => self.script(state).await,
            StageName::Narrate => self.narrate(state).await,
            StageName::Caption => self.caption(state).await,
            StageName::CollectVisuals => self.collect_visuals(state).await,
            StageName::Compose => self.compose(state).await,
            StageName::Upload => self.upload(state).await,
        }
    }

    // ========================================================================
    // Artifact helpers
    // ========================================================================

    fn input(&self, state: &RunState, kind: ArtifactKind) -> Result<ArtifactRef, Failure> {
        state
            .artifact(kind)
            .cloned()
            .ok_or_else(|| Failure::internal(format!("missing input artifact: {}", kind.as_str())))
    }

    fn input_path(&self, state: &RunState, kind: ArtifactKind) -> Result<PathBuf, Failure> {
        let artifact = self.input(state, kind)?;
        self.store.resolve(&artifact).map_err(storage_failure)
    }

    async fn read_input<T: DeserializeOwned>(&self, state: &RunState, kind: ArtifactKind) -> Result<T, Failure> {
        let artifact = self.input(state, kind)?;
        self.store.read_json(&artifact).await.map_err(storage_failure)
    }

    async fn read_input_text(&self, state: &RunState, kind: ArtifactKind) -> Result<String, Failure> {
        let artifact = self.input(state, kind)?;
        self.store.read_text(&artifact).await.map_err(storage_failure)
    }

    async fn write_json<T: serde::Serialize>(
        &self,
        state: &RunState,
        stage: StageName,
        kind: ArtifactKind,
        value: &T,
    ) -> Result<ArtifactRef, Failure> {
        let artifact = ArtifactRef::new(&state.id, stage, kind);
        self.store
            .write_json(&artifact, value)
            .await
            .map_err(storage_failure)?;
        Ok(artifact)
    }

    async fn write_bytes(
        &self,
        state: &RunState,
        stage: StageName,
        kind: ArtifactKind,
        data: &[u8],
    ) -> Result<ArtifactRef, Failure> {
        let artifact = ArtifactRef::new(&state.id, stage, kind);
        self.store
            .write_artifact(&artifact, data)
            .await
            .map_err(storage_failure)?;
        Ok(artifact)
    }

    // ========================================================================
    // Stages
    // ========================================================================

    async fn scrape(&self, state: &mut RunState) -> StageResult {
        let query = SubjectQuery::from_hint(&state.request.subject_hint);
        let query = &query;
        let adapter: &SubjectAdapter = self.adapters.subject.as_ref();

        let subject = execute(&self.store, state, StageName::Scrape, &self.settings.stage_policy, |_| async move {
            adapter.invoke(query).await.map_err(Failure::from)
        })
        .await?;

        let artifact = self
            .write_json(state, StageName::Scrape, ArtifactKind::Subject, &subject)
            .await?;
        Ok(StageOutput::new(vec![artifact]))
    }

    async fn script(&self, state: &mut RunState) -> StageResult {
        let subject: SubjectMetadata = self.read_input(state, ArtifactKind::Subject).await?;
        let subject_ref = &subject;
        let (min_words, max_words) = (state.request.min_words, state.request.max_words);
        let adapter: &ScriptAdapter = self.adapters.script.as_ref();

        let draft = execute(&self.store, state, StageName::Script, &self.settings.stage_policy, |ctx| {
            let request = ScriptRequest {
                subject: subject_ref.clone(),
                min_words,
                max_words,
                adjustment: ctx
                    .previous_failure
                    .as_ref()
                    .and_then(ScriptAdjustment::for_failure),
            };
            async move { adapter.invoke(&request).await.map_err(Failure::from) }
        })
        .await?;

        let text = clean_script(&draft.text);
        let mut metadata = VideoMetadata::for_subject(&subject, state.request.privacy_status);
        metadata.publish_at = state.request.publish_at;

        let script = self
            .write_bytes(state, StageName::Script, ArtifactKind::Script, text.as_bytes())
            .await?;
        let meta = self
            .write_json(state, StageName::Script, ArtifactKind::VideoMetadata, &metadata)
            .await?;
        Ok(StageOutput::new(vec![script, meta]))
    }

    async fn narrate(&self, state: &mut RunState) -> StageResult {
        let text = self.read_input_text(state, ArtifactKind::Script).await?;
        let request = NarrationRequest {
            text,
            voice_id: state.request.voice_id.clone(),
        };
        let request = &request;
        let adapter: &NarrationAdapter = self.adapters.narration.as_ref();

        let narration = execute(&self.store, state, StageName::Narrate, &self.settings.stage_policy, |_| async move {
            adapter.invoke(request).await.map_err(Failure::from)
        })
        .await?;

        let audio = self
            .write_bytes(state, StageName::Narrate, ArtifactKind::NarrationAudio, &narration.audio)
            .await?;
        let timing = self
            .write_json(state, StageName::Narrate, ArtifactKind::TimingSignal, &narration.timing)
            .await?;
        Ok(StageOutput::new(vec![audio, timing]))
    }

    async fn caption(&self, state: &mut RunState) -> StageResult {
        let script = self.read_input_text(state, ArtifactKind::Script).await?;
        let timing: TimingSignal = self.read_input(state, ArtifactKind::TimingSignal).await?;
        let audio_path = self.input_path(state, ArtifactKind::NarrationAudio)?;
        let (script, timing, audio_path) = (&script, &timing, &audio_path);
        let settings = &self.settings;

        // Local work only; a malformed timing signal is not worth retrying.
        let policy = settings.stage_policy.clone().with_max_attempts(1);
        let (srt, vtt) = execute(&self.store, state, StageName::Caption, &policy, |_| async move {
            let events = if timing.events.is_empty() {
                let duration_ms = match timing.audio_duration_ms {
                    Some(ms) => Some(ms),
                    None => probe_media(audio_path).await.ok().map(|info| info.duration_ms()),
                };
                warn!(duration_ms, "Narration has no word timing, estimating");
                estimate_timing(script, duration_ms)
            } else {
                timing.events.clone()
            };
            let segments = match align(&events, &settings.align) {
                Ok(segments) => segments,
                Err(e) => return Err(Failure::malformed(e.to_string())),
            };
            debug!(events = events.len(), segments = segments.len(), "Aligned captions");
            Ok::<_, Failure>((
                render_srt(&segments, &settings.wrap),
                render_vtt(&segments, &settings.wrap),
            ))
        })
        .await?;

        let srt = self
            .write_bytes(state, StageName::Caption, ArtifactKind::CaptionsSrt, srt.as_bytes())
            .await?;
        let vtt = self
            .write_bytes(state, StageName::Caption, ArtifactKind::CaptionsVtt, vtt.as_bytes())
            .await?;
        Ok(StageOutput::new(vec![srt, vtt]))
    }

    async fn collect_visuals(&self, state: &mut RunState) -> StageResult {
        let subject: SubjectMetadata = self.read_input(state, ArtifactKind::Subject).await?;
        let script = self.read_input_text(state, ArtifactKind::Script).await?;
        let keywords = extract_keywords(&subject, &script);
        let request = VisualRequest {
            keywords: keywords.clone(),
            per_keyword: self.settings.visuals_per_keyword,
            max_assets: self.settings.max_visual_assets,
            download_dir: self.store.run_dir(&state.id).join(VISUALS_DIR),
        };
        let request = &request;
        let adapter: &VisualAdapter = self.adapters.visuals.as_ref();

        let found = execute(&self.store, state, StageName::CollectVisuals, &self.settings.stage_policy, |_| async move {
            adapter.invoke(request).await.map_err(Failure::from)
        })
        .await;

        let set = match found {
            Ok(assets) if !assets.is_empty() => VisualSet {
                keywords,
                assets,
                fallback: false,
            },
            Ok(_) => {
                warn!(run_id = %state.id, "Visual search found nothing, using fallback assets");
                self.fallback_visuals(&state.id).await
            }
            Err(failure) => {
                warn!(run_id = %state.id, failure = %failure, "Visual search failed, using fallback assets");
                self.fallback_visuals(&state.id).await
            }
        };

        let mut artifacts = vec![
            self.write_json(state, StageName::CollectVisuals, ArtifactKind::VisualManifest, &set)
                .await?,
        ];
        artifacts.extend(set.assets.iter().filter_map(|asset| {
            asset.file_name.as_ref().map(|name| {
                ArtifactRef::named(
                    &state.id,
                    StageName::CollectVisuals,
                    ArtifactKind::VisualAsset,
                    format!("{}/{}", VISUALS_DIR, name),
                )
            })
        }));

        if set.fallback {
            metrics::counter!(names::VISUALS_DEGRADED_TOTAL).increment(1);
            Ok(StageOutput::degraded(artifacts))
        } else {
            Ok(StageOutput::new(artifacts))
        }
    }

    /// Copy the configured fallback assets into the run.
    ///
    /// Never fails: an unreadable or missing directory yields an empty set,
    /// which composes over a solid background.
    async fn fallback_visuals(&self, run_id: &RunId) -> VisualSet {
        let Some(dir) = &self.settings.fallback_assets_dir else {
            return VisualSet::fallback(Vec::new());
        };
        let files = match list_assets(dir).await {
            Ok(files) => files,
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "Fallback assets unreadable");
                return VisualSet::fallback(Vec::new());
            }
        };

        let mut assets = Vec::new();
        for (name, kind, path) in files {
            let artifact = ArtifactRef::named(
                run_id,
                StageName::CollectVisuals,
                ArtifactKind::VisualAsset,
                format!("{}/{}", VISUALS_DIR, name),
            );
            if let Err(e) = self.store.import_artifact(&artifact, &path).await {
                warn!(file = %path.display(), error = %e, "Skipping fallback asset");
                continue;
            }
            assets.push(AssetRef {
                id: name.clone(),
                kind,
                source_url: path.display().to_string(),
                query: "fallback".to_string(),
                file_name: Some(name),
                duration_secs: None,
                width: 0,
                height: 0,
            });
        }
        VisualSet::fallback(assets)
    }

    async fn compose(&self, state: &mut RunState) -> StageResult {
        let manifest: VisualSet = self.read_input(state, ArtifactKind::VisualManifest).await?;
        let subject: SubjectMetadata = self.read_input(state, ArtifactKind::Subject).await?;
        let visuals_dir = self.store.run_dir(&state.id).join(VISUALS_DIR);
        let final_video = ArtifactRef::new(&state.id, StageName::Compose, ArtifactKind::FinalVideo);
        let thumbnail = ArtifactRef::new(&state.id, StageName::Compose, ArtifactKind::Thumbnail);

        let job = ComposeJob {
            title: Some(subject.title),
            narration: self.input_path(state, ArtifactKind::NarrationAudio)?,
            captions: Some(self.input_path(state, ArtifactKind::CaptionsSrt)?),
            visuals: manifest
                .assets
                .iter()
                .filter_map(|asset| {
                    asset.file_name.as_ref().map(|name| VisualInput {
                        path: visuals_dir.join(name),
                        kind: asset.kind,
                    })
                })
                .collect(),
            output: self.store.resolve(&final_video).map_err(storage_failure)?,
            thumbnail: self.store.resolve(&thumbnail).map_err(storage_failure)?,
        };
        let job = &job;
        let compositor: &dyn Compositor = self.adapters.compositor.as_ref();

        let output = execute(&self.store, state, StageName::Compose, &self.settings.long_stage_policy, |_| async move {
            compositor.compose(job).await.map_err(media_failure)
        })
        .await?;

        let mut artifacts = vec![final_video];
        if output.thumbnail_written {
            artifacts.push(thumbnail);
        }
        Ok(StageOutput::new(artifacts))
    }

    async fn upload(&self, state: &mut RunState) -> StageResult {
        let metadata: VideoMetadata = self.read_input(state, ArtifactKind::VideoMetadata).await?;
        let thumbnail = match state.artifact(ArtifactKind::Thumbnail) {
            Some(artifact) => Some(self.store.resolve(artifact).map_err(storage_failure)?),
            None => None,
        };
        let request = UploadRequest {
            video: self.input_path(state, ArtifactKind::FinalVideo)?,
            thumbnail,
            metadata,
        };
        let request = &request;
        let adapter: &UploadAdapter = self.adapters.upload.as_ref();

        let receipt = execute(&self.store, state, StageName::Upload, &self.settings.long_stage_policy, |_| async move {
            adapter.invoke(request).await.map_err(Failure::from)
        })
        .await?;

        let artifact = self
            .write_json(state, StageName::Upload, ArtifactKind::PublishReceipt, &receipt)
            .await?;
        Ok(StageOutput::new(vec![artifact]))
    }
}

/// Visual files directly under `dir`, sorted by name.
async fn list_assets(dir: &Path) -> std::io::Result<Vec<(String, AssetKind, PathBuf)>> {
    let mut files = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_file() {
            continue;
        }
        let path = entry.path();
        let kind = path
            .extension()
            .and_then(|e| e.to_str())
            .and_then(AssetKind::from_extension);
        let (Some(kind), Some(name)) = (kind, entry.file_name().to_str().map(str::to_string)) else {
            continue;
        };
        files.push((name, kind, path));
    }
    files.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(files)
}
