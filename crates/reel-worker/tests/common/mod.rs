//! In-process fakes shared by the worker integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use reel_adapters::{
    Adapter, AdapterError, AdapterResult, Narration, NarrationRequest, ScriptDraft, ScriptRequest,
    UploadRequest, VisualRequest,
};
use reel_media::{ComposeJob, ComposeOutput, Compositor, MediaError, MediaResult};
use reel_models::{
    AssetKind, AssetRef, PublishReceipt, RunRequest, SubjectMetadata, SubjectQuery, TimingEvent,
    TimingSignal,
};
use reel_storage::{Retention, RunStore};
use reel_worker::{Adapters, Pipeline, PipelineSettings};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tokio::sync::watch;

pub const SCRIPT: &str = "**The Long Night** is a slow burning thriller. It was shot in a frozen \
    harbor town over one winter. The harbor scenes feel cold and lonely. Critics loved the ending!";

type Respond<Req, Resp> = Box<dyn Fn(usize, &Req) -> AdapterResult<Resp> + Send + Sync>;

/// Adapter answering from a closure given the 1-based call number.
pub struct Fake<Req, Resp> {
    name: &'static str,
    calls: AtomicUsize,
    respond: Respond<Req, Resp>,
}

impl<Req, Resp> Fake<Req, Resp> {
    pub fn new(
        name: &'static str,
        respond: impl Fn(usize, &Req) -> AdapterResult<Resp> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            name,
            calls: AtomicUsize::new(0),
            respond: Box::new(respond),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<Req, Resp> Adapter for Fake<Req, Resp>
where
    Req: Send + Sync + 'static,
    Resp: Send + 'static,
{
    type Request = Req;
    type Response = Resp;

    fn name(&self) -> &'static str {
        self.name
    }

    async fn invoke(&self, request: &Req) -> AdapterResult<Resp> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        (self.respond)(call, request)
    }

    async fn probe(&self) -> AdapterResult<String> {
        Ok("fake".to_string())
    }
}

/// Compositor writing placeholder files instead of running ffmpeg.
#[derive(Default)]
pub struct FakeCompositor {
    pub jobs: Mutex<Vec<ComposeJob>>,
    pub fail: bool,
}

#[async_trait]
impl Compositor for FakeCompositor {
    async fn compose(&self, job: &ComposeJob) -> MediaResult<ComposeOutput> {
        self.jobs.lock().unwrap().push(job.clone());
        if self.fail {
            return Err(MediaError::InvalidMedia("narration has no playable audio".into()));
        }
        std::fs::write(&job.output, b"mp4")?;
        std::fs::write(&job.thumbnail, b"jpg")?;
        Ok(ComposeOutput {
            duration_secs: 12.0,
            thumbnail_written: true,
        })
    }

    async fn check(&self) -> MediaResult<String> {
        Ok("fake compositor".to_string())
    }
}

pub fn subject() -> SubjectMetadata {
    SubjectMetadata {
        id: 42,
        title: "The Long Night".to_string(),
        overview: "A harbor town waits out a winter storm.".to_string(),
        release_date: "2024-11-02".to_string(),
        vote_average: 7.4,
        runtime_minutes: Some(118),
        genres: vec!["Thriller".to_string(), "Drama".to_string()],
        director: Some("Ines Park".to_string()),
        cast: vec!["Ada Stone".to_string()],
    }
}

pub fn draft(text: &str) -> ScriptDraft {
    ScriptDraft {
        text: text.to_string(),
        word_count: text.split_whitespace().count(),
        model: "fake".to_string(),
    }
}

/// One 300 ms event per word, back to back.
pub fn narration(text: &str) -> Narration {
    let events: Vec<TimingEvent> = text
        .split_whitespace()
        .enumerate()
        .map(|(i, word)| TimingEvent::new(word, i as u64 * 300, i as u64 * 300 + 280))
        .collect();
    let duration = events.last().map(|e| e.end_ms);
    Narration {
        audio: b"ID3fake".to_vec(),
        timing: TimingSignal {
            events,
            audio_duration_ms: duration,
        },
    }
}

/// Write one clip per keyword (up to two) into the download directory.
pub fn download_visuals(request: &VisualRequest) -> AdapterResult<Vec<AssetRef>> {
    std::fs::create_dir_all(&request.download_dir)?;
    let mut assets = Vec::new();
    for (i, keyword) in request.keywords.iter().take(2).enumerate() {
        let file_name = format!("video_{}.mp4", i + 1);
        std::fs::write(request.download_dir.join(&file_name), b"clip")?;
        assets.push(AssetRef {
            id: (i + 1).to_string(),
            kind: AssetKind::Video,
            source_url: format!("https://videos.example/{}", i + 1),
            query: keyword.clone(),
            file_name: Some(file_name),
            duration_secs: Some(10.0),
            width: 1920,
            height: 1080,
        });
    }
    Ok(assets)
}

pub struct Fakes {
    pub subject: Arc<Fake<SubjectQuery, SubjectMetadata>>,
    pub script: Arc<Fake<ScriptRequest, ScriptDraft>>,
    pub narration: Arc<Fake<NarrationRequest, Narration>>,
    pub visuals: Arc<Fake<VisualRequest, Vec<AssetRef>>>,
    pub upload: Arc<Fake<UploadRequest, PublishReceipt>>,
    pub compositor: Arc<FakeCompositor>,
}

impl Fakes {
    /// Every adapter succeeds.
    pub fn happy() -> Self {
        Self {
            subject: Fake::new("tmdb", |_, _| Ok(subject())),
            script: Fake::new("openai", |_, _| Ok(draft(SCRIPT))),
            narration: Fake::new("elevenlabs", |_, req: &NarrationRequest| Ok(narration(&req.text))),
            visuals: Fake::new("pexels", |_, req: &VisualRequest| download_visuals(req)),
            upload: Fake::new("youtube", |n, _| Ok(PublishReceipt::new(format!("vid{}", n)))),
            compositor: Arc::new(FakeCompositor::default()),
        }
    }

    pub fn adapters(&self) -> Adapters {
        Adapters {
            subject: self.subject.clone(),
            script: self.script.clone(),
            narration: self.narration.clone(),
            visuals: self.visuals.clone(),
            upload: self.upload.clone(),
            compositor: self.compositor.clone(),
        }
    }
}

pub fn server_error() -> AdapterError {
    AdapterError::from_http_status(503, "upstream unavailable")
}

pub fn request() -> RunRequest {
    RunRequest::new("trending", "voice-1").with_word_range(50, 400)
}

pub fn settings() -> PipelineSettings {
    PipelineSettings {
        visuals_per_keyword: 2,
        max_visual_assets: 12,
        ..PipelineSettings::default()
    }
}

pub struct Harness {
    pub dir: TempDir,
    pub store: Arc<RunStore>,
    pub shutdown: Arc<watch::Sender<bool>>,
}

impl Harness {
    pub async fn new(retention: Retention) -> Self {
        let dir = TempDir::new().unwrap();
        let store = RunStore::open(dir.path().join("work"), retention).await.unwrap();
        let (shutdown, _) = watch::channel(false);
        Self {
            dir,
            store: Arc::new(store),
            shutdown: Arc::new(shutdown),
        }
    }

    pub fn pipeline(&self, fakes: &Fakes, settings: PipelineSettings) -> Pipeline {
        Pipeline::new(
            Arc::clone(&self.store),
            fakes.adapters(),
            settings,
            self.shutdown.subscribe(),
        )
    }
}
