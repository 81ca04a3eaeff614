//! Narration via the ElevenLabs text-to-speech API.
//!
//! The with-timestamps endpoint returns character-level alignment, which
//! is folded into word [`TimingEvent`]s here. Long scripts are sent in
//! sentence-aligned chunks; each chunk's timing is shifted by the audio
//! already produced so the combined signal stays monotonic. Timing that
//! runs backwards by more than float jitter is rejected, not repaired.

use async_trait::async_trait;
use base64::Engine;
use reel_models::{TimingEvent, TimingSignal};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

use crate::adapter::Adapter;
use crate::error::{AdapterError, AdapterResult};
use crate::http::{build_client, check_response, env_var, require_env};

const NAME: &str = "elevenlabs";
const DEFAULT_BASE_URL: &str = "https://api.elevenlabs.io/v1";
const DEFAULT_MODEL: &str = "eleven_multilingual_v2";
const OUTPUT_FORMAT: &str = "mp3_44100_128";

/// Constant bitrate of [`OUTPUT_FORMAT`].
const OUTPUT_BITRATE_KBPS: u64 = 128;

/// Largest backwards step between consecutive words absorbed as rounding
/// jitter. Anything larger is a malformed alignment.
pub const JITTER_TOLERANCE_MS: u64 = 20;

/// Largest chunk of script sent in one synthesis call.
pub const MAX_CHUNK_CHARS: usize = 2500;

/// ElevenLabs client configuration.
#[derive(Debug, Clone)]
pub struct ElevenLabsConfig {
    pub api_key: String,
    pub model_id: String,
    pub base_url: String,
    pub max_chunk_chars: usize,
    pub timeout: Duration,
}

impl ElevenLabsConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model_id: DEFAULT_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            max_chunk_chars: MAX_CHUNK_CHARS,
            timeout: Duration::from_secs(180),
        }
    }

    /// Load from `ELEVENLABS_API_KEY`, `ELEVENLABS_MODEL` and `ELEVENLABS_BASE_URL`.
    pub fn from_env() -> AdapterResult<Self> {
        let mut config = Self::new(require_env("ELEVENLABS_API_KEY")?);
        if let Some(model) = env_var("ELEVENLABS_MODEL") {
            config.model_id = model;
        }
        if let Some(base_url) = env_var("ELEVENLABS_BASE_URL") {
            config.base_url = base_url;
        }
        Ok(config)
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

/// Script text and voice for one narration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NarrationRequest {
    pub text: String,
    pub voice_id: String,
}

/// Synthesized audio with word timing.
#[derive(Debug, Clone, PartialEq)]
pub struct Narration {
    /// MP3 bytes
    pub audio: Vec<u8>,
    pub timing: TimingSignal,
}

#[derive(Debug, Serialize)]
struct SynthesisBody<'a> {
    text: &'a str,
    model_id: &'a str,
    voice_settings: VoiceSettings,
}

#[derive(Debug, Serialize)]
struct VoiceSettings {
    stability: f32,
    similarity_boost: f32,
    style: f32,
    use_speaker_boost: bool,
}

impl Default for VoiceSettings {
    fn default() -> Self {
        Self {
            stability: 0.4,
            similarity_boost: 0.9,
            style: 0.2,
            use_speaker_boost: true,
        }
    }
}

#[derive(Debug, Deserialize)]
struct SynthesisResponse {
    audio_base64: String,
    #[serde(default)]
    alignment: Option<Alignment>,
}

/// Character-level alignment, times in seconds.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Alignment {
    pub characters: Vec<String>,
    pub character_start_times_seconds: Vec<f64>,
    pub character_end_times_seconds: Vec<f64>,
}

#[derive(Debug, Deserialize)]
struct Subscription {
    #[serde(default)]
    character_count: u64,
    #[serde(default)]
    character_limit: u64,
}

fn secs_to_ms(secs: f64) -> u64 {
    (secs.max(0.0) * 1000.0).round() as u64
}

/// Fold character alignment into word events shifted by `offset_ms`.
///
/// Returns the events and the end of the last character (relative to the
/// chunk), which is where the next chunk starts.
pub fn fold_words(alignment: &Alignment, offset_ms: u64) -> AdapterResult<(Vec<TimingEvent>, u64)> {
    let n = alignment.characters.len();
    if alignment.character_start_times_seconds.len() != n
        || alignment.character_end_times_seconds.len() != n
    {
        return Err(AdapterError::invalid_response(format!(
            "alignment arrays differ in length: {} chars, {} starts, {} ends",
            n,
            alignment.character_start_times_seconds.len(),
            alignment.character_end_times_seconds.len()
        )));
    }

    let mut events: Vec<TimingEvent> = Vec::new();
    let mut word = String::new();
    let mut word_start = 0u64;
    let mut word_end = 0u64;
    let mut chunk_end = 0u64;

    for i in 0..n {
        let ch = &alignment.characters[i];
        let start = secs_to_ms(alignment.character_start_times_seconds[i]) + offset_ms;
        let end = secs_to_ms(alignment.character_end_times_seconds[i]) + offset_ms;
        chunk_end = chunk_end.max(end - offset_ms);

        if ch.chars().all(char::is_whitespace) {
            push_word(&mut events, &mut word, word_start, word_end)?;
            continue;
        }
        if word.is_empty() {
            word_start = start;
        }
        word.push_str(ch);
        word_end = end;
    }
    push_word(&mut events, &mut word, word_start, word_end)?;

    Ok((events, chunk_end))
}

fn push_word(events: &mut Vec<TimingEvent>, word: &mut String, start: u64, end: u64) -> AdapterResult<()> {
    if word.is_empty() {
        return Ok(());
    }
    let floor = events.last().map(|e| e.end_ms).unwrap_or(0);
    if start + JITTER_TOLERANCE_MS < floor || end + JITTER_TOLERANCE_MS < start {
        return Err(AdapterError::invalid_response(format!(
            "alignment goes backwards at {:?}: {}-{}ms after a word ending at {}ms",
            word, start, end, floor
        )));
    }
    let start = start.max(floor);
    let end = end.max(start);
    events.push(TimingEvent::new(std::mem::take(word), start, end));
    Ok(())
}

/// Playing time of constant-bitrate MP3 bytes, tags included.
fn mp3_duration_ms(bytes: usize) -> u64 {
    bytes as u64 * 8 / OUTPUT_BITRATE_KBPS
}

/// Split text into chunks of at most `max_chars`, preferring sentence ends.
///
/// A sentence longer than the limit is split between words; a single word
/// longer than the limit becomes its own chunk.
pub fn split_into_chunks(text: &str, max_chars: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();

    let push_piece = |piece: &str, current: &mut String, chunks: &mut Vec<String>| {
        let extra = if current.is_empty() { 0 } else { 1 };
        if !current.is_empty() && current.chars().count() + extra + piece.chars().count() > max_chars {
            chunks.push(std::mem::take(current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(piece);
    };

    for sentence in sentences(text) {
        if sentence.chars().count() <= max_chars {
            push_piece(sentence, &mut current, &mut chunks);
        } else {
            for word in sentence.split_whitespace() {
                push_piece(word, &mut current, &mut chunks);
            }
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// Sentences with their terminators, whitespace-trimmed.
fn sentences(text: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        let boundary = matches!(c, '.' | '!' | '?' | '\n')
            && chars.peek().map_or(true, |(_, next)| next.is_whitespace());
        if boundary {
            let end = i + c.len_utf8();
            let sentence = text[start..end].trim();
            if !sentence.is_empty() {
                out.push(sentence);
            }
            start = end;
        }
    }
    let rest = text[start..].trim();
    if !rest.is_empty() {
        out.push(rest);
    }
    out
}

/// Narration adapter backed by ElevenLabs.
pub struct ElevenLabsAdapter {
    http: Client,
    config: ElevenLabsConfig,
}

impl ElevenLabsAdapter {
    pub fn new(config: ElevenLabsConfig) -> AdapterResult<Self> {
        Ok(Self {
            http: build_client(config.timeout)?,
            config,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn synthesize(&self, voice_id: &str, text: &str) -> AdapterResult<SynthesisResponse> {
        let response = self
            .http
            .post(self.url(&format!("/text-to-speech/{}/with-timestamps", voice_id)))
            .query(&[("output_format", OUTPUT_FORMAT)])
            .header("xi-api-key", &self.config.api_key)
            .json(&SynthesisBody {
                text,
                model_id: &self.config.model_id,
                voice_settings: VoiceSettings::default(),
            })
            .send()
            .await?;
        Ok(check_response(NAME, response).await?.json().await?)
    }
}

#[async_trait]
impl Adapter for ElevenLabsAdapter {
    type Request = NarrationRequest;
    type Response = Narration;

    fn name(&self) -> &'static str {
        NAME
    }

    async fn invoke(&self, request: &NarrationRequest) -> AdapterResult<Narration> {
        let chunks = split_into_chunks(&request.text, self.config.max_chunk_chars);
        if chunks.is_empty() {
            return Err(AdapterError::InvalidRequest(400, "narration text is empty".into()));
        }

        let mut audio = Vec::new();
        let mut events = Vec::new();
        let mut offset_ms = 0u64;
        let mut aligned = true;

        for (i, chunk) in chunks.iter().enumerate() {
            debug!(chunk = i + 1, total = chunks.len(), chars = chunk.len(), "Synthesizing chunk");
            let response = self.synthesize(&request.voice_id, chunk).await?;

            let bytes = base64::engine::general_purpose::STANDARD
                .decode(response.audio_base64.as_bytes())
                .map_err(|e| AdapterError::invalid_response(format!("audio_base64: {}", e)))?;
            if bytes.is_empty() {
                return Err(AdapterError::invalid_response("empty audio"));
            }
            let audio_ms = mp3_duration_ms(bytes.len());
            audio.extend_from_slice(&bytes);

            // The next chunk starts where this chunk's audio ends, trailing
            // silence included.
            let speech_end = match response.alignment {
                Some(alignment) if aligned => {
                    let (chunk_events, chunk_end) = fold_words(&alignment, offset_ms)?;
                    events.extend(chunk_events);
                    chunk_end
                }
                _ => {
                    // Without alignment for every chunk the partial signal is
                    // useless; the caption stage estimates timing instead.
                    aligned = false;
                    events.clear();
                    0
                }
            };
            offset_ms += audio_ms.max(speech_end);
        }

        info!(
            chunks = chunks.len(),
            words = events.len(),
            bytes = audio.len(),
            "Narration synthesized"
        );

        Ok(Narration {
            audio,
            timing: TimingSignal {
                events,
                audio_duration_ms: Some(offset_ms).filter(|ms| *ms > 0),
            },
        })
    }

    async fn probe(&self) -> AdapterResult<String> {
        let response = self
            .http
            .get(self.url("/user/subscription"))
            .header("xi-api-key", &self.config.api_key)
            .send()
            .await?;
        let subscription: Subscription = check_response(NAME, response).await?.json().await?;
        let remaining = subscription
            .character_limit
            .saturating_sub(subscription.character_count);
        if remaining == 0 {
            return Err(AdapterError::QuotaExhausted(format!(
                "{} of {} characters used",
                subscription.character_count, subscription.character_limit
            )));
        }
        Ok(format!("{} characters remaining", remaining))
    }
}
