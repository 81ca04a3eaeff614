//! External service adapters for the reelsmith pipeline.
//!
//! Every adapter implements [`Adapter`]: one typed call per invocation,
//! with failures classified by [`AdapterError::kind`]. Retrying is left to
//! the caller.
//!
//! | adapter | service | request → response |
//! |---|---|---|
//! | [`TmdbAdapter`] | TMDb | subject query → movie metadata |
//! | [`OpenAiAdapter`] | OpenAI chat completions | subject + word range → script |
//! | [`ElevenLabsAdapter`] | ElevenLabs TTS | script + voice → audio + word timing |
//! | [`PexelsAdapter`] | Pexels videos | keywords → downloaded assets |
//! | [`YouTubeAdapter`] | YouTube Data API | video + metadata → receipt |

pub mod adapter;
pub mod elevenlabs;
pub mod error;
pub mod http;
pub mod openai;
pub mod pexels;
pub mod tmdb;
pub mod youtube;

pub use adapter::{
    Adapter, NarrationAdapter, ScriptAdapter, SubjectAdapter, UploadAdapter, VisualAdapter,
};
pub use elevenlabs::{ElevenLabsAdapter, ElevenLabsConfig, Narration, NarrationRequest};
pub use error::{AdapterError, AdapterResult};
pub use openai::{OpenAiAdapter, OpenAiConfig, ScriptAdjustment, ScriptDraft, ScriptRequest};
pub use pexels::{PexelsAdapter, PexelsConfig, VisualRequest};
pub use tmdb::{TmdbAdapter, TmdbConfig};
pub use youtube::{UploadRequest, YouTubeAdapter, YouTubeConfig};
