//! Caption alignment and FFmpeg CLI wrapper.
//!
//! This crate provides:
//! - The caption aligner: word timing to display-ready segments
//! - SubRip and WebVTT rendering, estimated timing fallback
//! - Type-safe FFmpeg command building with timeout and cancellation
//! - FFprobe media inspection
//! - The compositor seam and its FFmpeg implementation

pub mod captions;
pub mod command;
pub mod compose;
pub mod error;
pub mod probe;
pub mod thumbnail;

pub use captions::{
    align, clean_script, estimate_timing, render_srt, render_vtt, word_count, AlignConfig,
    WrapConfig,
};
pub use command::{check_ffmpeg, check_ffprobe, FfmpegCommand, FfmpegRunner};
pub use compose::{
    ComposeJob, ComposeOutput, ComposeSettings, Compositor, FfmpegCompositor, VisualInput,
};
pub use error::{MediaError, MediaResult};
pub use probe::{probe_media, MediaInfo};
pub use thumbnail::generate_thumbnail;
