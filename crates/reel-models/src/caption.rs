//! Timing signal and caption segment types.

use serde::{Deserialize, Serialize};

/// One word of narration with its media-time span in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimingEvent {
    pub text: String,
    pub start_ms: u64,
    pub end_ms: u64,
}

impl TimingEvent {
    pub fn new(text: impl Into<String>, start_ms: u64, end_ms: u64) -> Self {
        Self {
            text: text.into(),
            start_ms,
            end_ms,
        }
    }

    pub fn duration_ms(&self) -> u64 {
        self.end_ms.saturating_sub(self.start_ms)
    }
}

/// A display-ready caption.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptionSegment {
    pub start_ms: u64,
    pub end_ms: u64,
    pub text: String,
}

impl CaptionSegment {
    pub fn duration_ms(&self) -> u64 {
        self.end_ms.saturating_sub(self.start_ms)
    }

    /// Display length in characters.
    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }
}

/// Timing signal persisted by the narration stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct TimingSignal {
    pub events: Vec<TimingEvent>,
    /// Total audio length, when the synthesis service reports it
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_duration_ms: Option<u64>,
}
