//! Greedy caption alignment.
//!
//! Converts word-level [`TimingEvent`]s into display-ready
//! [`CaptionSegment`]s. Tokens accumulate into the current segment until
//! one of the break rules fires:
//!
//! 1. the joined text would exceed `max_chars`,
//! 2. the span from the segment's first token to the candidate's end would
//!    exceed `max_duration_ms`,
//! 3. the current segment ends a sentence (`.`, `!` or `?`, optionally
//!    followed by closing quotes or brackets),
//! 4. with `pause_break_ms` set, the silence before the candidate is at
//!    least that long.
//!
//! A token longer than `max_chars` on its own is emitted alone and
//! unmodified. The input is validated first: overlapping or decreasing
//! timestamps are rejected rather than corrected.

use reel_models::{CaptionSegment, TimingEvent};
use serde::{Deserialize, Serialize};

use crate::error::{MediaError, MediaResult};

/// Closing characters allowed after a sentence terminator.
const CLOSERS: &[char] = &['"', '\'', ')', ']', '}', '\u{201D}', '\u{2019}', '\u{00BB}'];

/// Segmentation limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlignConfig {
    /// Maximum display length in characters, joining spaces included
    pub max_chars: usize,
    /// Maximum span of one segment in milliseconds
    pub max_duration_ms: u64,
    /// Silence that closes a segment on its own; `None` disables pause breaks
    pub pause_break_ms: Option<u64>,
}

impl Default for AlignConfig {
    fn default() -> Self {
        Self {
            max_chars: 120,
            max_duration_ms: 5_000,
            pause_break_ms: None,
        }
    }
}

impl AlignConfig {
    pub fn new(max_chars: usize, max_duration_ms: u64) -> Self {
        Self {
            max_chars,
            max_duration_ms,
            pause_break_ms: None,
        }
    }

    pub fn with_pause_break(mut self, pause_break_ms: u64) -> Self {
        self.pause_break_ms = Some(pause_break_ms);
        self
    }

    fn validate(&self) -> MediaResult<()> {
        if self.max_chars == 0 {
            return Err(MediaError::InvalidCaptionConfig(
                "max_chars must be positive".to_string(),
            ));
        }
        if self.max_duration_ms == 0 {
            return Err(MediaError::InvalidCaptionConfig(
                "max_duration_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Segment under construction.
struct Pending {
    start_ms: u64,
    end_ms: u64,
    text: String,
    chars: usize,
}

impl Pending {
    fn start(token: &str, event: &TimingEvent) -> Self {
        Self {
            start_ms: event.start_ms,
            end_ms: event.end_ms,
            text: token.to_string(),
            chars: token.chars().count(),
        }
    }

    fn push(&mut self, token: &str, token_chars: usize, event: &TimingEvent) {
        self.text.push(' ');
        self.text.push_str(token);
        self.chars += 1 + token_chars;
        self.end_ms = event.end_ms;
    }

    fn finish(self) -> CaptionSegment {
        CaptionSegment {
            start_ms: self.start_ms,
            end_ms: self.end_ms,
            text: self.text,
        }
    }
}

/// Align timing events into caption segments.
pub fn align(events: &[TimingEvent], config: &AlignConfig) -> MediaResult<Vec<CaptionSegment>> {
    config.validate()?;
    validate_timing(events)?;

    let mut segments = Vec::new();
    let mut current: Option<Pending> = None;

    for event in events {
        let token = event.text.trim();
        if token.is_empty() {
            continue;
        }
        let token_chars = token.chars().count();

        current = match current.take() {
            None => Some(Pending::start(token, event)),
            Some(mut seg) => {
                if should_break(&seg, token_chars, event, config) {
                    segments.push(seg.finish());
                    Some(Pending::start(token, event))
                } else {
                    seg.push(token, token_chars, event);
                    Some(seg)
                }
            }
        };
    }

    if let Some(seg) = current {
        segments.push(seg.finish());
    }

    check_ordering(&segments)?;
    Ok(segments)
}

fn should_break(seg: &Pending, token_chars: usize, next: &TimingEvent, config: &AlignConfig) -> bool {
    if seg.chars + 1 + token_chars > config.max_chars {
        return true;
    }
    if next.end_ms.saturating_sub(seg.start_ms) > config.max_duration_ms {
        return true;
    }
    if ends_sentence(&seg.text) {
        return true;
    }
    match config.pause_break_ms {
        Some(pause) => next.start_ms.saturating_sub(seg.end_ms) >= pause,
        None => false,
    }
}

/// Whether text ends with a sentence terminator, ignoring closing quotes
/// and brackets.
pub fn ends_sentence(text: &str) -> bool {
    let trimmed = text.trim_end().trim_end_matches(CLOSERS);
    matches!(trimmed.chars().last(), Some('.' | '!' | '?'))
}

/// Reject events that end before they start, overlap, or go backwards.
fn validate_timing(events: &[TimingEvent]) -> MediaResult<()> {
    let mut previous: Option<&TimingEvent> = None;
    for (index, event) in events.iter().enumerate() {
        if event.end_ms < event.start_ms {
            return Err(MediaError::malformed_timing(
                index,
                format!("ends at {}ms before it starts at {}ms", event.end_ms, event.start_ms),
            ));
        }
        if let Some(prev) = previous {
            if event.start_ms < prev.start_ms {
                return Err(MediaError::malformed_timing(
                    index,
                    format!(
                        "starts at {}ms, before the previous event at {}ms",
                        event.start_ms, prev.start_ms
                    ),
                ));
            }
            if event.start_ms < prev.end_ms {
                return Err(MediaError::malformed_timing(
                    index,
                    format!(
                        "starts at {}ms, overlapping the previous event ending at {}ms",
                        event.start_ms, prev.end_ms
                    ),
                ));
            }
        }
        previous = Some(event);
    }
    Ok(())
}

fn check_ordering(segments: &[CaptionSegment]) -> MediaResult<()> {
    for pair in segments.windows(2) {
        if pair[0].end_ms > pair[1].start_ms {
            return Err(MediaError::internal(format!(
                "caption segments overlap: {}ms > {}ms",
                pair[0].end_ms, pair[1].start_ms
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(spec: &[(&str, u64, u64)]) -> Vec<TimingEvent> {
        spec.iter()
            .map(|(t, s, e)| TimingEvent::new(*t, *s, *e))
            .collect()
    }

    fn movie_was_great() -> Vec<TimingEvent> {
        words(&[
            ("The", 0, 200),
            ("movie", 200, 600),
            ("was", 600, 800),
            ("great.", 800, 1400),
        ])
    }

    fn joined(segments: &[CaptionSegment]) -> String {
        segments
            .iter()
            .map(|s| s.text.as_str())
            .collect::<Vec<_>>()
            .join(" ")
    }

    #[test]
    fn test_single_segment_when_text_fits() {
        let segments = align(&movie_was_great(), &AlignConfig::new(20, 5_000)).unwrap();
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].text, "The movie was great.");
        assert_eq!(segments[0].char_len(), 20);
        assert_eq!(segments[0].start_ms, 0);
        assert_eq!(segments[0].end_ms, 1400);
    }

    #[test]
    fn test_char_cap_splits() {
        let segments = align(&movie_was_great(), &AlignConfig::new(10, 5_000)).unwrap();
        assert!(segments.len() >= 2);
        for seg in &segments {
            assert!(seg.char_len() <= 10, "segment too long: {:?}", seg);
        }
        assert_eq!(joined(&segments), "The movie was great.");
    }

    #[test]
    fn test_empty_input() {
        let segments = align(&[], &AlignConfig::default()).unwrap();
        assert!(segments.is_empty());
    }

    #[test]
    fn test_overlong_token_emitted_alone() {
        let events = words(&[
            ("a", 0, 100),
            ("supercalifragilistic", 100, 900),
            ("b", 900, 1000),
        ]);
        let segments = align(&events, &AlignConfig::new(8, 10_000)).unwrap();
        assert_eq!(segments.len(), 3);
        assert_eq!(segments[1].text, "supercalifragilistic");
        assert_eq!(segments[1].start_ms, 100);
        assert_eq!(segments[1].end_ms, 900);
    }

    #[test]
    fn test_sentence_end_closes_segment() {
        let events = words(&[
            ("Stop.", 0, 300),
            ("Go", 300, 500),
            ("now!\"", 500, 800),
            ("Next", 800, 1000),
        ]);
        let segments = align(&events, &AlignConfig::new(100, 10_000)).unwrap();
        let texts: Vec<_> = segments.iter().map(|s| s.text.as_str()).collect();
        assert_eq!(texts, vec!["Stop.", "Go now!\"", "Next"]);
    }

    #[test]
    fn test_duration_cap_splits() {
        let events = words(&[
            ("one", 0, 1_000),
            ("two", 1_000, 2_000),
            ("three", 2_000, 3_000),
        ]);
        let segments = align(&events, &AlignConfig::new(100, 2_000)).unwrap();
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].text, "one two");
        assert_eq!(segments[1].text, "three");
    }

    #[test]
    fn test_pause_break_is_optional() {
        let events = words(&[("before", 0, 400), ("after", 2_000, 2_400)]);

        let without = align(&events, &AlignConfig::new(100, 10_000)).unwrap();
        assert_eq!(without.len(), 1);

        let with = align(&events, &AlignConfig::new(100, 10_000).with_pause_break(1_000)).unwrap();
        assert_eq!(with.len(), 2);
    }

    #[test]
    fn test_whitespace_tokens_ignored() {
        let events = words(&[("hello", 0, 300), ("  ", 300, 350), ("world", 350, 700)]);
        let segments = align(&events, &AlignConfig::default()).unwrap();
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].text, "hello world");
    }

    #[test]
    fn test_overlapping_input_rejected() {
        let events = words(&[("a", 0, 500), ("b", 400, 800)]);
        let err = align(&events, &AlignConfig::default()).unwrap_err();
        assert!(matches!(err, MediaError::MalformedTimingSignal { index: 1, .. }));
    }

    #[test]
    fn test_decreasing_input_rejected() {
        let events = words(&[("a", 500, 600), ("b", 100, 200)]);
        let err = align(&events, &AlignConfig::default()).unwrap_err();
        assert!(matches!(err, MediaError::MalformedTimingSignal { .. }));

        let inverted = words(&[("a", 600, 500)]);
        assert!(align(&inverted, &AlignConfig::default()).is_err());
    }

    #[test]
    fn test_segments_never_overlap_and_are_lossless() {
        let text = "It was the best of times, it was the worst of times. It was the age \
                    of wisdom, it was the age of foolishness! Was it the epoch of belief? \
                    It was the epoch of incredulity.";
        let mut t = 0;
        let events: Vec<_> = text
            .split_whitespace()
            .map(|w| {
                let e = TimingEvent::new(w, t, t + 250);
                t += 300;
                e
            })
            .collect();

        for cap in [10, 25, 40, 120] {
            let segments = align(&events, &AlignConfig::new(cap, 3_000)).unwrap();
            for pair in segments.windows(2) {
                assert!(pair[0].end_ms <= pair[1].start_ms);
            }
            assert_eq!(joined(&segments), text.split_whitespace().collect::<Vec<_>>().join(" "));
        }
    }

    #[test]
    fn test_zero_cap_is_rejected() {
        assert!(matches!(
            align(&movie_was_great(), &AlignConfig::new(0, 1_000)),
            Err(MediaError::InvalidCaptionConfig(_))
        ));
    }

    #[test]
    fn test_ends_sentence() {
        assert!(ends_sentence("great."));
        assert!(ends_sentence("really?)"));
        assert!(ends_sentence("he said \u{201C}go!\u{201D}"));
        assert!(!ends_sentence("Mr"));
        assert!(!ends_sentence("comma,"));
    }
}
