//! SubRip and WebVTT writers.

use reel_models::CaptionSegment;
use serde::{Deserialize, Serialize};

/// Line wrapping for rendered captions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WrapConfig {
    pub max_chars_per_line: usize,
    pub max_lines: usize,
}

impl Default for WrapConfig {
    fn default() -> Self {
        Self {
            max_chars_per_line: 60,
            max_lines: 2,
        }
    }
}

/// Greedy word wrap.
///
/// Words are never split or dropped: text that does not fit in
/// `max_lines` lines is appended to the last line.
pub fn wrap_text(text: &str, wrap: &WrapConfig) -> Vec<String> {
    let mut lines: Vec<String> = Vec::new();
    let mut current = String::new();

    for word in text.split_whitespace() {
        let fits = current.is_empty()
            || current.chars().count() + 1 + word.chars().count() <= wrap.max_chars_per_line;
        if !fits && lines.len() + 1 < wrap.max_lines.max(1) {
            lines.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

/// Format milliseconds as `HH:MM:SS<sep>mmm`.
fn format_timestamp(ms: u64, separator: char) -> String {
    let millis = ms % 1000;
    let total_secs = ms / 1000;
    let secs = total_secs % 60;
    let mins = (total_secs / 60) % 60;
    let hours = total_secs / 3600;
    format!("{:02}:{:02}:{:02}{}{:03}", hours, mins, secs, separator, millis)
}

pub fn format_srt_time(ms: u64) -> String {
    format_timestamp(ms, ',')
}

pub fn format_vtt_time(ms: u64) -> String {
    format_timestamp(ms, '.')
}

/// Render segments as a SubRip (`.srt`) document.
pub fn render_srt(segments: &[CaptionSegment], wrap: &WrapConfig) -> String {
    let mut out = String::new();
    for (i, seg) in segments.iter().enumerate() {
        out.push_str(&(i + 1).to_string());
        out.push('\n');
        out.push_str(&format!(
            "{} --> {}\n",
            format_srt_time(seg.start_ms),
            format_srt_time(seg.end_ms)
        ));
        for line in wrap_text(&seg.text, wrap) {
            out.push_str(&line);
            out.push('\n');
        }
        out.push('\n');
    }
    out
}

/// Render segments as a WebVTT (`.vtt`) document.
pub fn render_vtt(segments: &[CaptionSegment], wrap: &WrapConfig) -> String {
    let mut out = String::from("WEBVTT\n\n");
    for seg in segments {
        out.push_str(&format!(
            "{} --> {}\n",
            format_vtt_time(seg.start_ms),
            format_vtt_time(seg.end_ms)
        ));
        for line in wrap_text(&seg.text, wrap) {
            out.push_str(&line);
            out.push('\n');
        }
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segment(start_ms: u64, end_ms: u64, text: &str) -> CaptionSegment {
        CaptionSegment {
            start_ms,
            end_ms,
            text: text.to_string(),
        }
    }

    #[test]
    fn test_timestamp_formats() {
        assert_eq!(format_srt_time(0), "00:00:00,000");
        assert_eq!(format_srt_time(3_723_045), "01:02:03,045");
        assert_eq!(format_vtt_time(61_500), "00:01:01.500");
    }

    #[test]
    fn test_render_srt() {
        let srt = render_srt(
            &[segment(0, 1300, "The movie was great."), segment(1300, 2000, "Really.")],
            &WrapConfig::default(),
        );
        assert_eq!(
            srt,
            "1\n00:00:00,000 --> 00:00:01,300\nThe movie was great.\n\n\
             2\n00:00:01,300 --> 00:00:02,000\nReally.\n\n"
        );
    }

    #[test]
    fn test_render_vtt_header() {
        let vtt = render_vtt(&[segment(0, 500, "Hi.")], &WrapConfig::default());
        assert!(vtt.starts_with("WEBVTT\n\n00:00:00.000 --> 00:00:00.500\nHi.\n"));
    }

    #[test]
    fn test_wrap_keeps_every_word() {
        let wrap = WrapConfig {
            max_chars_per_line: 10,
            max_lines: 2,
        };
        let lines = wrap_text("one two three four five six", &wrap);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], "one two");
        assert_eq!(lines.join(" "), "one two three four five six");
    }
}
