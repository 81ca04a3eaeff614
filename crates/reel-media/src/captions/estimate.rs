//! Estimated word timing for narration without a timing signal.

use reel_models::TimingEvent;

/// Average narration pace used when the audio length is unknown.
pub const WORDS_PER_MINUTE: u64 = 150;

/// Spread the script's words uniformly over the narration.
///
/// With a known audio length the words share it evenly; otherwise each
/// word gets `60_000 / WORDS_PER_MINUTE` milliseconds. Integer division
/// is done on cumulative offsets so the last word ends exactly at the
/// total and events never overlap.
pub fn estimate_timing(script: &str, audio_duration_ms: Option<u64>) -> Vec<TimingEvent> {
    let words: Vec<&str> = script.split_whitespace().collect();
    if words.is_empty() {
        return Vec::new();
    }

    let count = words.len() as u64;
    let total_ms = match audio_duration_ms {
        Some(ms) if ms > 0 => ms,
        _ => count * 60_000 / WORDS_PER_MINUTE,
    };

    words
        .iter()
        .enumerate()
        .map(|(i, word)| {
            let i = i as u64;
            TimingEvent::new(*word, i * total_ms / count, (i + 1) * total_ms / count)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uses_speaking_rate_without_duration() {
        let events = estimate_timing("one two three", None);
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].end_ms, 400);
        assert_eq!(events[2].end_ms, 1_200);
    }

    #[test]
    fn test_spreads_over_known_duration() {
        let events = estimate_timing("a b c", Some(1_000));
        assert_eq!(events.last().map(|e| e.end_ms), Some(1_000));
        for pair in events.windows(2) {
            assert_eq!(pair[0].end_ms, pair[1].start_ms);
        }
    }

    #[test]
    fn test_empty_script() {
        assert!(estimate_timing("   ", Some(5_000)).is_empty());
    }
}
