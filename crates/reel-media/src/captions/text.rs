//! Script text cleanup shared by narration and captions.

/// Strip markdown emphasis and heading markers and collapse whitespace.
///
/// Paragraph breaks survive as a single newline so sentence structure
/// stays visible to the narrator.
pub fn clean_script(script: &str) -> String {
    script
        .lines()
        .map(|line| {
            let line = line.trim().trim_start_matches('#').replace(['*', '_'], "");
            line.split_whitespace().collect::<Vec<_>>().join(" ")
        })
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Number of whitespace-separated words.
pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_script() {
        let raw = "## Hook\n\n**What if** the _world_ was   a simulation?\n\n\nThink   about it.";
        assert_eq!(
            clean_script(raw),
            "Hook\nWhat if the world was a simulation?\nThink about it."
        );
    }

    #[test]
    fn test_word_count() {
        assert_eq!(word_count(" one  two\nthree "), 3);
    }
}
