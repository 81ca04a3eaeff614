//! Search keywords for visual collection.
//!
//! Keywords are drawn, in order, from the subject's genres (each genre maps
//! to a handful of mood terms), the title, and the most frequent content
//! words of the script. Generic cinematic terms pad the list when the
//! other sources run dry.

use reel_models::SubjectMetadata;
use std::collections::HashMap;

/// Upper bound on keywords sent to visual search.
pub const MAX_KEYWORDS: usize = 8;

const GENERIC_TERMS: &[&str] = &[
    "cinematic",
    "film",
    "movie theater",
    "dramatic lighting",
    "storytelling",
    "film reel",
];

const STOPWORDS: &[&str] = &[
    "about", "above", "after", "again", "against", "along", "already", "also", "although",
    "among", "another", "around", "because", "before", "being", "below", "between", "beyond",
    "character", "characters", "could", "during", "every", "everything", "film", "films",
    "first", "found", "going", "great", "might", "movie", "movies", "never", "other",
    "really", "scene", "scenes", "should", "since", "something", "still", "story", "their",
    "there", "these", "thing", "things", "those", "though", "three", "through", "throughout",
    "together", "under", "until", "where", "whether", "which", "while", "whose", "without",
    "would", "yourself",
];

/// Mood terms for a genre name.
fn genre_moods(genre: &str) -> &'static [&'static str] {
    match genre.to_lowercase().as_str() {
        "action" | "thriller" | "horror" | "mystery" | "crime" | "war" => {
            &["dark cityscape", "dramatic lighting", "suspense"]
        }
        "romance" | "drama" => &["emotional", "intimate lighting", "sunset"],
        "science fiction" | "sci-fi" => &["futuristic", "technology", "space", "neon lights"],
        "fantasy" | "adventure" => &["magical", "epic landscape", "mystical"],
        "comedy" | "family" | "animation" => &["bright", "colorful", "happy"],
        _ => &[],
    }
}

/// Most frequent content words of the script, most frequent first.
///
/// Ties keep first-appearance order.
pub fn frequent_terms(script: &str, limit: usize) -> Vec<String> {
    let mut counts: HashMap<String, (usize, usize)> = HashMap::new();
    for (position, raw) in script.split_whitespace().enumerate() {
        let word: String = raw
            .trim_matches(|c: char| !c.is_alphanumeric())
            .to_lowercase();
        if word.chars().count() < 5
            || !word.chars().all(char::is_alphabetic)
            || STOPWORDS.contains(&word.as_str())
        {
            continue;
        }
        let entry = counts.entry(word).or_insert((0, position));
        entry.0 += 1;
    }

    let mut ranked: Vec<(String, usize, usize)> = counts
        .into_iter()
        .filter(|(_, (count, _))| *count >= 2)
        .map(|(word, (count, first))| (word, count, first))
        .collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.2.cmp(&b.2)));
    ranked.into_iter().take(limit).map(|(w, _, _)| w).collect()
}

/// Build the ordered, de-duplicated keyword list for a subject and script.
pub fn extract_keywords(subject: &SubjectMetadata, script: &str) -> Vec<String> {
    let mut keywords: Vec<String> = Vec::new();
    let mut push = |term: &str| {
        let term = term.trim().to_lowercase();
        if !term.is_empty() && !keywords.contains(&term) && keywords.len() < MAX_KEYWORDS {
            keywords.push(term);
        }
    };

    for genre in subject.genres.iter().take(2) {
        for mood in genre_moods(genre).iter().take(2) {
            push(mood);
        }
    }
    push(&subject.title);
    for term in frequent_terms(script, 3) {
        push(&term);
    }
    for term in GENERIC_TERMS {
        push(term);
    }
    keywords
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subject(genres: &[&str]) -> SubjectMetadata {
        SubjectMetadata {
            id: 1,
            title: "Blade Runner 2049".into(),
            overview: String::new(),
            release_date: "2017-10-04".into(),
            vote_average: 7.5,
            runtime_minutes: Some(164),
            genres: genres.iter().map(|g| g.to_string()).collect(),
            director: None,
            cast: vec![],
        }
    }

    #[test]
    fn test_genre_moods_come_first() {
        let keywords = extract_keywords(&subject(&["Science Fiction", "Drama"]), "");
        assert_eq!(
            &keywords[..5],
            &["futuristic", "technology", "emotional", "intimate lighting", "blade runner 2049"]
        );
        assert_eq!(keywords.len(), MAX_KEYWORDS);
    }

    #[test]
    fn test_frequent_terms_skip_stopwords_and_short_words() {
        let script = "The replicant hunts. The replicant hides. Memories fade, memories return. \
                      The movie movie movie is long.";
        assert_eq!(frequent_terms(script, 5), vec!["replicant", "memories"]);
    }

    #[test]
    fn test_no_duplicates_and_generic_padding() {
        let keywords = extract_keywords(&subject(&["Unknown Genre"]), "");
        assert_eq!(keywords[0], "blade runner 2049");
        assert!(keywords.contains(&"cinematic".to_string()));
        let mut deduped = keywords.clone();
        deduped.dedup();
        assert_eq!(deduped.len(), keywords.len());
    }
}
