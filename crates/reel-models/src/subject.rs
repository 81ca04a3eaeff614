//! Subject (movie) metadata, generated video metadata and publish receipts.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::PrivacyStatus;

/// YouTube allows at most 50 tags per video.
pub const MAX_TAGS: usize = 50;

/// YouTube "Entertainment" category.
pub const ENTERTAINMENT_CATEGORY: &str = "24";

/// Query sent to the subject lookup service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubjectQuery {
    /// Trending window: "day" or "week"
    pub time_window: String,
    /// Preferred minimum vote average
    pub min_rating: f64,
    /// Preferred earliest release date
    pub released_after: Option<NaiveDate>,
}

impl SubjectQuery {
    /// Build a query from a run's subject hint.
    ///
    /// Hints other than "day" map to the weekly window.
    pub fn from_hint(hint: &str) -> Self {
        let time_window = match hint.trim().to_lowercase().as_str() {
            "day" => "day",
            _ => "week",
        };
        Self {
            time_window: time_window.to_string(),
            min_rating: 6.0,
            released_after: NaiveDate::from_ymd_opt(2020, 1, 1),
        }
    }
}

/// Selected movie with the details the script needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubjectMetadata {
    pub id: u64,
    pub title: String,
    #[serde(default)]
    pub overview: String,
    /// `YYYY-MM-DD` as reported by the provider; may be empty
    #[serde(default)]
    pub release_date: String,
    #[serde(default)]
    pub vote_average: f64,
    #[serde(default)]
    pub runtime_minutes: Option<u32>,
    #[serde(default)]
    pub genres: Vec<String>,
    #[serde(default)]
    pub director: Option<String>,
    #[serde(default)]
    pub cast: Vec<String>,
}

impl SubjectMetadata {
    pub fn release_year(&self) -> Option<&str> {
        self.release_date.get(..4).filter(|y| y.chars().all(|c| c.is_ascii_digit()))
    }
}

/// Title, description and tags for the published video.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoMetadata {
    pub title: String,
    pub description: String,
    pub tags: Vec<String>,
    pub category_id: String,
    pub privacy_status: PrivacyStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publish_at: Option<DateTime<Utc>>,
}

impl VideoMetadata {
    /// Generate upload metadata for a subject.
    pub fn for_subject(subject: &SubjectMetadata, privacy_status: PrivacyStatus) -> Self {
        let year_suffix = subject
            .release_year()
            .map(|y| format!(" ({})", y))
            .unwrap_or_default();
        let title = format!(
            "{}{} - Complete Movie Breakdown & Analysis",
            subject.title, year_suffix
        );

        let genre_phrase = if subject.genres.is_empty() {
            String::from("feature")
        } else {
            subject
                .genres
                .iter()
                .take(2)
                .map(|g| g.to_lowercase())
                .collect::<Vec<_>>()
                .join(", ")
        };
        let hashtag: String = subject.title.chars().filter(|c| c.is_alphanumeric()).collect();

        let description = format!(
            "In-depth breakdown and analysis of {title}{year}\n\n\
             Join us for a comprehensive dive into this {genres} film, exploring its themes, \
             characters, cinematography, and deeper meanings.\n\n\
             SPOILER WARNING: This video contains detailed plot discussion including the ending.\n\n\
             What's covered:\n\
             - Plot summary and key moments\n\
             - Character analysis and performances\n\
             - Themes and symbolism\n\
             - Technical aspects and direction\n\
             - Ending explained in detail\n\
             - Final thoughts and takeaways\n\n\
             What did you think of {title}? Let us know in the comments!\n\n\
             #MovieBreakdown #{hashtag} #FilmAnalysis #MovieReview #Cinema",
            title = subject.title,
            year = year_suffix,
            genres = genre_phrase,
            hashtag = hashtag,
        );

        let mut tags = vec![
            subject.title.to_lowercase(),
            "movie breakdown".to_string(),
            "film analysis".to_string(),
            "movie review".to_string(),
            "cinema".to_string(),
            "movie explained".to_string(),
            "ending explained".to_string(),
        ];
        tags.extend(subject.genres.iter().map(|g| g.to_lowercase()));
        tags.dedup();
        tags.truncate(MAX_TAGS);

        Self {
            title,
            description,
            tags,
            category_id: ENTERTAINMENT_CATEGORY.to_string(),
            privacy_status,
            publish_at: None,
        }
    }
}

/// Result of a successful upload, written as `receipt.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishReceipt {
    pub video_id: String,
    pub url: String,
    pub published_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub playlist_id: Option<String>,
    /// Whether the custom thumbnail was accepted
    #[serde(default)]
    pub thumbnail_set: bool,
}

impl PublishReceipt {
    pub fn new(video_id: impl Into<String>) -> Self {
        let video_id = video_id.into();
        Self {
            url: format!("https://www.youtube.com/watch?v={}", video_id),
            video_id,
            published_at: Utc::now(),
            playlist_id: None,
            thumbnail_set: false,
        }
    }
}
