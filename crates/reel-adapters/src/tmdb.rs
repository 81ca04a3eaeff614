//! Movie lookup against The Movie Database (TMDb) v3 API.

use async_trait::async_trait;
use chrono::NaiveDate;
use reel_models::{SubjectMetadata, SubjectQuery};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info};

use crate::adapter::Adapter;
use crate::error::{AdapterError, AdapterResult};
use crate::http::{build_client, check_response, env_var, require_env, DEFAULT_TIMEOUT_SECS};

const NAME: &str = "tmdb";
const DEFAULT_BASE_URL: &str = "https://api.themoviedb.org/3";
const MAX_CAST: usize = 5;

/// TMDb client configuration.
#[derive(Debug, Clone)]
pub struct TmdbConfig {
    /// v4 read access token, sent as a bearer token
    pub access_token: String,
    pub base_url: String,
    pub timeout: Duration,
}

impl TmdbConfig {
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }

    /// Load from `TMDB_API_KEY` and optional `TMDB_BASE_URL`.
    pub fn from_env() -> AdapterResult<Self> {
        let mut config = Self::new(require_env("TMDB_API_KEY")?);
        if let Some(base_url) = env_var("TMDB_BASE_URL") {
            config.base_url = base_url;
        }
        Ok(config)
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[derive(Debug, Deserialize)]
struct ResultPage {
    #[serde(default)]
    results: Vec<Candidate>,
}

#[derive(Debug, Clone, Deserialize)]
struct Candidate {
    id: u64,
    #[serde(default)]
    title: String,
    #[serde(default)]
    vote_average: f64,
    #[serde(default)]
    release_date: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Details {
    id: u64,
    title: String,
    #[serde(default)]
    overview: Option<String>,
    #[serde(default)]
    release_date: Option<String>,
    #[serde(default)]
    vote_average: f64,
    #[serde(default)]
    runtime: Option<u32>,
    #[serde(default)]
    genres: Vec<Named>,
    #[serde(default)]
    credits: Option<Credits>,
}

#[derive(Debug, Deserialize)]
struct Named {
    name: String,
}

#[derive(Debug, Default, Deserialize)]
struct Credits {
    #[serde(default)]
    cast: Vec<Named>,
    #[serde(default)]
    crew: Vec<CrewMember>,
}

#[derive(Debug, Deserialize)]
struct CrewMember {
    name: String,
    #[serde(default)]
    job: String,
}

/// Subject source backed by TMDb trending and popular lists.
pub struct TmdbAdapter {
    http: Client,
    config: TmdbConfig,
}

impl TmdbAdapter {
    pub fn new(config: TmdbConfig) -> AdapterResult<Self> {
        Ok(Self {
            http: build_client(config.timeout)?,
            config,
        })
    }

    async fn get<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> AdapterResult<T> {
        let url = format!("{}{}", self.config.base_url.trim_end_matches('/'), path);
        let response = self
            .http
            .get(&url)
            .bearer_auth(&self.config.access_token)
            .query(query)
            .send()
            .await?;
        let response = check_response(NAME, response).await?;
        Ok(response.json().await?)
    }

    async fn candidates(&self, query: &SubjectQuery) -> AdapterResult<Vec<Candidate>> {
        let trending: ResultPage = self
            .get(&format!("/trending/movie/{}", query.time_window), &[("page", "1")])
            .await?;
        if !trending.results.is_empty() {
            return Ok(trending.results);
        }

        debug!("Trending list empty, falling back to popular movies");
        let popular: ResultPage = self.get("/movie/popular", &[("page", "1")]).await?;
        Ok(popular.results)
    }
}

/// Pick the first candidate meeting the rating and recency preferences,
/// else the first candidate.
fn select_candidate(candidates: &[Candidate], query: &SubjectQuery) -> Option<Candidate> {
    let qualifies = |c: &&Candidate| {
        let recent = match (query.released_after, c.release_date.as_deref()) {
            (None, _) => true,
            (Some(after), Some(date)) => NaiveDate::parse_from_str(date, "%Y-%m-%d")
                .map(|d| d >= after)
                .unwrap_or(false),
            (Some(_), None) => false,
        };
        c.vote_average >= query.min_rating && recent
    };
    candidates
        .iter()
        .find(qualifies)
        .or_else(|| candidates.first())
        .cloned()
}

impl From<Details> for SubjectMetadata {
    fn from(details: Details) -> Self {
        let credits = details.credits.unwrap_or_default();
        SubjectMetadata {
            id: details.id,
            title: details.title,
            overview: details.overview.unwrap_or_default(),
            release_date: details.release_date.unwrap_or_default(),
            vote_average: details.vote_average,
            runtime_minutes: details.runtime.filter(|r| *r > 0),
            genres: details.genres.into_iter().map(|g| g.name).collect(),
            director: credits
                .crew
                .into_iter()
                .find(|c| c.job == "Director")
                .map(|c| c.name),
            cast: credits.cast.into_iter().take(MAX_CAST).map(|c| c.name).collect(),
        }
    }
}

#[async_trait]
impl Adapter for TmdbAdapter {
    type Request = SubjectQuery;
    type Response = SubjectMetadata;

    fn name(&self) -> &'static str {
        NAME
    }

    async fn invoke(&self, query: &SubjectQuery) -> AdapterResult<SubjectMetadata> {
        let candidates = self.candidates(query).await?;
        let chosen = select_candidate(&candidates, query)
            .ok_or_else(|| AdapterError::EmptyResult("no trending or popular movies".into()))?;

        info!(id = chosen.id, title = %chosen.title, "Selected subject");

        let details: Details = self
            .get(
                &format!("/movie/{}", chosen.id),
                &[("append_to_response", "credits")],
            )
            .await?;
        if details.title.trim().is_empty() {
            return Err(AdapterError::invalid_response("movie details without a title"));
        }
        Ok(details.into())
    }

    async fn probe(&self) -> AdapterResult<String> {
        let _: serde_json::Value = self.get("/configuration", &[]).await?;
        Ok("TMDb reachable".to_string())
    }
}
