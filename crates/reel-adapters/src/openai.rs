//! Script generation via OpenAI chat completions.

use async_trait::async_trait;
use reel_models::{Failure, FailureKind, SubjectMetadata};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

use crate::adapter::Adapter;
use crate::error::{AdapterError, AdapterResult, TOO_LONG, TOO_SHORT};
use crate::http::{build_client, check_response, env_var, require_env};

const NAME: &str = "openai";
const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4";
const MAX_TOKENS: u32 = 4000;
const TEMPERATURE: f32 = 0.7;

/// OpenAI client configuration.
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    pub timeout: Duration,
}

impl OpenAiConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: DEFAULT_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: Duration::from_secs(180),
        }
    }

    /// Load from `OPENAI_API_KEY`, `OPENAI_MODEL` and `OPENAI_BASE_URL`.
    pub fn from_env() -> AdapterResult<Self> {
        let mut config = Self::new(require_env("OPENAI_API_KEY")?);
        if let Some(model) = env_var("OPENAI_MODEL") {
            config.model = model;
        }
        if let Some(base_url) = env_var("OPENAI_BASE_URL") {
            config.base_url = base_url;
        }
        Ok(config)
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

/// How to steer a retried generation after a rejected draft.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScriptAdjustment {
    /// The previous draft tripped the content filter
    SafeContent,
    /// The previous draft was too short
    Lengthen,
    /// The previous draft was too long
    Shorten,
}

impl ScriptAdjustment {
    /// Adjustment for the failure of the previous attempt, if any applies.
    pub fn for_failure(failure: &Failure) -> Option<Self> {
        match failure.kind {
            FailureKind::ContentPolicyRejection => Some(Self::SafeContent),
            FailureKind::LengthOutOfRange if failure.message.contains(TOO_SHORT) => {
                Some(Self::Lengthen)
            }
            FailureKind::LengthOutOfRange if failure.message.contains(TOO_LONG) => {
                Some(Self::Shorten)
            }
            _ => None,
        }
    }

    fn instruction(&self, min_words: u32, max_words: u32) -> String {
        match self {
            Self::SafeContent => "Your previous answer was rejected by the content filter. \
                Describe violence, abuse and other sensitive plot points in neutral, \
                non-graphic language suitable for a general audience."
                .to_string(),
            Self::Lengthen => format!(
                "Your previous answer was far too short. Write at least {} words; \
                 expand every section with more detail.",
                min_words
            ),
            Self::Shorten => format!(
                "Your previous answer was far too long. Stay under {} words; \
                 tighten every section.",
                max_words
            ),
        }
    }
}

/// Request for one script draft.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptRequest {
    pub subject: SubjectMetadata,
    pub min_words: u32,
    pub max_words: u32,
    #[serde(default)]
    pub adjustment: Option<ScriptAdjustment>,
}

/// Generated narration script.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptDraft {
    pub text: String,
    pub word_count: usize,
    pub model: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    refusal: Option<String>,
}

impl ChatMessage {
    fn new(role: &str, content: String) -> Self {
        Self {
            role: role.to_string(),
            content: Some(content),
            refusal: None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChatMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

/// Script generator backed by the chat completions endpoint.
pub struct OpenAiAdapter {
    http: Client,
    config: OpenAiConfig,
}

impl OpenAiAdapter {
    pub fn new(config: OpenAiConfig) -> AdapterResult<Self> {
        Ok(Self {
            http: build_client(config.timeout)?,
            config,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }
}

fn system_prompt(min_words: u32, max_words: u32) -> String {
    format!(
        "You are a film analyst writing narration for a long-form YouTube movie breakdown. \
         Write {min}-{max} words of flowing spoken prose, with no headings, bullet points, \
         stage directions or markdown. Cover, in order: a hook, the premise, a plot \
         walkthrough, the main characters and performances, themes and symbolism, \
         direction and craft, the ending explained, and final thoughts. \
         Include spoilers and say so at the start.",
        min = min_words,
        max = max_words
    )
}

fn user_prompt(subject: &SubjectMetadata) -> String {
    let or_unknown = |v: Option<String>| v.unwrap_or_else(|| "Unknown".to_string());
    let list = |items: &[String]| {
        if items.is_empty() {
            "Unknown".to_string()
        } else {
            items.join(", ")
        }
    };
    format!(
        "Movie: {title}\nDirector: {director}\nRelease date: {release}\nRating: {rating:.1}/10\n\
         Runtime: {runtime}\nGenres: {genres}\nCast: {cast}\n\nOverview: {overview}",
        title = subject.title,
        director = or_unknown(subject.director.clone()),
        release = if subject.release_date.is_empty() {
            "Unknown"
        } else {
            subject.release_date.as_str()
        },
        rating = subject.vote_average,
        runtime = or_unknown(subject.runtime_minutes.map(|m| format!("{} minutes", m))),
        genres = list(&subject.genres),
        cast = list(&subject.cast),
        overview = subject.overview,
    )
}

/// Reject drafts below half the minimum or above one and a half times the maximum.
pub fn check_length(words: usize, min_words: u32, max_words: u32) -> AdapterResult<()> {
    let floor = (min_words as f64 * 0.5).floor() as usize;
    let ceiling = (max_words as f64 * 1.5).ceil() as usize;
    let direction = if words < floor {
        TOO_SHORT
    } else if words > ceiling {
        TOO_LONG
    } else {
        return Ok(());
    };
    Err(AdapterError::LengthOutOfRange {
        direction,
        actual: words,
        min: min_words,
        max: max_words,
    })
}

#[async_trait]
impl Adapter for OpenAiAdapter {
    type Request = ScriptRequest;
    type Response = ScriptDraft;

    fn name(&self) -> &'static str {
        NAME
    }

    async fn invoke(&self, request: &ScriptRequest) -> AdapterResult<ScriptDraft> {
        let mut system = system_prompt(request.min_words, request.max_words);
        if let Some(adjustment) = request.adjustment {
            debug!(?adjustment, "Adjusting script prompt");
            system.push_str("\n\n");
            system.push_str(&adjustment.instruction(request.min_words, request.max_words));
        }

        let body = ChatRequest {
            model: &self.config.model,
            messages: vec![
                ChatMessage::new("system", system),
                ChatMessage::new("user", user_prompt(&request.subject)),
            ],
            max_tokens: MAX_TOKENS,
            temperature: TEMPERATURE,
        };

        let response = self
            .http
            .post(self.url("/chat/completions"))
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await?;
        let response: ChatResponse = check_response(NAME, response).await?.json().await?;

        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| AdapterError::invalid_response("no choices in completion"))?;

        if choice.finish_reason.as_deref() == Some("content_filter") {
            return Err(AdapterError::ContentPolicy("completion stopped by content filter".into()));
        }
        if let Some(refusal) = choice.message.refusal.filter(|r| !r.is_empty()) {
            return Err(AdapterError::ContentPolicy(refusal));
        }

        let text = choice
            .message
            .content
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .ok_or_else(|| AdapterError::invalid_response("empty completion"))?;

        let word_count = text.split_whitespace().count();
        check_length(word_count, request.min_words, request.max_words)?;

        info!(words = word_count, title = %request.subject.title, "Generated script");

        Ok(ScriptDraft {
            text,
            word_count,
            model: response.model.unwrap_or_else(|| self.config.model.clone()),
        })
    }

    async fn probe(&self) -> AdapterResult<String> {
        let response = self
            .http
            .get(self.url(&format!("/models/{}", self.config.model)))
            .bearer_auth(&self.config.api_key)
            .send()
            .await?;
        check_response(NAME, response).await?;
        Ok(format!("model {} available", self.config.model))
    }
}
