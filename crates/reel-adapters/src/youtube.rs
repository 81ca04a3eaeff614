//! Publishing via the YouTube Data API v3.
//!
//! Flow: refresh-token exchange, resumable upload session, chunked PUTs,
//! then an optional custom thumbnail and playlist insert. Thumbnail and
//! playlist failures are logged and recorded on the receipt; they never
//! fail the upload.

use async_trait::async_trait;
use reel_models::{PublishReceipt, VideoMetadata};
use reqwest::header::{CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE, LOCATION, RANGE};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::adapter::Adapter;
use crate::error::{AdapterError, AdapterResult};
use crate::http::{build_client, check_response, env_var, require_env};

const NAME: &str = "youtube";
const DEFAULT_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const DEFAULT_API_BASE: &str = "https://www.googleapis.com";

/// Resumable chunks must be a multiple of 256 KiB.
pub const DEFAULT_CHUNK_SIZE: usize = 32 * 256 * 1024;

/// Refresh the access token this long before it expires.
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(60);

/// YouTube client configuration.
#[derive(Debug, Clone)]
pub struct YouTubeConfig {
    pub client_id: String,
    pub client_secret: String,
    pub refresh_token: String,
    /// Playlist every upload is added to
    pub playlist_id: Option<String>,
    pub token_url: String,
    /// Base for metadata endpoints
    pub api_base: String,
    /// Base for media upload endpoints
    pub upload_base: String,
    pub chunk_size: usize,
    pub timeout: Duration,
}

impl YouTubeConfig {
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        refresh_token: impl Into<String>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            refresh_token: refresh_token.into(),
            playlist_id: None,
            token_url: DEFAULT_TOKEN_URL.to_string(),
            api_base: DEFAULT_API_BASE.to_string(),
            upload_base: DEFAULT_API_BASE.to_string(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            timeout: Duration::from_secs(600),
        }
    }

    /// Load from `YOUTUBE_CLIENT_ID`, `YOUTUBE_CLIENT_SECRET`,
    /// `YOUTUBE_REFRESH_TOKEN` and optional `YOUTUBE_PLAYLIST_ID`.
    pub fn from_env() -> AdapterResult<Self> {
        let mut config = Self::new(
            require_env("YOUTUBE_CLIENT_ID")?,
            require_env("YOUTUBE_CLIENT_SECRET")?,
            require_env("YOUTUBE_REFRESH_TOKEN")?,
        );
        config.playlist_id = env_var("YOUTUBE_PLAYLIST_ID");
        Ok(config)
    }

    /// Point every endpoint at one server (tests, proxies).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        let base = base_url.into();
        self.token_url = format!("{}/token", base.trim_end_matches('/'));
        self.api_base = base.clone();
        self.upload_base = base;
        self
    }
}

/// Final video plus metadata to publish.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadRequest {
    pub video: PathBuf,
    #[serde(default)]
    pub thumbnail: Option<PathBuf>,
    pub metadata: VideoMetadata,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct UploadedVideo {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ChannelList {
    #[serde(default)]
    items: Vec<Channel>,
}

#[derive(Debug, Deserialize)]
struct Channel {
    id: String,
}

struct CachedToken {
    value: String,
    expires_at: Instant,
}

/// Upload adapter backed by the YouTube Data API.
pub struct YouTubeAdapter {
    http: Client,
    config: YouTubeConfig,
    token: Mutex<Option<CachedToken>>,
}

/// Snippet and status body for `videos.insert`.
fn video_resource(metadata: &VideoMetadata) -> serde_json::Value {
    let mut status = json!({
        "privacyStatus": metadata.privacy_status.as_str(),
        "selfDeclaredMadeForKids": false,
    });
    if let Some(publish_at) = metadata.publish_at {
        // Scheduled publishing only works on private videos.
        status["privacyStatus"] = json!("private");
        status["publishAt"] = json!(publish_at.to_rfc3339());
    }
    json!({
        "snippet": {
            "title": metadata.title,
            "description": metadata.description,
            "tags": metadata.tags,
            "categoryId": metadata.category_id,
        },
        "status": status,
    })
}

/// Parse the `Range: bytes=0-N` header of a 308 response into the next offset.
fn next_offset(range: Option<&str>) -> Option<u64> {
    let end = range?.trim().strip_prefix("bytes=")?.split('-').nth(1)?;
    end.parse::<u64>().ok().map(|n| n + 1)
}

impl YouTubeAdapter {
    pub fn new(config: YouTubeConfig) -> AdapterResult<Self> {
        Ok(Self {
            http: build_client(config.timeout)?,
            config,
            token: Mutex::new(None),
        })
    }

    async fn access_token(&self) -> AdapterResult<String> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if Instant::now() + TOKEN_EXPIRY_MARGIN < token.expires_at {
                return Ok(token.value.clone());
            }
        }

        debug!("Refreshing YouTube access token");
        let response = self
            .http
            .post(&self.config.token_url)
            .form(&[
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
                ("refresh_token", self.config.refresh_token.as_str()),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await?;
        // A rejected refresh token comes back as 400 invalid_grant.
        let response = check_response(NAME, response).await.map_err(|e| match e {
            AdapterError::InvalidRequest(_, body) => AdapterError::InvalidCredential(body),
            other => other,
        })?;
        let token: TokenResponse = response.json().await?;

        let value = token.access_token.clone();
        *cached = Some(CachedToken {
            value: token.access_token,
            expires_at: Instant::now() + Duration::from_secs(token.expires_in.unwrap_or(3600)),
        });
        Ok(value)
    }

    async fn start_session(&self, token: &str, request: &UploadRequest, total: u64) -> AdapterResult<String> {
        let url = format!(
            "{}/upload/youtube/v3/videos",
            self.config.upload_base.trim_end_matches('/')
        );
        let response = self
            .http
            .post(url)
            .bearer_auth(token)
            .query(&[("uploadType", "resumable"), ("part", "snippet,status")])
            .header("X-Upload-Content-Type", "video/mp4")
            .header("X-Upload-Content-Length", total.to_string())
            .json(&video_resource(&request.metadata))
            .send()
            .await?;
        let response = check_response(NAME, response).await?;
        response
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| AdapterError::invalid_response("resumable session without Location"))
    }

    async fn upload_chunks(&self, token: &str, session: &str, request: &UploadRequest, total: u64) -> AdapterResult<String> {
        let mut file = tokio::fs::File::open(&request.video).await?;
        let mut offset = 0u64;

        loop {
            file.seek(std::io::SeekFrom::Start(offset)).await?;
            let mut chunk = Vec::with_capacity(self.config.chunk_size);
            (&mut file)
                .take(self.config.chunk_size as u64)
                .read_to_end(&mut chunk)
                .await?;
            if chunk.is_empty() {
                return Err(AdapterError::invalid_response(format!(
                    "upload incomplete at {} of {} bytes",
                    offset, total
                )));
            }
            let end = offset + chunk.len() as u64 - 1;
            debug!(offset, end, total, "Uploading chunk");

            let response = self
                .http
                .put(session)
                .bearer_auth(token)
                .header(CONTENT_LENGTH, chunk.len())
                .header(CONTENT_RANGE, format!("bytes {}-{}/{}", offset, end, total))
                .body(chunk)
                .send()
                .await?;

            if response.status() == StatusCode::PERMANENT_REDIRECT {
                let range = response.headers().get(RANGE).and_then(|v| v.to_str().ok());
                offset = next_offset(range).unwrap_or(end + 1);
                continue;
            }

            let video: UploadedVideo = check_response(NAME, response).await?.json().await?;
            return Ok(video.id);
        }
    }

    async fn set_thumbnail(&self, token: &str, video_id: &str, thumbnail: &Path) -> AdapterResult<()> {
        let bytes = tokio::fs::read(thumbnail).await?;
        let url = format!(
            "{}/upload/youtube/v3/thumbnails/set",
            self.config.upload_base.trim_end_matches('/')
        );
        let response = self
            .http
            .post(url)
            .bearer_auth(token)
            .query(&[("videoId", video_id)])
            .header(CONTENT_TYPE, "image/jpeg")
            .body(bytes)
            .send()
            .await?;
        check_response(NAME, response).await?;
        Ok(())
    }

    async fn add_to_playlist(&self, token: &str, playlist_id: &str, video_id: &str) -> AdapterResult<()> {
        let url = format!(
            "{}/youtube/v3/playlistItems",
            self.config.api_base.trim_end_matches('/')
        );
        let response = self
            .http
            .post(url)
            .bearer_auth(token)
            .query(&[("part", "snippet")])
            .json(&json!({
                "snippet": {
                    "playlistId": playlist_id,
                    "resourceId": {"kind": "youtube#video", "videoId": video_id}
                }
            }))
            .send()
            .await?;
        check_response(NAME, response).await?;
        Ok(())
    }
}

#[async_trait]
impl Adapter for YouTubeAdapter {
    type Request = UploadRequest;
    type Response = PublishReceipt;

    fn name(&self) -> &'static str {
        NAME
    }

    async fn invoke(&self, request: &UploadRequest) -> AdapterResult<PublishReceipt> {
        let total = tokio::fs::metadata(&request.video).await?.len();
        if total == 0 {
            return Err(AdapterError::InvalidRequest(400, "video file is empty".into()));
        }

        let token = self.access_token().await?;
        let session = self.start_session(&token, request, total).await?;
        let video_id = self.upload_chunks(&token, &session, request, total).await?;
        info!(video_id = %video_id, bytes = total, "Video uploaded");

        let mut receipt = PublishReceipt::new(&video_id);

        if let Some(thumbnail) = &request.thumbnail {
            match self.set_thumbnail(&token, &video_id, thumbnail).await {
                Ok(()) => receipt.thumbnail_set = true,
                Err(e) => warn!(video_id = %video_id, error = %e, "Thumbnail upload failed"),
            }
        }

        if let Some(playlist_id) = &self.config.playlist_id {
            match self.add_to_playlist(&token, playlist_id, &video_id).await {
                Ok(()) => receipt.playlist_id = Some(playlist_id.clone()),
                Err(e) => warn!(video_id = %video_id, error = %e, "Playlist insert failed"),
            }
        }

        Ok(receipt)
    }

    async fn probe(&self) -> AdapterResult<String> {
        let token = self.access_token().await?;
        let url = format!("{}/youtube/v3/channels", self.config.api_base.trim_end_matches('/'));
        let response = self
            .http
            .get(url)
            .bearer_auth(&token)
            .query(&[("part", "id"), ("mine", "true")])
            .send()
            .await?;
        let channels: ChannelList = check_response(NAME, response).await?.json().await?;
        let channel = channels
            .items
            .first()
            .ok_or_else(|| AdapterError::InvalidCredential("token has no channel".into()))?;
        Ok(format!("authorized for channel {}", channel.id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reel_models::{FailureKind, PrivacyStatus, SubjectMetadata};
    use tempfile::TempDir;
    use wiremock::matchers::{body_string_contains, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn metadata() -> VideoMetadata {
        let subject = SubjectMetadata {
            id: 1,
            title: "Arrival".into(),
            overview: String::new(),
            release_date: "2016-11-10".into(),
            vote_average: 7.6,
            runtime_minutes: None,
            genres: vec!["Drama".into()],
            director: None,
            cast: vec![],
        };
        VideoMetadata::for_subject(&subject, PrivacyStatus::Unlisted)
    }

    async fn mount_token(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "ya29.test", "expires_in": 3599, "token_type": "Bearer"
            })))
            .mount(server)
            .await;
    }

    async fn mount_session(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/upload/youtube/v3/videos"))
            .and(query_param("uploadType", "resumable"))
            .and(header("authorization", "Bearer ya29.test"))
            .and(body_string_contains("\"privacyStatus\":\"unlisted\""))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Location", format!("{}/session/abc", server.uri()).as_str()),
            )
            .mount(server)
            .await;
    }

    fn adapter(server: &MockServer, chunk_size: usize, playlist: Option<&str>) -> YouTubeAdapter {
        let mut config = YouTubeConfig::new("id", "secret", "refresh").with_base_url(server.uri());
        config.chunk_size = chunk_size;
        config.playlist_id = playlist.map(str::to_string);
        YouTubeAdapter::new(config).unwrap()
    }

    async fn write_video(dir: &TempDir, len: usize) -> PathBuf {
        let path = dir.path().join("final.mp4");
        tokio::fs::write(&path, vec![7u8; len]).await.unwrap();
        path
    }

    #[tokio::test]
    async fn test_uploads_in_chunks_and_sets_extras() {
        let server = MockServer::start().await;
        mount_token(&server).await;
        mount_session(&server).await;
        Mock::given(method("PUT"))
            .and(path("/session/abc"))
            .and(header("content-range", "bytes 0-5/10"))
            .respond_with(ResponseTemplate::new(308).insert_header("Range", "bytes=0-5"))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/session/abc"))
            .and(header("content-range", "bytes 6-9/10"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "vid123"})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/upload/youtube/v3/thumbnails/set"))
            .and(query_param("videoId", "vid123"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/youtube/v3/playlistItems"))
            .and(body_string_contains("PL123"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let video = write_video(&dir, 10).await;
        let thumbnail = dir.path().join("thumbnail.jpg");
        tokio::fs::write(&thumbnail, b"jpeg").await.unwrap();

        let receipt = adapter(&server, 6, Some("PL123"))
            .invoke(&UploadRequest {
                video,
                thumbnail: Some(thumbnail),
                metadata: metadata(),
            })
            .await
            .unwrap();

        assert_eq!(receipt.video_id, "vid123");
        assert_eq!(receipt.url, "https://www.youtube.com/watch?v=vid123");
        assert!(receipt.thumbnail_set);
        assert_eq!(receipt.playlist_id.as_deref(), Some("PL123"));
    }

    #[tokio::test]
    async fn test_thumbnail_failure_does_not_fail_upload() {
        let server = MockServer::start().await;
        mount_token(&server).await;
        mount_session(&server).await;
        Mock::given(method("PUT"))
            .and(path("/session/abc"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": "vid9"})))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/upload/youtube/v3/thumbnails/set"))
            .respond_with(ResponseTemplate::new(403).set_body_json(json!({
                "error": {"errors": [{"reason": "forbidden"}]}
            })))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let video = write_video(&dir, 4).await;
        let thumbnail = dir.path().join("thumbnail.jpg");
        tokio::fs::write(&thumbnail, b"jpeg").await.unwrap();

        let receipt = adapter(&server, DEFAULT_CHUNK_SIZE, None)
            .invoke(&UploadRequest { video, thumbnail: Some(thumbnail), metadata: metadata() })
            .await
            .unwrap();
        assert_eq!(receipt.video_id, "vid9");
        assert!(!receipt.thumbnail_set);
        assert!(receipt.playlist_id.is_none());
    }

    #[tokio::test]
    async fn test_revoked_refresh_token_is_invalid_credential() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": "invalid_grant", "error_description": "Token has been expired or revoked."
            })))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let video = write_video(&dir, 4).await;
        let err = adapter(&server, DEFAULT_CHUNK_SIZE, None)
            .invoke(&UploadRequest { video, thumbnail: None, metadata: metadata() })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), FailureKind::InvalidCredential);
    }

    #[tokio::test]
    async fn test_upload_quota_is_quota_exhausted() {
        let server = MockServer::start().await;
        mount_token(&server).await;
        Mock::given(method("POST"))
            .and(path("/upload/youtube/v3/videos"))
            .respond_with(ResponseTemplate::new(403).set_body_json(json!({
                "error": {"code": 403, "errors": [{"reason": "quotaExceeded", "domain": "youtube.quota"}]}
            })))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let video = write_video(&dir, 4).await;
        let err = adapter(&server, DEFAULT_CHUNK_SIZE, None)
            .invoke(&UploadRequest { video, thumbnail: None, metadata: metadata() })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), FailureKind::QuotaExhausted);
    }

    #[test]
    fn test_scheduled_publish_forces_private() {
        let mut meta = metadata();
        meta.publish_at = Some(chrono::Utc::now());
        let body = video_resource(&meta);
        assert_eq!(body["status"]["privacyStatus"], "private");
        assert!(body["status"]["publishAt"].is_string());
        assert_eq!(body["status"]["selfDeclaredMadeForKids"], false);
    }

    #[test]
    fn test_next_offset_from_range() {
        assert_eq!(next_offset(Some("bytes=0-262143")), Some(262144));
        assert_eq!(next_offset(None), None);
        assert_eq!(next_offset(Some("garbage")), None);
    }
}
